// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Keyed-index archive provider (KEY/BIF).
//!
//! The oldest archive generation splits the index from the bulk data: a
//! `.key` file names every resource and points into numbered `.bif` files
//! holding the bytes. A key entry's 32-bit id packs the BIF number in the
//! top bits and the position within that BIF's variable-resource table in
//! the low 20. BIF files open lazily; a key that references twenty BIFs
//! costs one file handle until something is actually read.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::debug;

use crate::stream::ByteReader;

use super::provider::{ArchiveError, FileHandle, FileId, HandleTable, ResourceAccessor};
use super::{ResRef16, ResRef32, ResRefKind, ResType};

const KEY_SIGNATURE: [u8; 4] = *b"KEY ";
const BIF_SIGNATURE: [u8; 4] = *b"BIFF";
const KEY_BIF_VERSION: [u8; 4] = *b"V1  ";

const KEY_HEADER_SIZE: usize = 64;
const KEY_ENTRY_SIZE: usize = 22; // resref16 + type u16 + id u32, packed
const BIF_HEADER_SIZE: usize = 20;
const BIF_VARIABLE_ENTRY_SIZE: usize = 16;

struct KeyEntry {
    resref: ResRef16,
    res_type: ResType,
    bif_index: u32,
    variable_index: u32,
}

struct BifFile {
    file: File,
    /// `(offset, size)` per variable resource.
    variables: Vec<(u32, u32)>,
}

/// Provider over one `.key` index and its `.bif` bulk files.
pub struct KeyBifProvider {
    key_path: PathBuf,
    bif_paths: Vec<PathBuf>,
    entries: Vec<KeyEntry>,
    bifs: HashMap<u32, BifFile>,
    handles: HandleTable<usize>,
}

impl KeyBifProvider {
    /// Parse `key_path`; BIF names inside are resolved against `root`.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        key_path: P,
        root: Q,
    ) -> Result<Self, ArchiveError> {
        let key_path = key_path.as_ref().to_path_buf();
        let root = root.as_ref();
        let bytes = std::fs::read(&key_path)?;
        if bytes.len() < KEY_HEADER_SIZE {
            return Err(ArchiveError::Truncated {
                expected: KEY_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let mut r = ByteReader::new(&bytes);
        let mut signature = [0u8; 4];
        let mut version = [0u8; 4];
        r.read_exact(&mut signature).expect("length checked");
        r.read_exact(&mut version).expect("length checked");
        if signature != KEY_SIGNATURE || version != KEY_BIF_VERSION {
            return Err(ArchiveError::BadSignature { found: signature });
        }
        let bif_count = r.read_u32().expect("length checked");
        let key_count = r.read_u32().expect("length checked");
        let file_table_offset = r.read_u32().expect("length checked");
        let key_table_offset = r.read_u32().expect("length checked");

        let file_table_end =
            file_table_offset as u64 + bif_count as u64 * 12;
        let key_table_end =
            key_table_offset as u64 + key_count as u64 * KEY_ENTRY_SIZE as u64;
        for end in [file_table_end, key_table_end] {
            if end > bytes.len() as u64 {
                return Err(ArchiveError::Truncated {
                    expected: end,
                    actual: bytes.len() as u64,
                });
            }
        }

        // BIF name table.
        let mut bif_paths = Vec::with_capacity(bif_count as usize);
        let mut ft = ByteReader::new(&bytes);
        ft.seek(file_table_offset as usize).expect("extent checked");
        for _ in 0..bif_count {
            let _file_size = ft.read_u32().expect("extent checked");
            let name_offset = ft.read_u32().expect("extent checked");
            let name_size = ft.read_u16().expect("extent checked");
            let _drives = ft.read_u16().expect("extent checked");

            let start = name_offset as usize;
            let end = start + name_size as usize;
            let raw = bytes.get(start..end).ok_or(ArchiveError::Truncated {
                expected: end as u64,
                actual: bytes.len() as u64,
            })?;
            let name = String::from_utf8_lossy(raw);
            let name = name.trim_end_matches('\0').replace('\\', "/");
            bif_paths.push(root.join(name));
        }

        // Key table.
        let mut entries = Vec::with_capacity(key_count as usize);
        let mut kt = ByteReader::new(&bytes);
        kt.seek(key_table_offset as usize).expect("extent checked");
        for _ in 0..key_count {
            let name = kt.view(16).expect("extent checked");
            let res_type = kt.read_u16().expect("extent checked");
            let res_id = kt.read_u32().expect("extent checked");
            entries.push(KeyEntry {
                resref: ResRef16::from_raw(name),
                res_type: ResType(res_type),
                bif_index: res_id >> 20,
                variable_index: res_id & 0xF_FFFF,
            });
        }

        Ok(Self {
            key_path,
            bif_paths,
            entries,
            bifs: HashMap::new(),
            handles: HandleTable::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.key_path
    }

    /// Open and index a BIF on first use.
    fn bif(&mut self, bif_index: u32) -> Result<&mut BifFile, ArchiveError> {
        if !self.bifs.contains_key(&bif_index) {
            let path = self
                .bif_paths
                .get(bif_index as usize)
                .ok_or(ArchiveError::BadHandle {
                    handle: bif_index as u64,
                })?;
            debug!("opening bif {:?}", path);
            let mut file = File::open(path)?;
            let file_size = file.metadata()?.len();

            let mut header = [0u8; BIF_HEADER_SIZE];
            if file_size < BIF_HEADER_SIZE as u64 {
                return Err(ArchiveError::Truncated {
                    expected: BIF_HEADER_SIZE as u64,
                    actual: file_size,
                });
            }
            file.read_exact(&mut header)?;
            let mut r = ByteReader::new(&header);
            let mut signature = [0u8; 4];
            let mut version = [0u8; 4];
            r.read_exact(&mut signature).expect("length checked");
            r.read_exact(&mut version).expect("length checked");
            if signature != BIF_SIGNATURE || version != KEY_BIF_VERSION {
                return Err(ArchiveError::BadSignature { found: signature });
            }
            let variable_count = r.read_u32().expect("length checked");
            let _fixed_count = r.read_u32().expect("length checked");
            let table_offset = r.read_u32().expect("length checked");

            let table_len = variable_count as usize * BIF_VARIABLE_ENTRY_SIZE;
            let table_end = table_offset as u64 + table_len as u64;
            if table_end > file_size {
                return Err(ArchiveError::Truncated {
                    expected: table_end,
                    actual: file_size,
                });
            }
            let mut table = vec![0u8; table_len];
            file.seek(SeekFrom::Start(table_offset as u64))?;
            file.read_exact(&mut table)?;

            let mut variables = Vec::with_capacity(variable_count as usize);
            let mut vt = ByteReader::new(&table);
            for _ in 0..variable_count {
                let _id = vt.read_u32().expect("table length checked");
                let offset = vt.read_u32().expect("table length checked");
                let size = vt.read_u32().expect("table length checked");
                let _res_type = vt.read_u32().expect("table length checked");
                if offset as u64 + size as u64 > file_size {
                    return Err(ArchiveError::Truncated {
                        expected: offset as u64 + size as u64,
                        actual: file_size,
                    });
                }
                variables.push((offset, size));
            }

            self.bifs.insert(bif_index, BifFile { file, variables });
        }
        Ok(self.bifs.get_mut(&bif_index).expect("inserted above"))
    }

    fn variable_of(&mut self, entry_index: usize) -> Result<(u32, u32), ArchiveError> {
        let (bif_index, variable_index) = {
            let entry = &self.entries[entry_index];
            (entry.bif_index, entry.variable_index)
        };
        let bif = self.bif(bif_index)?;
        bif.variables
            .get(variable_index as usize)
            .copied()
            .ok_or(ArchiveError::BadHandle {
                handle: variable_index as u64,
            })
    }
}

impl ResourceAccessor for KeyBifProvider {
    fn open_file(&mut self, resref: &ResRef32, res_type: ResType) -> Option<FileHandle> {
        let narrowed = ResRef16::from_res_ref32(resref);
        let id = self
            .entries
            .iter()
            .position(|e| e.resref == narrowed && e.res_type == res_type)?;
        self.open_file_by_index(id as FileId)
    }

    fn open_file_by_index(&mut self, id: FileId) -> Option<FileHandle> {
        if (id as usize) >= self.entries.len() {
            return None;
        }
        // Probe the BIF now so a dangling key entry fails at open, the way
        // the other providers fail, rather than at first read.
        self.variable_of(id as usize).ok()?;
        self.handles.insert(id as usize)
    }

    fn close_file(&mut self, handle: FileHandle) -> bool {
        self.handles.remove(handle).is_some()
    }

    fn read_encapsulated(
        &mut self,
        handle: FileHandle,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, ArchiveError> {
        let &entry_index = self
            .handles
            .get(handle)
            .ok_or(ArchiveError::BadHandle { handle })?;
        let (data_offset, size) = self.variable_of(entry_index)?;
        if offset >= size as u64 {
            return Ok(0);
        }
        let available = (size as u64 - offset).min(buf.len() as u64) as usize;
        let bif_index = self.entries[entry_index].bif_index;
        let bif = self.bif(bif_index)?;
        bif.file
            .seek(SeekFrom::Start(data_offset as u64 + offset))?;
        bif.file.read_exact(&mut buf[..available])?;
        Ok(available)
    }

    fn encapsulated_size(&self, handle: FileHandle) -> Option<u64> {
        let &entry_index = self.handles.get(handle)?;
        let entry = &self.entries[entry_index];
        let bif = self.bifs.get(&entry.bif_index)?;
        bif.variables
            .get(entry.variable_index as usize)
            .map(|&(_, size)| size as u64)
    }

    fn encapsulated_type(&self, handle: FileHandle) -> Option<ResType> {
        let &entry_index = self.handles.get(handle)?;
        Some(self.entries[entry_index].res_type)
    }

    fn encapsulated_entry(&self, id: FileId) -> Option<(ResRef32, ResType)> {
        let entry = self.entries.get(id as usize)?;
        Some((ResRef32::from_res_ref16(&entry.resref), entry.res_type))
    }

    fn encapsulated_count(&self) -> u64 {
        self.entries.len() as u64
    }
}

// ============================================================================
// TEST FIXTURE SUPPORT
// ============================================================================

/// Serialize a key/bif pair for the test suites. Returns the key bytes;
/// the single BIF is written as `bif_name` relative to the caller's root.
#[cfg(test)]
pub(crate) fn build_key_and_bif(
    bif_name: &str,
    entries: &[(&str, ResType, &[u8])],
) -> (Vec<u8>, Vec<u8>) {
    // BIF: header, variable table, data.
    let mut bif = Vec::new();
    bif.extend_from_slice(&BIF_SIGNATURE);
    bif.extend_from_slice(&KEY_BIF_VERSION);
    bif.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    bif.extend_from_slice(&0u32.to_le_bytes()); // fixed count
    bif.extend_from_slice(&(BIF_HEADER_SIZE as u32).to_le_bytes());
    let mut data_offset =
        (BIF_HEADER_SIZE + entries.len() * BIF_VARIABLE_ENTRY_SIZE) as u32;
    for (i, (_, res_type, data)) in entries.iter().enumerate() {
        bif.extend_from_slice(&(i as u32).to_le_bytes());
        bif.extend_from_slice(&data_offset.to_le_bytes());
        bif.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bif.extend_from_slice(&u32::from(res_type.0).to_le_bytes());
        data_offset += data.len() as u32;
    }
    for (_, _, data) in entries {
        bif.extend_from_slice(data);
    }

    // KEY: header, file table (one BIF), name heap, key table.
    let file_table_offset = KEY_HEADER_SIZE as u32;
    let name_offset = file_table_offset + 12;
    let key_table_offset = name_offset + bif_name.len() as u32;

    let mut key = Vec::new();
    key.extend_from_slice(&KEY_SIGNATURE);
    key.extend_from_slice(&KEY_BIF_VERSION);
    key.extend_from_slice(&1u32.to_le_bytes()); // bif count
    key.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    key.extend_from_slice(&file_table_offset.to_le_bytes());
    key.extend_from_slice(&key_table_offset.to_le_bytes());
    key.extend_from_slice(&2026u32.to_le_bytes());
    key.extend_from_slice(&100u32.to_le_bytes());
    key.resize(KEY_HEADER_SIZE, 0);

    key.extend_from_slice(&(bif.len() as u32).to_le_bytes());
    key.extend_from_slice(&name_offset.to_le_bytes());
    key.extend_from_slice(&(bif_name.len() as u16).to_le_bytes());
    key.extend_from_slice(&1u16.to_le_bytes()); // drives
    key.extend_from_slice(bif_name.as_bytes());

    for (i, (name, res_type, _)) in entries.iter().enumerate() {
        let mut resref = [0u8; 16];
        let bytes = name.to_ascii_lowercase().into_bytes();
        let take = bytes.len().min(16);
        resref[..take].copy_from_slice(&bytes[..take]);
        key.extend_from_slice(&resref);
        key.extend_from_slice(&res_type.0.to_le_bytes());
        let res_id = i as u32; // bif 0, variable index i
        key.extend_from_slice(&res_id.to_le_bytes());
    }

    (key, bif)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_entries_stream_from_their_bif() {
        let dir = tempfile::tempdir().unwrap();
        let (key, bif) = build_key_and_bif(
            "data/base.bif",
            &[
                ("nwscript", ResType::NSS, b"int TRUE = 1;"),
                ("skills", ResType::TWO_DA, b"2DA V2.0\n\nLabel\n0 listen\n"),
            ],
        );
        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/base.bif"), bif).unwrap();
        let key_path = dir.path().join("base.key");
        std::fs::write(&key_path, key).unwrap();

        let mut provider = KeyBifProvider::open(&key_path, dir.path()).unwrap();
        assert_eq!(provider.encapsulated_count(), 2);
        let (resref, res_type) = provider.encapsulated_entry(0).unwrap();
        assert_eq!(resref.as_str(), "nwscript");
        assert_eq!(res_type, ResType::NSS);

        let handle = provider
            .open_file(&ResRef32::new("NWSCRIPT"), ResType::NSS)
            .unwrap();
        assert_eq!(provider.encapsulated_size(handle), Some(13));
        let mut buf = [0u8; 13];
        assert_eq!(provider.read_encapsulated(handle, 0, &mut buf).unwrap(), 13);
        assert_eq!(&buf, b"int TRUE = 1;");
        assert!(provider.close_file(handle));
    }

    #[test]
    fn missing_bif_fails_open_not_construction() {
        let dir = tempfile::tempdir().unwrap();
        let (key, _bif) = build_key_and_bif("data/absent.bif", &[("x", ResType::NSS, b"y")]);
        let key_path = dir.path().join("base.key");
        std::fs::write(&key_path, key).unwrap();

        let mut provider = KeyBifProvider::open(&key_path, dir.path()).unwrap();
        assert_eq!(provider.encapsulated_count(), 1);
        assert_eq!(provider.open_file_by_index(0), None);
    }

    #[test]
    fn truncated_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (key, _) = build_key_and_bif("data/base.bif", &[("x", ResType::NSS, b"y")]);
        let key_path = dir.path().join("base.key");
        std::fs::write(&key_path, &key[..70]).unwrap();
        assert!(matches!(
            KeyBifProvider::open(&key_path, dir.path()),
            Err(ArchiveError::Truncated { .. })
        ));
    }
}
