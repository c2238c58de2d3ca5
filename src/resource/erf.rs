// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Encapsulated resource file (ERF) provider.
//!
//! ERF is the engine's flat archive: a 160-byte header, a key list naming
//! each entry, and a resource list placing its bytes. Modules (`.mod`),
//! hakpaks (`.hak`), compressed world content (`.pwc`) and plain `.erf`
//! data all share the layout. Two generations differ only in RESREF width:
//! `V1.0` carries 16-byte names, `V1.1` carries 32-byte names, so the
//! provider is generic over [`ResRefKind`] and both widths share one
//! implementation.
//!
//! The directory is indexed at construction; entry bytes stay in the file
//! and are read on demand.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::stream::ByteReader;

use super::provider::{ArchiveError, FileHandle, FileId, HandleTable, ResourceAccessor};
use super::{ResRef32, ResRefKind, ResType};

const ERF_HEADER_SIZE: usize = 160;

/// Signatures this provider accepts.
const ERF_SIGNATURES: [&[u8; 4]; 4] = [b"ERF ", b"MOD ", b"HAK ", b"PWC "];

struct ErfEntry<R> {
    resref: R,
    res_type: ResType,
    offset: u32,
    size: u32,
}

/// Provider over one ERF archive.
pub struct ErfProvider<R: ResRefKind> {
    path: PathBuf,
    file: File,
    entries: Vec<ErfEntry<R>>,
    handles: HandleTable<usize>,
}

impl<R: ResRefKind> ErfProvider<R> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();

        let mut header = [0u8; ERF_HEADER_SIZE];
        if file_size < ERF_HEADER_SIZE as u64 {
            return Err(ArchiveError::Truncated {
                expected: ERF_HEADER_SIZE as u64,
                actual: file_size,
            });
        }
        file.read_exact(&mut header)?;

        let mut r = ByteReader::new(&header);
        let mut signature = [0u8; 4];
        let mut version = [0u8; 4];
        r.read_exact(&mut signature).expect("header length checked");
        r.read_exact(&mut version).expect("header length checked");

        if !ERF_SIGNATURES.iter().any(|&sig| *sig == signature) {
            return Err(ArchiveError::BadSignature { found: signature });
        }
        let expected_version: &[u8; 4] = if R::LEN == 16 { b"V1.0" } else { b"V1.1" };
        if version != *expected_version {
            return Err(ArchiveError::BadSignature { found: version });
        }

        let _loc_string_count = r.read_u32().expect("header length checked");
        let _loc_string_size = r.read_u32().expect("header length checked");
        let entry_count = r.read_u32().expect("header length checked");
        let _loc_string_offset = r.read_u32().expect("header length checked");
        let key_list_offset = r.read_u32().expect("header length checked");
        let resource_list_offset = r.read_u32().expect("header length checked");

        // Key entry: resref + id + type + pad. Resource entry: offset + size.
        let key_entry_size = R::LEN as u64 + 8;
        let keys_end = key_list_offset as u64 + entry_count as u64 * key_entry_size;
        let resources_end = resource_list_offset as u64 + entry_count as u64 * 8;
        for end in [keys_end, resources_end] {
            if end > file_size {
                return Err(ArchiveError::Truncated {
                    expected: end,
                    actual: file_size,
                });
            }
        }

        // Read both tables in two sequential gulps.
        let mut key_bytes = vec![0u8; entry_count as usize * key_entry_size as usize];
        file.seek(SeekFrom::Start(key_list_offset as u64))?;
        file.read_exact(&mut key_bytes)?;

        let mut resource_bytes = vec![0u8; entry_count as usize * 8];
        file.seek(SeekFrom::Start(resource_list_offset as u64))?;
        file.read_exact(&mut resource_bytes)?;

        let mut entries = Vec::with_capacity(entry_count as usize);
        let mut keys = ByteReader::new(&key_bytes);
        let mut resources = ByteReader::new(&resource_bytes);
        for _ in 0..entry_count {
            let name = keys.view(R::LEN).expect("table length checked");
            let _res_id = keys.read_u32().expect("table length checked");
            let res_type = keys.read_u16().expect("table length checked");
            let _pad = keys.read_u16().expect("table length checked");
            let offset = resources.read_u32().expect("table length checked");
            let size = resources.read_u32().expect("table length checked");

            // Entries must place their bytes inside the file.
            if offset as u64 + size as u64 > file_size {
                return Err(ArchiveError::Truncated {
                    expected: offset as u64 + size as u64,
                    actual: file_size,
                });
            }

            entries.push(ErfEntry {
                resref: R::from_raw(name),
                res_type: ResType(res_type),
                offset,
                size,
            });
        }

        Ok(Self {
            path,
            file,
            entries,
            handles: HandleTable::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<R: ResRefKind> ResourceAccessor for ErfProvider<R> {
    fn open_file(&mut self, resref: &ResRef32, res_type: ResType) -> Option<FileHandle> {
        let narrowed = R::from_raw(resref.as_bytes());
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
        let entry = &self.entries[entry_index];
        if offset >= entry.size as u64 {
            return Ok(0);
        }
        let available = (entry.size as u64 - offset).min(buf.len() as u64) as usize;
        self.file
            .seek(SeekFrom::Start(entry.offset as u64 + offset))?;
        self.file.read_exact(&mut buf[..available])?;
        Ok(available)
    }

    fn encapsulated_size(&self, handle: FileHandle) -> Option<u64> {
        let &entry_index = self.handles.get(handle)?;
        Some(self.entries[entry_index].size as u64)
    }

    fn encapsulated_type(&self, handle: FileHandle) -> Option<ResType> {
        let &entry_index = self.handles.get(handle)?;
        Some(self.entries[entry_index].res_type)
    }

    fn encapsulated_entry(&self, id: FileId) -> Option<(ResRef32, ResType)> {
        let entry = self.entries.get(id as usize)?;
        Some((ResRef32::from_raw(entry.resref.as_bytes()), entry.res_type))
    }

    fn encapsulated_count(&self) -> u64 {
        self.entries.len() as u64
    }
}

// ============================================================================
// TEST FIXTURE SUPPORT
// ============================================================================

/// Serialize a minimal archive for the test suites.
#[cfg(test)]
pub(crate) fn build_erf(
    signature: &[u8; 4],
    wide: bool,
    entries: &[(&str, ResType, &[u8])],
) -> Vec<u8> {
    let resref_len = if wide { 32 } else { 16 };
    let key_entry_size = resref_len + 8;
    let header_size = ERF_HEADER_SIZE as u32;
    let key_list_offset = header_size;
    let resource_list_offset = key_list_offset + (entries.len() * key_entry_size) as u32;
    let data_offset = resource_list_offset + (entries.len() * 8) as u32;

    let mut out = Vec::new();
    out.extend_from_slice(signature);
    out.extend_from_slice(if wide { b"V1.1" } else { b"V1.0" });
    out.extend_from_slice(&0u32.to_le_bytes()); // loc string count
    out.extend_from_slice(&0u32.to_le_bytes()); // loc string size
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    out.extend_from_slice(&header_size.to_le_bytes()); // loc string offset
    out.extend_from_slice(&key_list_offset.to_le_bytes());
    out.extend_from_slice(&resource_list_offset.to_le_bytes());
    out.extend_from_slice(&2026u32.to_le_bytes()); // build year
    out.extend_from_slice(&100u32.to_le_bytes()); // build day
    out.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // description strref
    out.resize(ERF_HEADER_SIZE, 0);

    for (i, (name, res_type, _)) in entries.iter().enumerate() {
        let mut resref = vec![0u8; resref_len];
        let bytes = name.to_ascii_lowercase().into_bytes();
        let take = bytes.len().min(resref_len);
        resref[..take].copy_from_slice(&bytes[..take]);
        out.extend_from_slice(&resref);
        out.extend_from_slice(&(i as u32).to_le_bytes());
        out.extend_from_slice(&res_type.0.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
    }

    let mut cursor = data_offset;
    for (_, _, data) in entries {
        out.extend_from_slice(&cursor.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        cursor += data.len() as u32;
    }
    for (_, _, data) in entries {
        out.extend_from_slice(data);
    }
    out
}
