// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Zip-backed resource provider.
//!
//! The engine ships its in-box data as plain zip archives, patched by
//! dropping newer archives next to older ones. The provider walks the
//! central directory (found via the end-of-central-directory record),
//! maps each entry's file stem and extension to `(resref, type)`, and
//! inflates entries on open. Stored and deflate methods are supported;
//! every extraction is verified against the entry's CRC-32.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::DeflateDecoder;

use crate::stream::ByteReader;

use super::provider::{ArchiveError, FileHandle, FileId, HandleTable, ResourceAccessor};
use super::{ResRef32, ResRefKind, ResType};

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const CENTRAL_SIGNATURE: u32 = 0x0201_4b50;
const LOCAL_SIGNATURE: u32 = 0x0403_4b50;

const EOCD_SIZE: usize = 22;
/// EOCD + maximum comment length.
const EOCD_SEARCH_SPAN: usize = EOCD_SIZE + u16::MAX as usize;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

struct ZipEntry {
    name: String,
    resref: ResRef32,
    /// `None` when the extension maps to no known resource type.
    res_type: Option<ResType>,
    method: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    local_offset: u32,
}

struct OpenEntry {
    entry: usize,
    /// Inflated once at open; reads serve from here.
    data: Vec<u8>,
}

/// Provider over one zip archive.
pub struct ZipProvider {
    path: PathBuf,
    file: File,
    entries: Vec<ZipEntry>,
    handles: HandleTable<OpenEntry>,
}

impl ZipProvider {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();

        let (cd_offset, cd_size, entry_count) = find_central_directory(&mut file, file_size)?;

        let mut cd_bytes = vec![0u8; cd_size as usize];
        file.seek(SeekFrom::Start(cd_offset))?;
        file.read_exact(&mut cd_bytes)?;

        let mut entries = Vec::with_capacity(entry_count as usize);
        let mut r = ByteReader::new(&cd_bytes);
        for _ in 0..entry_count {
            let signature = r.read_u32().map_err(|_| truncated(cd_size, file_size))?;
            if signature != CENTRAL_SIGNATURE {
                return Err(ArchiveError::BadSignature {
                    found: signature.to_le_bytes(),
                });
            }
            let mut parse = || -> Result<ZipEntry, crate::stream::StreamError> {
                r.skip(2 + 2 + 2)?; // versions, flags
                let method = r.read_u16()?;
                r.skip(2 + 2)?; // mtime, mdate
                let crc32 = r.read_u32()?;
                let compressed_size = r.read_u32()?;
                let uncompressed_size = r.read_u32()?;
                let name_len = r.read_u16()? as usize;
                let extra_len = r.read_u16()? as usize;
                let comment_len = r.read_u16()? as usize;
                r.skip(2 + 2 + 4)?; // disk start, attributes
                let local_offset = r.read_u32()?;
                let name = String::from_utf8_lossy(r.view(name_len)?).into_owned();
                r.skip(extra_len + comment_len)?;

                let (resref, res_type) = classify(&name);
                Ok(ZipEntry {
                    name,
                    resref,
                    res_type,
                    method,
                    crc32,
                    compressed_size,
                    uncompressed_size,
                    local_offset,
                })
            };
            let entry = parse().map_err(|_| truncated(cd_size, file_size))?;
            // Directories carry no bytes and are not resources.
            if entry.name.ends_with('/') {
                continue;
            }
            entries.push(entry);
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

    /// Inflate one entry and verify its checksum.
    fn extract(&mut self, entry_index: usize) -> Result<Vec<u8>, ArchiveError> {
        let entry = &self.entries[entry_index];

        // The local header's name/extra lengths may differ from the central
        // directory's; the data sits after whatever the local header says.
        let mut local = [0u8; 30];
        self.file.seek(SeekFrom::Start(entry.local_offset as u64))?;
        self.file.read_exact(&mut local)?;
        let mut r = ByteReader::new(&local);
        let signature = r.read_u32().expect("fixed-size header");
        if signature != LOCAL_SIGNATURE {
            return Err(ArchiveError::BadSignature {
                found: signature.to_le_bytes(),
            });
        }
        r.skip(22).expect("fixed-size header");
        let name_len = r.read_u16().expect("fixed-size header") as u64;
        let extra_len = r.read_u16().expect("fixed-size header") as u64;

        let data_offset = entry.local_offset as u64 + 30 + name_len + extra_len;
        let mut compressed = vec![0u8; entry.compressed_size as usize];
        self.file.seek(SeekFrom::Start(data_offset))?;
        self.file.read_exact(&mut compressed)?;

        let data = match entry.method {
            METHOD_STORED => compressed,
            METHOD_DEFLATE => {
                let mut decoder = DeflateDecoder::new(compressed.as_slice());
                let mut data = Vec::with_capacity(entry.uncompressed_size as usize);
                decoder.read_to_end(&mut data)?;
                data
            }
            method => return Err(ArchiveError::UnsupportedCompression { method }),
        };

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data);
        if hasher.finalize() != entry.crc32 {
            return Err(ArchiveError::ChecksumMismatch {
                name: entry.name.clone(),
            });
        }
        Ok(data)
    }
}

/// `(resref, type)` from a zip entry name: the stem of the final path
/// component, and its extension if it maps to a known type.
fn classify(name: &str) -> (ResRef32, Option<ResType>) {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (file_name, None),
    };
    (
        ResRef32::new(stem),
        ext.and_then(ResType::from_extension),
    )
}

fn truncated(expected: u64, actual: u64) -> ArchiveError {
    ArchiveError::Truncated { expected, actual }
}

/// Locate the end-of-central-directory record by scanning backwards over
/// the trailing comment span.
fn find_central_directory(
    file: &mut File,
    file_size: u64,
) -> Result<(u64, u64, u64), ArchiveError> {
    if file_size < EOCD_SIZE as u64 {
        return Err(truncated(EOCD_SIZE as u64, file_size));
    }
    let span = (EOCD_SEARCH_SPAN as u64).min(file_size);
    let start = file_size - span;
    let mut tail = vec![0u8; span as usize];
    file.seek(SeekFrom::Start(start))?;
    file.read_exact(&mut tail)?;

    for pos in (0..=tail.len() - EOCD_SIZE).rev() {
        let word = u32::from_le_bytes([tail[pos], tail[pos + 1], tail[pos + 2], tail[pos + 3]]);
        if word != EOCD_SIGNATURE {
            continue;
        }
        let mut r = ByteReader::new(&tail[pos..]);
        r.skip(4).expect("span checked"); // signature
        let ok = (|| -> Result<(u64, u64, u64), crate::stream::StreamError> {
            r.skip(2 + 2 + 2)?; // disk numbers, disk entry count
            let total_entries = r.read_u16()?;
            let cd_size = r.read_u32()?;
            let cd_offset = r.read_u32()?;
            Ok((cd_offset as u64, cd_size as u64, total_entries as u64))
        })();
        if let Ok((cd_offset, cd_size, total)) = ok {
            if cd_offset + cd_size <= file_size {
                return Ok((cd_offset, cd_size, total));
            }
        }
    }
    Err(ArchiveError::BadSignature { found: *b"PK??" })
}

impl ResourceAccessor for ZipProvider {
    fn open_file(&mut self, resref: &ResRef32, res_type: ResType) -> Option<FileHandle> {
        let id = self
            .entries
            .iter()
            .position(|e| e.res_type == Some(res_type) && e.resref == *resref)?;
        self.open_file_by_index(id as FileId)
    }

    fn open_file_by_index(&mut self, id: FileId) -> Option<FileHandle> {
        if (id as usize) >= self.entries.len() {
            return None;
        }
        let data = self.extract(id as usize).ok()?;
        self.handles.insert(OpenEntry {
            entry: id as usize,
            data,
        })
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
        let open = self
            .handles
            .get(handle)
            .ok_or(ArchiveError::BadHandle { handle })?;
        if offset >= open.data.len() as u64 {
            return Ok(0);
        }
        let available = (open.data.len() as u64 - offset).min(buf.len() as u64) as usize;
        buf[..available]
            .copy_from_slice(&open.data[offset as usize..offset as usize + available]);
        Ok(available)
    }

    fn encapsulated_size(&self, handle: FileHandle) -> Option<u64> {
        let open = self.handles.get(handle)?;
        Some(self.entries[open.entry].uncompressed_size as u64)
    }

    fn encapsulated_type(&self, handle: FileHandle) -> Option<ResType> {
        let open = self.handles.get(handle)?;
        self.entries[open.entry].res_type
    }

    fn encapsulated_entry(&self, id: FileId) -> Option<(ResRef32, ResType)> {
        let entry = self.entries.get(id as usize)?;
        // Unrecognized extensions are invisible to enumeration.
        let res_type = entry.res_type?;
        Some((entry.resref, res_type))
    }

    fn encapsulated_count(&self) -> u64 {
        self.entries.len() as u64
    }
}

// ============================================================================
// TEST FIXTURE SUPPORT
// ============================================================================

/// Serialize a zip archive for the test suites. `deflate` selects the
/// compression method per entry.
#[cfg(test)]
pub(crate) fn build_zip(entries: &[(&str, &[u8], bool)]) -> Vec<u8> {
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut out = Vec::new();
    let mut central = Vec::new();

    for (name, data, deflate) in entries {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(data);
        let crc = hasher.finalize();

        let (method, payload): (u16, Vec<u8>) = if *deflate {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).unwrap();
            (METHOD_DEFLATE, encoder.finish().unwrap())
        } else {
            (METHOD_STORED, data.to_vec())
        };

        let local_offset = out.len() as u32;
        out.extend_from_slice(&LOCAL_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&method.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // mtime/mdate
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra len
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&payload);

        central.extend_from_slice(&CENTRAL_SIGNATURE.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes()); // version made by
        central.extend_from_slice(&20u16.to_le_bytes()); // version needed
        central.extend_from_slice(&0u16.to_le_bytes()); // flags
        central.extend_from_slice(&method.to_le_bytes());
        central.extend_from_slice(&0u32.to_le_bytes()); // mtime/mdate
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // extra len
        central.extend_from_slice(&0u16.to_le_bytes()); // comment len
        central.extend_from_slice(&0u16.to_le_bytes()); // disk start
        central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        central.extend_from_slice(&local_offset.to_le_bytes());
        central.extend_from_slice(name.as_bytes());
    }

    let cd_offset = out.len() as u32;
    let cd_size = central.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // disk
    out.extend_from_slice(&0u16.to_le_bytes()); // cd disk
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // comment len
    out
}
