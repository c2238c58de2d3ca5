// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Directory-backed resource provider.
//!
//! Indexes every file under a root whose extension maps to a known resource
//! type. Files already live on the native filesystem, so this is the one
//! provider whose resources the manager hands out by their real path
//! instead of extracting a temp copy.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::debug;

use super::provider::{ArchiveError, FileHandle, FileId, HandleTable, ResourceAccessor};
use super::{ResRef32, ResRefKind, ResType};

struct DirEntry {
    resref: ResRef32,
    res_type: ResType,
    path: PathBuf,
    size: u64,
}

struct OpenFile {
    file: File,
    entry: usize,
}

/// Provider over a directory tree.
pub struct DirectoryProvider {
    root: PathBuf,
    entries: Vec<DirEntry>,
    handles: HandleTable<OpenFile>,
}

impl DirectoryProvider {
    /// Index `root` recursively. A missing root indexes as empty; the
    /// standard search directories (`override`, `pwc`) are frequently
    /// absent and that is not an error.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, ArchiveError> {
        let root = root.as_ref().to_path_buf();
        let mut entries = Vec::new();
        if root.is_dir() {
            collect_files(&root, &mut entries)?;
            // Deterministic order regardless of filesystem enumeration.
            entries.sort_by(|a, b| a.path.cmp(&b.path));
        } else {
            debug!("directory provider root {:?} absent, indexing empty", root);
        }
        Ok(Self {
            root,
            entries,
            handles: HandleTable::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Native path of the file at `id`.
    pub fn file_path(&self, id: FileId) -> Option<PathBuf> {
        self.entries.get(id as usize).map(|e| e.path.clone())
    }
}

fn collect_files(dir: &Path, entries: &mut Vec<DirEntry>) -> Result<(), ArchiveError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, entries)?;
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(res_type) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ResType::from_extension)
        else {
            continue; // unrecognized extension, not a resource
        };
        if stem.is_empty() || stem.len() > ResRef32::LEN {
            continue;
        }
        let size = entry.metadata()?.len();
        entries.push(DirEntry {
            resref: ResRef32::new(stem),
            res_type,
            path,
            size,
        });
    }
    Ok(())
}

impl ResourceAccessor for DirectoryProvider {
    fn open_file(&mut self, resref: &ResRef32, res_type: ResType) -> Option<FileHandle> {
        let id = self
            .entries
            .iter()
            .position(|e| e.resref == *resref && e.res_type == res_type)?;
        self.open_file_by_index(id as FileId)
    }

    fn open_file_by_index(&mut self, id: FileId) -> Option<FileHandle> {
        let entry = self.entries.get(id as usize)?;
        let file = File::open(&entry.path).ok()?;
        self.handles.insert(OpenFile {
            file,
            entry: id as usize,
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
            .get_mut(handle)
            .ok_or(ArchiveError::BadHandle { handle })?;
        open.file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            let n = open.file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    fn encapsulated_size(&self, handle: FileHandle) -> Option<u64> {
        let open = self.handles.get(handle)?;
        Some(self.entries[open.entry].size)
    }

    fn encapsulated_type(&self, handle: FileHandle) -> Option<ResType> {
        let open = self.handles.get(handle)?;
        Some(self.entries[open.entry].res_type)
    }

    fn encapsulated_entry(&self, id: FileId) -> Option<(ResRef32, ResType)> {
        let entry = self.entries.get(id as usize)?;
        Some((entry.resref, entry.res_type))
    }

    fn encapsulated_count(&self) -> u64 {
        self.entries.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alpha.nss"), b"void main() {}").unwrap();
        std::fs::write(dir.path().join("README.notes"), b"not a resource").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/beta.2da"), b"2DA V2.0\n").unwrap();
        dir
    }

    #[test]
    fn indexes_known_extensions_recursively() {
        let dir = fixture();
        let provider = DirectoryProvider::new(dir.path()).unwrap();
        assert_eq!(provider.encapsulated_count(), 2);

        let names: Vec<String> = (0..provider.encapsulated_count())
            .filter_map(|id| provider.encapsulated_entry(id))
            .map(|(r, _)| r.as_str().to_string())
            .collect();
        assert!(names.contains(&"alpha".to_string()));
        assert!(names.contains(&"beta".to_string()));
    }

    #[test]
    fn open_read_close_by_name() {
        let dir = fixture();
        let mut provider = DirectoryProvider::new(dir.path()).unwrap();
        let handle = provider
            .open_file(&ResRef32::new("ALPHA"), ResType::NSS)
            .unwrap();
        assert_eq!(provider.encapsulated_size(handle), Some(14));
        assert_eq!(provider.encapsulated_type(handle), Some(ResType::NSS));

        let mut buf = [0u8; 4];
        assert_eq!(provider.read_encapsulated(handle, 5, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"main");

        assert!(provider.close_file(handle));
        assert!(!provider.close_file(handle));
        assert!(matches!(
            provider.read_encapsulated(handle, 0, &mut buf),
            Err(ArchiveError::BadHandle { .. })
        ));
    }

    #[test]
    fn missing_root_is_empty_not_error() {
        let provider = DirectoryProvider::new("/definitely/not/here").unwrap();
        assert_eq!(provider.encapsulated_count(), 0);
    }
}
