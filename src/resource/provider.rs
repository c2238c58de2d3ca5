// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! The resource-accessor contract and the closed set of provider kinds.
//!
//! Every backend — directory, the two encapsulated-archive widths, zip,
//! keyed-bif — exposes the same capability set: enumerate, open by name,
//! open by index, read, size, type. The manager speaks only this contract.
//!
//! Providers are a closed set, so dispatch is an enum rather than trait
//! objects; the one escape hatch is [`Provider::Custom`], which carries a
//! boxed implementation for the user first-/last-chance hooks.

use std::fmt;
use std::io;

use super::directory::DirectoryProvider;
use super::erf::ErfProvider;
use super::keybif::KeyBifProvider;
use super::zipfile::ZipProvider;
use super::{ResRef16, ResRef32, ResType};

/// Opaque per-provider file handle. `INVALID_FILE` is never returned by a
/// successful open.
pub type FileHandle = u64;

/// Index of a file within one provider, stable for the provider's lifetime.
pub type FileId = u64;

pub const INVALID_FILE: FileHandle = 0;

// ============================================================================
// ERRORS
// ============================================================================

/// Failures while opening or reading an archive backend.
#[derive(Debug)]
pub enum ArchiveError {
    /// Signature or version tag did not match the expected format.
    BadSignature { found: [u8; 4] },
    /// The file is smaller than a directory structure it declares.
    Truncated { expected: u64, actual: u64 },
    /// A zip entry failed its CRC-32 check after decompression.
    ChecksumMismatch { name: String },
    /// A zip entry uses a compression method other than stored/deflate.
    UnsupportedCompression { method: u16 },
    /// Read against a handle that is not open.
    BadHandle { handle: FileHandle },
    Io(io::Error),
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::BadSignature { found } => {
                write!(f, "unrecognized archive tag {:?}", String::from_utf8_lossy(found))
            }
            ArchiveError::Truncated { expected, actual } => {
                write!(f, "archive needs {} bytes but has {}", expected, actual)
            }
            ArchiveError::ChecksumMismatch { name } => {
                write!(f, "entry '{}' failed its checksum", name)
            }
            ArchiveError::UnsupportedCompression { method } => {
                write!(f, "unsupported compression method {}", method)
            }
            ArchiveError::BadHandle { handle } => {
                write!(f, "file handle {} is not open", handle)
            }
            ArchiveError::Io(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiveError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        ArchiveError::Io(err)
    }
}

// ============================================================================
// ACCESSOR CONTRACT
// ============================================================================

/// The capability set every resource backend implements.
///
/// Lookups answer `None` for absent resources; only actual delivery
/// failures (I/O, corruption) surface as [`ArchiveError`].
pub trait ResourceAccessor {
    /// Open a contained file by `(resref, type)`.
    fn open_file(&mut self, resref: &ResRef32, res_type: ResType) -> Option<FileHandle>;

    /// Open a contained file by its stable index.
    fn open_file_by_index(&mut self, id: FileId) -> Option<FileHandle>;

    /// Close an open handle. Answers whether the handle was open.
    fn close_file(&mut self, handle: FileHandle) -> bool;

    /// Read up to `buf.len()` bytes at `offset` within the contained file.
    /// Returns the bytes read; short reads happen only at end of file.
    fn read_encapsulated(
        &mut self,
        handle: FileHandle,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, ArchiveError>;

    /// Uncompressed size of the contained file behind `handle`.
    fn encapsulated_size(&self, handle: FileHandle) -> Option<u64>;

    /// Resource type of the contained file behind `handle`.
    fn encapsulated_type(&self, handle: FileHandle) -> Option<ResType>;

    /// `(resref, type)` of the file at `id`. `None` for indices out of
    /// range or entries whose type the accessor cannot express.
    fn encapsulated_entry(&self, id: FileId) -> Option<(ResRef32, ResType)>;

    /// Number of contained files. Valid ids are `0..count`.
    fn encapsulated_count(&self) -> u64;
}

// ============================================================================
// PROVIDER DISPATCH
// ============================================================================

/// One registered backend.
pub enum Provider {
    Directory(DirectoryProvider),
    Erf32(ErfProvider<ResRef32>),
    Erf16(ErfProvider<ResRef16>),
    Zip(ZipProvider),
    KeyBif(KeyBifProvider),
    /// Caller-supplied first-/last-chance accessor.
    Custom(Box<dyn ResourceAccessor>),
}

impl Provider {
    fn inner(&self) -> &dyn ResourceAccessor {
        match self {
            Provider::Directory(p) => p,
            Provider::Erf32(p) => p,
            Provider::Erf16(p) => p,
            Provider::Zip(p) => p,
            Provider::KeyBif(p) => p,
            Provider::Custom(p) => p.as_ref(),
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ResourceAccessor {
        match self {
            Provider::Directory(p) => p,
            Provider::Erf32(p) => p,
            Provider::Erf16(p) => p,
            Provider::Zip(p) => p,
            Provider::KeyBif(p) => p,
            Provider::Custom(p) => p.as_mut(),
        }
    }

    /// Native filesystem path of the file at `id`, for backends whose
    /// contents already live on disk.
    pub fn native_path(&self, id: FileId) -> Option<std::path::PathBuf> {
        match self {
            Provider::Directory(p) => p.file_path(id),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Provider::Directory(_) => "directory",
            Provider::Erf32(_) => "erf32",
            Provider::Erf16(_) => "erf16",
            Provider::Zip(_) => "zip",
            Provider::KeyBif(_) => "keybif",
            Provider::Custom(_) => "custom",
        }
    }
}

impl ResourceAccessor for Provider {
    fn open_file(&mut self, resref: &ResRef32, res_type: ResType) -> Option<FileHandle> {
        self.inner_mut().open_file(resref, res_type)
    }

    fn open_file_by_index(&mut self, id: FileId) -> Option<FileHandle> {
        self.inner_mut().open_file_by_index(id)
    }

    fn close_file(&mut self, handle: FileHandle) -> bool {
        self.inner_mut().close_file(handle)
    }

    fn read_encapsulated(
        &mut self,
        handle: FileHandle,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, ArchiveError> {
        self.inner_mut().read_encapsulated(handle, offset, buf)
    }

    fn encapsulated_size(&self, handle: FileHandle) -> Option<u64> {
        self.inner().encapsulated_size(handle)
    }

    fn encapsulated_type(&self, handle: FileHandle) -> Option<ResType> {
        self.inner().encapsulated_type(handle)
    }

    fn encapsulated_entry(&self, id: FileId) -> Option<(ResRef32, ResType)> {
        self.inner().encapsulated_entry(id)
    }

    fn encapsulated_count(&self) -> u64 {
        self.inner().encapsulated_count()
    }
}

/// Simple handle table shared by the concrete providers: monotonic ids with
/// wrap-around detection, mapping to per-provider open state.
pub(crate) struct HandleTable<T> {
    next: FileHandle,
    open: std::collections::HashMap<FileHandle, T>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            next: 1,
            open: std::collections::HashMap::new(),
        }
    }
}

impl<T> HandleTable<T> {
    /// Insert open state and mint a handle, or `None` when the entire
    /// handle space is somehow in use.
    pub fn insert(&mut self, state: T) -> Option<FileHandle> {
        let mut attempts: u64 = 0;
        loop {
            let candidate = self.next;
            self.next = self.next.wrapping_add(1);
            if self.next == INVALID_FILE {
                self.next = 1;
            }
            if candidate != INVALID_FILE && !self.open.contains_key(&candidate) {
                self.open.insert(candidate, state);
                return Some(candidate);
            }
            attempts += 1;
            if attempts > self.open.len() as u64 + 1 {
                return None;
            }
        }
    }

    pub fn get(&self, handle: FileHandle) -> Option<&T> {
        self.open.get(&handle)
    }

    pub fn get_mut(&mut self, handle: FileHandle) -> Option<&mut T> {
        self.open.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: FileHandle) -> Option<T> {
        self.open.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn drain(&mut self) -> Vec<(FileHandle, T)> {
        self.open.drain().collect()
    }
}
