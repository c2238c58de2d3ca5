// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Resource identity: fixed-width RESREFs, 16-bit type codes, and the
//! naming rules every lookup passes through.
//!
//! A resource is the pair `(resref, type)`. RESREFs are lower-cased,
//! NUL-padded byte strings in one of two widths — 16 bytes for the older
//! archive generation, 32 for the newer — compared by padded byte value.
//! Type codes are assigned by the engine vendor and map 1:1 to file
//! extensions; the table here is the published list.
//!
//! Everything else in this module tree builds on these types: the provider
//! contract ([`provider`]), the concrete archive backends, and the tiered
//! [`manager`].

pub mod directory;
pub mod erf;
pub mod keybif;
pub mod manager;
pub mod provider;
pub mod zipfile;

mod demand;

pub use demand::{ScopedDemand, SharedResourceManager};
pub use manager::{
    ModuleLoadParams, ModuleSearchOrder, ResourceEntry, ResourceManager, Tier,
};
pub use provider::{
    ArchiveError, FileHandle, FileId, Provider, ResourceAccessor, INVALID_FILE,
};

use std::fmt;
use std::hash::Hash;
use std::io;
use std::path::PathBuf;

// ============================================================================
// RESREFS
// ============================================================================

/// Behavior shared by the two RESREF widths.
pub trait ResRefKind: Copy + Eq + Hash + fmt::Debug + fmt::Display {
    const LEN: usize;

    /// Build from raw bytes: lower-cased, truncated, NUL-padded.
    fn from_raw(raw: &[u8]) -> Self;

    fn as_bytes(&self) -> &[u8];

    /// The name without padding, as UTF-8 (RESREFs are ASCII in practice).
    fn as_str(&self) -> &str {
        let bytes = self.as_bytes();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        std::str::from_utf8(&bytes[..end]).unwrap_or("")
    }

    fn is_empty(&self) -> bool {
        self.as_bytes().first() == Some(&0)
    }
}

macro_rules! resref_type {
    ($name:ident, $len:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            pub fn new(name: &str) -> Self {
                <Self as ResRefKind>::from_raw(name.as_bytes())
            }
        }

        impl ResRefKind for $name {
            const LEN: usize = $len;

            fn from_raw(raw: &[u8]) -> Self {
                let mut bytes = [0u8; $len];
                let take = raw.len().min($len);
                for (dst, src) in bytes[..take].iter_mut().zip(raw) {
                    *dst = src.to_ascii_lowercase();
                }
                // Stop at an embedded NUL so padding stays canonical.
                if let Some(end) = bytes.iter().position(|&b| b == 0) {
                    for b in &mut bytes[end..] {
                        *b = 0;
                    }
                }
                Self(bytes)
            }

            fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(ResRefKind::as_str(self))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), ResRefKind::as_str(self))
            }
        }
    };
}

resref_type!(ResRef16, 16, "16-byte RESREF (older archive generation).");
resref_type!(ResRef32, 32, "32-byte RESREF (newer archive generation).");

impl ResRef16 {
    pub fn from_res_ref32(wide: &ResRef32) -> Self {
        <Self as ResRefKind>::from_raw(wide.as_bytes())
    }
}

impl ResRef32 {
    pub fn from_res_ref16(narrow: &ResRef16) -> Self {
        <Self as ResRefKind>::from_raw(narrow.as_bytes())
    }
}

// ============================================================================
// NAME VALIDATION
// ============================================================================

/// DOS device names rejected in resource names; opening one of these as a
/// file does something very different from what the caller intended.
const DEVICE_NAMES: &[&str] = &[
    "prn", "aux", "con", "nul", "conin$", "conout$", "clock$",
];

/// Validate a caller-supplied resource name and canonicalize it to the
/// 32-byte form.
///
/// The empty name, path separators, `..`, and DOS device names are all
/// rejected; names reach the filesystem as `<resref>.<ext>` during
/// extraction and none of those may influence where that lands.
pub fn checked_res_ref(name: &str) -> Result<ResRef32, ResourceError> {
    let illegal = || ResourceError::IllegalName {
        name: name.to_string(),
    };

    if name.is_empty() || name.len() > ResRef32::LEN {
        return Err(illegal());
    }
    if name.contains(['\\', '/']) || name.contains("..") {
        return Err(illegal());
    }
    let lower = name.to_ascii_lowercase();
    if DEVICE_NAMES.contains(&lower.as_str()) {
        return Err(illegal());
    }
    if let Some(rest) = lower
        .strip_prefix("com")
        .or_else(|| lower.strip_prefix("lpt"))
    {
        if rest.len() == 1 && rest.as_bytes()[0].is_ascii_digit() {
            return Err(illegal());
        }
    }
    Ok(ResRef32::new(name))
}

// ============================================================================
// RESOURCE TYPES
// ============================================================================

/// 16-bit resource type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResType(pub u16);

/// `(code, extension)` table published with the engine documentation.
const RES_TYPE_TABLE: &[(u16, &str)] = &[
    (1, "bmp"),
    (3, "tga"),
    (4, "wav"),
    (6, "plt"),
    (7, "ini"),
    (8, "bmu"),
    (10, "txt"),
    (2002, "mdl"),
    (2009, "nss"),
    (2010, "ncs"),
    (2012, "are"),
    (2013, "set"),
    (2014, "ifo"),
    (2015, "bic"),
    (2016, "wok"),
    (2017, "2da"),
    (2022, "txi"),
    (2023, "git"),
    (2025, "uti"),
    (2027, "utc"),
    (2029, "dlg"),
    (2030, "itp"),
    (2032, "utt"),
    (2033, "dds"),
    (2035, "uts"),
    (2036, "ltr"),
    (2037, "gff"),
    (2038, "fac"),
    (2040, "ute"),
    (2042, "utd"),
    (2044, "utp"),
    (2045, "dft"),
    (2046, "gic"),
    (2047, "gui"),
    (2051, "utm"),
    (2052, "dwk"),
    (2053, "pwk"),
    (2056, "jrl"),
    (2058, "utw"),
    (2060, "ssf"),
    (2064, "ndb"),
    (2065, "ptm"),
    (2066, "ptt"),
    (3001, "usc"),
    (3002, "trn"),
    (3003, "utr"),
    (3004, "uen"),
    (3005, "ult"),
    (3006, "sef"),
    (3007, "pfx"),
    (3008, "cam"),
    (3011, "upe"),
    (3015, "pfb"),
    (3018, "bbx"),
    (3020, "wlk"),
    (3021, "xml"),
    (3035, "trx"),
    (4000, "mdb"),
    (4002, "spt"),
    (4003, "gr2"),
    (4004, "fxa"),
    (4005, "fxe"),
    (4007, "jpg"),
    (4008, "pwc"),
];

impl ResType {
    pub const NSS: ResType = ResType(2009);
    pub const NCS: ResType = ResType(2010);
    pub const ARE: ResType = ResType(2012);
    pub const IFO: ResType = ResType(2014);
    pub const BIC: ResType = ResType(2015);
    pub const TWO_DA: ResType = ResType(2017);
    pub const GIT: ResType = ResType(2023);
    pub const UTI: ResType = ResType(2025);
    pub const UTC: ResType = ResType(2027);
    pub const DLG: ResType = ResType(2029);
    pub const GFF: ResType = ResType(2037);
    pub const NDB: ResType = ResType(2064);
    pub const CAM: ResType = ResType(3008);
    pub const PWC: ResType = ResType(4008);
    pub const INVALID: ResType = ResType(0xFFFF);

    /// Extension (without dot) for this type code.
    pub fn extension(self) -> Option<&'static str> {
        RES_TYPE_TABLE
            .iter()
            .find(|&&(code, _)| code == self.0)
            .map(|&(_, ext)| ext)
    }

    /// Type code for an extension (without dot), case-insensitive.
    pub fn from_extension(ext: &str) -> Option<ResType> {
        let lower = ext.to_ascii_lowercase();
        RES_TYPE_TABLE
            .iter()
            .find(|&&(_, e)| e == lower)
            .map(|&(code, _)| ResType(code))
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Debug for ResType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.extension() {
            Some(ext) => write!(f, "ResType({} /{})", self.0, ext),
            None => write!(f, "ResType({})", self.0),
        }
    }
}

impl fmt::Display for ResType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Failures of the resource layer's public operations.
#[derive(Debug)]
pub enum ResourceError {
    /// Name contained path traversal, a device name, or was empty.
    IllegalName { name: String },
    /// No provider carries the requested `(resref, type)`.
    NotFound { resref: ResRef32, res_type: ResType },
    /// Handle was never issued or already closed.
    InvalidHandle { handle: FileHandle },
    /// The handle allocator wrapped all the way around.
    HandleSpaceExhausted,
    /// `release` on a path that is not demanded.
    NotDemanded { path: PathBuf },
    /// Module could not be located under any of its forms.
    ModuleNotFound { name: String },
    /// Provider refused to open an indexed resource.
    OpenFailed { resref: ResRef32, res_type: ResType },
    /// Type code has no extension mapping, so no temp file name exists.
    UnmappedType { res_type: ResType },
    /// A provider failed to deliver the resource's bytes.
    Provider(ArchiveError),
    Io(io::Error),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::IllegalName { name } => {
                write!(f, "illegal resource name '{}'", name)
            }
            ResourceError::NotFound { resref, res_type } => {
                write!(f, "resource '{}' (type {}) not found", resref, res_type)
            }
            ResourceError::InvalidHandle { handle } => {
                write!(f, "file handle {} is not open", handle)
            }
            ResourceError::HandleSpaceExhausted => {
                write!(f, "file handle space exhausted")
            }
            ResourceError::NotDemanded { path } => {
                write!(f, "release of '{}' which was never demanded", path.display())
            }
            ResourceError::ModuleNotFound { name } => {
                write!(f, "couldn't locate module '{}'", name)
            }
            ResourceError::OpenFailed { resref, res_type } => {
                write!(f, "failed to open resource '{}' (type {})", resref, res_type)
            }
            ResourceError::UnmappedType { res_type } => {
                write!(f, "no extension mapping for resource type {}", res_type)
            }
            ResourceError::Provider(err) => write!(f, "provider error: {}", err),
            ResourceError::Io(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl std::error::Error for ResourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResourceError::Provider(err) => Some(err),
            ResourceError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ResourceError {
    fn from(err: io::Error) -> Self {
        ResourceError::Io(err)
    }
}

impl From<ArchiveError> for ResourceError {
    fn from(err: ArchiveError) -> Self {
        ResourceError::Provider(err)
    }
}
