// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Generic File Format (GFF) codec: the hierarchical container used for all
//! serialized game data (modules, areas, dialogs, templates, characters).
//!
//! The on-disk layout is fixed by the engine and must round-trip bit-exactly
//! against it. A file is seven sections behind a 56-byte header:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ HEADER (56 bytes)                                        │
//! │   file type tag (4) + version tag "V3.2" (4)             │
//! │   6 × { section offset: u32, section count/bytes: u32 }  │
//! ├──────────────────────────────────────────────────────────┤
//! │ STRUCTS   { type, data-or-offset, field-count } × N      │
//! ├──────────────────────────────────────────────────────────┤
//! │ FIELDS    { type, label-index, data-or-offset } × N      │
//! ├──────────────────────────────────────────────────────────┤
//! │ LABELS    16-byte NUL-padded names × N                   │
//! ├──────────────────────────────────────────────────────────┤
//! │ FIELD DATA     payloads of the complex field types       │
//! ├──────────────────────────────────────────────────────────┤
//! │ FIELD INDICES  packed u32 field indices (multi-field)    │
//! ├──────────────────────────────────────────────────────────┤
//! │ LIST INDICES   { size, struct-index × size } per list    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Types whose storage fits 4 bytes live inline in the field record; the
//! rest indirect through FIELD DATA (or LIST INDICES for lists, or the
//! struct array for struct-typed fields). The root is struct 0 and carries
//! the sentinel type `0xFFFF_FFFF`.
//!
//! The reader ([`GffReader`]) is lazy and never trusts a length it has not
//! checked against the section bounds. The writer ([`GffWriter`]) builds a
//! tree and serializes it in one commit, optionally in the rearranged
//! section order some shipped tools require.

mod header;
mod reader;
mod writer;

pub use header::{GffHeader, GFF_HEADER_SIZE, GFF_VERSION};
pub use reader::{FieldHandle, GffReader, GffStruct};
pub use writer::{CommitFlags, GffWriter, StructId, DEFAULT_COPY_DEPTH};

use std::fmt;
use std::io;

/// Sentinel type carried by the root struct.
pub const ROOT_STRUCT_TYPE: u32 = 0xFFFF_FFFF;

/// Sentinel STRREF meaning "no talk-table string".
pub const STRREF_INVALID: u32 = 0xFFFF_FFFF;

/// Maximum label length, fixed by the on-disk 16-byte label records.
pub const LABEL_LEN: usize = 16;

// ============================================================================
// FIELD TYPES
// ============================================================================

/// Field type codes, a closed enumeration fixed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FieldType {
    Byte = 0,
    Char = 1,
    Word = 2,
    Short = 3,
    Dword = 4,
    Int = 5,
    Dword64 = 6,
    Int64 = 7,
    Float = 8,
    Double = 9,
    ExoString = 10,
    ResRef = 11,
    ExoLocString = 12,
    Void = 13,
    Struct = 14,
    List = 15,
    Reserved = 16,
    Vector = 17,
}

impl FieldType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => FieldType::Byte,
            1 => FieldType::Char,
            2 => FieldType::Word,
            3 => FieldType::Short,
            4 => FieldType::Dword,
            5 => FieldType::Int,
            6 => FieldType::Dword64,
            7 => FieldType::Int64,
            8 => FieldType::Float,
            9 => FieldType::Double,
            10 => FieldType::ExoString,
            11 => FieldType::ResRef,
            12 => FieldType::ExoLocString,
            13 => FieldType::Void,
            14 => FieldType::Struct,
            15 => FieldType::List,
            16 => FieldType::Reserved,
            17 => FieldType::Vector,
            _ => return None,
        })
    }

    /// Whether the payload is stored inline in the field record.
    ///
    /// Everything with storage ≤ 4 bytes qualifies; the rest goes through
    /// the field-data section (or the struct/list index spaces).
    pub fn has_inline_storage(self) -> bool {
        matches!(
            self,
            FieldType::Byte
                | FieldType::Char
                | FieldType::Word
                | FieldType::Short
                | FieldType::Dword
                | FieldType::Int
                | FieldType::Float
        )
    }
}

// ============================================================================
// LANGUAGES
// ============================================================================

/// Localization language ids, as baked into localized-string records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum Language {
    #[default]
    English = 0,
    French = 1,
    German = 2,
    Italian = 3,
    Spanish = 4,
    Polish = 5,
    Korean = 128,
    ChineseTraditional = 129,
    ChineseSimplified = 130,
    Japanese = 131,
}

impl Language {
    pub fn from_id(id: u32) -> Option<Self> {
        Some(match id {
            0 => Language::English,
            1 => Language::French,
            2 => Language::German,
            3 => Language::Italian,
            4 => Language::Spanish,
            5 => Language::Polish,
            128 => Language::Korean,
            129 => Language::ChineseTraditional,
            130 => Language::ChineseSimplified,
            131 => Language::Japanese,
            _ => return None,
        })
    }

    pub fn id(self) -> u32 {
        self as u32
    }
}

/// One substring of a localized string. The string id packs the language id
/// in the high bits with gender in bit 0.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocSubstring {
    pub language: u32,
    pub gender: u32,
    pub text: Vec<u8>,
}

impl LocSubstring {
    pub fn string_id(&self) -> u32 {
        (self.language << 1) | (self.gender & 1)
    }

    pub fn from_string_id(string_id: u32, text: Vec<u8>) -> Self {
        Self {
            language: string_id >> 1,
            gender: string_id & 1,
            text,
        }
    }
}

/// A localized string: an optional talk-table reference plus zero or more
/// per-language substrings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocString {
    pub string_ref: u32,
    pub substrings: Vec<LocSubstring>,
}

impl Default for LocString {
    fn default() -> Self {
        Self {
            string_ref: STRREF_INVALID,
            substrings: Vec::new(),
        }
    }
}

// ============================================================================
// LABELS
// ============================================================================

/// Pad a field name to the on-disk 16-byte label form.
///
/// Names longer than 16 bytes are truncated, matching the engine.
pub(crate) fn pad_label(name: &str) -> [u8; LABEL_LEN] {
    let mut label = [0u8; LABEL_LEN];
    let bytes = name.as_bytes();
    let take = bytes.len().min(LABEL_LEN);
    label[..take].copy_from_slice(&bytes[..take]);
    label
}

// ============================================================================
// ERRORS
// ============================================================================

/// Constructor- and commit-level failures of the GFF codec.
///
/// Per-field access never errors; it answers `None` and the caller treats
/// that as control flow.
#[derive(Debug)]
pub enum GffError {
    /// File shorter than the header, or a section overruns the file.
    Truncated { expected: u64, actual: u64 },
    /// Version tag was not `V3.2`.
    BadVersion([u8; 4]),
    /// The field-indices section byte count is not a multiple of 4.
    MisalignedIndices { count: u32 },
    /// A struct's field-index range falls outside the field-indices section.
    StructIndicesOutOfBounds { struct_index: u32 },
    /// Struct 0 is absent or does not carry the root sentinel type.
    BadRootStruct,
    /// A section size or offset overflowed during commit.
    TooLarge,
    /// Deep copy exceeded the permitted depth.
    DepthExceeded { max_depth: u32 },
    /// Label longer than 16 bytes.
    LabelTooLong { label: String },
    Io(io::Error),
}

impl fmt::Display for GffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GffError::Truncated { expected, actual } => {
                write!(f, "container needs {} bytes but has {}", expected, actual)
            }
            GffError::BadVersion(tag) => {
                write!(f, "unsupported version tag {:?}", String::from_utf8_lossy(tag))
            }
            GffError::MisalignedIndices { count } => {
                write!(f, "field-indices byte count {} is not a multiple of 4", count)
            }
            GffError::StructIndicesOutOfBounds { struct_index } => {
                write!(f, "struct {} field indices fall outside the section", struct_index)
            }
            GffError::BadRootStruct => write!(f, "missing or mistyped root struct"),
            GffError::TooLarge => write!(f, "container section exceeds the 32-bit size limit"),
            GffError::DepthExceeded { max_depth } => {
                write!(f, "struct tree deeper than the {} level limit", max_depth)
            }
            GffError::LabelTooLong { label } => {
                write!(f, "label '{}' longer than 16 bytes", label)
            }
            GffError::Io(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl std::error::Error for GffError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GffError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for GffError {
    fn from(err: io::Error) -> Self {
        GffError::Io(err)
    }
}
