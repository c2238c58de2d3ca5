// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Lazy, random-access GFF reader.
//!
//! Construction parses and validates the header plus the struct-level
//! invariants, then everything else is computed on demand by absolute
//! offset. No section is decoded up front, so opening a 10 MB module
//! manifest to read three fields costs three field reads.
//!
//! Error policy: the constructor returns [`GffError`]; every accessor after
//! that returns `Option` and callers use `None` as control flow. A length is
//! always range-checked against its section before any allocation happens,
//! which is what keeps adversarial files from turning a 60-byte input into
//! a 2 GB `Vec`.

use std::path::Path;

use crate::stream::ByteReader;
use crate::tlk::TalkStringLookup;

use super::header::{GffHeader, GFF_HEADER_SIZE};
use super::{pad_label, FieldType, GffError, Language, LocString, LocSubstring};
use super::{LABEL_LEN, ROOT_STRUCT_TYPE, STRREF_INVALID};

/// On-disk struct record.
#[derive(Debug, Clone, Copy)]
struct StructEntry {
    struct_type: u32,
    data_or_offset: u32,
    field_count: u32,
}

/// A field record plus its position in the field array.
#[derive(Debug, Clone, Copy)]
pub struct FieldHandle {
    pub(crate) index: u32,
    pub(crate) raw_type: u32,
    pub(crate) label_index: u32,
    pub(crate) data_or_offset: u32,
}

impl FieldHandle {
    pub fn field_type(&self) -> Option<FieldType> {
        FieldType::from_raw(self.raw_type)
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

// ============================================================================
// READER
// ============================================================================

/// Read-only view over a GFF container held in memory.
pub struct GffReader {
    data: Vec<u8>,
    header: GffHeader,
    language: Language,
}

impl GffReader {
    /// Open a container from a file on disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, GffError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(data)
    }

    /// Open a container over an owned byte buffer.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, GffError> {
        let header = GffHeader::parse(&data)?;
        let reader = Self {
            data,
            header,
            language: Language::default(),
        };

        // Root must exist and carry the sentinel type.
        match reader.struct_entry(0) {
            Some(root) if root.struct_type == ROOT_STRUCT_TYPE => {}
            _ => return Err(GffError::BadRootStruct),
        }

        // Every multi-field struct must keep its index range inside the
        // field-indices section. Checked once here so field walks can't
        // wander out of the file no matter what the records claim.
        for index in 0..reader.header.struct_count {
            let entry = reader.struct_entry(index).ok_or(GffError::BadRootStruct)?;
            if entry.field_count > 1 {
                let end = entry
                    .data_or_offset
                    .checked_add(entry.field_count.checked_mul(4).ok_or(
                        GffError::StructIndicesOutOfBounds {
                            struct_index: index,
                        },
                    )?)
                    .ok_or(GffError::StructIndicesOutOfBounds {
                        struct_index: index,
                    })?;
                if end > reader.header.field_indices_count {
                    return Err(GffError::StructIndicesOutOfBounds {
                        struct_index: index,
                    });
                }
            }
        }

        Ok(reader)
    }

    /// Language preferred when reading localized strings.
    pub fn set_default_language(&mut self, language: Language) {
        self.language = language;
    }

    pub fn default_language(&self) -> Language {
        self.language
    }

    /// The caller-chosen content tag from the header.
    pub fn file_type(&self) -> [u8; 4] {
        self.header.file_type
    }

    pub fn struct_count(&self) -> u32 {
        self.header.struct_count
    }

    /// Root struct of the container.
    pub fn root(&self) -> GffStruct<'_> {
        // Validated at construction.
        let entry = self.struct_entry(0).expect("root checked at construction");
        GffStruct {
            reader: self,
            entry,
            index: 0,
        }
    }

    pub fn struct_by_index(&self, index: u32) -> Option<GffStruct<'_>> {
        let entry = self.struct_entry(index)?;
        Some(GffStruct {
            reader: self,
            entry,
            index,
        })
    }

    // ------------------------------------------------------------------
    // Raw record access
    // ------------------------------------------------------------------

    fn struct_entry(&self, index: u32) -> Option<StructEntry> {
        if index >= self.header.struct_count {
            return None;
        }
        let offset = self.header.struct_offset as usize + index as usize * 12;
        let mut r = ByteReader::new(&self.data);
        r.seek(offset).ok()?;
        Some(StructEntry {
            struct_type: r.read_u32().ok()?,
            data_or_offset: r.read_u32().ok()?,
            field_count: r.read_u32().ok()?,
        })
    }

    fn field_entry(&self, index: u32) -> Option<FieldHandle> {
        if index >= self.header.field_count {
            return None;
        }
        let offset = self.header.field_offset as usize + index as usize * 12;
        let mut r = ByteReader::new(&self.data);
        r.seek(offset).ok()?;
        Some(FieldHandle {
            index,
            raw_type: r.read_u32().ok()?,
            label_index: r.read_u32().ok()?,
            data_or_offset: r.read_u32().ok()?,
        })
    }

    fn label(&self, index: u32) -> Option<&[u8]> {
        if index >= self.header.label_count {
            return None;
        }
        let offset = self.header.label_offset as usize + index as usize * LABEL_LEN;
        self.data.get(offset..offset + LABEL_LEN)
    }

    /// Borrow `len` bytes of the field-data section starting at `offset`.
    fn field_data(&self, offset: u32, len: u32) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        if end > self.header.field_data_count {
            return None;
        }
        let start = self.header.field_data_offset as usize + offset as usize;
        self.data.get(start..start + len as usize)
    }

    /// Read a u32 out of the list-indices section.
    fn list_index_word(&self, byte_offset: u32) -> Option<u32> {
        let end = byte_offset.checked_add(4)?;
        if end > self.header.list_indices_count {
            return None;
        }
        let start = self.header.list_indices_offset as usize + byte_offset as usize;
        let bytes = self.data.get(start..start + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    // ------------------------------------------------------------------
    // Complex payload decoding
    // ------------------------------------------------------------------

    /// Length-prefixed (u32) byte run in field data. Rejects lengths that
    /// do not fit the section, or that carry the sign bit, before any
    /// allocation.
    fn counted_bytes(&self, offset: u32) -> Option<Vec<u8>> {
        let prefix = self.field_data(offset, 4)?;
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        if len > i32::MAX as u32 {
            return None;
        }
        let body_offset = offset.checked_add(4)?;
        let body = self.field_data(body_offset, len)?;
        Some(body.to_vec())
    }

    /// Resource-ref payload: u8 length prefix, at most 32 bytes.
    fn resref_bytes(&self, offset: u32) -> Option<Vec<u8>> {
        let prefix = self.field_data(offset, 1)?;
        let len = u32::from(prefix[0]);
        if len > 32 {
            return None;
        }
        let body = self.field_data(offset.checked_add(1)?, len)?;
        Some(body.to_vec())
    }

    fn loc_string_payload(&self, offset: u32) -> Option<LocString> {
        let header = self.field_data(offset, 12)?;
        let mut r = ByteReader::new(header);
        let total_len = r.read_u32().ok()?;
        let string_ref = r.read_u32().ok()?;
        let count = r.read_u32().ok()?;

        // The declared total length excludes its own length word; the
        // substring area must fit inside it and inside the section.
        let body_len = total_len.checked_sub(8)?;
        let body = self.field_data(offset.checked_add(12)?, body_len)?;

        // Each substring needs at least its 8-byte header.
        if count as usize > body.len() / 8 {
            return None;
        }

        let mut substrings = Vec::with_capacity(count as usize);
        let mut r = ByteReader::new(body);
        for _ in 0..count {
            let string_id = r.read_u32().ok()?;
            let len = r.read_u32().ok()?;
            if len > i32::MAX as u32 {
                return None;
            }
            let text = r.view(len as usize).ok()?;
            substrings.push(LocSubstring::from_string_id(string_id, text.to_vec()));
        }

        Some(LocString {
            string_ref,
            substrings,
        })
    }

    /// The verbatim payload bytes of a field, inline or out-of-line.
    ///
    /// Used by the writer's bulk ingest; struct- and list-typed fields have
    /// no flat payload and answer `None`.
    pub(crate) fn field_payload_bytes(&self, field: &FieldHandle) -> Option<Vec<u8>> {
        let ty = field.field_type()?;
        if ty.has_inline_storage() {
            return Some(field.data_or_offset.to_le_bytes().to_vec());
        }
        match ty {
            FieldType::Dword64 | FieldType::Int64 | FieldType::Double => {
                Some(self.field_data(field.data_or_offset, 8)?.to_vec())
            }
            FieldType::Vector => Some(self.field_data(field.data_or_offset, 12)?.to_vec()),
            FieldType::ExoString | FieldType::Void => {
                let body = self.counted_bytes(field.data_or_offset)?;
                let mut payload = ((body.len()) as u32).to_le_bytes().to_vec();
                payload.extend_from_slice(&body);
                Some(payload)
            }
            FieldType::ResRef => {
                let body = self.resref_bytes(field.data_or_offset)?;
                let mut payload = vec![body.len() as u8];
                payload.extend_from_slice(&body);
                Some(payload)
            }
            FieldType::ExoLocString => {
                let prefix = self.field_data(field.data_or_offset, 4)?;
                let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
                // Validate before trusting the declared length.
                self.loc_string_payload(field.data_or_offset)?;
                let body = self.field_data(field.data_or_offset.checked_add(4)?, len)?;
                let mut payload = len.to_le_bytes().to_vec();
                payload.extend_from_slice(body);
                Some(payload)
            }
            _ => None,
        }
    }
}

// ============================================================================
// STRUCT HANDLE
// ============================================================================

/// Handle to one struct inside a [`GffReader`].
#[derive(Clone, Copy)]
pub struct GffStruct<'r> {
    reader: &'r GffReader,
    entry: StructEntry,
    index: u32,
}

impl<'r> GffStruct<'r> {
    pub fn struct_type(&self) -> u32 {
        self.entry.struct_type
    }

    pub fn struct_index(&self) -> u32 {
        self.index
    }

    pub fn field_count(&self) -> u32 {
        self.entry.field_count
    }

    /// Global field index of the `i`-th field of this struct.
    fn field_index_at(&self, i: u32) -> Option<u32> {
        if i >= self.entry.field_count {
            return None;
        }
        if self.entry.field_count == 1 {
            // Single-field structs store the field index directly.
            return Some(self.entry.data_or_offset);
        }
        // Multi-field structs indirect through the field-indices section;
        // the range was bounds-checked at construction.
        self.reader
            .list_like_field_index(self.entry.data_or_offset, i)
    }

    /// Field descriptor by position within this struct.
    pub fn field_at(&self, i: u32) -> Option<FieldHandle> {
        self.reader.field_entry(self.field_index_at(i)?)
    }

    /// Field descriptor by name: a linear scan comparing the 16-byte padded
    /// label. The field entry is always fetched before its label is read.
    pub fn field_by_name(&self, name: &str) -> Option<FieldHandle> {
        let wanted = pad_label(name);
        for i in 0..self.entry.field_count {
            let field = self.field_at(i)?;
            let label = self.reader.label(field.label_index)?;
            if label == wanted {
                return Some(field);
            }
        }
        None
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.field_by_name(name)?.field_type()
    }

    pub fn field_type_at(&self, i: u32) -> Option<FieldType> {
        self.field_at(i)?.field_type()
    }

    /// Field name by position, trimmed of label padding.
    pub fn field_name_at(&self, i: u32) -> Option<String> {
        let field = self.field_at(i)?;
        let label = self.reader.label(field.label_index)?;
        let end = label.iter().position(|&b| b == 0).unwrap_or(LABEL_LEN);
        Some(String::from_utf8_lossy(&label[..end]).into_owned())
    }

    /// Lazy `(name, descriptor)` walk over the struct's fields.
    pub fn fields(&self) -> impl Iterator<Item = (String, FieldHandle)> + '_ {
        let this = *self;
        (0..self.entry.field_count).filter_map(move |i| {
            let name = this.field_name_at(i)?;
            let field = this.field_at(i)?;
            Some((name, field))
        })
    }

    // ------------------------------------------------------------------
    // Typed getters. Each verifies the declared type and answers None on
    // mismatch; a wrong type is the caller's control flow, not an error.
    // ------------------------------------------------------------------

    fn inline_field(&self, name: &str, ty: FieldType) -> Option<u32> {
        let field = self.field_by_name(name)?;
        if field.field_type()? != ty {
            return None;
        }
        Some(field.data_or_offset)
    }

    pub fn get_u8(&self, name: &str) -> Option<u8> {
        Some(self.inline_field(name, FieldType::Byte)?.to_le_bytes()[0])
    }

    pub fn get_i8(&self, name: &str) -> Option<i8> {
        Some(self.inline_field(name, FieldType::Char)?.to_le_bytes()[0] as i8)
    }

    pub fn get_u16(&self, name: &str) -> Option<u16> {
        let raw = self.inline_field(name, FieldType::Word)?.to_le_bytes();
        Some(u16::from_le_bytes([raw[0], raw[1]]))
    }

    pub fn get_i16(&self, name: &str) -> Option<i16> {
        let raw = self.inline_field(name, FieldType::Short)?.to_le_bytes();
        Some(i16::from_le_bytes([raw[0], raw[1]]))
    }

    pub fn get_u32(&self, name: &str) -> Option<u32> {
        self.inline_field(name, FieldType::Dword)
    }

    pub fn get_i32(&self, name: &str) -> Option<i32> {
        Some(self.inline_field(name, FieldType::Int)? as i32)
    }

    pub fn get_f32(&self, name: &str) -> Option<f32> {
        Some(f32::from_bits(self.inline_field(name, FieldType::Float)?))
    }

    fn eight_byte_field(&self, name: &str, ty: FieldType) -> Option<[u8; 8]> {
        let field = self.field_by_name(name)?;
        if field.field_type()? != ty {
            return None;
        }
        let bytes = self.reader.field_data(field.data_or_offset, 8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(bytes);
        Some(out)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        Some(u64::from_le_bytes(
            self.eight_byte_field(name, FieldType::Dword64)?,
        ))
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        Some(i64::from_le_bytes(
            self.eight_byte_field(name, FieldType::Int64)?,
        ))
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        Some(f64::from_le_bytes(
            self.eight_byte_field(name, FieldType::Double)?,
        ))
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        let field = self.field_by_name(name)?;
        if field.field_type()? != FieldType::ExoString {
            return None;
        }
        let bytes = self.reader.counted_bytes(field.data_or_offset)?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn get_resref(&self, name: &str) -> Option<String> {
        let field = self.field_by_name(name)?;
        if field.field_type()? != FieldType::ResRef {
            return None;
        }
        let bytes = self.reader.resref_bytes(field.data_or_offset)?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn get_blob(&self, name: &str) -> Option<Vec<u8>> {
        let field = self.field_by_name(name)?;
        if field.field_type()? != FieldType::Void {
            return None;
        }
        self.reader.counted_bytes(field.data_or_offset)
    }

    pub fn get_vector(&self, name: &str) -> Option<[f32; 3]> {
        let field = self.field_by_name(name)?;
        if field.field_type()? != FieldType::Vector {
            return None;
        }
        let bytes = self.reader.field_data(field.data_or_offset, 12)?;
        let mut r = ByteReader::new(bytes);
        Some([
            r.read_f32().ok()?,
            r.read_f32().ok()?,
            r.read_f32().ok()?,
        ])
    }

    /// Struct-typed field: the record's payload is the target struct index.
    pub fn get_struct(&self, name: &str) -> Option<GffStruct<'r>> {
        let field = self.field_by_name(name)?;
        if field.field_type()? != FieldType::Struct {
            return None;
        }
        self.reader.struct_by_index(field.data_or_offset)
    }

    /// Number of elements in a list-typed field.
    pub fn list_count(&self, name: &str) -> Option<u32> {
        let field = self.field_by_name(name)?;
        if field.field_type()? != FieldType::List {
            return None;
        }
        self.reader.list_index_word(field.data_or_offset)
    }

    /// `i`-th struct of a list-typed field.
    pub fn get_list_element(&self, name: &str, i: u32) -> Option<GffStruct<'r>> {
        let field = self.field_by_name(name)?;
        if field.field_type()? != FieldType::List {
            return None;
        }
        let size = self.reader.list_index_word(field.data_or_offset)?;
        if i >= size {
            return None;
        }
        let element_offset = field
            .data_or_offset
            .checked_add(4)?
            .checked_add(i.checked_mul(4)?)?;
        let struct_index = self.reader.list_index_word(element_offset)?;
        self.reader.struct_by_index(struct_index)
    }

    /// The full localized-string record of a field.
    pub fn get_loc_string_raw(&self, name: &str) -> Option<LocString> {
        let field = self.field_by_name(name)?;
        if field.field_type()? != FieldType::ExoLocString {
            return None;
        }
        self.reader.loc_string_payload(field.data_or_offset)
    }

    /// Localized string resolved to text.
    ///
    /// Pass one looks for a substring in the reader's default language;
    /// pass two takes the first substring of any language. If neither pass
    /// finds text and the record carries a live STRREF, the lookup is
    /// delegated to the supplied talk table.
    pub fn get_loc_string(
        &self,
        name: &str,
        talk: Option<&dyn TalkStringLookup>,
    ) -> Option<String> {
        let loc = self.get_loc_string_raw(name)?;
        let wanted = self.reader.language.id();

        for sub in &loc.substrings {
            if sub.language == wanted {
                return Some(String::from_utf8_lossy(&sub.text).into_owned());
            }
        }
        if let Some(first) = loc.substrings.first() {
            return Some(String::from_utf8_lossy(&first.text).into_owned());
        }
        if loc.string_ref != STRREF_INVALID {
            if let Some(talk) = talk {
                return talk.talk_string(loc.string_ref);
            }
        }
        None
    }

    pub(crate) fn reader(&self) -> &'r GffReader {
        self.reader
    }
}

impl GffReader {
    /// Shared walk for multi-field structs: `byte_offset` names the start of
    /// the struct's index array, `i` the position within it.
    fn list_like_field_index(&self, byte_offset: u32, i: u32) -> Option<u32> {
        let end = byte_offset.checked_add(i.checked_mul(4)?)?.checked_add(4)?;
        if end > self.header.field_indices_count {
            return None;
        }
        let start = self.header.field_indices_offset as usize
            + byte_offset as usize
            + i as usize * 4;
        let bytes = self.data.get(start..start + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

// Keep the header size close to the parser that depends on it.
const _: () = assert!(GFF_HEADER_SIZE == 56);
