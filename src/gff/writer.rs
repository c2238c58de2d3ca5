// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! GFF writer: a mutable tree that serializes to the on-disk container
//! format in one commit.
//!
//! Structs live in a flat arena addressed by [`StructId`]; parent/child
//! relationships are ordinary owned indices, so there are no pointer cycles
//! to chase and commit is a recursive descent from the root. The section
//! write order is fixed (labels, field data, field indices, structs, list
//! indices, fields, header rewrite). `CommitFlags::SEQUENTIAL` re-emits the
//! finished file with its sections rearranged into the order one shipped
//! consumer insists on.
//!
//! Every `offset + size` along the way is checked math. A container that
//! would cross the 32-bit section limit aborts the commit with
//! [`GffError::TooLarge`], and a file sink opened by the writer is removed
//! rather than left half-written.

use std::collections::HashMap;
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::path::Path;

use super::header::{GffHeader, GFF_VERSION};
use super::reader::GffStruct;
use super::{pad_label, FieldType, GffError, LocString};
use super::{LABEL_LEN, ROOT_STRUCT_TYPE};

/// Default bound for deep copies out of a reader.
pub const DEFAULT_COPY_DEPTH: u32 = 32;

// ============================================================================
// COMMIT FLAGS
// ============================================================================

/// Commit behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitFlags(u32);

impl CommitFlags {
    /// Emit the rearranged section order (structs, fields, labels, field
    /// data, field indices, list indices) required by consumers that read
    /// the file strictly front to back.
    pub const SEQUENTIAL: CommitFlags = CommitFlags(0x1);

    pub fn empty() -> Self {
        CommitFlags(0)
    }

    pub fn contains(self, other: CommitFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CommitFlags {
    type Output = CommitFlags;
    fn bitor(self, rhs: CommitFlags) -> CommitFlags {
        CommitFlags(self.0 | rhs.0)
    }
}

// ============================================================================
// TREE MODEL
// ============================================================================

/// Handle to a struct in the writer's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructId(usize);

#[derive(Debug, Clone)]
enum Payload {
    Byte(u8),
    Char(i8),
    Word(u16),
    Short(i16),
    Dword(u32),
    Int(i32),
    Float(f32),
    Dword64(u64),
    Int64(i64),
    Double(f64),
    String(Vec<u8>),
    ResRef(Vec<u8>),
    LocString(LocString),
    Void(Vec<u8>),
    Vector([f32; 3]),
    Struct(StructId),
    List(Vec<StructId>),
    /// Verbatim bytes ingested from a reader, uninterpreted.
    Raw { raw_type: u32, bytes: Vec<u8> },
}

impl Payload {
    fn raw_type(&self) -> u32 {
        match self {
            Payload::Byte(_) => FieldType::Byte as u32,
            Payload::Char(_) => FieldType::Char as u32,
            Payload::Word(_) => FieldType::Word as u32,
            Payload::Short(_) => FieldType::Short as u32,
            Payload::Dword(_) => FieldType::Dword as u32,
            Payload::Int(_) => FieldType::Int as u32,
            Payload::Float(_) => FieldType::Float as u32,
            Payload::Dword64(_) => FieldType::Dword64 as u32,
            Payload::Int64(_) => FieldType::Int64 as u32,
            Payload::Double(_) => FieldType::Double as u32,
            Payload::String(_) => FieldType::ExoString as u32,
            Payload::ResRef(_) => FieldType::ResRef as u32,
            Payload::LocString(_) => FieldType::ExoLocString as u32,
            Payload::Void(_) => FieldType::Void as u32,
            Payload::Vector(_) => FieldType::Vector as u32,
            Payload::Struct(_) => FieldType::Struct as u32,
            Payload::List(_) => FieldType::List as u32,
            Payload::Raw { raw_type, .. } => *raw_type,
        }
    }
}

#[derive(Debug, Clone)]
struct FieldNode {
    label: [u8; LABEL_LEN],
    payload: Payload,
}

#[derive(Debug, Clone)]
struct StructNode {
    struct_type: u32,
    fields: Vec<FieldNode>,
}

// ============================================================================
// WRITER
// ============================================================================

/// Tree builder for GFF containers.
pub struct GffWriter {
    structs: Vec<StructNode>,
}

impl Default for GffWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl GffWriter {
    /// An empty container: just the pre-linked root struct.
    pub fn new() -> Self {
        Self {
            structs: vec![StructNode {
                struct_type: ROOT_STRUCT_TYPE,
                fields: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> StructId {
        StructId(0)
    }

    fn label_of(name: &str) -> Result<[u8; LABEL_LEN], GffError> {
        if name.is_empty() || name.len() > LABEL_LEN {
            return Err(GffError::LabelTooLong {
                label: name.to_string(),
            });
        }
        Ok(pad_label(name))
    }

    /// Replace the payload of the named field, or append a new field.
    fn set_field(
        &mut self,
        owner: StructId,
        name: &str,
        payload: Payload,
    ) -> Result<(), GffError> {
        let label = Self::label_of(name)?;
        let node = &mut self.structs[owner.0];
        if let Some(existing) = node.fields.iter_mut().find(|f| f.label == label) {
            existing.payload = payload;
        } else {
            node.fields.push(FieldNode { label, payload });
        }
        Ok(())
    }

    fn field_mut(&mut self, owner: StructId, name: &str) -> Option<&mut FieldNode> {
        let label = pad_label(name);
        self.structs[owner.0]
            .fields
            .iter_mut()
            .find(|f| f.label == label)
    }

    // ------------------------------------------------------------------
    // Scalar and flat setters
    // ------------------------------------------------------------------

    pub fn set_u8(&mut self, s: StructId, name: &str, v: u8) -> Result<(), GffError> {
        self.set_field(s, name, Payload::Byte(v))
    }

    pub fn set_i8(&mut self, s: StructId, name: &str, v: i8) -> Result<(), GffError> {
        self.set_field(s, name, Payload::Char(v))
    }

    pub fn set_u16(&mut self, s: StructId, name: &str, v: u16) -> Result<(), GffError> {
        self.set_field(s, name, Payload::Word(v))
    }

    pub fn set_i16(&mut self, s: StructId, name: &str, v: i16) -> Result<(), GffError> {
        self.set_field(s, name, Payload::Short(v))
    }

    pub fn set_u32(&mut self, s: StructId, name: &str, v: u32) -> Result<(), GffError> {
        self.set_field(s, name, Payload::Dword(v))
    }

    pub fn set_i32(&mut self, s: StructId, name: &str, v: i32) -> Result<(), GffError> {
        self.set_field(s, name, Payload::Int(v))
    }

    pub fn set_u64(&mut self, s: StructId, name: &str, v: u64) -> Result<(), GffError> {
        self.set_field(s, name, Payload::Dword64(v))
    }

    pub fn set_i64(&mut self, s: StructId, name: &str, v: i64) -> Result<(), GffError> {
        self.set_field(s, name, Payload::Int64(v))
    }

    pub fn set_f32(&mut self, s: StructId, name: &str, v: f32) -> Result<(), GffError> {
        self.set_field(s, name, Payload::Float(v))
    }

    pub fn set_f64(&mut self, s: StructId, name: &str, v: f64) -> Result<(), GffError> {
        self.set_field(s, name, Payload::Double(v))
    }

    pub fn set_string(&mut self, s: StructId, name: &str, v: &str) -> Result<(), GffError> {
        self.set_field(s, name, Payload::String(v.as_bytes().to_vec()))
    }

    pub fn set_resref(&mut self, s: StructId, name: &str, v: &str) -> Result<(), GffError> {
        let bytes: Vec<u8> = v.bytes().take(32).map(|b| b.to_ascii_lowercase()).collect();
        self.set_field(s, name, Payload::ResRef(bytes))
    }

    pub fn set_blob(&mut self, s: StructId, name: &str, v: &[u8]) -> Result<(), GffError> {
        self.set_field(s, name, Payload::Void(v.to_vec()))
    }

    pub fn set_vector(&mut self, s: StructId, name: &str, v: [f32; 3]) -> Result<(), GffError> {
        self.set_field(s, name, Payload::Vector(v))
    }

    pub fn set_loc_string(
        &mut self,
        s: StructId,
        name: &str,
        v: LocString,
    ) -> Result<(), GffError> {
        self.set_field(s, name, Payload::LocString(v))
    }

    // ------------------------------------------------------------------
    // Tree construction
    // ------------------------------------------------------------------

    fn alloc_struct(&mut self, struct_type: u32) -> StructId {
        self.structs.push(StructNode {
            struct_type,
            fields: Vec::new(),
        });
        StructId(self.structs.len() - 1)
    }

    /// Add a struct-typed field and return the new child.
    pub fn create_struct(
        &mut self,
        owner: StructId,
        name: &str,
        struct_type: u32,
    ) -> Result<StructId, GffError> {
        let child = self.alloc_struct(struct_type);
        self.set_field(owner, name, Payload::Struct(child))?;
        Ok(child)
    }

    /// Add (or clear) a list-typed field.
    pub fn create_list(&mut self, owner: StructId, name: &str) -> Result<(), GffError> {
        self.set_field(owner, name, Payload::List(Vec::new()))
    }

    /// Append a new struct to a list field, creating the list if absent.
    pub fn append_list_struct(
        &mut self,
        owner: StructId,
        name: &str,
        struct_type: u32,
    ) -> Result<StructId, GffError> {
        Self::label_of(name)?;
        if !matches!(
            self.field_mut(owner, name).map(|f| &f.payload),
            Some(Payload::List(_))
        ) {
            self.create_list(owner, name)?;
        }
        let child = self.alloc_struct(struct_type);
        match &mut self.field_mut(owner, name).expect("list created above").payload {
            Payload::List(items) => items.push(child),
            _ => unreachable!("field was just set to a list"),
        }
        Ok(child)
    }

    /// Remove the named field. Structs owned by it become unreachable and
    /// are skipped at commit.
    pub fn delete_field(&mut self, owner: StructId, name: &str) -> bool {
        let label = pad_label(name);
        let fields = &mut self.structs[owner.0].fields;
        let before = fields.len();
        fields.retain(|f| f.label != label);
        fields.len() != before
    }

    // ------------------------------------------------------------------
    // Bulk ingest from a reader
    // ------------------------------------------------------------------

    /// Deep-copy one named field out of a reader struct.
    ///
    /// Flat payloads are carried over verbatim; struct- and list-typed
    /// fields recurse up to `max_depth` levels. On failure nothing is
    /// linked into this writer.
    pub fn copy_field_from_reader(
        &mut self,
        dst: StructId,
        src: &GffStruct<'_>,
        name: &str,
        max_depth: u32,
    ) -> Result<(), GffError> {
        let field = match src.field_by_name(name) {
            Some(field) => field,
            None => return Ok(()),
        };
        let arena_mark = self.structs.len();
        let result = self.ingest_field(dst, src, name, &field, 1, max_depth);
        if result.is_err() {
            // Unlink anything allocated by the failed copy.
            self.structs.truncate(arena_mark);
        }
        result
    }

    /// Rebuild this writer's root from an entire reader struct.
    pub fn init_from_reader_struct(
        &mut self,
        src: &GffStruct<'_>,
        max_depth: u32,
    ) -> Result<(), GffError> {
        *self = Self::new();
        let root = self.root();
        let result = self.ingest_struct_fields(root, src, 1, max_depth);
        if result.is_err() {
            *self = Self::new();
        }
        result
    }

    fn ingest_struct_fields(
        &mut self,
        dst: StructId,
        src: &GffStruct<'_>,
        depth: u32,
        max_depth: u32,
    ) -> Result<(), GffError> {
        if depth > max_depth {
            return Err(GffError::DepthExceeded { max_depth });
        }
        for i in 0..src.field_count() {
            let name = match src.field_name_at(i) {
                Some(name) => name,
                None => continue,
            };
            let field = match src.field_at(i) {
                Some(field) => field,
                None => continue,
            };
            self.ingest_field(dst, src, &name, &field, depth, max_depth)?;
        }
        Ok(())
    }

    fn ingest_field(
        &mut self,
        dst: StructId,
        src: &GffStruct<'_>,
        name: &str,
        field: &super::reader::FieldHandle,
        depth: u32,
        max_depth: u32,
    ) -> Result<(), GffError> {
        match field.field_type() {
            Some(FieldType::Struct) => {
                if depth >= max_depth {
                    return Err(GffError::DepthExceeded { max_depth });
                }
                if let Some(child_src) = src.get_struct(name) {
                    let child = self.alloc_struct(child_src.struct_type());
                    self.ingest_struct_fields(child, &child_src, depth + 1, max_depth)?;
                    self.set_field(dst, name, Payload::Struct(child))?;
                }
            }
            Some(FieldType::List) => {
                if depth >= max_depth {
                    return Err(GffError::DepthExceeded { max_depth });
                }
                let count = src.list_count(name).unwrap_or(0);
                let mut items = Vec::with_capacity(count as usize);
                for i in 0..count {
                    if let Some(elem_src) = src.get_list_element(name, i) {
                        let elem = self.alloc_struct(elem_src.struct_type());
                        self.ingest_struct_fields(elem, &elem_src, depth + 1, max_depth)?;
                        items.push(elem);
                    }
                }
                self.set_field(dst, name, Payload::List(items))?;
            }
            _ => {
                if let Some(bytes) = src.reader().field_payload_bytes(field) {
                    self.set_field(
                        dst,
                        name,
                        Payload::Raw {
                            raw_type: field.raw_type,
                            bytes,
                        },
                    )?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Serialize to an in-memory buffer.
    pub fn commit_to_vec(
        &self,
        file_type: [u8; 4],
        flags: CommitFlags,
    ) -> Result<Vec<u8>, GffError> {
        let mut cursor = Cursor::new(Vec::new());
        self.commit(&mut cursor, file_type, flags)?;
        Ok(cursor.into_inner())
    }

    /// Serialize to a file, removing it again if the commit fails.
    pub fn commit_to_file<P: AsRef<Path>>(
        &self,
        path: P,
        file_type: [u8; 4],
        flags: CommitFlags,
    ) -> Result<(), GffError> {
        let path = path.as_ref();
        let mut file = std::fs::File::create(path)?;
        match self.commit(&mut file, file_type, flags) {
            Ok(()) => Ok(()),
            Err(err) => {
                drop(file);
                let _ = std::fs::remove_file(path);
                Err(err)
            }
        }
    }

    /// Serialize the tree to `sink`.
    pub fn commit<W: Write + Seek>(
        &self,
        sink: &mut W,
        file_type: [u8; 4],
        flags: CommitFlags,
    ) -> Result<(), GffError> {
        let sections = self.build_sections()?;
        let header = sections.header(file_type, flags)?;

        // Placeholder header first; the real one lands in the final seek.
        sink.seek(SeekFrom::Start(0))?;
        GffHeader::default().write(sink)?;
        sections.write_body(sink, flags)?;
        sink.seek(SeekFrom::Start(0))?;
        header.write(sink)?;
        sink.flush()?;
        Ok(())
    }

    fn build_sections(&self) -> Result<Sections, GffError> {
        // Pass 1: struct order, depth-first, root first, insertion order
        // within each field list.
        let mut order: Vec<StructId> = Vec::new();
        let mut index_of: HashMap<StructId, u32> = HashMap::new();
        self.collect_structs(StructId(0), &mut order, &mut index_of)?;

        let mut sections = Sections::default();

        // Pass 2: labels, deduplicated in first-seen order.
        let mut label_index: HashMap<[u8; LABEL_LEN], u32> = HashMap::new();
        for &sid in &order {
            for field in &self.structs[sid.0].fields {
                if !label_index.contains_key(&field.label) {
                    let next = u32::try_from(sections.labels.len()).map_err(|_| GffError::TooLarge)?;
                    label_index.insert(field.label, next);
                    sections.labels.push(field.label);
                }
            }
        }

        // Pass 3: walk fields in global order, emitting complex payloads
        // into field data and drafting each field record.
        #[derive(Clone, Copy)]
        enum Slot {
            Inline(u32),
            FieldData(u32),
            StructIndex(StructId),
            ListOffsetOf { struct_id: StructId, field: usize },
        }
        let mut drafts: Vec<(u32, u32, Slot)> = Vec::new();
        for &sid in &order {
            for (field_pos, field) in self.structs[sid.0].fields.iter().enumerate() {
                let label = label_index[&field.label];
                let slot = match &field.payload {
                    Payload::Byte(v) => Slot::Inline(u32::from(*v)),
                    Payload::Char(v) => Slot::Inline(u32::from_le_bytes([*v as u8, 0, 0, 0])),
                    Payload::Word(v) => Slot::Inline(u32::from(*v)),
                    Payload::Short(v) => {
                        let b = v.to_le_bytes();
                        Slot::Inline(u32::from_le_bytes([b[0], b[1], 0, 0]))
                    }
                    Payload::Dword(v) => Slot::Inline(*v),
                    Payload::Int(v) => Slot::Inline(*v as u32),
                    Payload::Float(v) => Slot::Inline(v.to_bits()),
                    Payload::Dword64(v) => {
                        Slot::FieldData(sections.push_field_data(&v.to_le_bytes())?)
                    }
                    Payload::Int64(v) => {
                        Slot::FieldData(sections.push_field_data(&v.to_le_bytes())?)
                    }
                    Payload::Double(v) => {
                        Slot::FieldData(sections.push_field_data(&v.to_le_bytes())?)
                    }
                    Payload::String(bytes) | Payload::Void(bytes) => {
                        let len = u32::try_from(bytes.len()).map_err(|_| GffError::TooLarge)?;
                        let offset = sections.push_field_data(&len.to_le_bytes())?;
                        sections.push_field_data(bytes)?;
                        Slot::FieldData(offset)
                    }
                    Payload::ResRef(bytes) => {
                        let offset = sections.push_field_data(&[bytes.len() as u8])?;
                        sections.push_field_data(bytes)?;
                        Slot::FieldData(offset)
                    }
                    Payload::LocString(loc) => {
                        Slot::FieldData(sections.push_loc_string(loc)?)
                    }
                    Payload::Vector(v) => {
                        let mut bytes = [0u8; 12];
                        bytes[0..4].copy_from_slice(&v[0].to_le_bytes());
                        bytes[4..8].copy_from_slice(&v[1].to_le_bytes());
                        bytes[8..12].copy_from_slice(&v[2].to_le_bytes());
                        Slot::FieldData(sections.push_field_data(&bytes)?)
                    }
                    Payload::Struct(child) => Slot::StructIndex(*child),
                    Payload::List(_) => Slot::ListOffsetOf {
                        struct_id: sid,
                        field: field_pos,
                    },
                    Payload::Raw { raw_type, bytes } => {
                        let inline = FieldType::from_raw(*raw_type)
                            .is_some_and(FieldType::has_inline_storage);
                        if inline {
                            let mut word = [0u8; 4];
                            let take = bytes.len().min(4);
                            word[..take].copy_from_slice(&bytes[..take]);
                            Slot::Inline(u32::from_le_bytes(word))
                        } else {
                            Slot::FieldData(sections.push_field_data(bytes)?)
                        }
                    }
                };
                drafts.push((field.payload.raw_type(), label, slot));
            }
        }

        // Pass 4: field-index arrays for multi-field structs, and global
        // field numbering for struct records.
        let mut next_field: u32 = 0;
        let mut struct_records: Vec<(u32, u32, u32)> = Vec::new();
        for &sid in &order {
            let node = &self.structs[sid.0];
            let count = u32::try_from(node.fields.len()).map_err(|_| GffError::TooLarge)?;
            let data_or_offset = match count {
                0 => 0,
                1 => next_field,
                _ => {
                    let offset =
                        u32::try_from(sections.field_indices.len()).map_err(|_| GffError::TooLarge)?;
                    for i in 0..count {
                        let index = next_field.checked_add(i).ok_or(GffError::TooLarge)?;
                        sections.field_indices.extend_from_slice(&index.to_le_bytes());
                    }
                    offset
                }
            };
            struct_records.push((node.struct_type, data_or_offset, count));
            next_field = next_field.checked_add(count).ok_or(GffError::TooLarge)?;
        }
        sections.structs = struct_records;

        // Pass 5: list-index arrays, in the same walk order the drafts used.
        let mut list_offsets: HashMap<(StructId, usize), u32> = HashMap::new();
        for &sid in &order {
            for (field_pos, field) in self.structs[sid.0].fields.iter().enumerate() {
                if let Payload::List(items) = &field.payload {
                    let offset =
                        u32::try_from(sections.list_indices.len()).map_err(|_| GffError::TooLarge)?;
                    let size = u32::try_from(items.len()).map_err(|_| GffError::TooLarge)?;
                    sections.list_indices.extend_from_slice(&size.to_le_bytes());
                    for item in items {
                        let index = index_of[item];
                        sections.list_indices.extend_from_slice(&index.to_le_bytes());
                    }
                    list_offsets.insert((sid, field_pos), offset);
                }
            }
        }

        // Pass 6: finalize field records.
        for (raw_type, label, slot) in drafts {
            let data_or_offset = match slot {
                Slot::Inline(v) | Slot::FieldData(v) => v,
                Slot::StructIndex(child) => index_of[&child],
                Slot::ListOffsetOf { struct_id, field } => list_offsets[&(struct_id, field)],
            };
            sections.fields.push((raw_type, label, data_or_offset));
        }

        Ok(sections)
    }

    fn collect_structs(
        &self,
        sid: StructId,
        order: &mut Vec<StructId>,
        index_of: &mut HashMap<StructId, u32>,
    ) -> Result<(), GffError> {
        let index = u32::try_from(order.len()).map_err(|_| GffError::TooLarge)?;
        index_of.insert(sid, index);
        order.push(sid);
        for field in &self.structs[sid.0].fields {
            match &field.payload {
                Payload::Struct(child) => self.collect_structs(*child, order, index_of)?,
                Payload::List(items) => {
                    for item in items {
                        self.collect_structs(*item, order, index_of)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION ASSEMBLY
// ============================================================================

#[derive(Default)]
struct Sections {
    labels: Vec<[u8; LABEL_LEN]>,
    field_data: Vec<u8>,
    field_indices: Vec<u8>,
    structs: Vec<(u32, u32, u32)>,
    list_indices: Vec<u8>,
    fields: Vec<(u32, u32, u32)>,
}

impl Sections {
    /// Append to field data, checking the 32-bit section limit before the
    /// write. Returns the payload's offset within the section.
    fn push_field_data(&mut self, bytes: &[u8]) -> Result<u32, GffError> {
        let offset = u32::try_from(self.field_data.len()).map_err(|_| GffError::TooLarge)?;
        let end = (offset as u64) + bytes.len() as u64;
        if end > u64::from(u32::MAX) {
            return Err(GffError::TooLarge);
        }
        self.field_data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn push_loc_string(&mut self, loc: &LocString) -> Result<u32, GffError> {
        let mut body = Vec::new();
        body.extend_from_slice(&loc.string_ref.to_le_bytes());
        body.extend_from_slice(&(loc.substrings.len() as u32).to_le_bytes());
        for sub in &loc.substrings {
            body.extend_from_slice(&sub.string_id().to_le_bytes());
            let len = u32::try_from(sub.text.len()).map_err(|_| GffError::TooLarge)?;
            body.extend_from_slice(&len.to_le_bytes());
            body.extend_from_slice(&sub.text);
        }
        let total = u32::try_from(body.len()).map_err(|_| GffError::TooLarge)?;
        let offset = self.push_field_data(&total.to_le_bytes())?;
        self.push_field_data(&body)?;
        Ok(offset)
    }

    fn section_sizes(&self) -> Result<[u32; 6], GffError> {
        let take = |n: usize| u32::try_from(n).map_err(|_| GffError::TooLarge);
        Ok([
            take(self.labels.len())?.checked_mul(16).ok_or(GffError::TooLarge)?,
            take(self.field_data.len())?,
            take(self.field_indices.len())?,
            take(self.structs.len())?.checked_mul(12).ok_or(GffError::TooLarge)?,
            take(self.list_indices.len())?,
            take(self.fields.len())?.checked_mul(12).ok_or(GffError::TooLarge)?,
        ])
    }

    /// Section order within the file body, as (file order index into the
    /// size table). Default order follows the write sequence; SEQUENTIAL
    /// uses the rearranged order front-to-back consumers expect.
    fn file_order(flags: CommitFlags) -> [usize; 6] {
        if flags.contains(CommitFlags::SEQUENTIAL) {
            // structs, fields, labels, field data, field indices, list indices
            [3, 5, 0, 1, 2, 4]
        } else {
            // labels, field data, field indices, structs, list indices, fields
            [0, 1, 2, 3, 4, 5]
        }
    }

    fn header(&self, file_type: [u8; 4], flags: CommitFlags) -> Result<GffHeader, GffError> {
        let sizes = self.section_sizes()?;
        let mut offsets = [0u32; 6];
        let mut cursor: u32 = 56;
        for section in Self::file_order(flags) {
            offsets[section] = cursor;
            cursor = cursor.checked_add(sizes[section]).ok_or(GffError::TooLarge)?;
        }
        Ok(GffHeader {
            file_type,
            version: GFF_VERSION,
            struct_offset: offsets[3],
            struct_count: u32::try_from(self.structs.len()).map_err(|_| GffError::TooLarge)?,
            field_offset: offsets[5],
            field_count: u32::try_from(self.fields.len()).map_err(|_| GffError::TooLarge)?,
            label_offset: offsets[0],
            label_count: u32::try_from(self.labels.len()).map_err(|_| GffError::TooLarge)?,
            field_data_offset: offsets[1],
            field_data_count: sizes[1],
            field_indices_offset: offsets[2],
            field_indices_count: sizes[2],
            list_indices_offset: offsets[4],
            list_indices_count: sizes[4],
        })
    }

    fn write_body<W: Write>(&self, sink: &mut W, flags: CommitFlags) -> Result<(), GffError> {
        for section in Self::file_order(flags) {
            match section {
                0 => {
                    for label in &self.labels {
                        sink.write_all(label)?;
                    }
                }
                1 => sink.write_all(&self.field_data)?,
                2 => sink.write_all(&self.field_indices)?,
                3 => {
                    for (ty, data, count) in &self.structs {
                        sink.write_all(&ty.to_le_bytes())?;
                        sink.write_all(&data.to_le_bytes())?;
                        sink.write_all(&count.to_le_bytes())?;
                    }
                }
                4 => sink.write_all(&self.list_indices)?,
                5 => {
                    for (ty, label, data) in &self.fields {
                        sink.write_all(&ty.to_le_bytes())?;
                        sink.write_all(&label.to_le_bytes())?;
                        sink.write_all(&data.to_le_bytes())?;
                    }
                }
                _ => unreachable!("section index"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{GffReader, Language, LocSubstring};
    use super::*;

    #[test]
    fn scalar_and_string_fields_roundtrip() {
        let mut w = GffWriter::new();
        let root = w.root();
        w.set_u8(root, "B", 200).unwrap();
        w.set_i16(root, "S", -1234).unwrap();
        w.set_u64(root, "Q", u64::MAX - 1).unwrap();
        w.set_f64(root, "D", 2.5).unwrap();
        w.set_resref(root, "Script", "NW_Spell0").unwrap();
        w.set_blob(root, "Data", &[1, 2, 3, 4, 5]).unwrap();
        w.set_vector(root, "Pos", [1.0, -2.0, 3.5]).unwrap();

        let bytes = w.commit_to_vec(*b"UTC ", CommitFlags::empty()).unwrap();
        let r = GffReader::from_bytes(bytes).unwrap();
        let root = r.root();
        assert_eq!(r.file_type(), *b"UTC ");
        assert_eq!(root.get_u8("B"), Some(200));
        assert_eq!(root.get_i16("S"), Some(-1234));
        assert_eq!(root.get_u64("Q"), Some(u64::MAX - 1));
        assert_eq!(root.get_f64("D"), Some(2.5));
        assert_eq!(root.get_resref("Script").as_deref(), Some("nw_spell0"));
        assert_eq!(root.get_blob("Data").as_deref(), Some(&[1, 2, 3, 4, 5][..]));
        assert_eq!(root.get_vector("Pos"), Some([1.0, -2.0, 3.5]));
    }

    #[test]
    fn nested_structs_and_lists_roundtrip() {
        let mut w = GffWriter::new();
        let root = w.root();
        let child = w.create_struct(root, "Mod_Entry", 11).unwrap();
        w.set_i32(child, "Depth", 1).unwrap();
        for i in 0..3 {
            let item = w.append_list_struct(child, "ItemList", 100 + i).unwrap();
            w.set_u32(item, "Serial", i).unwrap();
        }

        let bytes = w.commit_to_vec(*b"IFO ", CommitFlags::empty()).unwrap();
        let r = GffReader::from_bytes(bytes).unwrap();
        let entry = r.root().get_struct("Mod_Entry").unwrap();
        assert_eq!(entry.struct_type(), 11);
        assert_eq!(entry.get_i32("Depth"), Some(1));
        assert_eq!(entry.list_count("ItemList"), Some(3));
        for i in 0..3 {
            let item = entry.get_list_element("ItemList", i).unwrap();
            assert_eq!(item.struct_type(), 100 + i);
            assert_eq!(item.get_u32("Serial"), Some(i));
        }
        assert!(entry.get_list_element("ItemList", 3).is_none());
    }

    #[test]
    fn localized_string_falls_back_across_languages() {
        let mut w = GffWriter::new();
        let root = w.root();
        w.set_loc_string(
            root,
            "FirstName",
            LocString {
                string_ref: super::super::STRREF_INVALID,
                substrings: vec![LocSubstring {
                    language: Language::English.id(),
                    gender: 0,
                    text: b"Aribeth".to_vec(),
                }],
            },
        )
        .unwrap();

        let bytes = w.commit_to_vec(*b"BIC ", CommitFlags::empty()).unwrap();
        let mut r = GffReader::from_bytes(bytes).unwrap();
        r.set_default_language(Language::German);
        // Pass one misses (no German), pass two takes the first substring.
        assert_eq!(
            r.root().get_loc_string("FirstName", None).as_deref(),
            Some("Aribeth")
        );
    }

    #[test]
    fn sequential_layout_reorders_sections() {
        let mut w = GffWriter::new();
        let root = w.root();
        w.set_i32(root, "A", 1).unwrap();
        w.set_string(root, "B", "text").unwrap();

        let plain = w.commit_to_vec(*b"GFF ", CommitFlags::empty()).unwrap();
        let seq = w.commit_to_vec(*b"GFF ", CommitFlags::SEQUENTIAL).unwrap();
        assert_eq!(plain.len(), seq.len());
        assert_ne!(plain, seq);

        // Sequential order: structs first, right after the header.
        let header = GffHeader::parse(&seq).unwrap();
        assert_eq!(header.struct_offset, 56);
        assert!(header.field_offset > header.struct_offset);
        assert!(header.label_offset > header.field_offset);
        assert!(header.field_data_offset > header.label_offset);

        // Both layouts decode to the same logical content.
        let r = GffReader::from_bytes(seq).unwrap();
        assert_eq!(r.root().get_i32("A"), Some(1));
        assert_eq!(r.root().get_string("B").as_deref(), Some("text"));
    }

    #[test]
    fn labels_are_deduplicated() {
        let mut w = GffWriter::new();
        let root = w.root();
        for i in 0..4 {
            let item = w.append_list_struct(root, "List", 0).unwrap();
            w.set_i32(item, "Same", i).unwrap();
        }
        let bytes = w.commit_to_vec(*b"GFF ", CommitFlags::empty()).unwrap();
        let header = GffHeader::parse(&bytes).unwrap();
        // "List" + "Same", not 1 + 4.
        assert_eq!(header.label_count, 2);
    }

    #[test]
    fn deep_copy_respects_depth_limit() {
        // Build a 40-level chain.
        let mut w = GffWriter::new();
        let mut cursor = w.root();
        for i in 0..40 {
            cursor = w.create_struct(cursor, "Next", i).unwrap();
            w.set_i32(cursor, "Level", i as i32).unwrap();
        }
        let bytes = w.commit_to_vec(*b"GFF ", CommitFlags::empty()).unwrap();
        let r = GffReader::from_bytes(bytes).unwrap();

        let mut target = GffWriter::new();
        let err = target
            .init_from_reader_struct(&r.root(), DEFAULT_COPY_DEPTH)
            .unwrap_err();
        assert!(matches!(err, GffError::DepthExceeded { max_depth: 32 }));
        // No partial tree: the target is back to a bare root.
        assert_eq!(target.structs.len(), 1);
        assert!(target.structs[0].fields.is_empty());

        // A generous limit succeeds.
        let mut target = GffWriter::new();
        target.init_from_reader_struct(&r.root(), 64).unwrap();
        let copied = target.commit_to_vec(*b"GFF ", CommitFlags::empty()).unwrap();
        let rc = GffReader::from_bytes(copied).unwrap();
        let mut s = rc.root().get_struct("Next").unwrap();
        for _ in 0..39 {
            s = s.get_struct("Next").unwrap();
        }
        assert_eq!(s.get_i32("Level"), Some(39));
    }

    #[test]
    fn delete_field_unlinks_subtree() {
        let mut w = GffWriter::new();
        let root = w.root();
        let child = w.create_struct(root, "Gone", 5).unwrap();
        w.set_i32(child, "X", 1).unwrap();
        w.set_i32(root, "Kept", 2).unwrap();
        assert!(w.delete_field(root, "Gone"));
        assert!(!w.delete_field(root, "Gone"));

        let bytes = w.commit_to_vec(*b"GFF ", CommitFlags::empty()).unwrap();
        let header = GffHeader::parse(&bytes).unwrap();
        assert_eq!(header.struct_count, 1);
        let r = GffReader::from_bytes(bytes).unwrap();
        assert_eq!(r.root().get_i32("Kept"), Some(2));
        assert!(r.root().get_struct("Gone").is_none());
    }

    #[test]
    fn overlong_labels_are_rejected() {
        let mut w = GffWriter::new();
        let root = w.root();
        assert!(matches!(
            w.set_i32(root, "SeventeenBytes!!!", 1),
            Err(GffError::LabelTooLong { .. })
        ));
    }
}
