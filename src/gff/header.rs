// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! GFF header: 56 bytes of fixed-size fields, parsed in one read before
//! anything else. It places every section, so access after construction is
//! pure offset arithmetic.

use std::io::{self, Write};

use crate::stream::ByteReader;

use super::GffError;

/// Version tag required of every container this codec touches.
pub const GFF_VERSION: [u8; 4] = *b"V3.2";

/// Header size: 2 tags + 12 section words.
pub const GFF_HEADER_SIZE: usize = 56;

/// The section directory at the front of every container.
#[derive(Debug, Clone, Default)]
pub struct GffHeader {
    /// Caller-chosen four-character content tag (`"GFF "`, `"BIC "`, ...).
    pub file_type: [u8; 4],
    pub version: [u8; 4],
    pub struct_offset: u32,
    pub struct_count: u32,
    pub field_offset: u32,
    pub field_count: u32,
    pub label_offset: u32,
    pub label_count: u32,
    pub field_data_offset: u32,
    pub field_data_count: u32,
    pub field_indices_offset: u32,
    pub field_indices_count: u32,
    pub list_indices_offset: u32,
    pub list_indices_count: u32,
}

impl GffHeader {
    /// Parse and validate the header against the actual file size.
    ///
    /// Checks the version tag, that every `offset + length` extent fits the
    /// file, and that the field-indices section is u32-aligned. Struct-level
    /// invariants are the reader's job.
    pub fn parse(data: &[u8]) -> Result<Self, GffError> {
        if data.len() < GFF_HEADER_SIZE {
            return Err(GffError::Truncated {
                expected: GFF_HEADER_SIZE as u64,
                actual: data.len() as u64,
            });
        }

        let mut r = ByteReader::new(data);
        let mut file_type = [0u8; 4];
        let mut version = [0u8; 4];
        // Header fits: the length was checked above.
        r.read_exact(&mut file_type).expect("header length checked");
        r.read_exact(&mut version).expect("header length checked");

        if version != GFF_VERSION {
            return Err(GffError::BadVersion(version));
        }

        let mut words = [0u32; 12];
        for word in &mut words {
            *word = r.read_u32().expect("header length checked");
        }

        let header = Self {
            file_type,
            version,
            struct_offset: words[0],
            struct_count: words[1],
            field_offset: words[2],
            field_count: words[3],
            label_offset: words[4],
            label_count: words[5],
            field_data_offset: words[6],
            field_data_count: words[7],
            field_indices_offset: words[8],
            field_indices_count: words[9],
            list_indices_offset: words[10],
            list_indices_count: words[11],
        };

        let file_size = data.len() as u64;
        let extents = [
            (header.struct_offset, header.struct_count as u64 * 12),
            (header.field_offset, header.field_count as u64 * 12),
            (header.label_offset, header.label_count as u64 * 16),
            (header.field_data_offset, header.field_data_count as u64),
            (header.field_indices_offset, header.field_indices_count as u64),
            (header.list_indices_offset, header.list_indices_count as u64),
        ];
        for (offset, bytes) in extents {
            let end = offset as u64 + bytes;
            if end > file_size {
                return Err(GffError::Truncated {
                    expected: end,
                    actual: file_size,
                });
            }
        }

        if header.field_indices_count % 4 != 0 {
            return Err(GffError::MisalignedIndices {
                count: header.field_indices_count,
            });
        }

        Ok(header)
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.file_type)?;
        w.write_all(&self.version)?;
        for word in [
            self.struct_offset,
            self.struct_count,
            self.field_offset,
            self.field_count,
            self.label_offset,
            self.label_count,
            self.field_data_offset,
            self.field_data_count,
            self.field_indices_offset,
            self.field_indices_count,
            self.list_indices_offset,
            self.list_indices_count,
        ] {
            w.write_all(&word.to_le_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_file() -> Vec<u8> {
        let header = GffHeader {
            file_type: *b"GFF ",
            version: GFF_VERSION,
            struct_offset: 56,
            struct_count: 1,
            field_offset: 68,
            field_count: 0,
            label_offset: 68,
            label_count: 0,
            field_data_offset: 68,
            field_data_count: 0,
            field_indices_offset: 68,
            field_indices_count: 0,
            list_indices_offset: 68,
            list_indices_count: 0,
        };
        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();
        bytes.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes
    }

    #[test]
    fn parse_roundtrips_write() {
        let bytes = minimal_file();
        let header = GffHeader::parse(&bytes).unwrap();
        assert_eq!(header.file_type, *b"GFF ");
        assert_eq!(header.struct_count, 1);

        let mut again = Vec::new();
        header.write(&mut again).unwrap();
        assert_eq!(&bytes[..GFF_HEADER_SIZE], &again[..]);
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut bytes = minimal_file();
        bytes[4..8].copy_from_slice(b"V3.3");
        assert!(matches!(
            GffHeader::parse(&bytes),
            Err(GffError::BadVersion(_))
        ));
    }

    #[test]
    fn overrunning_section_is_rejected() {
        let mut bytes = minimal_file();
        // Claim more structs than the file holds.
        bytes[12..16].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            GffHeader::parse(&bytes),
            Err(GffError::Truncated { .. })
        ));
    }

    #[test]
    fn misaligned_field_indices_are_rejected() {
        let mut bytes = minimal_file();
        bytes.extend_from_slice(&[0, 0, 0]);
        // field_indices_count = 3
        bytes[44..48].copy_from_slice(&3u32.to_le_bytes());
        assert!(matches!(
            GffHeader::parse(&bytes),
            Err(GffError::MisalignedIndices { count: 3 })
        ));
    }
}
