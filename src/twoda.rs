// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! 2DA (two-dimensional array) tabular resource parser.
//!
//! 2DA files are whitespace-separated text tables: a `2DA V2.0` tag line, an
//! optional `DEFAULT:` line, a column-name line, then one row per line led
//! by a row number. `****` is the empty cell. Cells may be double-quoted to
//! carry spaces. The engine treats a missing cell as the file's DEFAULT
//! value when one is declared.

use std::fmt;
use std::io;
use std::path::Path;

#[derive(Debug)]
pub enum TwoDaError {
    /// First line was not the `2DA V2.0` tag.
    BadSignature { found: String },
    /// No column-name line before the rows.
    MissingColumns,
    Io(io::Error),
}

impl fmt::Display for TwoDaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TwoDaError::BadSignature { found } => {
                write!(f, "not a 2DA V2.0 file (first line '{}')", found)
            }
            TwoDaError::MissingColumns => write!(f, "2DA has no column header line"),
            TwoDaError::Io(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl std::error::Error for TwoDaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TwoDaError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TwoDaError {
    fn from(err: io::Error) -> Self {
        TwoDaError::Io(err)
    }
}

/// A parsed 2DA table.
pub struct TwoDaFile {
    columns: Vec<String>,
    default_value: Option<String>,
    /// Row cells in column order; `None` is the `****` empty marker.
    rows: Vec<Vec<Option<String>>>,
}

impl TwoDaFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TwoDaError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TwoDaError> {
        let text = String::from_utf8_lossy(bytes);
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, TwoDaError> {
        let mut lines = text.lines();

        let tag = lines.next().unwrap_or("").trim();
        if !tag.eq_ignore_ascii_case("2DA V2.0") {
            return Err(TwoDaError::BadSignature {
                found: tag.to_string(),
            });
        }

        // Optional DEFAULT line, then the column header. Blank lines in
        // between are tolerated; shipped data has them.
        let mut default_value = None;
        let mut columns = None;
        for line in lines.by_ref() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix("DEFAULT:") {
                default_value = Some(rest.trim().trim_matches('"').to_string());
                continue;
            }
            columns = Some(split_cells(trimmed));
            break;
        }
        let columns: Vec<String> = columns.ok_or(TwoDaError::MissingColumns)?;

        let mut rows = Vec::new();
        for line in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut cells = split_cells(trimmed);
            if cells.is_empty() {
                continue;
            }
            // Leading token is the row number; rows are positional, so the
            // printed number is ignored the way the engine ignores it.
            cells.remove(0);
            let row = cells
                .into_iter()
                .map(|cell| if cell == "****" { None } else { Some(cell) })
                .collect();
            rows.push(row);
        }

        Ok(Self {
            columns,
            default_value,
            rows,
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Cell value at `(row, column-name)`.
    ///
    /// Answers `None` for a missing row or column and for the `****` empty
    /// marker; a cell absent from a short row falls back to the file's
    /// DEFAULT value when one is declared.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        let cells = self.rows.get(row)?;
        match cells.get(col) {
            Some(Some(cell)) => Some(cell.as_str()),
            Some(None) => None,
            None => self.default_value.as_deref(),
        }
    }

    pub fn value_as_i32(&self, row: usize, column: &str) -> Option<i32> {
        self.value(row, column)?.parse().ok()
    }

    pub fn value_as_f32(&self, row: usize, column: &str) -> Option<f32> {
        self.value(row, column)?.parse().ok()
    }
}

/// Split a 2DA line into cells: whitespace-separated, double quotes group.
fn split_cells(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut cell = String::new();
        if c == '"' {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '"' {
                    break;
                }
                cell.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                cell.push(ch);
                chars.next();
            }
        }
        cells.push(cell);
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "2DA V2.0\n\n    Label        Cost    Name\n0   shortsword   10      \"Short Sword\"\n1   ****         20      Longsword\n2   club\n";

    #[test]
    fn cells_resolve_by_row_and_column() {
        let table = TwoDaFile::parse(SAMPLE).unwrap();
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.value(0, "Label"), Some("shortsword"));
        assert_eq!(table.value(0, "Name"), Some("Short Sword"));
        assert_eq!(table.value_as_i32(1, "Cost"), Some(20));
        // **** is empty.
        assert_eq!(table.value(1, "Label"), None);
        // Column lookup is case-insensitive.
        assert_eq!(table.value(1, "cost"), Some("20"));
        assert_eq!(table.value(5, "Label"), None);
        assert_eq!(table.value(0, "Missing"), None);
    }

    #[test]
    fn short_rows_fall_back_to_default() {
        let with_default = format!("2DA V2.0\nDEFAULT: 0\n{}", &SAMPLE[9..]);
        let table = TwoDaFile::parse(&with_default).unwrap();
        assert_eq!(table.value(2, "Cost"), Some("0"));

        let table = TwoDaFile::parse(SAMPLE).unwrap();
        assert_eq!(table.value(2, "Cost"), None);
    }

    #[test]
    fn non_2da_text_is_rejected() {
        assert!(matches!(
            TwoDaFile::parse("GFF V3.2\n"),
            Err(TwoDaError::BadSignature { .. })
        ));
        assert!(matches!(
            TwoDaFile::parse("2DA V2.0\n"),
            Err(TwoDaError::MissingColumns)
        ));
    }
}
