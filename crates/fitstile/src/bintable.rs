//! Binary table column descriptors built from header keywords.
//!
//! Only the column metadata needed to address a tile-compression table is
//! modeled here: the TFORMn mini-language, per-row byte layout, and the
//! TSCAL/TZERO/TNULL numeric conventions. Reading arbitrary table cells is
//! the surrounding layer's job.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::header::Header;

/// Longest stored column name (TTYPEn); longer names are truncated.
const MAX_TTYPE_LEN: usize = 69;
/// Longest stored format string (TFORMn); longer strings are truncated.
const MAX_TFORM_LEN: usize = 9;

/// The element data type of a binary table column (the TFORM type letter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// L -- logical, stored as a single byte.
    Logical,
    /// X -- bit array.
    Bit,
    /// B -- unsigned byte.
    Byte,
    /// I -- 16-bit signed integer.
    Short,
    /// J -- 32-bit signed integer.
    Int,
    /// K -- 64-bit signed integer.
    Long,
    /// E -- 32-bit IEEE float.
    Float,
    /// D -- 64-bit IEEE float.
    Double,
    /// C -- complex: pair of 32-bit IEEE floats.
    ComplexFloat,
    /// M -- complex: pair of 64-bit IEEE floats.
    ComplexDouble,
    /// A -- ASCII character.
    Ascii,
}

impl ElementType {
    fn from_letter(letter: u8) -> Option<Self> {
        match letter {
            b'L' => Some(ElementType::Logical),
            b'X' => Some(ElementType::Bit),
            b'B' => Some(ElementType::Byte),
            b'I' => Some(ElementType::Short),
            b'J' => Some(ElementType::Int),
            b'K' => Some(ElementType::Long),
            b'E' => Some(ElementType::Float),
            b'D' => Some(ElementType::Double),
            b'C' => Some(ElementType::ComplexFloat),
            b'M' => Some(ElementType::ComplexDouble),
            b'A' => Some(ElementType::Ascii),
            _ => None,
        }
    }

    /// Bytes per single element. `Bit` reports 0; bit columns use
    /// `ceil(repeat / 8)` for their row footprint instead.
    pub fn byte_size(&self) -> usize {
        match self {
            ElementType::Logical => 1,
            ElementType::Bit => 0,
            ElementType::Byte => 1,
            ElementType::Short => 2,
            ElementType::Int => 4,
            ElementType::Long => 8,
            ElementType::Float => 4,
            ElementType::Double => 8,
            ElementType::ComplexFloat => 8,
            ElementType::ComplexDouble => 16,
            ElementType::Ascii => 1,
        }
    }
}

/// Fixed-width cell vs. heap-indirect array descriptor.
///
/// A P (32-bit) or Q (64-bit) column stores a (count, heap offset) pair in
/// the row area; the element data itself lives in the heap. Distinguishing
/// the two at the type level keeps heap addressing checks in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Elements stored inline in the row.
    Fixed(ElementType),
    /// P -- 32-bit (count, offset) descriptor pair, 8 bytes per repeat.
    Heap32(ElementType),
    /// Q -- 64-bit (count, offset) descriptor pair, 16 bytes per repeat.
    Heap64(ElementType),
}

impl ColumnKind {
    /// The type of the elements this column addresses.
    pub fn element_type(&self) -> ElementType {
        match self {
            ColumnKind::Fixed(t) | ColumnKind::Heap32(t) | ColumnKind::Heap64(t) => *t,
        }
    }
}

/// One column of a binary table, derived from the header once per decode
/// session and immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    /// Column name from TTYPEn (empty if absent).
    pub name: String,
    /// Raw format string from TFORMn.
    pub tform: String,
    /// Fixed or heap-indirect layout plus element type.
    pub kind: ColumnKind,
    /// Elements per row from TFORMn.
    pub repeat: usize,
    /// Starting column from TBCOLn (unused for binary tables, kept for
    /// parity with the storage convention).
    pub tbcol: i64,
    /// Linear scale factor from TSCALn.
    pub scale: f64,
    /// Zero-point offset from TZEROn.
    pub zero: f64,
    /// Null sentinel from TNULLn; `None` means undefined, which is
    /// distinct from a sentinel of zero.
    pub null: Option<i64>,
}

impl ColumnDescriptor {
    /// Total bytes this column occupies in each row.
    pub fn byte_width(&self) -> usize {
        match self.kind {
            ColumnKind::Fixed(ElementType::Bit) => self.repeat.div_ceil(8),
            ColumnKind::Fixed(t) => self.repeat * t.byte_size(),
            ColumnKind::Heap32(_) => 8 * self.repeat,
            ColumnKind::Heap64(_) => 16 * self.repeat,
        }
    }
}

fn truncated(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Parse a TFORMn value like `"1J"`, `"10E"`, `"320B"`, `"1PB(200)"`, `"1QJ"`.
///
/// The grammar is `[repeat]<letter>` for fixed columns and
/// `[repeat]P<letter>[(max)]` (or `Q`) for heap descriptors; repeat
/// defaults to 1. An ASCII column may carry a trailing substring width,
/// which is accepted and ignored. Anything else is a [`Error::FormatParse`].
pub fn parse_tform(tform: &str) -> Result<(usize, ColumnKind)> {
    let s = tform.trim();
    let bytes = s.as_bytes();

    let mut pos = 0;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    let repeat = if pos == 0 {
        1
    } else {
        s[..pos]
            .parse::<usize>()
            .map_err(|_| Error::FormatParse(String::from(s)))?
    };

    let letter = match bytes.get(pos) {
        Some(&c) => c,
        None => return Err(Error::FormatParse(String::from(s))),
    };
    pos += 1;

    if letter == b'P' || letter == b'Q' {
        let elem = bytes
            .get(pos)
            .and_then(|&c| ElementType::from_letter(c))
            .ok_or_else(|| Error::FormatParse(String::from(s)))?;
        pos += 1;
        // Optional maximum element count, e.g. "(200)". Informational only.
        let rest = &s[pos..];
        if !rest.is_empty() && !(rest.starts_with('(') && rest.ends_with(')')) {
            return Err(Error::FormatParse(String::from(s)));
        }
        let kind = if letter == b'P' {
            ColumnKind::Heap32(elem)
        } else {
            ColumnKind::Heap64(elem)
        };
        return Ok((repeat, kind));
    }

    let elem = ElementType::from_letter(letter).ok_or_else(|| Error::FormatParse(String::from(s)))?;
    let rest = bytes[pos..].iter().all(|c| c.is_ascii_digit());
    if !rest || (pos < bytes.len() && elem != ElementType::Ascii) {
        return Err(Error::FormatParse(String::from(s)));
    }
    Ok((repeat, ColumnKind::Fixed(elem)))
}

/// Build the ordered column descriptors for a binary table header.
///
/// Reads TFIELDS (default 0) and then, for each index, the TTYPE/TBCOL/
/// TFORM/TSCAL/TZERO/TNULL keywords with the conventional defaults.
pub fn columns_from_header(header: &Header) -> Result<Vec<ColumnDescriptor>> {
    let tfields = header.integer_or("TFIELDS", 0).max(0) as usize;
    let mut columns = Vec::with_capacity(tfields);

    for i in 1..=tfields {
        let name = header.string_or(&alloc::format!("TTYPE{i}"), "");
        let tform = header.string_or(&alloc::format!("TFORM{i}"), "");
        let (repeat, kind) = parse_tform(tform)?;

        columns.push(ColumnDescriptor {
            name: String::from(truncated(name, MAX_TTYPE_LEN)),
            tform: String::from(truncated(tform, MAX_TFORM_LEN)),
            kind,
            repeat,
            tbcol: header.integer_or(&alloc::format!("TBCOL{i}"), 0),
            scale: header.real_or(&alloc::format!("TSCAL{i}"), 1.0),
            zero: header.real_or(&alloc::format!("TZERO{i}"), 0.0),
            null: match header.value(&alloc::format!("TNULL{i}")) {
                Some(crate::header::Value::Integer(v)) => Some(*v),
                _ => None,
            },
        });
    }

    Ok(columns)
}

/// Byte offset of each column within a row (prefix sum of widths).
pub fn column_offsets(columns: &[ColumnDescriptor]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(columns.len());
    let mut offset = 0usize;
    for col in columns {
        offsets.push(offset);
        offset += col.byte_width();
    }
    offsets
}

/// Find a column by its TTYPE name.
pub fn find_column<'a>(
    columns: &'a [ColumnDescriptor],
    name: &str,
) -> Option<(usize, &'a ColumnDescriptor)> {
    columns.iter().enumerate().find(|(_, c)| c.name == name)
}
