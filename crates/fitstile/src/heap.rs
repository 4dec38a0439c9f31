//! Row/heap addressing for one binary table HDU.
//!
//! The table buffer is the fixed-width row area followed by the heap;
//! variable-length cells are (count, offset) descriptor pairs pointing
//! into the heap. This module computes the geometry from the header and
//! validates every descriptor against it before a byte is read. The buffer
//! itself is treated as opaque bytes and never copied.

use crate::bintable::{ColumnDescriptor, ColumnKind};
use crate::endian::{read_i32_be, read_i64_be};
use crate::error::{Error, Result};
use crate::header::Header;

/// Geometry of a binary table's row area and heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLayout {
    /// Bytes per table row (NAXIS1).
    pub row_len: usize,
    /// Number of table rows (NAXIS2).
    pub rows: usize,
    /// Byte offset of the heap from the start of the buffer
    /// (THEAP, defaulting to `row_len * rows`).
    pub heap_start: usize,
    /// Heap size in bytes (PCOUNT).
    pub heap_size: usize,
}

impl HeapLayout {
    /// Compute the layout and check it against the buffer length.
    ///
    /// This is the bounds-safety gate for all subsequent reads: a header
    /// whose declared geometry does not fit `buf_len` fails here, before
    /// anything dereferences the buffer.
    pub fn compute(
        header: &Header,
        columns: &[ColumnDescriptor],
        buf_len: usize,
    ) -> Result<HeapLayout> {
        let row_len = header.integer_or("NAXIS1", 0).max(0) as usize;
        let rows = header.integer_or("NAXIS2", 0).max(0) as usize;
        let heap_size = header.integer_or("PCOUNT", 0).max(0) as usize;
        let row_area = row_len
            .checked_mul(rows)
            .ok_or(Error::Layout("row area size overflows"))?;
        let heap_start = header.integer_or("THEAP", row_area as i64).max(0) as usize;

        let declared: usize = columns.iter().map(|c| c.byte_width()).sum();
        if declared > row_len {
            return Err(Error::Layout("columns are wider than the NAXIS1 row length"));
        }
        if heap_start < row_area {
            return Err(Error::Layout("THEAP overlaps the row area"));
        }
        let heap_end = heap_start
            .checked_add(heap_size)
            .ok_or(Error::Layout("heap size overflows"))?;
        if heap_end > buf_len {
            return Err(Error::Layout("heap extends past the end of the buffer"));
        }

        Ok(HeapLayout {
            row_len,
            rows,
            heap_start,
            heap_size,
        })
    }

    /// Bytes of a fixed-width cell at `col_offset` in row `row`.
    pub fn fixed_cell<'a>(
        &self,
        buf: &'a [u8],
        row: usize,
        col_offset: usize,
        len: usize,
    ) -> Result<&'a [u8]> {
        if row >= self.rows {
            return Err(Error::Bounds("row index outside the table"));
        }
        if col_offset + len > self.row_len {
            return Err(Error::Bounds("cell outside the row"));
        }
        let pos = row * self.row_len + col_offset;
        Ok(&buf[pos..pos + len])
    }

    /// Read the (count, offset) descriptor pair of a heap-indirect column
    /// and return the element count plus the addressed heap bytes.
    ///
    /// The pair is validated against the heap extent before the returned
    /// slice is formed.
    pub fn descriptor<'a>(
        &self,
        buf: &'a [u8],
        row: usize,
        column: &ColumnDescriptor,
        col_offset: usize,
    ) -> Result<(usize, &'a [u8])> {
        let (count, offset) = match column.kind {
            ColumnKind::Heap32(_) => {
                let cell = self.fixed_cell(buf, row, col_offset, 8)?;
                let count = read_i32_be(cell);
                let offset = read_i32_be(&cell[4..]);
                if count < 0 || offset < 0 {
                    return Err(Error::Bounds("negative heap descriptor"));
                }
                (count as usize, offset as usize)
            }
            ColumnKind::Heap64(_) => {
                let cell = self.fixed_cell(buf, row, col_offset, 16)?;
                let count = read_i64_be(cell);
                let offset = read_i64_be(&cell[8..]);
                if count < 0 || offset < 0 {
                    return Err(Error::Bounds("negative heap descriptor"));
                }
                (count as usize, offset as usize)
            }
            ColumnKind::Fixed(_) => {
                return Err(Error::Bounds("column is not heap-indirect"));
            }
        };

        let nbytes = count
            .checked_mul(column.kind.element_type().byte_size())
            .ok_or(Error::Bounds("heap descriptor count overflows"))?;
        let end = offset
            .checked_add(nbytes)
            .ok_or(Error::Bounds("heap descriptor range overflows"))?;
        if end > self.heap_size {
            return Err(Error::Bounds("heap descriptor outside the heap"));
        }
        let start = self.heap_start + offset;
        Ok((count, &buf[start..start + nbytes]))
    }
}
