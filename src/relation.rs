//! Relation file loading and the column store (spec §3, §4.1, SPEC_FULL §3).
//!
//! A `Relation` is an immutable table of `n` rows and `k` columns, loaded
//! once from a memory-mapped binary file and never mutated except by the
//! index builder's one-time narrowing pass (§4.2).

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::errors::{EngineError, Result};
use crate::index::ColumnIndex;

/// Width tag for a column's physical storage. Mirrors the
/// `column_t = std::variant<uint64_t*,uint32_t*,uint16_t*>` of the
/// reference implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    U16,
    U32,
    U64,
}

/// A slice backed directly by the relation's memory mapping. Kept alive
/// by holding a clone of the `Arc<Mmap>`; never copied out, so an
/// un-narrowed column costs nothing beyond the mapping itself.
#[derive(Clone)]
pub struct MmapColumn {
    mmap: Arc<Mmap>,
    byte_offset: usize,
    len: usize,
}

impl MmapColumn {
    fn as_slice(&self) -> &[u64] {
        // Safety: `byte_offset` and `len` were derived from the relation
        // header and validated against the mapped file length when the
        // Relation was constructed; the `Arc<Mmap>` clone here keeps the
        // mapping alive for as long as this slice is observed.
        unsafe {
            let base = self.mmap.as_ptr().add(self.byte_offset).cast::<u64>();
            std::slice::from_raw_parts(base, self.len)
        }
    }

    fn as_ptr(&self) -> *const u8 {
        // Safety: see `as_slice`.
        unsafe { self.mmap.as_ptr().add(self.byte_offset) }
    }
}

/// A column's values, narrowed to the smallest width that holds every
/// value once the index builder has run (§4.2 invariant 1/2).
pub enum Column {
    U64(MmapColumn),
    U32(Box<[u32]>),
    U16(Box<[u16]>),
}

impl Column {
    pub fn width(&self) -> Width {
        match self {
            Column::U64(_) => Width::U64,
            Column::U32(_) => Width::U32,
            Column::U16(_) => Width::U16,
        }
    }

    /// The universal typed reader: `loadValue(column, rowIdx) -> u64`
    /// (§4.1). Widens the in-width read to 64 bits. Row ids outside the
    /// column's length are the caller's responsibility -- this indexes
    /// with `[]`, so an out-of-range id panics rather than reading
    /// unrelated memory.
    #[inline]
    pub fn load(&self, row: u64) -> u64 {
        let idx = row as usize;
        match self {
            Column::U64(col) => col.as_slice()[idx],
            Column::U32(col) => u64::from(col[idx]),
            Column::U16(col) => u64::from(col[idx]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::U64(col) => col.len,
            Column::U32(col) => col.len(),
            Column::U16(col) => col.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw base pointer and width, for embedding into generated code as a
    /// constant (spec §4.7, §9 "embed-constant-pointer").
    pub fn raw_parts(&self) -> (*const u8, Width) {
        match self {
            Column::U64(col) => (col.as_ptr(), Width::U64),
            Column::U32(col) => (col.as_ptr().cast::<u8>(), Width::U32),
            Column::U16(col) => (col.as_ptr().cast::<u8>(), Width::U16),
        }
    }

    /// Narrow a still-u64 column to the smallest width that fits `max`,
    /// replacing the mapped view with a heap allocation. No-op if the
    /// column has already been narrowed (never happens in practice --
    /// the index builder runs exactly once per column -- but kept total).
    pub(crate) fn narrow(&mut self, max: u64) {
        let Column::U64(col) = self else { return };
        let bits = 64 - max.leading_zeros();
        if bits <= 16 {
            let narrowed: Box<[u16]> = col.as_slice().iter().map(|&v| v as u16).collect();
            *self = Column::U16(narrowed);
        } else if bits <= 32 {
            let narrowed: Box<[u32]> = col.as_slice().iter().map(|&v| v as u32).collect();
            *self = Column::U32(narrowed);
        }
        // else: stays at 64 bits, still pointing into the mmap.
    }

    pub fn iter(&self) -> ColumnIter<'_> {
        ColumnIter { column: self, idx: 0, len: self.len() }
    }
}

pub struct ColumnIter<'a> {
    column: &'a Column,
    idx: usize,
    len: usize,
}

impl Iterator for ColumnIter<'_> {
    type Item = u64;
    fn next(&mut self) -> Option<u64> {
        if self.idx >= self.len {
            return None;
        }
        let v = self.column.load(self.idx as u64);
        self.idx += 1;
        Some(v)
    }
}

/// An immutable table: `n` rows, `k` narrow-typed columns, plus the
/// per-column indexes the index builder produces. The stable, file-order
/// position of this relation among all loaded relations is its relation
/// id, tracked by the caller (`RelationSet`), not stored here.
pub struct Relation {
    tuples: u64,
    columns: Vec<Column>,
    indexes: Vec<ColumnIndex>,
}

impl Relation {
    /// Load a relation file: 8-byte row count, 8-byte column count, then
    /// `k` contiguous u64 columns of `n` values (spec §6). No magic
    /// number; minimum valid size is 16 bytes.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let meta_len = file.metadata()?.len();
        if meta_len < 16 {
            return Err(EngineError::TruncatedRelation {
                path: path.display().to_string(),
                size: meta_len,
            });
        }
        // Safety: the file is opened read-only and not subsequently
        // written by this process; memmap2's private mapping gives us a
        // copy-on-write-equivalent view matching the reference
        // implementation's `MAP_PRIVATE` mapping.
        let mmap = unsafe { Mmap::map(&file)? };
        let mmap = Arc::new(mmap);

        let n = u64::from_le_bytes(mmap[0..8].try_into().unwrap());
        let k = u64::from_le_bytes(mmap[8..16].try_into().unwrap());

        let mut columns = Vec::with_capacity(k as usize);
        let mut offset = 16usize;
        for _ in 0..k {
            columns.push(Column::U64(MmapColumn {
                mmap: Arc::clone(&mmap),
                byte_offset: offset,
                len: n as usize,
            }));
            offset += n as usize * std::mem::size_of::<u64>();
        }

        Ok(Relation { tuples: n, columns, indexes: Vec::new() })
    }

    pub fn num_tuples(&self) -> u64 {
        self.tuples
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, col: usize) -> &Column {
        &self.columns[col]
    }

    pub fn column_mut(&mut self, col: usize) -> &mut Column {
        &mut self.columns[col]
    }

    pub fn index(&self, col: usize) -> &ColumnIndex {
        &self.indexes[col]
    }

    pub(crate) fn init_indexes(&mut self) {
        self.indexes = (0..self.columns.len()).map(|_| ColumnIndex::empty()).collect();
    }

    pub(crate) fn set_index(&mut self, col: usize, index: ColumnIndex) {
        self.indexes[col] = index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_relation(rows: &[[u64; 2]]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&(rows.len() as u64).to_le_bytes()).unwrap();
        file.write_all(&2u64.to_le_bytes()).unwrap();
        for col in 0..2 {
            for row in rows {
                file.write_all(&row[col].to_le_bytes()).unwrap();
            }
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_header_and_columns() {
        let rows = [[1, 10], [2, 20], [3, 30], [4, 40]];
        let file = write_relation(&rows);
        let relation = Relation::load(file.path()).unwrap();
        assert_eq!(relation.num_tuples(), 4);
        assert_eq!(relation.num_columns(), 2);
        assert_eq!(relation.column(0).load(2), 3);
        assert_eq!(relation.column(1).load(2), 30);
    }

    #[test]
    fn rejects_truncated_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 8]).unwrap();
        file.flush().unwrap();
        let err = Relation::load(file.path()).unwrap_err();
        assert!(matches!(err, EngineError::TruncatedRelation { .. }));
    }

    #[test]
    fn narrowing_preserves_values() {
        let rows = [[1u64, 70_000], [2, 5], [3, 99_999]];
        let file = write_relation(&rows);
        let mut relation = Relation::load(file.path()).unwrap();
        let max = relation.column(1).iter().max().unwrap();
        relation.column_mut(1).narrow(max);
        assert!(matches!(relation.column(1).width(), Width::U32));
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(relation.column(1).load(i as u64), row[1]);
        }
    }
}
