//! Dense hash indexes and the bitset membership filter (spec §3, §4.2).
//!
//! ```text
//!          domain [min..max]
//!           │
//!   Bitset  │  one bit per value in the domain: membership only
//!           │
//!   Unique  │  one row id per value (column 0): last writer wins
//!           │
//!   Multi   │  CSR-style row-id runs per value, built by counting sort
//! ```
//!
//! All three structures answer a probe in O(1) after an O(1) domain-range
//! check: a probe outside `[min, max]` is answered as "absent" without
//! touching the backing storage, matching spec.md §3 invariant 4/5.

use crate::relation::Column;

const WORD_BITS: u64 = 64;

/// One bit per value in `[min, max]`, answering set membership.
pub struct Bitset {
    min: u64,
    max: u64,
    words: Box<[u64]>,
}

impl Bitset {
    pub fn build(min: u64, max: u64, column: &Column) -> Self {
        let span = (max - min + 1) as usize;
        let mut words = vec![0u64; span.div_ceil(WORD_BITS as usize)].into_boxed_slice();
        for v in column.iter() {
            let bit = (v - min) as usize;
            words[bit / WORD_BITS as usize] |= 1u64 << (bit as u64 % WORD_BITS);
        }
        Bitset { min, max, words }
    }

    #[inline]
    pub fn contains(&self, value: u64) -> bool {
        if value < self.min || value > self.max {
            return false;
        }
        let bit = (value - self.min) as usize;
        self.words[bit / WORD_BITS as usize] & (1u64 << (bit as u64 % WORD_BITS)) != 0
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn words_ptr(&self) -> *const u64 {
        self.words.as_ptr()
    }

    /// Count of distinct values set in the domain. Used by the index
    /// builder to detect whether column 0 actually holds one distinct
    /// value per row before trusting it with a unique index -- the input
    /// invariant that column 0 is a key is not checked at load time
    /// (spec.md §3), and a relation violating it would otherwise corrupt
    /// every join probing that column via last-writer-wins overwrites.
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// One row id per value in `[min, max]`. Built for column 0, the unique
/// key column (spec.md §3 invariant 2). Later rows overwrite earlier ones
/// sharing a value, mirroring the reference implementation's plain array
/// write with no collision handling -- column 0 is guaranteed unique, so
/// this never actually happens on well-formed data.
pub struct DenseUniqueIndex {
    min: u64,
    max: u64,
    row_ids: Box<[u64]>,
}

const ABSENT: u64 = u64::MAX;

impl DenseUniqueIndex {
    pub fn build(min: u64, max: u64, column: &Column) -> Self {
        let span = (max - min + 1) as usize;
        let mut row_ids = vec![ABSENT; span].into_boxed_slice();
        for (row, v) in column.iter().enumerate() {
            row_ids[(v - min) as usize] = row as u64;
        }
        DenseUniqueIndex { min, max, row_ids }
    }

    #[inline]
    pub fn lookup(&self, value: u64) -> Option<u64> {
        if value < self.min || value > self.max {
            return None;
        }
        match self.row_ids[(value - self.min) as usize] {
            ABSENT => None,
            row => Some(row),
        }
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn row_ids_ptr(&self) -> *const u64 {
        self.row_ids.as_ptr()
    }
}

/// All row ids per value in `[min, max]`, stored CSR-style: `offsets[v -
/// min] .. offsets[v - min + 1]` indexes into `row_ids`. Built by a
/// counting sort over the column, two passes (count, then place) like the
/// reference implementation's multi-valued hash table construction.
pub struct DenseMultiIndex {
    min: u64,
    max: u64,
    offsets: Box<[u32]>,
    row_ids: Box<[u32]>,
}

impl DenseMultiIndex {
    pub fn build(min: u64, max: u64, column: &Column) -> Self {
        let span = (max - min + 1) as usize;
        let mut offsets = vec![0u32; span + 1].into_boxed_slice();
        for v in column.iter() {
            offsets[(v - min) as usize + 1] += 1;
        }
        for i in 0..span {
            offsets[i + 1] += offsets[i];
        }
        let mut cursor = offsets.clone();
        let mut row_ids = vec![0u32; column.len()].into_boxed_slice();
        for (row, v) in column.iter().enumerate() {
            let slot = (v - min) as usize;
            row_ids[cursor[slot] as usize] = row as u32;
            cursor[slot] += 1;
        }
        DenseMultiIndex { min, max, offsets, row_ids }
    }

    #[inline]
    pub fn lookup(&self, value: u64) -> &[u32] {
        if value < self.min || value > self.max {
            return &[];
        }
        let slot = (value - self.min) as usize;
        &self.row_ids[self.offsets[slot] as usize..self.offsets[slot + 1] as usize]
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn offsets_ptr(&self) -> *const u32 {
        self.offsets.as_ptr()
    }

    pub fn row_ids_ptr(&self) -> *const u32 {
        self.row_ids.as_ptr()
    }
}

pub enum HashIndex {
    /// No hash index built yet -- a column before the index builder runs,
    /// or a relation with zero rows.
    None,
    Unique(DenseUniqueIndex),
    Multi(DenseMultiIndex),
}

/// The pair of structures the index builder produces for one column:
/// always a bitset, plus either a unique or multi hash index depending on
/// whether this is column 0 (spec.md §4.2).
pub struct ColumnIndex {
    pub bitset: Option<Bitset>,
    pub hash: HashIndex,
}

impl ColumnIndex {
    pub fn empty() -> Self {
        ColumnIndex { bitset: None, hash: HashIndex::None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::Relation;
    use std::io::Write;

    fn relation_with(col1: &[u64]) -> Relation {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&(col1.len() as u64).to_le_bytes()).unwrap();
        file.write_all(&1u64.to_le_bytes()).unwrap();
        for v in col1 {
            file.write_all(&v.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();
        Relation::load(file.path()).unwrap()
    }

    #[test]
    fn bitset_reports_membership_and_out_of_domain() {
        let relation = relation_with(&[3, 7, 3, 9]);
        let bitset = Bitset::build(3, 9, relation.column(0));
        assert!(bitset.contains(7));
        assert!(!bitset.contains(4));
        assert!(!bitset.contains(100));
    }

    #[test]
    fn unique_index_last_writer_wins() {
        let relation = relation_with(&[5, 6, 5]);
        let index = DenseUniqueIndex::build(5, 6, relation.column(0));
        assert_eq!(index.lookup(5), Some(2));
        assert_eq!(index.lookup(6), Some(1));
        assert_eq!(index.lookup(42), None);
    }

    #[test]
    fn multi_index_groups_all_matching_rows() {
        let relation = relation_with(&[1, 2, 1, 1, 2]);
        let index = DenseMultiIndex::build(1, 2, relation.column(0));
        let mut ones: Vec<u32> = index.lookup(1).to_vec();
        ones.sort_unstable();
        assert_eq!(ones, vec![0, 2, 3]);
        let mut twos: Vec<u32> = index.lookup(2).to_vec();
        twos.sort_unstable();
        assert_eq!(twos, vec![1, 4]);
        assert!(index.lookup(99).is_empty());
    }
}
