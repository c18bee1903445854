//! Collector blocks: fixed slabs of fixed-size cells with inline mark
//! bitmaps.
//!
//! A block belongs to exactly one size class for its whole lifetime. It is
//! destroyed wholesale by the owning heap, never resized. The mark bitmap
//! doubles as the allocation map between collections: a set bit means the
//! cell is in use, a clear bit means its storage may be lazily reclaimed.

use crate::gc::object::{Cell, destroy_cell};

const BITS_PER_WORD: usize = 64;

/// One contiguous slab of cells plus its mark bitmap and allocation cursor.
pub struct CollectorBlock {
    cells: Vec<Cell>,
    marks: Vec<u64>,
    next_cell: usize,
    cell_atoms: usize,
}

impl CollectorBlock {
    /// Creates a block holding `capacity` cells of `cell_atoms` atoms each.
    ///
    /// Failing to reserve the backing storage is fatal: every object in the
    /// runtime ultimately depends on heap capacity, so there is no recovery
    /// path and the process aborts.
    pub(crate) fn new(capacity: usize, cell_atoms: usize) -> Self {
        assert!(capacity > 0);
        assert!(cell_atoms > 0);

        let mut cells = Vec::new();
        if cells.try_reserve_exact(capacity).is_err() {
            std::process::abort();
        }
        for _ in 0..capacity {
            cells.push(Cell::placeholder());
        }

        let words = capacity.div_ceil(BITS_PER_WORD);
        let mut marks = Vec::new();
        if marks.try_reserve_exact(words).is_err() {
            std::process::abort();
        }
        marks.resize(words, 0);

        Self {
            cells,
            marks,
            next_cell: 0,
            cell_atoms,
        }
    }

    /// Number of cells this block holds.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Cell footprint of this block's size class, in atoms.
    #[inline]
    pub fn cell_atoms(&self) -> usize {
        self.cell_atoms
    }

    /// Total block capacity in atoms.
    #[inline]
    pub fn capacity_atoms(&self) -> usize {
        self.cells.len() * self.cell_atoms
    }

    #[inline]
    fn word_and_bit(index: usize) -> (usize, u64) {
        (index / BITS_PER_WORD, 1u64 << (index % BITS_PER_WORD))
    }

    /// True if the cell's mark bit is set.
    #[inline]
    pub fn is_marked(&self, index: usize) -> bool {
        let (word, bit) = Self::word_and_bit(index);
        self.marks[word] & bit != 0
    }

    /// Sets the cell's mark bit, returning whether it was newly set.
    #[inline]
    pub(crate) fn set_mark(&mut self, index: usize) -> bool {
        assert!(index < self.cells.len());
        let (word, bit) = Self::word_and_bit(index);
        let newly = self.marks[word] & bit == 0;
        self.marks[word] |= bit;
        newly
    }

    /// Hands out the next free cell, or `None` once the cursor reaches the
    /// block's end.
    ///
    /// Scans forward from the cursor, test-and-setting each candidate's mark
    /// bit. An unset bit means the cell is free: whatever occupied it is
    /// destroyed right here (lazy reclamation) and the caller receives raw,
    /// reusable storage. `None` is a capacity-exhausted signal, not an error.
    pub(crate) fn allocate(&mut self) -> Option<usize> {
        while self.next_cell < self.cells.len() {
            let index = self.next_cell;
            self.next_cell += 1;
            if self.set_mark(index) {
                destroy_cell(&mut self.cells[index]);
                return Some(index);
            }
        }
        None
    }

    /// Resets the entire bitmap; called once per collection cycle before any
    /// tracing occurs.
    pub(crate) fn clear_marks(&mut self) {
        for word in &mut self.marks {
            *word = 0;
        }
    }

    /// Reclaims every cell left unmarked by tracing.
    ///
    /// Unmarked cells are destroyed in place and a placeholder header is
    /// constructed over the same storage. Marked cells are left untouched;
    /// their bits are cleared at the start of the next cycle. The cursor
    /// rewinds so the reclaimed prefix is allocatable again.
    pub(crate) fn sweep(&mut self) {
        for index in 0..self.cells.len() {
            if !self.is_marked(index) {
                destroy_cell(&mut self.cells[index]);
            }
        }
        self.next_cell = 0;
    }

    /// True once every cell's mark bit is clear. Checked right before a
    /// sweep, this signals the whole block can be returned to the system.
    pub fn is_empty(&self) -> bool {
        self.marks.iter().all(|word| *word == 0)
    }

    /// Number of currently marked cells.
    pub fn marked_cells(&self) -> usize {
        self.marks.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Borrow a cell.
    #[inline]
    pub fn cell(&self, index: usize) -> &Cell {
        &self.cells[index]
    }

    /// Mutably borrow a cell.
    #[inline]
    pub(crate) fn cell_mut(&mut self, index: usize) -> &mut Cell {
        &mut self.cells[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::object::{CellKind, DOUBLE_SHAPE, Payload, construct_cell};

    fn fill(block: &mut CollectorBlock) -> usize {
        let mut count = 0;
        while let Some(index) = block.allocate() {
            construct_cell(
                block.cell_mut(index),
                &DOUBLE_SHAPE,
                Payload::Double(count as f64),
            );
            count += 1;
        }
        count
    }

    #[test]
    fn test_allocate_to_capacity() {
        let mut block = CollectorBlock::new(70, 1);
        assert_eq!(fill(&mut block), 70);
        assert!(block.allocate().is_none());
    }

    #[test]
    fn test_clear_sweep_empties_block() {
        let mut block = CollectorBlock::new(8, 1);
        fill(&mut block);

        block.clear_marks();
        block.sweep();

        assert!(block.is_empty());
        for index in 0..block.capacity() {
            assert_eq!(
                block.cell(index).header().shape().kind,
                CellKind::Placeholder
            );
        }
    }

    #[test]
    fn test_idempotent_reuse_after_collection() {
        let mut block = CollectorBlock::new(16, 1);
        assert_eq!(fill(&mut block), 16);

        block.clear_marks();
        block.sweep();

        // The block refills to its original capacity.
        assert_eq!(fill(&mut block), 16);
    }

    #[test]
    fn test_surviving_cells_skipped() {
        let mut block = CollectorBlock::new(4, 1);
        fill(&mut block);

        block.clear_marks();
        block.set_mark(1);
        block.set_mark(3);
        block.sweep();

        assert!(!block.is_empty());
        assert_eq!(block.marked_cells(), 2);
        assert_eq!(block.cell(1).header().shape().kind, CellKind::Double);
        assert_eq!(block.cell(0).header().shape().kind, CellKind::Placeholder);

        // Only the two reclaimed cells are allocatable.
        let mut reclaimed = Vec::new();
        while let Some(index) = block.allocate() {
            reclaimed.push(index);
        }
        assert_eq!(reclaimed, vec![0, 2]);
    }
}
