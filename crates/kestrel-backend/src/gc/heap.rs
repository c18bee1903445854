//! The heap: bucketed collector blocks keyed by size class.
//!
//! The heap exclusively owns block-list structure; each block exclusively
//! owns its own bitmap and cursor. Collection is stop-the-world:
//! `clear_marks`, external tracing via [`Heap::mark`], then `sweep` —
//! the two phases never interleave with tracing.

use crate::gc::block::CollectorBlock;
use crate::gc::object::{Cell, CellRef, Payload, Shape, construct_cell};

/// Construction-time heap parameters.
///
/// Size classes are fixed here, one per supported cell size, and are never
/// merged or split afterwards.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Capacity of every block, in atoms
    pub block_atoms: usize,
    /// Soft cap on cumulative exhausted block capacity, in atoms. Once the
    /// exhausted tally reaches this mark, allocation fails instead of
    /// growing, signalling the caller to collect and retry.
    pub watermark_atoms: usize,
    /// Cell sizes, in atoms, one size class each
    pub cell_sizes: Vec<usize>,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            block_atoms: 4096,
            watermark_atoms: 64 * 4096,
            cell_sizes: vec![1, 2],
        }
    }
}

struct SizeClass {
    cell_atoms: usize,
    cells_per_block: usize,
    blocks: Vec<CollectorBlock>,
    next_block: usize,
}

/// A non-moving mark-sweep heap of size-classed cell blocks.
pub struct Heap {
    classes: Vec<SizeClass>,
    block_atoms: usize,
    watermark_atoms: usize,
    exhausted_atoms: usize,
    bootstrapped: bool,
}

impl Heap {
    /// Creates a heap with the given configuration.
    pub fn new(config: HeapConfig) -> Self {
        assert!(!config.cell_sizes.is_empty());
        let mut sizes = config.cell_sizes.clone();
        sizes.sort_unstable();
        sizes.dedup();

        let classes = sizes
            .into_iter()
            .map(|cell_atoms| {
                assert!(cell_atoms > 0 && cell_atoms <= config.block_atoms);
                SizeClass {
                    cell_atoms,
                    cells_per_block: config.block_atoms / cell_atoms,
                    blocks: Vec::new(),
                    next_block: 0,
                }
            })
            .collect();

        Self {
            classes,
            block_atoms: config.block_atoms,
            watermark_atoms: config.watermark_atoms,
            exhausted_atoms: 0,
            bootstrapped: false,
        }
    }

    /// Creates a heap with default sizing.
    pub fn with_defaults() -> Self {
        Self::new(HeapConfig::default())
    }

    /// Index of the smallest size class able to hold `cell_atoms`.
    fn class_for(&self, cell_atoms: usize) -> usize {
        self.classes
            .iter()
            .position(|class| class.cell_atoms >= cell_atoms)
            .unwrap_or_else(|| panic!("no size class holds {} atoms", cell_atoms))
    }

    /// Allocates a cell for `payload` under `shape`, or `None` when the
    /// watermark is reached.
    ///
    /// Routes to the matching size class, scanning blocks from the class's
    /// cached cursor. Exhausted blocks add their full capacity to the
    /// running exhausted tally; a fresh block is created only while the
    /// tally is below the watermark. `None` tells the caller to run a
    /// collection cycle and retry — the allocator itself never blocks or
    /// retries.
    pub fn allocate(&mut self, shape: &'static Shape, payload: Payload) -> Option<CellRef> {
        assert!(
            shape.kind != crate::gc::object::CellKind::Placeholder || !self.bootstrapped,
            "placeholder shape is only tolerated during heap bootstrap"
        );

        let class_index = self.class_for(shape.cell_atoms);
        let class = &mut self.classes[class_index];

        loop {
            match class.blocks.get_mut(class.next_block) {
                Some(block) => {
                    if let Some(cell) = block.allocate() {
                        construct_cell(block.cell_mut(cell), shape, payload);
                        self.bootstrapped = true;
                        return Some(CellRef::new(class_index, class.next_block, cell));
                    }
                    self.exhausted_atoms += block.capacity_atoms();
                    class.next_block += 1;
                }
                None => break,
            }
        }

        // Every block in the class is exhausted; grow only below the
        // watermark.
        if self.exhausted_atoms >= self.watermark_atoms {
            return None;
        }

        let mut block = CollectorBlock::new(class.cells_per_block, class.cell_atoms);
        let cell = block.allocate().expect("fresh block must allocate");
        construct_cell(block.cell_mut(cell), shape, payload);
        class.blocks.push(block);
        class.next_block = class.blocks.len() - 1;
        self.bootstrapped = true;
        Some(CellRef::new(class_index, class.next_block, cell))
    }

    /// Allocates an empty dynamic object.
    pub fn allocate_object(&mut self) -> Option<CellRef> {
        self.allocate(
            &crate::gc::object::OBJECT_SHAPE,
            Payload::Object(crate::gc::object::HeapObject::new()),
        )
    }

    /// Allocates a boxed double.
    pub fn allocate_double(&mut self, value: f64) -> Option<CellRef> {
        self.allocate(&crate::gc::object::DOUBLE_SHAPE, Payload::Double(value))
    }

    /// Resets every block's bitmap. First phase of a collection cycle; must
    /// complete before any tracing starts.
    pub fn clear_marks(&mut self) {
        for class in &mut self.classes {
            for block in &mut class.blocks {
                block.clear_marks();
            }
        }
    }

    /// Marks one cell reachable, returning whether the bit was newly set.
    ///
    /// This is the hook the external root set uses between `clear_marks` and
    /// `sweep`; a `false` return lets tracers terminate on cycles.
    pub fn mark(&mut self, cell: CellRef) -> bool {
        self.classes[cell.class()].blocks[cell.block()].set_mark(cell.cell())
    }

    /// Sweeps every block. Final phase of a collection cycle; once begun it
    /// runs to completion.
    pub fn sweep(&mut self) {
        for class in &mut self.classes {
            for block in &mut class.blocks {
                block.sweep();
            }
        }
    }

    /// Destroys every block that is empty after a sweep.
    ///
    /// The empties are gathered into a side buffer before any are freed,
    /// since freeing mutates the same block list being iterated.
    pub fn shrink(&mut self) {
        for class in &mut self.classes {
            let empties: Vec<usize> = class
                .blocks
                .iter()
                .enumerate()
                .filter(|(_, block)| block.is_empty())
                .map(|(index, _)| index)
                .collect();
            for index in empties.into_iter().rev() {
                class.blocks.remove(index);
            }
            class.next_block = class.next_block.min(class.blocks.len());
        }
    }

    /// Clears the watermark tally and re-initializes every size class's
    /// cursor, re-entering a fresh allocation phase after a completed cycle.
    pub fn reset(&mut self) {
        self.exhausted_atoms = 0;
        for class in &mut self.classes {
            class.next_block = 0;
        }
    }

    /// Runs one full collection cycle: clear marks, let `trace` re-mark the
    /// reachable cells, then sweep, shrink, and reset.
    pub fn collect(&mut self, trace: impl FnOnce(&mut Self)) {
        self.clear_marks();
        trace(self);
        self.sweep();
        self.shrink();
        self.reset();
    }

    /// Borrow the cell a reference points at.
    pub fn cell(&self, cell: CellRef) -> &Cell {
        self.classes[cell.class()].blocks[cell.block()].cell(cell.cell())
    }

    /// Borrow the payload a reference points at.
    pub fn payload(&self, cell: CellRef) -> &Payload {
        self.cell(cell).payload()
    }

    /// Mutably borrow the payload a reference points at.
    pub fn payload_mut(&mut self, cell: CellRef) -> &mut Payload {
        &mut self.classes[cell.class()].blocks[cell.block()]
            .cell_mut(cell.cell())
            .payload
    }

    /// Number of size classes.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Number of live blocks in the size class serving `cell_atoms`.
    pub fn blocks_in_class(&self, cell_atoms: usize) -> usize {
        self.classes[self.class_for(cell_atoms)].blocks.len()
    }

    /// Total marked (in-use) cells across all classes.
    pub fn live_cells(&self) -> usize {
        self.classes
            .iter()
            .flat_map(|class| class.blocks.iter())
            .map(|block| block.marked_cells())
            .sum()
    }

    /// Total cell capacity across all live blocks.
    pub fn capacity_cells(&self) -> usize {
        self.classes
            .iter()
            .flat_map(|class| class.blocks.iter())
            .map(|block| block.capacity())
            .sum()
    }
}
