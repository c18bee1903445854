//! Memory management for the Kestrel runtime.
//!
//! A non-moving mark-sweep heap built from three layers:
//! - [`object`]: the minimal cell header (one shape pointer) and the closed
//!   set of payload kinds
//! - [`block`]: fixed slabs of fixed-size cells with inline mark bitmaps
//! - [`heap`]: size-classed block lists, watermark-bounded growth, and the
//!   clear/trace/sweep/shrink collection cycle
//!
//! Tracing is not performed here; the execution engine owns the root set
//! and re-marks reachable cells through [`heap::Heap::mark`] between the
//! clear and sweep phases.

pub mod block;
pub mod heap;
pub mod object;

pub use heap::{Heap, HeapConfig};
pub use object::{CellKind, CellRef, HeapObject, Payload, Shape};
