//! Heap cell representation: the minimal header and payload kinds.
//!
//! Every heap-resident value begins with exactly one pointer to shape/type
//! metadata and nothing else. Sweep and allocate never inspect concrete
//! payloads; they construct and destroy whole cells in place.

use rustc_hash::FxHashMap;

use crate::runtime::value::Value;

/// Kind tag for heap cell payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// A reclaimed or never-used cell
    Placeholder,
    /// A dynamic object with a property map
    Object,
    /// A boxed IEEE 754 double
    Double,
}

/// Shape/type metadata shared by every cell of one kind.
///
/// The size in atoms decides which size class serves allocations of this
/// shape. Shapes are fixed for the lifetime of the process.
#[derive(Debug)]
pub struct Shape {
    /// Shape name, used by diagnostics and the disassembling CLI
    pub name: &'static str,
    /// The payload kind cells of this shape carry
    pub kind: CellKind,
    /// Cell footprint in atoms
    pub cell_atoms: usize,
}

/// The shape constructed over reclaimed cell storage.
///
/// Also tolerated for at most one live allocation, during heap bootstrap,
/// before the real shape set is wired up.
pub static PLACEHOLDER_SHAPE: Shape = Shape {
    name: "placeholder",
    kind: CellKind::Placeholder,
    cell_atoms: 1,
};

/// Shape of dynamic objects.
pub static OBJECT_SHAPE: Shape = Shape {
    name: "object",
    kind: CellKind::Object,
    cell_atoms: 2,
};

/// Shape of boxed doubles.
pub static DOUBLE_SHAPE: Shape = Shape {
    name: "double",
    kind: CellKind::Double,
    cell_atoms: 1,
};

/// The per-cell header: a single shape pointer, no other intrinsic state.
#[derive(Debug)]
pub struct CellHeader {
    shape: &'static Shape,
}

impl CellHeader {
    /// The shape this cell was constructed with.
    #[inline]
    pub fn shape(&self) -> &'static Shape {
        self.shape
    }
}

/// Payload of a heap cell. A closed union so the collector's generic
/// sweep/allocate logic never needs to know concrete types.
#[derive(Debug)]
pub enum Payload {
    /// Reclaimed storage
    Placeholder,
    /// A dynamic object
    Object(HeapObject),
    /// A boxed double
    Double(f64),
}

impl Payload {
    /// The kind tag of this payload.
    pub fn kind(&self) -> CellKind {
        match self {
            Payload::Placeholder => CellKind::Placeholder,
            Payload::Object(_) => CellKind::Object,
            Payload::Double(_) => CellKind::Double,
        }
    }

    /// Returns all cell references held by this payload.
    ///
    /// Tracing itself is the caller's responsibility; this only reports the
    /// outgoing edges.
    pub fn trace_refs(&self) -> Vec<CellRef> {
        match self {
            Payload::Object(object) => object.trace_refs(),
            _ => Vec::new(),
        }
    }
}

/// A dynamic object stored in a heap cell: a property map.
#[derive(Debug, Default)]
pub struct HeapObject {
    properties: FxHashMap<String, Property>,
}

/// One property of a [`HeapObject`].
#[derive(Debug, Clone)]
pub struct Property {
    /// The property value
    pub value: Value,
    /// Whether writes to this property are ignored
    pub read_only: bool,
}

impl HeapObject {
    /// Creates a new empty object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a property value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).map(|p| &p.value)
    }

    /// Sets a property value, respecting an existing read-only flag.
    pub fn set(&mut self, name: &str, value: Value) {
        match self.properties.get_mut(name) {
            Some(prop) if prop.read_only => {}
            Some(prop) => prop.value = value,
            None => {
                self.properties.insert(
                    name.to_string(),
                    Property {
                        value,
                        read_only: false,
                    },
                );
            }
        }
    }

    /// Defines a property with an explicit read-only flag, overwriting any
    /// existing definition.
    pub fn define(&mut self, name: &str, value: Value, read_only: bool) {
        self.properties
            .insert(name.to_string(), Property { value, read_only });
    }

    /// True if the object has a property with this name.
    pub fn has(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// True if the object has no properties.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Returns all cell references held by property values.
    pub fn trace_refs(&self) -> Vec<CellRef> {
        self.properties
            .values()
            .filter_map(|p| match &p.value {
                Value::Object(cell) => Some(*cell),
                _ => None,
            })
            .collect()
    }
}

/// A reference to a heap cell: size class, block within the class, and cell
/// within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    class: u16,
    block: u32,
    cell: u32,
}

impl CellRef {
    /// Creates a new cell reference.
    pub(crate) fn new(class: usize, block: usize, cell: usize) -> Self {
        Self {
            class: class as u16,
            block: block as u32,
            cell: cell as u32,
        }
    }

    /// Index of the size class this cell lives in.
    #[inline]
    pub fn class(&self) -> usize {
        self.class as usize
    }

    /// Index of the block within its size class.
    #[inline]
    pub fn block(&self) -> usize {
        self.block as usize
    }

    /// Index of the cell within its block.
    #[inline]
    pub fn cell(&self) -> usize {
        self.cell as usize
    }
}

/// One cell: header plus payload, constructed and destroyed in place.
#[derive(Debug)]
pub struct Cell {
    pub(crate) header: CellHeader,
    pub(crate) payload: Payload,
}

impl Cell {
    /// The cell constructed over unused or reclaimed storage.
    pub(crate) fn placeholder() -> Self {
        Cell {
            header: CellHeader {
                shape: &PLACEHOLDER_SHAPE,
            },
            payload: Payload::Placeholder,
        }
    }

    /// The cell's header.
    #[inline]
    pub fn header(&self) -> &CellHeader {
        &self.header
    }

    /// The cell's payload.
    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

/// Constructs a cell over a raw slot, dropping whatever occupied it.
pub(crate) fn construct_cell(slot: &mut Cell, shape: &'static Shape, payload: Payload) {
    debug_assert_eq!(shape.kind, payload.kind());
    *slot = Cell {
        header: CellHeader { shape },
        payload,
    };
}

/// Destroys the occupant of a slot and reconstructs a placeholder over the
/// same storage. The slot stays usable; only its contents die.
pub(crate) fn destroy_cell(slot: &mut Cell) {
    *slot = Cell::placeholder();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construct_and_destroy_in_place() {
        let mut slot = Cell::placeholder();
        construct_cell(&mut slot, &DOUBLE_SHAPE, Payload::Double(3.5));
        assert_eq!(slot.header().shape().kind, CellKind::Double);

        destroy_cell(&mut slot);
        assert_eq!(slot.header().shape().kind, CellKind::Placeholder);
        assert!(matches!(slot.payload(), Payload::Placeholder));
    }

    #[test]
    fn test_object_properties() {
        let mut obj = HeapObject::new();
        obj.set("x", Value::Number(1.0));
        obj.define("pi", Value::Number(3.14), true);
        obj.set("pi", Value::Number(0.0));

        assert_eq!(obj.get("x"), Some(&Value::Number(1.0)));
        assert_eq!(obj.get("pi"), Some(&Value::Number(3.14)));
        assert_eq!(obj.len(), 2);
    }

    #[test]
    fn test_object_trace_refs() {
        let child = CellRef::new(0, 0, 1);
        let mut obj = HeapObject::new();
        obj.set("child", Value::Object(child));
        obj.set("n", Value::Number(7.0));

        assert_eq!(obj.trace_refs(), vec![child]);
    }
}
