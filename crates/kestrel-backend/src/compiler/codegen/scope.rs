//! Compile-time scope modelling for identifier resolution.
//!
//! Resolution is three-tiered. A name matching the current unit's symbol
//! table binds straight to a register. Otherwise the generator walks this
//! compile-time model of the enclosing scope chain: while every intervening
//! scope is a plain static binding object, the name's depth and slot are
//! baked into the instruction; the moment a scope requires dynamic checks
//! (the front end decides which do — a `with` object, an eval-introduced
//! scope), resolution falls back to a run-time name lookup.

use rustc_hash::FxHashMap;

use super::registers::RegisterRef;

/// One symbol table entry: the register an identifier binds to plus its
/// read-only flag.
///
/// Entries are never mutated after creation, except for constness and index
/// rebasing when separately compiled scopes are merged.
#[derive(Debug, Clone)]
pub struct SymbolEntry {
    /// The bound register
    pub register: RegisterRef,
    /// Whether writes through this binding are ignored
    pub read_only: bool,
}

/// Identifier-to-register map of one compilation unit.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: FxHashMap<String, SymbolEntry>,
}

impl SymbolTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry. A name already present keeps its original register
    /// (redeclaration binds to the same slot); constness is widened to the
    /// stricter of the two declarations.
    pub fn add(&mut self, name: &str, register: RegisterRef, read_only: bool) {
        match self.entries.get_mut(name) {
            Some(existing) => existing.read_only = existing.read_only || read_only,
            None => {
                self.entries
                    .insert(name.to_string(), SymbolEntry { register, read_only });
            }
        }
    }

    /// Looks up an entry by name.
    pub fn get(&self, name: &str) -> Option<&SymbolEntry> {
        self.entries.get(name)
    }

    /// True if the table has an entry for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shifts every entry's register index by `delta`.
    ///
    /// Used when merging a separately compiled scope into an existing
    /// global frame: the existing storage moves as one block.
    pub fn rebase(&self, delta: i32) {
        for entry in self.entries.values() {
            entry.register.shift_index(delta);
        }
    }
}

/// Compile-time description of one enclosing scope.
#[derive(Debug, Clone, Default)]
pub struct ScopeDescriptor {
    slots: FxHashMap<String, ScopeSlot>,
    dynamic: bool,
}

#[derive(Debug, Clone, Copy)]
struct ScopeSlot {
    index: usize,
    read_only: bool,
}

impl ScopeDescriptor {
    /// A static binding scope with no slots yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope that requires dynamic checks at run time. The host language
    /// decides which scopes these are; the generator only honors the flag.
    pub fn dynamic() -> Self {
        Self {
            slots: FxHashMap::default(),
            dynamic: true,
        }
    }

    /// Adds a binding slot. Slot indices follow the scope object's own
    /// storage layout.
    pub fn with_slot(mut self, name: &str, index: usize, read_only: bool) -> Self {
        self.slots.insert(name.to_string(), ScopeSlot { index, read_only });
        self
    }

    /// True when the scope cannot be statically addressed.
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }
}

/// The compile-time model of the chain of scopes enclosing a unit, ordered
/// innermost first.
#[derive(Debug, Clone, Default)]
pub struct CompileScopeChain {
    scopes: Vec<ScopeDescriptor>,
}

impl CompileScopeChain {
    /// An empty chain (a program compiled at the global scope).
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new chain with `scope` as the innermost entry.
    pub fn nested(&self, scope: ScopeDescriptor) -> Self {
        let mut scopes = Vec::with_capacity(self.scopes.len() + 1);
        scopes.push(scope);
        scopes.extend(self.scopes.iter().cloned());
        Self { scopes }
    }

    /// Number of scopes in the chain.
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// True when no scopes enclose the unit.
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Classifies `name` against the chain: a statically addressable
    /// (depth, slot) pair, or dynamic the moment any intervening scope
    /// requires run-time checks.
    pub fn resolve(&self, name: &str) -> ChainResolution {
        for (depth, scope) in self.scopes.iter().enumerate() {
            if scope.is_dynamic() {
                return ChainResolution::Dynamic;
            }
            if let Some(slot) = scope.slots.get(name) {
                return ChainResolution::Scoped {
                    depth,
                    slot: slot.index,
                    read_only: slot.read_only,
                };
            }
        }
        ChainResolution::Dynamic
    }
}

/// Outcome of walking the compile-time scope chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainResolution {
    /// Statically addressable: `depth` scopes out, at `slot`
    Scoped {
        /// How many scopes out the binding lives
        depth: usize,
        /// The binding object slot
        slot: usize,
        /// Whether writes are ignored
        read_only: bool,
    },
    /// Requires a run-time name lookup
    Dynamic,
}

/// The persistent global scope shared by separately compiled programs.
///
/// Global variables live at negative indices relative to the end of global
/// register storage: global number `p` (in creation order, `n` total) sits
/// at `p - n`. Merging a new program therefore rebases every existing entry
/// down by the number of newly declared globals before the new entries are
/// appended.
#[derive(Debug, Default)]
pub struct GlobalScope {
    /// Symbol table over every global declared so far
    pub symbols: SymbolTable,
    order: Vec<String>,
}

impl GlobalScope {
    /// Creates an empty global scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of globals declared so far.
    pub fn count(&self) -> usize {
        self.order.len()
    }

    /// Records a newly declared global in creation order. The position
    /// doubles as the global object's binding slot.
    pub(crate) fn record(&mut self, name: &str) {
        self.order.push(name.to_string());
    }

    /// The global scope as seen by nested function compilation: one slot
    /// per global, in creation order.
    pub(crate) fn descriptor(&self) -> ScopeDescriptor {
        let mut descriptor = ScopeDescriptor::new();
        for (slot, name) in self.order.iter().enumerate() {
            let read_only = self
                .symbols
                .get(name)
                .map(|entry| entry.read_only)
                .unwrap_or(false);
            descriptor = descriptor.with_slot(name, slot, read_only);
        }
        descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::codegen::registers::RegisterAllocator;

    #[test]
    fn test_redeclaration_keeps_register() {
        let mut allocator = RegisterAllocator::new(0);
        let mut table = SymbolTable::new();

        let first = allocator.add_local();
        table.add("x", first.clone(), false);
        table.add("x", allocator.add_local(), true);

        let entry = table.get("x").unwrap();
        assert_eq!(entry.register.index(), first.index());
        assert!(entry.read_only);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_rebase_shifts_entries() {
        let mut allocator = RegisterAllocator::new(0);
        let mut table = SymbolTable::new();
        table.add("a", allocator.add_local(), false);
        table.add("b", allocator.add_local(), false);

        table.rebase(-2);

        let mut indices: Vec<i32> = ["a", "b"]
            .iter()
            .map(|name| table.get(name).unwrap().register.index())
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![-2, -1]);
    }

    #[test]
    fn test_chain_resolves_static_slot() {
        let chain = CompileScopeChain::new()
            .nested(ScopeDescriptor::new().with_slot("outer", 3, false))
            .nested(ScopeDescriptor::new().with_slot("inner", 0, true));

        assert_eq!(
            chain.resolve("inner"),
            ChainResolution::Scoped {
                depth: 0,
                slot: 0,
                read_only: true
            }
        );
        assert_eq!(
            chain.resolve("outer"),
            ChainResolution::Scoped {
                depth: 1,
                slot: 3,
                read_only: false
            }
        );
    }

    #[test]
    fn test_dynamic_scope_blocks_static_addressing() {
        // The outer slot is shadowed by a dynamic scope in between, so the
        // name cannot be classified statically.
        let chain = CompileScopeChain::new()
            .nested(ScopeDescriptor::new().with_slot("x", 1, false))
            .nested(ScopeDescriptor::dynamic());

        assert_eq!(chain.resolve("x"), ChainResolution::Dynamic);
    }

    #[test]
    fn test_unknown_name_is_dynamic() {
        let chain = CompileScopeChain::new().nested(ScopeDescriptor::new());
        assert_eq!(chain.resolve("nowhere"), ChainResolution::Dynamic);
    }
}
