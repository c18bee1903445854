//! Frame register bookkeeping.
//!
//! Parameters occupy negative indices relative to the frame start, in
//! declaration order. Locals ascend from zero. Temporaries live in a LIFO
//! pool with manual liveness counts: a fresh temporary first reclaims dead
//! entries from the pool tail, so the frame size tracks maximum concurrent
//! liveness rather than the total number of temporaries ever requested.

use std::cell::Cell;
use std::rc::Rc;

/// A frame register handle.
///
/// The index is interior-mutable so separately compiled global scopes can
/// be rebased when merged. The liveness count is manual: expression
/// compilation holds registers across nested emission via [`Protected`],
/// and a count of zero is what allows both pool reuse and peephole fusion.
#[derive(Debug)]
pub struct RegisterId {
    index: Cell<i32>,
    refcount: Cell<u32>,
    temporary: bool,
}

/// Shared handle to a register.
pub type RegisterRef = Rc<RegisterId>;

impl RegisterId {
    fn new(index: i32, temporary: bool) -> RegisterRef {
        Rc::new(RegisterId {
            index: Cell::new(index),
            refcount: Cell::new(0),
            temporary,
        })
    }

    /// Creates a free-standing register for global variable storage.
    pub(crate) fn global(index: i32) -> RegisterRef {
        RegisterId::new(index, false)
    }

    /// The register's frame index. Negative for parameters.
    #[inline]
    pub fn index(&self) -> i32 {
        self.index.get()
    }

    /// Shifts the index by `delta`; used when rebasing merged global scopes.
    pub(crate) fn shift_index(&self, delta: i32) {
        self.index.set(self.index.get() + delta);
    }

    /// True for pool temporaries, false for parameters and locals.
    #[inline]
    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    /// Current liveness count.
    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.refcount.get()
    }

    /// Increments the liveness count.
    pub fn retain(&self) {
        self.refcount.set(self.refcount.get() + 1);
    }

    /// Decrements the liveness count.
    pub fn release(&self) {
        let count = self.refcount.get();
        assert!(count > 0, "released a dead register");
        self.refcount.set(count - 1);
    }
}

/// Holds a register live for the duration of a borrow.
///
/// Dropping the guard releases the register, returning a temporary to
/// reclaimability.
pub struct Protected {
    register: RegisterRef,
}

impl Protected {
    /// Protects `register` until the guard drops.
    pub fn new(register: RegisterRef) -> Self {
        register.retain();
        Self { register }
    }

    /// The protected register.
    pub fn get(&self) -> &RegisterRef {
        &self.register
    }

    /// The protected register's frame index.
    pub fn index(&self) -> i32 {
        self.register.index()
    }
}

impl Drop for Protected {
    fn drop(&mut self) {
        self.register.release();
    }
}

/// The per-frame register pools of one compilation.
pub(crate) struct RegisterAllocator {
    parameters: Vec<RegisterRef>,
    locals: Vec<RegisterRef>,
    temporaries: Vec<RegisterRef>,
    max_frame: usize,
}

impl RegisterAllocator {
    /// Creates pools with `parameter_count` parameter registers already
    /// assigned, at indices `-parameter_count..0` in declaration order.
    pub(crate) fn new(parameter_count: usize) -> Self {
        let parameters = (0..parameter_count)
            .map(|position| RegisterId::new(position as i32 - parameter_count as i32, false))
            .collect();
        Self {
            parameters,
            locals: Vec::new(),
            temporaries: Vec::new(),
            max_frame: 0,
        }
    }

    /// The register of the parameter at `position`.
    pub(crate) fn parameter(&self, position: usize) -> &RegisterRef {
        &self.parameters[position]
    }

    /// Assigns the next local register, ascending from zero.
    pub(crate) fn add_local(&mut self) -> RegisterRef {
        assert!(
            self.temporaries.is_empty(),
            "locals must be assigned before any temporary"
        );
        let register = RegisterId::new(self.locals.len() as i32, false);
        self.locals.push(register.clone());
        self.max_frame = self.max_frame.max(self.locals.len());
        register
    }

    /// Hands out a temporary, reclaiming dead pool-tail entries first.
    pub(crate) fn new_temporary(&mut self) -> RegisterRef {
        while let Some(last) = self.temporaries.last() {
            if last.ref_count() == 0 {
                self.temporaries.pop();
            } else {
                break;
            }
        }
        let index = (self.locals.len() + self.temporaries.len()) as i32;
        let register = RegisterId::new(index, true);
        self.temporaries.push(register.clone());
        self.max_frame = self.max_frame.max(index as usize + 1);
        register
    }

    /// Number of parameters.
    pub(crate) fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Frame size: locals plus the temporary high-water mark.
    pub(crate) fn frame_size(&self) -> usize {
        self.max_frame
    }
}
