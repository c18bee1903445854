//! Bytecode definitions.
//!
//! The instruction stream is a flat word array: each entry is one opcode
//! tag followed by a fixed, opcode-specific count of `i32` operands —
//! register indices (parameters are negative), constant pool indices, or
//! patched jump deltas. The stream only ever grows, except that the
//! generator may truncate its own tail while rewinding a peephole pattern
//! that is still the last emitted instruction.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::runtime::value::Value;

/// Operation codes for the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Opcode {
    /// Load a constant pool entry: `dst, const`
    LoadConst,
    /// Copy a register: `dst, src`
    Mov,
    /// Allocate an empty object: `dst`
    NewObject,
    /// Instantiate a nested function: `dst, func`
    NewFunc,

    /// Addition: `dst, a, b`
    Add,
    /// Subtraction: `dst, a, b`
    Sub,
    /// Multiplication: `dst, a, b`
    Mul,
    /// Division: `dst, a, b`
    Div,
    /// Remainder: `dst, a, b`
    Mod,
    /// Arithmetic negation: `dst, src`
    Negate,
    /// Logical not: `dst, src`
    Not,

    /// Loose equality: `dst, a, b`
    Eq,
    /// Loose inequality: `dst, a, b`
    NotEq,
    /// Strict equality: `dst, a, b`
    StrictEq,
    /// Strict inequality: `dst, a, b`
    StrictNotEq,
    /// Less than: `dst, a, b`
    Less,
    /// Less than or equal: `dst, a, b`
    LessEq,
    /// Greater than: `dst, a, b`
    Greater,
    /// Greater than or equal: `dst, a, b`
    GreaterEq,

    /// Unconditional jump: `delta`
    Jmp,
    /// Jump when truthy: `cond, delta`
    JTrue,
    /// Jump when falsy: `cond, delta`
    JFalse,
    /// Fused compare-and-branch, taken when `a < b`: `a, b, delta`
    JLess,
    /// Fused compare-and-branch, taken when `!(a < b)`: `a, b, delta`
    JNLess,
    /// Fused compare-and-branch, taken when `a <= b`: `a, b, delta`
    JLessEq,
    /// Fused compare-and-branch, taken when `!(a <= b)`: `a, b, delta`
    JNLessEq,

    /// Read a statically-addressed scope slot: `dst, depth, slot`
    GetScoped,
    /// Write a statically-addressed scope slot: `depth, slot, src`
    PutScoped,
    /// Resolve a name against the live scope chain: `dst, name`
    ResolveDynamic,
    /// Write through dynamic resolution: `name, src`
    PutDynamic,
    /// Property read: `dst, base, name`
    GetById,
    /// Property write: `base, name, src`
    PutById,

    /// Call with consecutive argument registers: `dst, callee, first_arg, argc`
    Call,
    /// Return from a function: `src`
    Ret,
    /// Finish a program or eval unit: `src`
    End,

    /// Throw a value: `src`
    Throw,
    /// Enter an exception handler, receiving the thrown value: `dst`
    Catch,
    /// Call a finally block as a subroutine: `ret_addr, delta`
    Jsr,
    /// Return from a finally subroutine: `ret_addr`
    Sret,
    /// Unwind dynamic scopes, then jump: `count, delta`
    JmpScopes,
    /// Push an object onto the scope chain: `src`
    PushScope,
    /// Pop the innermost scope chain entry
    PopScope,

    /// Branch through a dense jump table: `table, default_delta, scrutinee`
    SwitchImm,
    /// Branch through a hash-keyed jump table: `table, default_delta, scrutinee`
    SwitchHash,
}

impl Opcode {
    /// Every opcode, in tag order.
    pub const ALL: &'static [Opcode] = &[
        Opcode::LoadConst,
        Opcode::Mov,
        Opcode::NewObject,
        Opcode::NewFunc,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Negate,
        Opcode::Not,
        Opcode::Eq,
        Opcode::NotEq,
        Opcode::StrictEq,
        Opcode::StrictNotEq,
        Opcode::Less,
        Opcode::LessEq,
        Opcode::Greater,
        Opcode::GreaterEq,
        Opcode::Jmp,
        Opcode::JTrue,
        Opcode::JFalse,
        Opcode::JLess,
        Opcode::JNLess,
        Opcode::JLessEq,
        Opcode::JNLessEq,
        Opcode::GetScoped,
        Opcode::PutScoped,
        Opcode::ResolveDynamic,
        Opcode::PutDynamic,
        Opcode::GetById,
        Opcode::PutById,
        Opcode::Call,
        Opcode::Ret,
        Opcode::End,
        Opcode::Throw,
        Opcode::Catch,
        Opcode::Jsr,
        Opcode::Sret,
        Opcode::JmpScopes,
        Opcode::PushScope,
        Opcode::PopScope,
        Opcode::SwitchImm,
        Opcode::SwitchHash,
    ];

    /// Decodes an instruction-stream tag.
    pub fn from_word(word: i32) -> Option<Opcode> {
        Opcode::ALL.iter().copied().find(|op| *op as i32 == word)
    }

    /// Fixed operand count of this opcode.
    pub fn operand_count(self) -> usize {
        match self {
            Opcode::PopScope => 0,
            Opcode::NewObject
            | Opcode::Jmp
            | Opcode::Ret
            | Opcode::End
            | Opcode::Throw
            | Opcode::Catch
            | Opcode::Sret
            | Opcode::PushScope => 1,
            Opcode::LoadConst
            | Opcode::Mov
            | Opcode::NewFunc
            | Opcode::Negate
            | Opcode::Not
            | Opcode::JTrue
            | Opcode::JFalse
            | Opcode::ResolveDynamic
            | Opcode::PutDynamic
            | Opcode::Jsr
            | Opcode::JmpScopes => 2,
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Eq
            | Opcode::NotEq
            | Opcode::StrictEq
            | Opcode::StrictNotEq
            | Opcode::Less
            | Opcode::LessEq
            | Opcode::Greater
            | Opcode::GreaterEq
            | Opcode::JLess
            | Opcode::JNLess
            | Opcode::JLessEq
            | Opcode::JNLessEq
            | Opcode::GetScoped
            | Opcode::PutScoped
            | Opcode::GetById
            | Opcode::PutById
            | Opcode::SwitchImm
            | Opcode::SwitchHash => 3,
            Opcode::Call => 4,
        }
    }

    /// Full encoded length, tag included.
    pub fn length(self) -> usize {
        1 + self.operand_count()
    }

    /// Which operand slot holds this opcode's jump delta, if any.
    pub fn jump_delta_slot(self) -> Option<usize> {
        match self {
            Opcode::Jmp => Some(0),
            Opcode::JTrue | Opcode::JFalse | Opcode::Jsr | Opcode::JmpScopes => Some(1),
            Opcode::JLess | Opcode::JNLess | Opcode::JLessEq | Opcode::JNLessEq => Some(2),
            // The switch default delta; table entries live off-stream
            Opcode::SwitchImm | Opcode::SwitchHash => Some(1),
            _ => None,
        }
    }

    /// Printable mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::LoadConst => "load_const",
            Opcode::Mov => "mov",
            Opcode::NewObject => "new_object",
            Opcode::NewFunc => "new_func",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Mod => "mod",
            Opcode::Negate => "negate",
            Opcode::Not => "not",
            Opcode::Eq => "eq",
            Opcode::NotEq => "neq",
            Opcode::StrictEq => "stricteq",
            Opcode::StrictNotEq => "nstricteq",
            Opcode::Less => "less",
            Opcode::LessEq => "lesseq",
            Opcode::Greater => "greater",
            Opcode::GreaterEq => "greatereq",
            Opcode::Jmp => "jmp",
            Opcode::JTrue => "jtrue",
            Opcode::JFalse => "jfalse",
            Opcode::JLess => "jless",
            Opcode::JNLess => "jnless",
            Opcode::JLessEq => "jlesseq",
            Opcode::JNLessEq => "jnlesseq",
            Opcode::GetScoped => "get_scoped",
            Opcode::PutScoped => "put_scoped",
            Opcode::ResolveDynamic => "resolve",
            Opcode::PutDynamic => "put_resolved",
            Opcode::GetById => "get_by_id",
            Opcode::PutById => "put_by_id",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
            Opcode::End => "end",
            Opcode::Throw => "throw",
            Opcode::Catch => "catch",
            Opcode::Jsr => "jsr",
            Opcode::Sret => "sret",
            Opcode::JmpScopes => "jmp_scopes",
            Opcode::PushScope => "push_scope",
            Opcode::PopScope => "pop_scope",
            Opcode::SwitchImm => "switch_imm",
            Opcode::SwitchHash => "switch_hash",
        }
    }
}

/// One exception-handler table entry: the protected instruction range,
/// where control transfers on a throw, and the scope depth to unwind to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerEntry {
    /// First protected instruction offset
    pub start: u32,
    /// One past the last protected instruction offset
    pub end: u32,
    /// Handler instruction offset
    pub target: u32,
    /// Scope-context depth at entry to the protected range
    pub scope_depth: u32,
}

/// Key of a hashed switch jump table entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SwitchKey {
    /// An integral case key
    Int(i32),
    /// A string case key
    Str(String),
}

/// A dense jump table over a contiguous integer range.
///
/// `branch_offsets[key - min]` holds the branch delta relative to the
/// switch instruction's own address; zero entries fall through to the
/// default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DenseJumpTable {
    /// Smallest case key
    pub min: i32,
    /// Branch deltas, indexed by `key - min`
    pub branch_offsets: Vec<i32>,
}

impl DenseJumpTable {
    /// The branch delta for `key`, if a case covers it.
    pub fn offset_for(&self, key: i32) -> Option<i32> {
        let index = key.checked_sub(self.min)? as usize;
        match self.branch_offsets.get(index) {
            Some(delta) if *delta != 0 => Some(*delta),
            _ => None,
        }
    }
}

/// A hash-keyed jump table for sparse integer or string switches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HashedJumpTable {
    /// Branch deltas by case key
    pub branch_offsets: FxHashMap<SwitchKey, i32>,
}

impl HashedJumpTable {
    /// The branch delta for `key`, if a case covers it.
    pub fn offset_for(&self, key: &SwitchKey) -> Option<i32> {
        self.branch_offsets.get(key).copied()
    }
}

/// A switch jump table.
#[derive(Debug, Clone, PartialEq)]
pub enum JumpTable {
    /// Contiguous integer range
    Dense(DenseJumpTable),
    /// Hash-keyed
    Hashed(HashedJumpTable),
}

/// A compiled nested function.
#[derive(Debug, PartialEq)]
pub struct FunctionCode {
    /// The function name
    pub name: String,
    /// The compiled body
    pub code: CodeBlock,
}

/// A compiled unit: instructions plus every auxiliary table the execution
/// engine needs.
#[derive(Debug, Default, PartialEq)]
pub struct CodeBlock {
    /// The instruction word stream
    pub instructions: Vec<i32>,
    /// Deduplicated constant pool
    pub constants: Vec<Value>,
    /// Compiled nested functions, referenced by `NewFunc`
    pub functions: Vec<Rc<FunctionCode>>,
    /// Exception handlers, in registration order
    pub handlers: Vec<HandlerEntry>,
    /// Switch jump tables, referenced by the switch opcodes
    pub jump_tables: Vec<JumpTable>,
    /// Variables an eval unit declares at run time
    pub declared_variables: Vec<String>,
    /// Declared parameter count
    pub num_parameters: usize,
    /// Frame size: locals plus the temporary high-water mark
    pub num_registers: usize,
}

impl CodeBlock {
    /// Creates an empty code block.
    pub fn new() -> Self {
        Self::default()
    }

    /// The handler covering `offset`, if any. Entries are searched in
    /// registration order, so inner handlers win.
    pub fn handler_for(&self, offset: u32) -> Option<&HandlerEntry> {
        self.handlers
            .iter()
            .find(|h| h.start <= offset && offset < h.end)
    }

    /// Number of encoded instructions.
    pub fn instruction_count(&self) -> usize {
        let mut count = 0;
        let mut offset = 0;
        while offset < self.instructions.len() {
            let op = Opcode::from_word(self.instructions[offset])
                .expect("undecodable opcode in instruction stream");
            offset += op.length();
            count += 1;
        }
        count
    }

    /// The opcodes of the stream, in order.
    pub fn opcodes(&self) -> Vec<Opcode> {
        let mut ops = Vec::new();
        let mut offset = 0;
        while offset < self.instructions.len() {
            let op = Opcode::from_word(self.instructions[offset])
                .expect("undecodable opcode in instruction stream");
            ops.push(op);
            offset += op.length();
        }
        ops
    }

    /// Renders a human-readable listing of the stream and its tables.
    pub fn disassemble(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let mut offset = 0;
        while offset < self.instructions.len() {
            let op = Opcode::from_word(self.instructions[offset])
                .expect("undecodable opcode in instruction stream");
            let operands = &self.instructions[offset + 1..offset + op.length()];

            let _ = write!(out, "{:>5}  {:<12}", offset, op.mnemonic());
            for (slot, operand) in operands.iter().enumerate() {
                if slot > 0 {
                    let _ = write!(out, ",");
                }
                if op.jump_delta_slot() == Some(slot) {
                    let _ = write!(out, " {:+}", operand);
                } else {
                    let _ = write!(out, " {}", operand);
                }
            }
            if let Some(slot) = op.jump_delta_slot() {
                let delta = operands[slot] as isize;
                let _ = write!(out, "  ; -> {}", offset as isize + delta);
            }
            out.push('\n');

            offset += op.length();
        }

        for (index, constant) in self.constants.iter().enumerate() {
            let _ = writeln!(out, "const[{}] = {}", index, constant);
        }
        for handler in &self.handlers {
            let _ = writeln!(
                out,
                "handler [{}, {}) -> {} (depth {})",
                handler.start, handler.end, handler.target, handler.scope_depth
            );
        }
        for (index, table) in self.jump_tables.iter().enumerate() {
            match table {
                JumpTable::Dense(dense) => {
                    let _ = writeln!(
                        out,
                        "table[{}] dense min={} entries={:?}",
                        index, dense.min, dense.branch_offsets
                    );
                }
                JumpTable::Hashed(hashed) => {
                    let mut entries: Vec<String> = hashed
                        .branch_offsets
                        .iter()
                        .map(|(key, delta)| format!("{:?} -> {:+}", key, delta))
                        .collect();
                    entries.sort();
                    let _ = writeln!(out, "table[{}] hashed {{{}}}", index, entries.join(", "));
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for op in Opcode::ALL.iter().copied() {
            assert_eq!(Opcode::from_word(op as i32), Some(op));
        }
        assert_eq!(Opcode::from_word(-1), None);
        assert_eq!(Opcode::from_word(Opcode::ALL.len() as i32), None);
    }

    #[test]
    fn test_jump_delta_slot_within_operands() {
        for op in Opcode::ALL.iter().copied() {
            if let Some(slot) = op.jump_delta_slot() {
                assert!(slot < op.operand_count(), "{:?}", op);
            }
        }
    }

    #[test]
    fn test_dense_table_lookup() {
        let table = DenseJumpTable {
            min: 3,
            branch_offsets: vec![4, 0, 9],
        };
        assert_eq!(table.offset_for(3), Some(4));
        assert_eq!(table.offset_for(4), None);
        assert_eq!(table.offset_for(5), Some(9));
        assert_eq!(table.offset_for(2), None);
        assert_eq!(table.offset_for(6), None);
    }

    #[test]
    fn test_handler_lookup_prefers_inner() {
        let mut code = CodeBlock::new();
        code.handlers.push(HandlerEntry {
            start: 4,
            end: 8,
            target: 20,
            scope_depth: 1,
        });
        code.handlers.push(HandlerEntry {
            start: 0,
            end: 16,
            target: 30,
            scope_depth: 0,
        });

        assert_eq!(code.handler_for(5).unwrap().target, 20);
        assert_eq!(code.handler_for(10).unwrap().target, 30);
        assert!(code.handler_for(16).is_none());
    }
}
