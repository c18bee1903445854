//! Code generation from the front-end tree to register bytecode.
//!
//! One [`Generator`] compiles exactly one unit — a function body, a global
//! program, or an eval body — and exclusively owns its instruction buffer
//! and register pools for the duration. Statement and expression emission
//! live in the sibling modules; this module holds the machinery they share:
//! registers, labels and patching, peephole fusion, constants, identifier
//! resolution, and the control-flow bookkeeping for scopes and finally
//! blocks.

mod registers;
mod scope;

mod expressions;
mod statements;


pub use registers::{Protected, RegisterId, RegisterRef};
pub use scope::{
    ChainResolution, CompileScopeChain, GlobalScope, ScopeDescriptor, SymbolEntry, SymbolTable,
};

use rustc_hash::FxHashMap;

use crate::Error;
use crate::ast::{FunctionBody, FunctionDeclaration};
use crate::compiler::bytecode::{CodeBlock, FunctionCode, HandlerEntry, Opcode};
use crate::runtime::value::{ConstantKey, Value};

use registers::RegisterAllocator;

use std::rc::Rc;

/// Nesting limit for recursive tree compilation. Exceeding it degrades to
/// the "expression too deep" condition instead of overflowing the stack.
const MAX_COMPILE_DEPTH: usize = 256;

/// The kind of unit a generator compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeType {
    /// A program compiled into the shared global scope
    Global,
    /// A function body
    Function,
    /// An eval body; its variables are declared at run time
    Eval,
}

/// A handle for a not-yet-final bytecode address.
///
/// Created unbound, a label accumulates patch records as forward jumps
/// reference it, then is bound exactly once to a concrete offset, resolving
/// every patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Default)]
struct LabelInfo {
    location: Option<usize>,
    patches: Vec<JumpPatch>,
}

#[derive(Debug)]
struct JumpPatch {
    /// Offset of the jump instruction itself
    instruction: usize,
    /// Word index of the delta operand to patch
    slot: usize,
}

/// What a break or continue can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LabelScopeKind {
    Loop,
    Switch,
    Named,
}

pub(crate) struct LabelScope {
    kind: LabelScopeKind,
    name: Option<String>,
    scope_depth: usize,
    break_target: Label,
    continue_target: Option<Label>,
}

struct FinallyData {
    target: Label,
    ret_addr: RegisterRef,
}

/// One entry of the control-flow scope stack: either a dynamically pushed
/// scope or a pending finally block.
struct ScopeContext {
    is_finally: bool,
    finally: Option<FinallyData>,
}

enum UnwindStep {
    Dynamic,
    Finally { target: Label, ret_addr: i32 },
}

/// Identifier resolution outcome, per the three-tier fallback.
#[derive(Debug, Clone)]
pub(crate) enum Resolution {
    /// Statically bound to a frame register
    Register(SymbolEntry),
    /// Statically addressable scope slot
    Scoped {
        depth: usize,
        slot: usize,
        read_only: bool,
    },
    /// Run-time name lookup required
    Dynamic,
}

/// Compiles one unit's tree into a [`CodeBlock`].
pub struct Generator {
    code: CodeBlock,
    constant_index: FxHashMap<ConstantKey, u32>,
    allocator: RegisterAllocator,
    symbols: SymbolTable,
    chain: CompileScopeChain,
    nested_chain: CompileScopeChain,
    code_type: CodeType,
    labels: Vec<LabelInfo>,
    last_opcode: Option<(Opcode, usize)>,
    label_scopes: Vec<LabelScope>,
    scope_contexts: Vec<ScopeContext>,
    dynamic_scope_depth: usize,
    depth: usize,
    too_deep: bool,
    ignored: Option<RegisterRef>,
    completion: Option<RegisterRef>,
    pending_label: Option<String>,
}

impl Generator {
    fn with_unit(
        code_type: CodeType,
        chain: CompileScopeChain,
        nested_chain: CompileScopeChain,
        parameter_count: usize,
    ) -> Self {
        Self {
            code: CodeBlock::new(),
            constant_index: FxHashMap::default(),
            allocator: RegisterAllocator::new(parameter_count),
            symbols: SymbolTable::new(),
            chain,
            nested_chain,
            code_type,
            labels: Vec::new(),
            last_opcode: None,
            label_scopes: Vec::new(),
            scope_contexts: Vec::new(),
            dynamic_scope_depth: 0,
            depth: 0,
            too_deep: false,
            ignored: None,
            completion: None,
            pending_label: None,
        }
    }

    /// Binding-object layout of a unit's own scope, for compiling nested
    /// functions: parameters, then locals, then hoisted functions.
    fn local_scope_descriptor(body: &FunctionBody) -> ScopeDescriptor {
        let mut descriptor = ScopeDescriptor::new();
        let mut slot = 0;
        for name in &body.parameters {
            descriptor = descriptor.with_slot(name, slot, false);
            slot += 1;
        }
        for variable in &body.variables {
            descriptor = descriptor.with_slot(&variable.name, slot, variable.constant);
            slot += 1;
        }
        for function in &body.functions {
            descriptor = descriptor.with_slot(&function.name, slot, false);
            slot += 1;
        }
        descriptor
    }

    /// Prepares a generator for a function body enclosed by `chain`.
    ///
    /// Registers are assigned in a single ascending pass: parameters first,
    /// at negative indices in declaration order, then locals and hoisted
    /// functions from zero.
    pub fn for_function(body: &FunctionBody, chain: &CompileScopeChain) -> Self {
        let nested_chain = chain.nested(Self::local_scope_descriptor(body));
        let mut generator = Self::with_unit(
            CodeType::Function,
            chain.clone(),
            nested_chain,
            body.parameters.len(),
        );

        for (position, name) in body.parameters.iter().enumerate() {
            let register = generator.allocator.parameter(position).clone();
            generator.symbols.add(name, register, false);
        }
        for variable in &body.variables {
            let register = generator.allocator.add_local();
            generator
                .symbols
                .add(&variable.name, register, variable.constant);
        }
        for function in &body.functions {
            let register = generator.allocator.add_local();
            generator.symbols.add(&function.name, register, false);
        }

        generator
    }

    /// Prepares a generator for a program unit, merging its declarations
    /// into the persistent global scope.
    ///
    /// Previously declared globals keep their register indices — bytecode
    /// compiled against them stays valid — and newly declared names extend
    /// the global storage downward, global number `p` at index `-(p + 1)`.
    /// When the engine relocates the merged register bank wholesale, the
    /// shared table rebases every entry as one block
    /// ([`SymbolTable::rebase`]).
    pub fn for_program(body: &FunctionBody, globals: &mut GlobalScope) -> Self {
        let mut new_names: Vec<(String, bool)> = Vec::new();
        for variable in &body.variables {
            if !globals.symbols.contains(&variable.name)
                && !new_names.iter().any(|(name, _)| name == &variable.name)
            {
                new_names.push((variable.name.clone(), variable.constant));
            }
        }
        for function in &body.functions {
            if !globals.symbols.contains(&function.name)
                && !new_names.iter().any(|(name, _)| name == &function.name)
            {
                new_names.push((function.name.clone(), false));
            }
        }

        for (name, constant) in new_names {
            let register = RegisterId::global(-(globals.count() as i32 + 1));
            globals.symbols.add(&name, register, constant);
            globals.record(&name);
        }

        let nested_chain = CompileScopeChain::new().nested(globals.descriptor());
        let mut generator =
            Self::with_unit(CodeType::Global, CompileScopeChain::new(), nested_chain, 0);
        generator.symbols = globals.symbols.clone();
        generator
    }

    /// Prepares a generator for an eval body enclosed by `chain`.
    ///
    /// Eval units own no statically addressed storage: their declarations
    /// are recorded for the execution engine to create at run time, and
    /// every identifier resolves through the scope chain.
    pub fn for_eval(body: &FunctionBody, chain: &CompileScopeChain) -> Self {
        let nested_chain = chain.nested(ScopeDescriptor::dynamic());
        let mut generator = Self::with_unit(CodeType::Eval, chain.clone(), nested_chain, 0);
        for variable in &body.variables {
            generator
                .code
                .declared_variables
                .push(variable.name.clone());
        }
        for function in &body.functions {
            generator
                .code
                .declared_variables
                .push(function.name.clone());
        }
        generator
    }

    /// Compiles a hoisted function declaration into a shareable
    /// [`FunctionCode`].
    pub fn compile_function(
        declaration: &FunctionDeclaration,
        chain: &CompileScopeChain,
    ) -> Result<Rc<FunctionCode>, Error> {
        let code = Generator::for_function(&declaration.body, chain).generate(&declaration.body)?;
        Ok(Rc::new(FunctionCode {
            name: declaration.name.clone(),
            code,
        }))
    }

    /// One-shot compilation of a program unit.
    pub fn compile_program(
        body: &FunctionBody,
        globals: &mut GlobalScope,
    ) -> Result<CodeBlock, Error> {
        Generator::for_program(body, globals).generate(body)
    }

    /// One-shot compilation of an eval unit.
    pub fn compile_eval(
        body: &FunctionBody,
        chain: &CompileScopeChain,
    ) -> Result<CodeBlock, Error> {
        Generator::for_eval(body, chain).generate(body)
    }

    /// Compiles the unit's statements and returns the finished code block.
    pub fn generate(mut self, body: &FunctionBody) -> Result<CodeBlock, Error> {
        if self.code_type != CodeType::Function {
            let completion = self.allocator.new_temporary();
            completion.retain();
            self.emit_load_constant(&completion, Value::Undefined);
            self.completion = Some(completion);
        }

        self.emit_prologue(body)?;

        for statement in &body.statements {
            self.emit_statement(statement)?;
        }

        match self.code_type {
            CodeType::Function => {
                let undefined = self.new_temporary();
                self.emit_load_constant(&undefined, Value::Undefined);
                self.emit(Opcode::Ret, &[undefined.index()]);
            }
            CodeType::Global | CodeType::Eval => {
                let completion = self.completion.clone().expect("completion register");
                self.emit(Opcode::End, &[completion.index()]);
            }
        }

        self.finish()
    }

    /// Compiles and instantiates the unit's hoisted nested functions.
    fn emit_prologue(&mut self, body: &FunctionBody) -> Result<(), Error> {
        if body.functions.is_empty() {
            return Ok(());
        }
        let nested_chain = self.nested_chain.clone();
        for function in &body.functions {
            let function_code = Self::compile_function(function, &nested_chain)?;
            let index = self.code.functions.len() as i32;
            self.code.functions.push(function_code);

            match self.code_type {
                CodeType::Function | CodeType::Global => {
                    let entry = self
                        .symbols
                        .get(&function.name)
                        .cloned()
                        .expect("hoisted function has a binding");
                    self.emit(Opcode::NewFunc, &[entry.register.index(), index]);
                }
                CodeType::Eval => {
                    let temp = self.new_temporary();
                    self.emit(Opcode::NewFunc, &[temp.index(), index]);
                    let name = self.string_constant(&function.name);
                    self.emit(Opcode::PutDynamic, &[name, temp.index()]);
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<CodeBlock, Error> {
        if self.too_deep {
            return Err(Error::OutOfMemory(
                "expression nesting too deep".to_string(),
            ));
        }
        debug_assert!(self.scope_contexts.is_empty());
        debug_assert!(self.label_scopes.is_empty());

        let mut code = self.code;
        code.num_parameters = self.allocator.parameter_count();
        code.num_registers = self.allocator.frame_size();
        Ok(code)
    }

    // ========================================================================
    // Emission primitives
    // ========================================================================

    /// Current end-of-stream offset.
    pub(crate) fn offset(&self) -> usize {
        self.code.instructions.len()
    }

    /// Appends one instruction, returning its offset.
    pub(crate) fn emit(&mut self, op: Opcode, operands: &[i32]) -> usize {
        debug_assert_eq!(operands.len(), op.operand_count());
        let start = self.code.instructions.len();
        self.code.instructions.push(op as i32);
        self.code.instructions.extend_from_slice(operands);
        self.last_opcode = Some((op, start));
        start
    }

    /// Truncates the stream back to `offset`. Only legal while the removed
    /// pattern is still the last emitted instruction, which is exactly when
    /// the peephole rewinds.
    fn rewind(&mut self, offset: usize) {
        self.code.instructions.truncate(offset);
        self.last_opcode = None;
    }

    // ========================================================================
    // Labels and jumps
    // ========================================================================

    /// Creates an unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelInfo::default());
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current offset, resolving every recorded patch
    /// to `bound − source`. A label binds at most once, and a bound label
    /// ends peephole fusion across it: the next instruction must remain an
    /// independent jump target.
    pub fn bind_label(&mut self, label: Label) {
        let offset = self.offset();
        let info = &mut self.labels[label.0];
        assert!(info.location.is_none(), "label bound twice");
        info.location = Some(offset);

        let patches = std::mem::take(&mut info.patches);
        for patch in patches {
            self.code.instructions[patch.slot] = (offset as i64 - patch.instruction as i64) as i32;
        }

        self.last_opcode = None;
    }

    /// The offset a label was bound to, if it has been bound.
    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels[label.0].location
    }

    /// Emits a jump-family instruction. A bound target gets its delta
    /// immediately (backward jumps); an unbound one gets a patch record
    /// resolved at bind time.
    pub(crate) fn emit_with_jump(&mut self, op: Opcode, operands: &mut [i32], target: Label) -> usize {
        let slot = op.jump_delta_slot().expect("opcode carries no jump delta");
        let start = self.offset();
        match self.labels[target.0].location {
            Some(location) => {
                operands[slot] = (location as i64 - start as i64) as i32;
                self.emit(op, operands);
            }
            None => {
                operands[slot] = 0;
                self.emit(op, operands);
                self.labels[target.0].patches.push(JumpPatch {
                    instruction: start,
                    slot: start + 1 + slot,
                });
            }
        }
        start
    }

    /// Emits an unconditional jump to `target`.
    pub fn emit_jump(&mut self, target: Label) -> usize {
        self.emit_with_jump(Opcode::Jmp, &mut [0], target)
    }

    /// Emits a branch taken when `cond` is truthy, fusing with an eligible
    /// just-emitted comparison.
    pub fn emit_jump_if_true(&mut self, cond: &RegisterRef, target: Label) {
        match self.peephole_branch(cond, true) {
            Some((op, a, b)) => {
                self.emit_with_jump(op, &mut [a, b, 0], target);
            }
            None => {
                self.emit_with_jump(Opcode::JTrue, &mut [cond.index(), 0], target);
            }
        }
    }

    /// Emits a branch taken when `cond` is falsy, fusing with an eligible
    /// just-emitted comparison.
    pub fn emit_jump_if_false(&mut self, cond: &RegisterRef, target: Label) {
        match self.peephole_branch(cond, false) {
            Some((op, a, b)) => {
                self.emit_with_jump(op, &mut [a, b, 0], target);
            }
            None => {
                self.emit_with_jump(Opcode::JFalse, &mut [cond.index(), 0], target);
            }
        }
    }

    /// Tries to rewind a comparison whose still-unreferenced temporary
    /// result is about to be branched on, yielding the fused opcode and the
    /// comparison's original operands.
    ///
    /// Fusion is only legal when the branch condition is the comparison's
    /// destination, that destination is a temporary, and nothing else
    /// references it; otherwise the rewind would drop a live value.
    /// Greater-than forms fuse into the less-than opcodes by operand swap.
    fn peephole_branch(
        &mut self,
        cond: &RegisterRef,
        branch_on_true: bool,
    ) -> Option<(Opcode, i32, i32)> {
        let (op, start) = self.last_opcode?;
        let (fused, swap) = match (op, branch_on_true) {
            (Opcode::Less, true) => (Opcode::JLess, false),
            (Opcode::LessEq, true) => (Opcode::JLessEq, false),
            (Opcode::Greater, true) => (Opcode::JLess, true),
            (Opcode::GreaterEq, true) => (Opcode::JLessEq, true),
            (Opcode::Less, false) => (Opcode::JNLess, false),
            (Opcode::LessEq, false) => (Opcode::JNLessEq, false),
            (Opcode::Greater, false) => (Opcode::JNLess, true),
            (Opcode::GreaterEq, false) => (Opcode::JNLessEq, true),
            _ => return None,
        };

        let dst = self.code.instructions[start + 1];
        if dst != cond.index() || !cond.is_temporary() || cond.ref_count() != 0 {
            return None;
        }

        let a = self.code.instructions[start + 2];
        let b = self.code.instructions[start + 3];
        self.rewind(start);
        if swap { Some((fused, b, a)) } else { Some((fused, a, b)) }
    }

    // ========================================================================
    // Constants
    // ========================================================================

    /// Interns `value` into the constant pool, deduplicating by value
    /// equality, and returns its index.
    pub fn add_constant(&mut self, value: Value) -> u32 {
        let key = value
            .constant_key()
            .expect("object references are not poolable constants");
        if let Some(&index) = self.constant_index.get(&key) {
            return index;
        }
        let index = self.code.constants.len() as u32;
        self.code.constants.push(value);
        self.constant_index.insert(key, index);
        index
    }

    pub(crate) fn string_constant(&mut self, name: &str) -> i32 {
        self.add_constant(Value::String(name.to_string())) as i32
    }

    pub(crate) fn emit_load_constant(&mut self, dst: &RegisterRef, value: Value) {
        let index = self.add_constant(value) as i32;
        self.emit(Opcode::LoadConst, &[dst.index(), index]);
    }

    // ========================================================================
    // Registers
    // ========================================================================

    /// Hands out a temporary register, reusing dead pool-tail slots.
    pub fn new_temporary(&mut self) -> RegisterRef {
        self.allocator.new_temporary()
    }

    /// Picks the register an expression result lands in: the requested
    /// destination if any, else a reusable dead temporary, else a fresh one.
    pub(crate) fn final_destination(
        &mut self,
        dst: Option<RegisterRef>,
        reuse: Option<&RegisterRef>,
    ) -> RegisterRef {
        match dst {
            Some(register) => register,
            None => match reuse {
                Some(register) if register.is_temporary() && register.ref_count() == 0 => {
                    register.clone()
                }
                _ => self.new_temporary(),
            },
        }
    }

    /// The synthetic register substituted when compilation degrades under
    /// the depth guard. Permanently referenced so it is never reclaimed.
    pub(crate) fn ignored_result(&mut self) -> RegisterRef {
        if self.ignored.is_none() {
            let register = self.allocator.new_temporary();
            register.retain();
            self.ignored = Some(register);
        }
        self.ignored.clone().unwrap()
    }

    pub(crate) fn completion_register(&self) -> Option<RegisterRef> {
        self.completion.clone()
    }

    // ========================================================================
    // Identifier resolution
    // ========================================================================

    /// Classifies `name` per the three-tier fallback: own register, baked
    /// (depth, slot) scope access, or fully dynamic. Inside a dynamically
    /// pushed scope everything is dynamic — the pushed object may shadow
    /// any binding.
    pub(crate) fn resolve(&self, name: &str) -> Resolution {
        if self.dynamic_scope_depth > 0 {
            return Resolution::Dynamic;
        }
        if let Some(entry) = self.symbols.get(name) {
            return Resolution::Register(entry.clone());
        }
        match self.chain.resolve(name) {
            ChainResolution::Scoped {
                depth,
                slot,
                read_only,
            } => Resolution::Scoped {
                depth,
                slot,
                read_only,
            },
            ChainResolution::Dynamic => Resolution::Dynamic,
        }
    }

    // ========================================================================
    // Depth guard
    // ========================================================================

    /// Enters one level of tree recursion; false means the guard tripped
    /// and the caller must degrade to a synthetic result.
    pub(crate) fn enter_nested(&mut self) -> bool {
        if self.depth >= MAX_COMPILE_DEPTH {
            self.too_deep = true;
            return false;
        }
        self.depth += 1;
        true
    }

    pub(crate) fn leave_nested(&mut self) {
        self.depth -= 1;
    }

    // ========================================================================
    // Scope contexts and finally bookkeeping
    // ========================================================================

    /// Depth of the control-flow scope stack.
    pub(crate) fn scope_depth(&self) -> usize {
        self.scope_contexts.len()
    }

    /// Pushes `object` onto the run-time scope chain and records the
    /// dynamic scope for jump bookkeeping and resolution.
    pub(crate) fn emit_push_scope(&mut self, object: &RegisterRef) {
        self.emit(Opcode::PushScope, &[object.index()]);
        self.scope_contexts.push(ScopeContext {
            is_finally: false,
            finally: None,
        });
        self.dynamic_scope_depth += 1;
    }

    /// Pops the innermost dynamic scope.
    pub(crate) fn emit_pop_scope(&mut self) {
        let context = self.scope_contexts.pop().expect("popped an empty scope stack");
        assert!(!context.is_finally, "popped a finally context as a scope");
        self.dynamic_scope_depth -= 1;
        self.emit(Opcode::PopScope, &[]);
    }

    /// Records a pending finally block; jumps that leave it will call it as
    /// a subroutine first.
    pub(crate) fn push_finally_context(&mut self, target: Label, ret_addr: RegisterRef) {
        self.scope_contexts.push(ScopeContext {
            is_finally: true,
            finally: Some(FinallyData { target, ret_addr }),
        });
    }

    pub(crate) fn pop_finally_context(&mut self) {
        let context = self.scope_contexts.pop().expect("popped an empty scope stack");
        assert!(context.is_finally, "popped a scope as a finally context");
    }

    /// Jumps to `target`, first unwinding every scope context above
    /// `target_depth`.
    ///
    /// Runs of dynamic scopes collapse into a single unwind-N instruction;
    /// each interposed finally block gets one subroutine call, innermost
    /// first, before the final jump.
    pub(crate) fn emit_jump_scopes(&mut self, target: Label, target_depth: usize) {
        assert!(target_depth <= self.scope_contexts.len());

        let steps: Vec<UnwindStep> = self.scope_contexts[target_depth..]
            .iter()
            .rev()
            .map(|context| match &context.finally {
                Some(finally) => UnwindStep::Finally {
                    target: finally.target,
                    ret_addr: finally.ret_addr.index(),
                },
                None => UnwindStep::Dynamic,
            })
            .collect();

        let mut pending = 0i32;
        for step in steps {
            match step {
                UnwindStep::Dynamic => pending += 1,
                UnwindStep::Finally { target, ret_addr } => {
                    if pending > 0 {
                        let resume = self.new_label();
                        self.emit_with_jump(Opcode::JmpScopes, &mut [pending, 0], resume);
                        self.bind_label(resume);
                        pending = 0;
                    }
                    self.emit_with_jump(Opcode::Jsr, &mut [ret_addr, 0], target);
                }
            }
        }

        if pending > 0 {
            self.emit_with_jump(Opcode::JmpScopes, &mut [pending, 0], target);
        } else {
            self.emit_jump(target);
        }
    }

    // ========================================================================
    // Break/continue targets
    // ========================================================================

    pub(crate) fn push_label_scope(
        &mut self,
        kind: LabelScopeKind,
        name: Option<String>,
        break_target: Label,
        continue_target: Option<Label>,
    ) {
        self.label_scopes.push(LabelScope {
            kind,
            name,
            scope_depth: self.scope_contexts.len(),
            break_target,
            continue_target,
        });
    }

    pub(crate) fn pop_label_scope(&mut self) {
        self.label_scopes.pop().expect("popped an empty label scope stack");
    }

    /// The break target for `label`, or the nearest breakable construct.
    pub(crate) fn break_scope(&self, label: Option<&str>) -> Result<(Label, usize), Error> {
        for scope in self.label_scopes.iter().rev() {
            let matches = match label {
                Some(name) => scope.name.as_deref() == Some(name),
                None => scope.kind != LabelScopeKind::Named,
            };
            if matches {
                return Ok((scope.break_target, scope.scope_depth));
            }
        }
        Err(Error::SyntaxError(match label {
            Some(name) => format!("break label '{}' not found", name),
            None => "break outside of a loop or switch".to_string(),
        }))
    }

    /// The continue target for `label`, or the nearest enclosing loop.
    pub(crate) fn continue_scope(&self, label: Option<&str>) -> Result<(Label, usize), Error> {
        for scope in self.label_scopes.iter().rev() {
            let matches = match label {
                Some(name) => scope.name.as_deref() == Some(name),
                None => scope.kind == LabelScopeKind::Loop,
            };
            if matches {
                if let Some(target) = scope.continue_target {
                    return Ok((target, scope.scope_depth));
                }
                if label.is_some() {
                    return Err(Error::SyntaxError(format!(
                        "continue label '{}' does not mark a loop",
                        label.unwrap_or_default()
                    )));
                }
            }
        }
        Err(Error::SyntaxError(match label {
            Some(name) => format!("continue label '{}' not found", name),
            None => "continue outside of a loop".to_string(),
        }))
    }

    // ========================================================================
    // Exception handlers
    // ========================================================================

    /// Registers a protected instruction range and its handler.
    pub(crate) fn add_exception_handler(
        &mut self,
        start: usize,
        end: usize,
        target: usize,
        scope_depth: usize,
    ) {
        self.code.handlers.push(HandlerEntry {
            start: start as u32,
            end: end as u32,
            target: target as u32,
            scope_depth: scope_depth as u32,
        });
    }

    /// Registers a switch jump table slot and returns its index.
    pub(crate) fn add_jump_table(&mut self, table: crate::compiler::bytecode::JumpTable) -> usize {
        self.code.jump_tables.push(table);
        self.code.jump_tables.len() - 1
    }

    pub(crate) fn jump_table_mut(
        &mut self,
        index: usize,
    ) -> &mut crate::compiler::bytecode::JumpTable {
        &mut self.code.jump_tables[index]
    }
}
