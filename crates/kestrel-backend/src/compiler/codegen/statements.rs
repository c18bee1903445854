//! Statement compilation.
//!
//! Control flow compiles to forward/backward jumps against labels bound at
//! statement boundaries. Jumps that leave dynamically pushed scopes or
//! pending finally blocks go through the scope-context stack, which decides
//! between a single unwind instruction and finally subroutine calls.
//!
//! | Statement         | Key operations                        |
//! |-------------------|---------------------------------------|
//! | `if`/`else`       | `JFalse` (may fuse), `Jmp`            |
//! | `while`           | `JFalse` forward, `Jmp` back          |
//! | `do-while`        | `JTrue` back                          |
//! | `for`             | test forward, update at continue point |
//! | `break`/`continue`| `JmpScopes`/`Jsr` as needed, `Jmp`    |
//! | `with`            | `PushScope`/`PopScope`                |
//! | `try`             | handler table entries, `Catch`        |
//! | `finally`         | `Jsr`/`Sret` subroutines              |
//! | `switch`          | `SwitchImm`/`SwitchHash` or a compare chain |
//! | `return`          | scope unwind, `Ret`                   |

use num_traits::ToPrimitive;

use crate::Error;
use crate::ast::{CaseClause, CatchClause, Expression, Statement};
use crate::compiler::bytecode::{
    DenseJumpTable, HashedJumpTable, JumpTable, Opcode, SwitchKey,
};
use crate::runtime::value::Value;

use super::registers::Protected;
use super::{CodeType, Generator, Label, LabelScopeKind};

/// Dense tables are only worth it while the key range stays close to the
/// case count.
const DENSE_SPAN_FACTOR: i64 = 2;

enum SwitchPlan {
    Dense { min: i32, max: i32 },
    Hashed,
    Sequential,
}

impl Generator {
    /// Compiles one statement.
    pub(crate) fn emit_statement(&mut self, statement: &Statement) -> Result<(), Error> {
        if !self.enter_nested() {
            return Ok(());
        }
        let result = self.emit_statement_inner(statement);
        self.leave_nested();
        result
    }

    fn emit_statement_inner(&mut self, statement: &Statement) -> Result<(), Error> {
        match statement {
            Statement::Expression(expression) => {
                let completion = self.completion_register();
                self.emit_expression(expression, completion)?;
                Ok(())
            }

            Statement::Block(statements) => {
                for statement in statements {
                    self.emit_statement(statement)?;
                }
                Ok(())
            }

            Statement::If {
                condition,
                consequent,
                alternate,
            } => {
                let cond = self.emit_expression(condition, None)?;
                match alternate {
                    None => {
                        let end = self.new_label();
                        self.emit_jump_if_false(&cond, end);
                        self.emit_statement(consequent)?;
                        self.bind_label(end);
                    }
                    Some(alternate) => {
                        let else_label = self.new_label();
                        let end = self.new_label();
                        self.emit_jump_if_false(&cond, else_label);
                        self.emit_statement(consequent)?;
                        self.emit_jump(end);
                        self.bind_label(else_label);
                        self.emit_statement(alternate)?;
                        self.bind_label(end);
                    }
                }
                Ok(())
            }

            Statement::While { condition, body } => {
                let name = self.pending_label.take();
                let break_target = self.new_label();
                let continue_target = self.new_label();
                self.push_label_scope(
                    LabelScopeKind::Loop,
                    name,
                    break_target,
                    Some(continue_target),
                );

                self.bind_label(continue_target);
                let cond = self.emit_expression(condition, None)?;
                self.emit_jump_if_false(&cond, break_target);
                self.emit_statement(body)?;
                self.emit_jump(continue_target);

                self.bind_label(break_target);
                self.pop_label_scope();
                Ok(())
            }

            Statement::DoWhile { body, condition } => {
                let name = self.pending_label.take();
                let top = self.new_label();
                let break_target = self.new_label();
                let continue_target = self.new_label();
                self.push_label_scope(
                    LabelScopeKind::Loop,
                    name,
                    break_target,
                    Some(continue_target),
                );

                self.bind_label(top);
                self.emit_statement(body)?;
                self.bind_label(continue_target);
                let cond = self.emit_expression(condition, None)?;
                self.emit_jump_if_true(&cond, top);

                self.bind_label(break_target);
                self.pop_label_scope();
                Ok(())
            }

            Statement::For {
                init,
                condition,
                update,
                body,
            } => {
                let name = self.pending_label.take();
                if let Some(init) = init {
                    self.emit_expression(init, None)?;
                }

                let top = self.new_label();
                let break_target = self.new_label();
                let continue_target = self.new_label();
                self.push_label_scope(
                    LabelScopeKind::Loop,
                    name,
                    break_target,
                    Some(continue_target),
                );

                self.bind_label(top);
                if let Some(condition) = condition {
                    let cond = self.emit_expression(condition, None)?;
                    self.emit_jump_if_false(&cond, break_target);
                }
                self.emit_statement(body)?;
                self.bind_label(continue_target);
                if let Some(update) = update {
                    self.emit_expression(update, None)?;
                }
                self.emit_jump(top);

                self.bind_label(break_target);
                self.pop_label_scope();
                Ok(())
            }

            Statement::Break { label } => {
                let (target, depth) = self.break_scope(label.as_deref())?;
                self.emit_jump_scopes(target, depth);
                Ok(())
            }

            Statement::Continue { label } => {
                let (target, depth) = self.continue_scope(label.as_deref())?;
                self.emit_jump_scopes(target, depth);
                Ok(())
            }

            Statement::Return(argument) => {
                if self.code_type != CodeType::Function {
                    return Err(Error::SyntaxError(
                        "return outside of function".to_string(),
                    ));
                }
                let result = match argument {
                    Some(expression) => {
                        Protected::new(self.emit_expression(expression, None)?)
                    }
                    None => {
                        let register = self.new_temporary();
                        self.emit_load_constant(&register, Value::Undefined);
                        Protected::new(register)
                    }
                };
                if self.scope_depth() > 0 {
                    // Interposed finally blocks and dynamic scopes must
                    // unwind before control leaves the function.
                    let past = self.new_label();
                    self.emit_jump_scopes(past, 0);
                    self.bind_label(past);
                }
                self.emit(Opcode::Ret, &[result.index()]);
                Ok(())
            }

            Statement::Throw(expression) => {
                let value = self.emit_expression(expression, None)?;
                self.emit(Opcode::Throw, &[value.index()]);
                Ok(())
            }

            Statement::Try {
                body,
                catch,
                finally,
            } => self.emit_try(body, catch.as_ref(), finally.as_deref()),

            Statement::Switch { scrutinee, cases } => self.emit_switch(scrutinee, cases),

            Statement::With { object, body } => {
                let scope_object = self.emit_expression(object, None)?;
                self.emit_push_scope(&scope_object);
                self.emit_statement(body)?;
                self.emit_pop_scope();
                Ok(())
            }

            Statement::Labeled { label, body } => {
                if matches!(
                    **body,
                    Statement::While { .. } | Statement::DoWhile { .. } | Statement::For { .. }
                ) {
                    // The loop claims the label so labeled continue works.
                    self.pending_label = Some(label.clone());
                    self.emit_statement(body)
                } else {
                    let break_target = self.new_label();
                    self.push_label_scope(
                        LabelScopeKind::Named,
                        Some(label.clone()),
                        break_target,
                        None,
                    );
                    let result = self.emit_statement(body);
                    self.pop_label_scope();
                    self.bind_label(break_target);
                    result
                }
            }

            Statement::Empty => Ok(()),
        }
    }

    fn emit_try(
        &mut self,
        body: &[Statement],
        catch: Option<&CatchClause>,
        finally: Option<&[Statement]>,
    ) -> Result<(), Error> {
        let finally_state = finally.map(|_| {
            let target = self.new_label();
            let ret_addr = self.new_temporary();
            ret_addr.retain();
            self.push_finally_context(target, ret_addr.clone());
            (target, ret_addr)
        });

        let try_start = self.offset();
        let handler_depth = self.dynamic_scope_depth;

        if let Some(catch_clause) = catch {
            for statement in body {
                self.emit_statement(statement)?;
            }
            let try_end = self.offset();

            let after_catch = self.new_label();
            self.emit_jump(after_catch);

            let handler_offset = self.offset();
            self.add_exception_handler(try_start, try_end, handler_offset, handler_depth);

            // The caught value is bound in a fresh scope object pushed for
            // the handler's duration.
            let exception = Protected::new(self.new_temporary());
            self.emit(Opcode::Catch, &[exception.index()]);
            let scope_object = Protected::new(self.new_temporary());
            self.emit(Opcode::NewObject, &[scope_object.index()]);
            let parameter = self.string_constant(&catch_clause.parameter);
            self.emit(
                Opcode::PutById,
                &[scope_object.index(), parameter, exception.index()],
            );
            self.emit_push_scope(scope_object.get());
            for statement in &catch_clause.body {
                self.emit_statement(statement)?;
            }
            self.emit_pop_scope();
            self.bind_label(after_catch);
        } else {
            for statement in body {
                self.emit_statement(statement)?;
            }
        }

        if let Some((finally_target, ret_addr)) = finally_state {
            let finally_stmts = finally.expect("finally body");
            let protected_end = self.offset();
            self.pop_finally_context();

            // Normal completion calls the finally block as a subroutine.
            self.emit_with_jump(Opcode::Jsr, &mut [ret_addr.index(), 0], finally_target);
            let end = self.new_label();
            self.emit_jump(end);

            // A throw in the protected range runs it too, then rethrows.
            let rethrow = self.offset();
            self.add_exception_handler(try_start, protected_end, rethrow, handler_depth);
            let exception = Protected::new(self.new_temporary());
            self.emit(Opcode::Catch, &[exception.index()]);
            self.emit_with_jump(Opcode::Jsr, &mut [ret_addr.index(), 0], finally_target);
            self.emit(Opcode::Throw, &[exception.index()]);

            self.bind_label(finally_target);
            for statement in finally_stmts {
                self.emit_statement(statement)?;
            }
            self.emit(Opcode::Sret, &[ret_addr.index()]);
            self.bind_label(end);

            ret_addr.release();
        }

        Ok(())
    }

    /// Extracts the literal key of a case test, if it has one.
    fn case_key(test: &Expression) -> Option<SwitchKey> {
        match test {
            Expression::Number(n) => {
                if n.fract() == 0.0 && *n >= i32::MIN as f64 && *n <= i32::MAX as f64 {
                    Some(SwitchKey::Int(*n as i32))
                } else {
                    None
                }
            }
            Expression::BigInt(i) => i.to_i32().map(SwitchKey::Int),
            Expression::String(s) => Some(SwitchKey::Str(s.clone())),
            _ => None,
        }
    }

    fn classify_switch(cases: &[CaseClause]) -> SwitchPlan {
        let mut ints: Vec<i32> = Vec::new();
        let mut strings = 0usize;
        let mut keyed = 0usize;

        for case in cases {
            let Some(test) = &case.test else { continue };
            keyed += 1;
            match Self::case_key(test) {
                Some(SwitchKey::Int(key)) => ints.push(key),
                Some(SwitchKey::Str(_)) => strings += 1,
                None => return SwitchPlan::Sequential,
            }
        }

        if keyed == 0 {
            return SwitchPlan::Sequential;
        }
        if strings == keyed {
            return SwitchPlan::Hashed;
        }
        if ints.len() != keyed {
            // Mixed key kinds defeat table dispatch.
            return SwitchPlan::Sequential;
        }

        let min = *ints.iter().min().expect("non-empty");
        let max = *ints.iter().max().expect("non-empty");
        let span = max as i64 - min as i64 + 1;
        if span <= ints.len() as i64 * DENSE_SPAN_FACTOR + 2 {
            SwitchPlan::Dense { min, max }
        } else {
            SwitchPlan::Hashed
        }
    }

    fn emit_switch(&mut self, scrutinee: &Expression, cases: &[CaseClause]) -> Result<(), Error> {
        let scrutinee_reg = Protected::new(self.emit_expression(scrutinee, None)?);

        let break_target = self.new_label();
        self.push_label_scope(LabelScopeKind::Switch, None, break_target, None);

        let default_label = self.new_label();
        let plan = Self::classify_switch(cases);

        let result = match plan {
            SwitchPlan::Sequential => {
                self.emit_switch_sequential(&scrutinee_reg, cases, default_label)
            }
            plan => self.emit_switch_table(&scrutinee_reg, cases, plan, default_label),
        };

        self.bind_label(break_target);
        self.pop_label_scope();
        drop(scrutinee_reg);
        result
    }

    /// Table dispatch: one switch instruction, case bodies in source order,
    /// and the jump table filled in only after every case label is bound.
    fn emit_switch_table(
        &mut self,
        scrutinee: &Protected,
        cases: &[CaseClause],
        plan: SwitchPlan,
        default_label: Label,
    ) -> Result<(), Error> {
        let (opcode, placeholder) = match plan {
            SwitchPlan::Dense { .. } => (
                Opcode::SwitchImm,
                JumpTable::Dense(DenseJumpTable::default()),
            ),
            _ => (
                Opcode::SwitchHash,
                JumpTable::Hashed(HashedJumpTable::default()),
            ),
        };
        let table_index = self.add_jump_table(placeholder);

        let switch_offset = self.emit_with_jump(
            opcode,
            &mut [table_index as i32, 0, scrutinee.index()],
            default_label,
        );

        let mut bound_cases: Vec<(SwitchKey, Label)> = Vec::new();
        let mut saw_default = false;
        for case in cases {
            match &case.test {
                Some(test) => {
                    let key = Self::case_key(test).expect("classified as table-dispatchable");
                    let label = self.new_label();
                    self.bind_label(label);
                    bound_cases.push((key, label));
                }
                None => {
                    saw_default = true;
                    self.bind_label(default_label);
                }
            }
            for statement in &case.body {
                self.emit_statement(statement)?;
            }
        }
        if !saw_default {
            self.bind_label(default_label);
        }

        // Table construction is the last step: every referenced label is
        // bound by now, and entries are deltas from the switch instruction.
        let table = match plan {
            SwitchPlan::Dense { min, max } => {
                let span = (max as i64 - min as i64 + 1) as usize;
                let mut dense = DenseJumpTable {
                    min,
                    branch_offsets: vec![0; span],
                };
                for (key, label) in &bound_cases {
                    let SwitchKey::Int(key) = key else { unreachable!() };
                    let slot = (key - min) as usize;
                    if dense.branch_offsets[slot] == 0 {
                        let location = self.label_offset(*label).expect("case label bound");
                        dense.branch_offsets[slot] =
                            (location as i64 - switch_offset as i64) as i32;
                    }
                }
                JumpTable::Dense(dense)
            }
            _ => {
                let mut hashed = HashedJumpTable::default();
                for (key, label) in bound_cases {
                    let location = self.label_offset(label).expect("case label bound");
                    hashed
                        .branch_offsets
                        .entry(key)
                        .or_insert((location as i64 - switch_offset as i64) as i32);
                }
                JumpTable::Hashed(hashed)
            }
        };
        *self.jump_table_mut(table_index) = table;

        Ok(())
    }

    /// Fallback dispatch for non-literal or mixed-key switches: a strict
    /// equality compare chain, then the bodies.
    fn emit_switch_sequential(
        &mut self,
        scrutinee: &Protected,
        cases: &[CaseClause],
        default_label: Label,
    ) -> Result<(), Error> {
        let mut case_labels: Vec<Option<Label>> = Vec::with_capacity(cases.len());

        for case in cases {
            match &case.test {
                Some(test) => {
                    let label = self.new_label();
                    let test_reg = self.emit_expression(test, None)?;
                    let compared = self.new_temporary();
                    self.emit(
                        Opcode::StrictEq,
                        &[compared.index(), scrutinee.index(), test_reg.index()],
                    );
                    self.emit_jump_if_true(&compared, label);
                    case_labels.push(Some(label));
                }
                None => case_labels.push(None),
            }
        }
        self.emit_jump(default_label);

        let mut saw_default = false;
        for (case, label) in cases.iter().zip(case_labels) {
            match label {
                Some(label) => self.bind_label(label),
                None => {
                    saw_default = true;
                    self.bind_label(default_label);
                }
            }
            for statement in &case.body {
                self.emit_statement(statement)?;
            }
        }
        if !saw_default {
            self.bind_label(default_label);
        }

        Ok(())
    }
}
