//! Expression compilation.
//!
//! Every expression is compiled into a destination register: the one the
//! caller asked for, a reusable dead temporary, or a fresh temporary.
//! Identifier reads that resolve to a register produce no code at all —
//! the register itself is the result.
//!
//! | Expression  | Key operations            | Notes                        |
//! |-------------|---------------------------|------------------------------|
//! | Literal     | `LoadConst`               | Pool-deduplicated            |
//! | Identifier  | none / `GetScoped` / `ResolveDynamic` | Three-tier resolution |
//! | Unary       | `Negate`/`Not`            |                              |
//! | Binary      | `Add`..`GreaterEq`        | Comparisons may fuse later   |
//! | Logical     | `JFalse`/`JTrue`          | Short-circuit via branches   |
//! | Conditional | `JFalse`, `Jmp`           |                              |
//! | Assignment  | `Mov`/`PutScoped`/`PutDynamic`/`PutById` | Result is the value |
//! | Member      | `GetById`                 |                              |
//! | Call        | `Call`                    | Arguments in consecutive registers |
//! | NewObject   | `NewObject`               |                              |

use crate::Error;
use crate::ast::{AssignTarget, BinaryOp, Expression, UnaryOp};
use crate::compiler::bytecode::Opcode;
use crate::runtime::value::Value;

use super::registers::{Protected, RegisterRef};
use super::{Generator, Resolution};

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::NotEq => Opcode::NotEq,
        BinaryOp::StrictEq => Opcode::StrictEq,
        BinaryOp::StrictNotEq => Opcode::StrictNotEq,
        BinaryOp::Less => Opcode::Less,
        BinaryOp::LessEq => Opcode::LessEq,
        BinaryOp::Greater => Opcode::Greater,
        BinaryOp::GreaterEq => Opcode::GreaterEq,
    }
}

impl Generator {
    /// Compiles `expression`, returning the register holding its result.
    ///
    /// Past the depth guard, compilation degrades: the tree is no longer
    /// descended and a synthetic ignored register stands in so emission
    /// stays well formed until the condition surfaces from `finish`.
    pub(crate) fn emit_expression(
        &mut self,
        expression: &Expression,
        dst: Option<RegisterRef>,
    ) -> Result<RegisterRef, Error> {
        if !self.enter_nested() {
            return Ok(self.ignored_result());
        }
        let result = self.emit_expression_inner(expression, dst);
        self.leave_nested();
        result
    }

    fn emit_expression_inner(
        &mut self,
        expression: &Expression,
        dst: Option<RegisterRef>,
    ) -> Result<RegisterRef, Error> {
        match expression {
            Expression::Undefined => self.emit_literal(Value::Undefined, dst),
            Expression::Null => self.emit_literal(Value::Null, dst),
            Expression::Boolean(b) => self.emit_literal(Value::Boolean(*b), dst),
            Expression::Number(n) => self.emit_literal(Value::Number(*n), dst),
            Expression::String(s) => self.emit_literal(Value::String(s.clone()), dst),
            Expression::BigInt(i) => self.emit_literal(Value::BigInt(i.clone()), dst),

            Expression::Identifier(name) => self.emit_get_variable(name, dst),

            Expression::Unary { op, operand } => {
                let src = self.emit_expression(operand, None)?;
                let dst = self.final_destination(dst, Some(&src));
                let opcode = match op {
                    UnaryOp::Negate => Opcode::Negate,
                    UnaryOp::Not => Opcode::Not,
                };
                self.emit(opcode, &[dst.index(), src.index()]);
                Ok(dst)
            }

            Expression::Binary { op, left, right } => {
                let lhs = Protected::new(self.emit_expression(left, None)?);
                let rhs = self.emit_expression(right, None)?;
                let dst = self.final_destination(dst, Some(&rhs));
                self.emit(
                    binary_opcode(*op),
                    &[dst.index(), lhs.index(), rhs.index()],
                );
                Ok(dst)
            }

            Expression::Logical { op, left, right } => {
                let dst = match dst {
                    Some(register) => register,
                    None => self.new_temporary(),
                };
                let guard = Protected::new(dst.clone());
                self.emit_expression(left, Some(dst.clone()))?;

                let end = self.new_label();
                match op {
                    crate::ast::LogicalOp::And => self.emit_jump_if_false(&dst, end),
                    crate::ast::LogicalOp::Or => self.emit_jump_if_true(&dst, end),
                }
                self.emit_expression(right, Some(dst.clone()))?;
                self.bind_label(end);

                drop(guard);
                Ok(dst)
            }

            Expression::Conditional {
                condition,
                consequent,
                alternate,
            } => {
                let dst = match dst {
                    Some(register) => register,
                    None => self.new_temporary(),
                };
                let guard = Protected::new(dst.clone());

                let cond = self.emit_expression(condition, None)?;
                let else_label = self.new_label();
                let end = self.new_label();
                self.emit_jump_if_false(&cond, else_label);
                self.emit_expression(consequent, Some(dst.clone()))?;
                self.emit_jump(end);
                self.bind_label(else_label);
                self.emit_expression(alternate, Some(dst.clone()))?;
                self.bind_label(end);

                drop(guard);
                Ok(dst)
            }

            Expression::Assign { target, value } => self.emit_assignment(target, value, dst),

            Expression::Member { object, property } => {
                let base = self.emit_expression(object, None)?;
                let name = self.string_constant(property);
                let dst = self.final_destination(dst, Some(&base));
                self.emit(Opcode::GetById, &[dst.index(), base.index(), name]);
                Ok(dst)
            }

            Expression::Call { callee, arguments } => {
                let callee_reg = Protected::new(self.emit_expression(callee, None)?);

                // Arguments go in consecutive registers, claimed up front so
                // nested evaluation cannot interleave the pool.
                let arg_registers: Vec<Protected> = (0..arguments.len())
                    .map(|_| Protected::new(self.new_temporary()))
                    .collect();
                for (register, argument) in arg_registers.iter().zip(arguments) {
                    self.emit_expression(argument, Some(register.get().clone()))?;
                }

                let first_arg = arg_registers.first().map(|r| r.index()).unwrap_or(0);
                let argc = arg_registers.len() as i32;
                let dst = self.final_destination(dst, None);
                self.emit(
                    Opcode::Call,
                    &[dst.index(), callee_reg.index(), first_arg, argc],
                );
                Ok(dst)
            }

            Expression::NewObject => {
                let dst = self.final_destination(dst, None);
                self.emit(Opcode::NewObject, &[dst.index()]);
                Ok(dst)
            }
        }
    }

    fn emit_literal(
        &mut self,
        value: Value,
        dst: Option<RegisterRef>,
    ) -> Result<RegisterRef, Error> {
        let dst = self.final_destination(dst, None);
        self.emit_load_constant(&dst, value);
        Ok(dst)
    }

    /// Compiles an identifier read per the three-tier resolution.
    ///
    /// Reads bound to a register are free when no destination is forced:
    /// the register itself is returned.
    pub(crate) fn emit_get_variable(
        &mut self,
        name: &str,
        dst: Option<RegisterRef>,
    ) -> Result<RegisterRef, Error> {
        match self.resolve(name) {
            Resolution::Register(entry) => match dst {
                Some(register) => {
                    self.emit(Opcode::Mov, &[register.index(), entry.register.index()]);
                    Ok(register)
                }
                None => Ok(entry.register),
            },
            Resolution::Scoped { depth, slot, .. } => {
                let dst = self.final_destination(dst, None);
                self.emit(
                    Opcode::GetScoped,
                    &[dst.index(), depth as i32, slot as i32],
                );
                Ok(dst)
            }
            Resolution::Dynamic => {
                let name = self.string_constant(name);
                let dst = self.final_destination(dst, None);
                self.emit(Opcode::ResolveDynamic, &[dst.index(), name]);
                Ok(dst)
            }
        }
    }

    fn emit_assignment(
        &mut self,
        target: &AssignTarget,
        value: &Expression,
        dst: Option<RegisterRef>,
    ) -> Result<RegisterRef, Error> {
        match target {
            AssignTarget::Identifier(name) => match self.resolve(name) {
                Resolution::Register(entry) => {
                    if entry.read_only {
                        // Writes through a const binding are dropped; the
                        // value is still evaluated and is the result.
                        return self.emit_expression(value, dst);
                    }
                    let local = entry.register;
                    self.emit_expression(value, Some(local.clone()))?;
                    match dst {
                        Some(register) => {
                            self.emit(Opcode::Mov, &[register.index(), local.index()]);
                            Ok(register)
                        }
                        None => Ok(local),
                    }
                }
                Resolution::Scoped {
                    depth,
                    slot,
                    read_only,
                } => {
                    let result = self.emit_expression(value, dst)?;
                    if !read_only {
                        self.emit(
                            Opcode::PutScoped,
                            &[depth as i32, slot as i32, result.index()],
                        );
                    }
                    Ok(result)
                }
                Resolution::Dynamic => {
                    let result = self.emit_expression(value, dst)?;
                    let name = self.string_constant(name);
                    self.emit(Opcode::PutDynamic, &[name, result.index()]);
                    Ok(result)
                }
            },
            AssignTarget::Member { object, property } => {
                let base = Protected::new(self.emit_expression(object, None)?);
                let result = self.emit_expression(value, dst)?;
                let name = self.string_constant(property);
                self.emit(
                    Opcode::PutById,
                    &[base.index(), name, result.index()],
                );
                Ok(result)
            }
        }
    }
}
