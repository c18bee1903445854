//! Backend Integration Tests
//!
//! End-to-end checks across the public surface: compiling front-end trees
//! into code blocks, and driving the heap through full collection cycles
//! the way an execution engine would.

use kestrel_backend::ast::{
    BinaryOp, CaseClause, Expression, FunctionBody, FunctionDeclaration, Statement, VariableEntry,
};
use kestrel_backend::compiler::bytecode::{JumpTable, Opcode};
use kestrel_backend::compiler::codegen::{
    CompileScopeChain, Generator, GlobalScope, ScopeDescriptor,
};
use kestrel_backend::gc::heap::{Heap, HeapConfig};
use kestrel_backend::gc::object::Payload;
use kestrel_backend::runtime::ScopeChain;
use kestrel_backend::runtime::value::Value;

fn compile_program(body: &FunctionBody) -> kestrel_backend::CodeBlock {
    let mut globals = GlobalScope::new();
    Generator::compile_program(body, &mut globals).expect("compilation should succeed")
}

// ============================================================================
// Compilation pipeline
// ============================================================================

#[test]
fn test_compile_loop_program_end_to_end() {
    // var n = 10; var sum = 0; while (0 < n) { sum = sum + n; n = n - 1; }
    let body = FunctionBody {
        variables: vec![VariableEntry::var("n"), VariableEntry::var("sum")],
        statements: vec![
            Expression::assign("n", Expression::Number(10.0)).into_statement(),
            Expression::assign("sum", Expression::Number(0.0)).into_statement(),
            Statement::While {
                condition: Expression::binary(
                    BinaryOp::Less,
                    Expression::Number(0.0),
                    Expression::ident("n"),
                ),
                body: Box::new(Statement::Block(vec![
                    Expression::assign(
                        "sum",
                        Expression::binary(
                            BinaryOp::Add,
                            Expression::ident("sum"),
                            Expression::ident("n"),
                        ),
                    )
                    .into_statement(),
                    Expression::assign(
                        "n",
                        Expression::binary(
                            BinaryOp::Sub,
                            Expression::ident("n"),
                            Expression::Number(1.0),
                        ),
                    )
                    .into_statement(),
                ])),
            },
        ],
        ..FunctionBody::new()
    };
    let code = compile_program(&body);

    let opcodes = code.opcodes();
    // The loop's exit test fused into a single compare-and-branch.
    assert!(opcodes.contains(&Opcode::JNLess));
    assert!(!opcodes.contains(&Opcode::JFalse));
    // Every word decodes; no instruction references past the stream's end.
    assert!(code.instruction_count() > 0);
    assert_eq!(opcodes.last(), Some(&Opcode::End));
}

#[test]
fn test_nested_function_pipeline() {
    // function outer(a, b) { var c; function inner() { c; } }
    let inner = FunctionDeclaration {
        name: "inner".to_string(),
        body: FunctionBody {
            statements: vec![Expression::ident("c").into_statement()],
            ..FunctionBody::new()
        },
    };
    let outer = FunctionDeclaration {
        name: "outer".to_string(),
        body: FunctionBody {
            parameters: vec!["a".to_string(), "b".to_string()],
            variables: vec![VariableEntry::var("c")],
            functions: vec![inner],
            ..FunctionBody::new()
        },
    };
    let program = FunctionBody {
        functions: vec![outer],
        ..FunctionBody::new()
    };
    let code = compile_program(&program);

    let outer_code = &code.functions[0];
    assert_eq!(outer_code.name, "outer");
    assert_eq!(outer_code.code.num_parameters, 2);

    // inner captures c through the compile-time scope model: depth 0,
    // slot 2 (after the two parameters).
    let inner_code = &outer_code.code.functions[0].code;
    let mut offset = 0;
    let mut scoped = None;
    while offset < inner_code.instructions.len() {
        let op = Opcode::from_word(inner_code.instructions[offset]).unwrap();
        if op == Opcode::GetScoped {
            scoped = Some((
                inner_code.instructions[offset + 2],
                inner_code.instructions[offset + 3],
            ));
        }
        offset += op.length();
    }
    assert_eq!(scoped, Some((0, 2)));
}

#[test]
fn test_eval_inside_function_scope() {
    let chain = CompileScopeChain::new()
        .nested(ScopeDescriptor::new().with_slot("x", 0, false));
    let body = FunctionBody {
        variables: vec![VariableEntry::var("y")],
        statements: vec![
            Expression::assign("x", Expression::Number(1.0)).into_statement(),
        ],
        ..FunctionBody::new()
    };
    let code = Generator::compile_eval(&body, &chain).unwrap();

    // Eval declares its variables at run time and addresses the enclosing
    // function's x statically.
    assert_eq!(code.declared_variables, vec!["y".to_string()]);
    assert!(code.opcodes().contains(&Opcode::PutScoped));
}

#[test]
fn test_switch_program_tables() {
    let body = FunctionBody {
        variables: vec![VariableEntry::var("kind")],
        statements: vec![Statement::Switch {
            scrutinee: Expression::Number(2.0),
            cases: vec![
                CaseClause {
                    test: Some(Expression::Number(1.0)),
                    body: vec![Statement::Break { label: None }],
                },
                CaseClause {
                    test: Some(Expression::Number(2.0)),
                    body: vec![Statement::Break { label: None }],
                },
                CaseClause {
                    test: None,
                    body: vec![],
                },
            ],
        }],
        ..FunctionBody::new()
    };
    let code = compile_program(&body);

    assert_eq!(code.jump_tables.len(), 1);
    assert!(matches!(code.jump_tables[0], JumpTable::Dense(_)));
    assert!(code.opcodes().contains(&Opcode::SwitchImm));
}

#[test]
fn test_handler_table_covers_protected_range() {
    let body = FunctionBody {
        statements: vec![Statement::Try {
            body: vec![Statement::Throw(Expression::String("boom".to_string()))],
            catch: Some(kestrel_backend::ast::CatchClause {
                parameter: "e".to_string(),
                body: vec![],
            }),
            finally: None,
        }],
        ..FunctionBody::new()
    };
    let code = compile_program(&body);

    let throw_offset = {
        let mut offset = 0;
        let mut found = None;
        while offset < code.instructions.len() {
            let op = Opcode::from_word(code.instructions[offset]).unwrap();
            if op == Opcode::Throw {
                found = Some(offset);
                break;
            }
            offset += op.length();
        }
        found.expect("throw instruction")
    };

    let handler = code
        .handler_for(throw_offset as u32)
        .expect("throw site is protected");
    assert_eq!(
        Opcode::from_word(code.instructions[handler.target as usize]),
        Some(Opcode::Catch)
    );
}

// ============================================================================
// Heap cycles driven like an execution engine
// ============================================================================

#[test]
fn test_heap_cycle_with_scope_chain_roots() {
    let mut heap = Heap::new(HeapConfig {
        block_atoms: 8,
        watermark_atoms: 8 * 128,
        cell_sizes: vec![1, 2],
    });

    let global = heap.allocate_object().unwrap();
    let with_object = heap.allocate_object().unwrap();
    let chain = ScopeChain::new(global, global).push(with_object);

    let reachable = heap.allocate_object().unwrap();
    if let Payload::Object(object) = heap.payload_mut(with_object) {
        object.set("kept", Value::Object(reachable));
    }
    for i in 0..50 {
        heap.allocate_double(i as f64).unwrap();
    }

    heap.collect(|heap| {
        let mut worklist = chain.trace_refs();
        while let Some(cell) = worklist.pop() {
            if heap.mark(cell) {
                worklist.extend(heap.payload(cell).trace_refs());
            }
        }
    });

    // Global, with-object, and the kept object survive; the doubles die.
    assert_eq!(heap.live_cells(), 3);
    if let Payload::Object(object) = heap.payload(with_object) {
        assert_eq!(object.get("kept"), Some(&Value::Object(reachable)));
    } else {
        panic!("with-object payload lost");
    }
}

#[test]
fn test_allocation_failure_then_collect_retry() {
    let mut heap = Heap::new(HeapConfig {
        block_atoms: 4,
        watermark_atoms: 8,
        cell_sizes: vec![1],
    });

    let mut held = Vec::new();
    while let Some(cell) = heap.allocate_double(0.0) {
        held.push(cell);
    }
    // The watermark is a signal, not an error: collect, then retry.
    assert!(heap.allocate_double(1.0).is_none());

    let keep = held[0];
    heap.collect(|heap| {
        heap.mark(keep);
    });

    let retried = heap.allocate_double(2.0);
    assert!(retried.is_some());
    assert!(heap.live_cells() >= 2);
}

#[test]
fn test_scope_chain_survives_shared_tail_collection() {
    let mut heap = Heap::with_defaults();
    let global = heap.allocate_object().unwrap();
    let shared = heap.allocate_object().unwrap();

    let base = ScopeChain::new(global, global).push(shared);
    let branch_a = base.push(heap.allocate_object().unwrap());
    let branch_b = base.push(heap.allocate_object().unwrap());

    heap.collect(|heap| {
        for chain in [&branch_a, &branch_b] {
            let mut worklist = chain.trace_refs();
            while let Some(cell) = worklist.pop() {
                if heap.mark(cell) {
                    worklist.extend(heap.payload(cell).trace_refs());
                }
            }
        }
    });

    // Both branches still see the shared tail after the cycle.
    assert_eq!(branch_a.pop().top(), shared);
    assert_eq!(branch_b.pop().top(), shared);
    assert_eq!(heap.live_cells(), 4);
}
