//! Built-in demo programs.
//!
//! The front-end parser is a separate component, so the CLI carries a few
//! hand-built trees that exercise the interesting corners of the backend:
//! fused branches, switch tables, and finally subroutines.

use kestrel_backend::ast::{
    BinaryOp, CaseClause, Expression, FunctionBody, Statement, VariableEntry,
};

/// A named demo program.
pub struct Demo {
    /// Demo name, as given on the command line
    pub name: &'static str,
    /// One-line description
    pub description: &'static str,
    /// Builds the demo's tree
    pub build: fn() -> FunctionBody,
}

/// Every built-in demo.
pub const DEMOS: &[Demo] = &[
    Demo {
        name: "countdown",
        description: "a counting loop whose exit test fuses into one branch",
        build: countdown,
    },
    Demo {
        name: "dispatch",
        description: "dense and hashed switch dispatch over small keys",
        build: dispatch,
    },
    Demo {
        name: "cleanup",
        description: "break through nested scopes with a pending finally",
        build: cleanup,
    },
];

/// Looks up a demo by name.
pub fn find(name: &str) -> Option<&'static Demo> {
    DEMOS.iter().find(|demo| demo.name == name)
}

fn countdown() -> FunctionBody {
    // var n = 10; var sum = 0;
    // while (0 < n) { sum = sum + n; n = n - 1; }
    FunctionBody {
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
            Expression::ident("sum").into_statement(),
        ],
        ..FunctionBody::new()
    }
}

fn dispatch() -> FunctionBody {
    let int_case = |key: f64, result: f64| CaseClause {
        test: Some(Expression::Number(key)),
        body: vec![
            Expression::assign("kind", Expression::Number(result)).into_statement(),
            Statement::Break { label: None },
        ],
    };
    let str_case = |key: &str, result: f64| CaseClause {
        test: Some(Expression::String(key.to_string())),
        body: vec![
            Expression::assign("kind", Expression::Number(result)).into_statement(),
            Statement::Break { label: None },
        ],
    };

    // A dense integer switch followed by a hashed string switch.
    FunctionBody {
        variables: vec![VariableEntry::var("kind")],
        statements: vec![
            Statement::Switch {
                scrutinee: Expression::Number(2.0),
                cases: vec![
                    int_case(1.0, 10.0),
                    int_case(2.0, 20.0),
                    int_case(3.0, 30.0),
                    CaseClause {
                        test: None,
                        body: vec![
                            Expression::assign("kind", Expression::Number(0.0))
                                .into_statement(),
                        ],
                    },
                ],
            },
            Statement::Switch {
                scrutinee: Expression::String("get".to_string()),
                cases: vec![str_case("get", 1.0), str_case("put", 2.0)],
            },
            Expression::ident("kind").into_statement(),
        ],
        ..FunctionBody::new()
    }
}

fn cleanup() -> FunctionBody {
    // while (true) { try { with (o) { with (p) { break; } } } finally {} }
    FunctionBody {
        variables: vec![VariableEntry::var("done")],
        statements: vec![
            Statement::While {
                condition: Expression::Boolean(true),
                body: Box::new(Statement::Try {
                    body: vec![Statement::With {
                        object: Expression::NewObject,
                        body: Box::new(Statement::With {
                            object: Expression::NewObject,
                            body: Box::new(Statement::Break { label: None }),
                        }),
                    }],
                    catch: None,
                    finally: Some(vec![
                        Expression::assign("done", Expression::Boolean(true))
                            .into_statement(),
                    ]),
                }),
            },
            Expression::ident("done").into_statement(),
        ],
        ..FunctionBody::new()
    }
}
