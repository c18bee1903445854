// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Kestrel Project Developers

//! Kestrel - backend inspection CLI
//!
//! The parser front end lives elsewhere; this binary compiles the built-in
//! demo trees through the backend and shows what comes out: disassembled
//! bytecode, constant pools, handler tables, and a heap collection report.

mod demos;

use owo_colors::OwoColorize;
use std::env;
use std::process::ExitCode;

use kestrel_backend::compiler::codegen::{Generator, GlobalScope};
use kestrel_backend::gc::heap::{Heap, HeapConfig};
use kestrel_backend::gc::object::Payload;
use kestrel_backend::runtime::ScopeChain;
use kestrel_backend::runtime::value::Value;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    match args.len() {
        1 => {
            print_help();
            ExitCode::SUCCESS
        }
        _ => {
            let arg = &args[1];
            match arg.as_str() {
                "-h" | "--help" => {
                    print_help();
                    ExitCode::SUCCESS
                }
                "-v" | "--version" => {
                    print_version();
                    ExitCode::SUCCESS
                }
                "list" => {
                    list_demos();
                    ExitCode::SUCCESS
                }
                "heap" => heap_report(),
                "dump" => {
                    if args.len() < 3 {
                        eprintln!(
                            "{}: {} requires a demo name",
                            "Error".red().bold(),
                            "dump".cyan()
                        );
                        ExitCode::FAILURE
                    } else {
                        dump_demo(&args[2])
                    }
                }
                _ if arg.starts_with('-') => {
                    eprintln!("{}: unknown option '{}'", "Error".red().bold(), arg.cyan());
                    eprintln!("Use {} for usage information", "--help".cyan());
                    ExitCode::FAILURE
                }
                name => dump_demo(name),
            }
        }
    }
}

fn print_help() {
    println!("{} - backend inspection CLI", "kestrel".green().bold());
    println!();
    println!("{}", "USAGE:".yellow().bold());
    println!("    kestrel list              list the built-in demos");
    println!("    kestrel dump <demo>       compile a demo and disassemble it");
    println!("    kestrel <demo>            shorthand for dump");
    println!("    kestrel heap              run a heap allocate/collect report");
    println!();
    println!("{}", "OPTIONS:".yellow().bold());
    println!("    -h, --help                print this help");
    println!("    -v, --version             print the version");
}

fn print_version() {
    println!("kestrel {}", env!("CARGO_PKG_VERSION"));
}

fn list_demos() {
    println!("{}", "Built-in demos:".green().bold());
    for demo in demos::DEMOS {
        println!("    {:<12} {}", demo.name.cyan(), demo.description);
    }
}

fn dump_demo(name: &str) -> ExitCode {
    let Some(demo) = demos::find(name) else {
        eprintln!("{}: unknown demo '{}'", "Error".red().bold(), name.cyan());
        eprintln!("Use {} to see what is available", "kestrel list".cyan());
        return ExitCode::FAILURE;
    };

    let body = (demo.build)();
    let mut globals = GlobalScope::new();
    match Generator::compile_program(&body, &mut globals) {
        Ok(code) => {
            println!(
                "{} {} ({} registers, {} constants)",
                "Compiled".green().bold(),
                demo.name.cyan(),
                code.num_registers,
                code.constants.len()
            );
            print!("{}", code.disassemble());
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("{}: {}", "Error".red().bold(), error);
            ExitCode::FAILURE
        }
    }
}

/// Allocates a small object graph, drops most of it, and walks one
/// collection cycle with the scope chain as the root set.
fn heap_report() -> ExitCode {
    let mut heap = Heap::new(HeapConfig {
        block_atoms: 64,
        watermark_atoms: 64 * 64,
        cell_sizes: vec![1, 2],
    });

    let Some(global) = heap.allocate_object() else {
        eprintln!("{}: heap exhausted during bootstrap", "Error".red().bold());
        return ExitCode::FAILURE;
    };
    let chain = ScopeChain::new(global, global);

    // One reachable object hangs off the global, plus a pile of garbage.
    let keep = heap.allocate_object().expect("heap capacity");
    if let Payload::Object(object) = heap.payload_mut(global) {
        object.set("keep", Value::Object(keep));
    }
    for i in 0..200 {
        heap.allocate_double(i as f64).expect("heap capacity");
    }

    println!(
        "{} {} live cells, {} cell capacity before collection",
        "Heap:".green().bold(),
        heap.live_cells(),
        heap.capacity_cells()
    );

    heap.collect(|heap| {
        let mut worklist = chain.trace_refs();
        while let Some(cell) = worklist.pop() {
            if heap.mark(cell) {
                worklist.extend(heap.payload(cell).trace_refs());
            }
        }
    });

    println!(
        "{} {} live cells, {} cell capacity after collection",
        "Heap:".green().bold(),
        heap.live_cells(),
        heap.capacity_cells()
    );
    ExitCode::SUCCESS
}
