// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! nwsc CLI: compile and disassemble NWScript through the resource-aware
//! driver.
//!
//! ```bash
//! # Compile one script against a module's resources
//! nwsc -m mymodule -h ~/Documents/NWN2 -n /opt/nwn2 myscript.nss
//!
//! # Batch-compile a directory, keep going past errors
//! nwsc -y -b out module_src/*.nss
//!
//! # Arguments from a response file
//! nwsc @build-args.rsp
//! ```
//!
//! The NWScript front-end and the bytecode analyzer are separate
//! components; this binary hosts whichever implementations are linked in
//! through [`nwsc::compiler::ScriptCompiler`] and
//! [`nwsc::compiler::BytecodeAnalyzer`].

use clap::Parser;

use nwsc::compiler::{expand_response_files, BytecodeAnalyzer, DriverSession, ScriptCompiler};
use nwsc::diag::ConsoleTextOut;

mod cli;
use cli::Cli;

/// The front-end linked into this build, if any.
///
/// The reference front-end ships as its own crate; builds without one can
/// still drive the resource manager and the container codecs through the
/// library API.
fn linked_frontend() -> Option<Box<dyn ScriptCompiler>> {
    None
}

/// The analyzer linked into this build, if any.
fn linked_analyzer() -> Option<Box<dyn BytecodeAnalyzer>> {
    None
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = match expand_response_files(args) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    };

    let cli = match Cli::try_parse_from(std::iter::once("nwsc".to_string()).chain(args)) {
        Ok(cli) => cli,
        Err(err) => err.exit(),
    };

    let quiet = cli.quiet;
    if !quiet {
        println!(
            "nwsc {} - NWScript compiler toolchain",
            env!("CARGO_PKG_VERSION")
        );
    }

    let options = match cli.into_driver_options() {
        Ok(options) => options,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    };
    let compile_mode = options.compile;

    let text_out = ConsoleTextOut::new().into_shared();
    let mut session = match DriverSession::new(options, text_out) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    };

    let mut frontend = linked_frontend();
    let mut analyzer = linked_analyzer();
    // Both modes need the front-end (disassembly walks its intrinsic
    // table); disassembly additionally needs the analyzer.
    if frontend.is_none() {
        eprintln!(
            "Error: no NWScript front-end is linked into this build; \
             drive the session through the library API with a ScriptCompiler implementation."
        );
        std::process::exit(1);
    }
    if !compile_mode && analyzer.is_none() {
        eprintln!(
            "Error: no bytecode analyzer is linked into this build; \
             disassembly needs a BytecodeAnalyzer implementation."
        );
        std::process::exit(1);
    }

    let Some(frontend_ref) = frontend.as_deref_mut() else {
        unreachable!("checked above");
    };

    match session.run(frontend_ref, analyzer.as_deref_mut()) {
        Ok(summary) => {
            if !quiet {
                println!(
                    "Compiled {} file(s), {} include-only, {} error(s).",
                    summary.compiled, summary.include_only, summary.errors
                );
            }
            std::process::exit(if summary.errors == 0 { 0 } else { 1 });
        }
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    }
}
