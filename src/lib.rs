//! # LIA — Compiler for a Class-Based Language Targeting CIL Assembly
//!
//! LIA is a small statically typed language. This crate turns LIA source
//! into CIL-like assembly text for an external IL assembler.
//!
//! ## Architecture
//! Source → Lexer → Parser → AST → Compiler → Registry → Emit → `.il` text
//!
//! ## Key Features
//! - Precedence-climbing recursive-descent parser, no error recovery.
//! - Operators dispatch through per-class operator-method tables; the
//!   built-in numeric classes are seeded with inline templates.
//! - Exact `.maxstack` bookkeeping over explicitly linked segments.
//! - `FxHashMap` for registry lookups, `memchr` in the lexer.
//! - In-source `#:directive>bool` comments override [`CompileOptions`].

pub mod assembler;
pub mod ast;
pub mod builtin;
pub mod compiler;
pub mod emit;
pub mod error;
pub mod lexer;
pub mod opcode;
pub mod options;
pub mod parser;
pub mod token;
pub mod types;

pub use error::{CompileError, CompileResult, Diagnostic, DiagnosticSink};
pub use options::CompileOptions;

use compiler::Compiler;
use lexer::Lexer;
use parser::Parser;
use token::Token;

/// Output of [`compile_source`].
#[derive(Debug, Clone)]
pub struct Compilation {
    /// Rendered assembly text.
    pub il: String,
    pub tokens: Vec<Token>,
    pub main_defined: bool,
}

/// Runs the whole pipeline over one source file. Warnings go to `sink`;
/// the first error stops compilation.
///
/// In-source directives are applied to `options` before parsing, so the
/// caller sees them even when compilation fails.
pub fn compile_source(
    source: &str,
    options: &mut CompileOptions,
    sink: &mut dyn DiagnosticSink,
) -> CompileResult<Compilation> {
    let mut lexer = Lexer::new(source);
    let tokens = lexer.tokenize();
    options.apply_all(lexer.directives());
    let tokens = tokens?;

    let items = Parser::new(tokens.clone()).parse()?;
    let program = Compiler::new(options, sink).compile(&items)?;
    let il = emit::render(&program, &options.assembly_name);

    Ok(Compilation {
        il,
        tokens,
        main_defined: program.main_defined,
    })
}

#[cfg(test)]
mod tests;
