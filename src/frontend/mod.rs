// src/frontend/mod.rs
//! Source text to AST: lexing and parsing.
pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

use crate::error::CompileError;
use ast::Program;
use parser::Parser;

/// Lexes and parses one source file. Lex errors stop the pipeline before
/// parsing; parse errors are all reported together.
pub fn parse_source(source: &str, file_name: &str) -> Result<Program, Vec<CompileError>> {
    let tokens = lexer::tokenize(source).map_err(|errs| {
        errs.into_iter()
            .map(|source| CompileError::Lex {
                file: file_name.to_string(),
                source,
            })
            .collect::<Vec<_>>()
    })?;
    Parser::new(tokens, file_name)
        .parse_program()
        .map_err(|errs| errs.into_iter().map(CompileError::from).collect())
}
