// src/middle/mod.rs
//! Semantic analysis: symbols, types and name resolution.
pub mod resolver;
pub mod symbols;
pub mod types;

use crate::error::ResolveError;
use crate::frontend::ast::Program;
use resolver::Resolver;

/// Runs both resolution phases, annotating `program` in place.
pub fn resolve_program(program: &mut Program) -> Result<(), Vec<ResolveError>> {
    let mut resolver = Resolver::new();
    resolver.register(program);
    resolver.resolve(program);
    resolver.finish()
}
