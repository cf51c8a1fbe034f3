// src/frontend/parser/mod.rs
//! Recursive-descent parser over the token stream.
mod expr;
#[allow(clippy::module_inception)]
mod parser;
mod stmt;
mod top_level;

pub use parser::Parser;
