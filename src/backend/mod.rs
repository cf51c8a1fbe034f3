// src/backend/mod.rs
//! Lowering of resolved programs to executable artifacts.
pub mod codegen;
