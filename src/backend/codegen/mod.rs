// src/backend/codegen/mod.rs
//! Bytecode generation: instruction set, artifact format and the lowering pass.
pub mod artifact;
#[allow(clippy::module_inception)]
mod codegen;
pub mod ops;

pub use artifact::{Artifact, ClassDescriptor, Constant, FunctionEntry, HandlerEntry, NativeRef, ServiceDescriptor};
pub use codegen::{Declarations, generate};
pub use ops::Op;
