// src/lib.rs
//! Synapse: an event-driven scripting language.
//!
//! `compile` runs the front-end, the resolver and the code generator over one
//! source file; `runtime::vm::Runtime` loads the resulting artifact against an
//! event bus and runs it.
pub mod backend;
pub mod config;
pub mod error;
pub mod frontend;
pub mod middle;
pub mod runtime;

pub use backend::codegen::Artifact;
pub use config::SynapseConfig;
pub use error::{CompileError, RuntimeError};
pub use runtime::vm::{Program, Runtime, Value};
pub use runtime::{Event, EventBus, Priority, Subscription};

use std::time::Instant;
use tracing::debug;

/// Compiles `source` into an executable artifact.
///
/// Errors are reported in one batch per phase: lex and parse errors stop
/// the pipeline before resolution, resolution errors before code generation.
pub fn compile(source: &str, file_name: &str) -> Result<Artifact, Vec<CompileError>> {
    let start = Instant::now();
    let mut program = frontend::parse_source(source, file_name)?;
    debug!(file = file_name, elapsed = ?start.elapsed(), items = program.items.len(), "parsed");

    let phase = Instant::now();
    middle::resolve_program(&mut program).map_err(|errs| {
        errs.into_iter()
            .map(|source| CompileError::Resolve {
                file: file_name.to_string(),
                source,
            })
            .collect::<Vec<_>>()
    })?;
    debug!(file = file_name, elapsed = ?phase.elapsed(), "resolved");

    let phase = Instant::now();
    let artifact = backend::codegen::generate(&program).map_err(|errs| {
        errs.into_iter()
            .map(|source| CompileError::CodeGen {
                file: file_name.to_string(),
                source,
            })
            .collect::<Vec<_>>()
    })?;
    debug!(
        file = file_name,
        elapsed = ?phase.elapsed(),
        total = ?start.elapsed(),
        functions = artifact.functions.len(),
        "generated"
    );
    Ok(artifact)
}

#[cfg(test)]
mod tests;
