// src/runtime/vm/mod.rs
//! Executes artifacts: values, the interpreter and program lifecycle.
mod exception;
mod interpreter;
mod output;
mod program;
mod value;

pub use exception::Exception;
pub use interpreter::CallCtx;
pub use output::{CapturedOutput, Output, Stdout};
pub use program::{DEFAULT_MAX_CALL_DEPTH, Program, Runtime};
pub use value::{Instance, TaskHandle, TaskResult, Value, format_number};
