// src/runtime/vm/output.rs
//! Destination for program output (`print`, `console.log`).
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

pub trait Output: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Process stdout, line-buffered through the std lock.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stdout;

impl Output for Stdout {
    fn write_line(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        // A closed stdout is not the program's failure.
        let _ = writeln!(out, "{}", line);
    }
}

/// In-memory sink, used by tests and embedders.
#[derive(Debug, Default, Clone)]
pub struct CapturedOutput {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl Output for CapturedOutput {
    fn write_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}
