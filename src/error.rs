// src/error.rs
//! Error taxonomy for every phase of the toolchain.
//!
//! Compile-time errors are accumulated per phase and reported together.
//! Runtime failures inside user code travel as exceptions (see
//! `runtime::vm::Exception`); only the failures that escape a program
//! surface here.
use crate::frontend::token::Pos;
use crate::runtime::bus::SubscriptionId;
use thiserror::Error;

/// Malformed token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unterminated string literal")]
    UnterminatedString { pos: Pos },
    #[error("unterminated block comment")]
    UnterminatedComment { pos: Pos },
    #[error("unknown escape sequence `\\{escape}`")]
    BadEscape { escape: char, pos: Pos },
    #[error("unrecognized character `{ch}`")]
    UnexpectedChar { ch: char, pos: Pos },
}

impl LexError {
    pub fn pos(&self) -> Pos {
        match self {
            LexError::UnterminatedString { pos }
            | LexError::UnterminatedComment { pos }
            | LexError::BadEscape { pos, .. }
            | LexError::UnexpectedChar { pos, .. } => *pos,
        }
    }
}

/// Grammar violation. Recoverable: the parser keeps going after one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParseError {
    pub file: String,
    pub pos: Pos,
    pub message: String,
}

/// Resolution-phase failures, all non-fatal to the whole-program pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("`{name}` is already defined in this scope")]
    DuplicateSymbol { name: String, pos: Pos },
    #[error("cannot find `{name}` in this scope")]
    UnresolvedSymbol { name: String, pos: Pos },
    #[error("{message}")]
    TypeMismatch { message: String, pos: Pos },
}

impl ResolveError {
    pub fn pos(&self) -> Pos {
        match self {
            ResolveError::DuplicateSymbol { pos, .. }
            | ResolveError::UnresolvedSymbol { pos, .. }
            | ResolveError::TypeMismatch { pos, .. } => *pos,
        }
    }
}

/// Internal invariant violation in the code generator. Indicates a compiler bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("internal compiler error: {message}")]
pub struct CodeGenError {
    pub message: String,
    pub pos: Pos,
}

impl CodeGenError {
    pub fn new(message: impl Into<String>, pos: Pos) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

/// Any failure reported by `compile`, tagged with the file it came from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("{file}:{}: lex error: {source}", .source.pos())]
    Lex { file: String, source: LexError },
    #[error("{}:{}: parse error: {}", .0.file, .0.pos, .0)]
    Parse(ParseError),
    #[error("{file}:{}: {}: {source}", .source.pos(), resolve_kind(.source))]
    Resolve { file: String, source: ResolveError },
    #[error("{file}:{}: {source}", .source.pos)]
    CodeGen { file: String, source: CodeGenError },
}

fn resolve_kind(err: &ResolveError) -> &'static str {
    match err {
        ResolveError::DuplicateSymbol { .. } => "duplicate symbol",
        ResolveError::UnresolvedSymbol { .. } => "unresolved symbol",
        ResolveError::TypeMismatch { .. } => "type mismatch",
    }
}

impl CompileError {
    pub fn pos(&self) -> Pos {
        match self {
            CompileError::Lex { source, .. } => source.pos(),
            CompileError::Parse(err) => err.pos,
            CompileError::Resolve { source, .. } => source.pos(),
            CompileError::CodeGen { source, .. } => source.pos,
        }
    }

    pub fn file(&self) -> &str {
        match self {
            CompileError::Lex { file, .. }
            | CompileError::Resolve { file, .. }
            | CompileError::CodeGen { file, .. } => file,
            CompileError::Parse(err) => &err.file,
        }
    }
}

impl From<ParseError> for CompileError {
    fn from(err: ParseError) -> Self {
        CompileError::Parse(err)
    }
}

/// Error returned by a bus handler. The bus converts it into a fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        HandlerError(msg)
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        HandlerError(msg.to_string())
    }
}

/// A handler failed (returned an error or panicked) while the bus was
/// dispatching an event. Reported, never propagated to the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("handler #{subscription} for `{topic}` faulted: {message}")]
pub struct HandlerFaultedError {
    pub topic: String,
    pub subscription: SubscriptionId,
    pub message: String,
}

pub type HandlerFault = HandlerFaultedError;

/// Failure from an external capability collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("no capability named `{0}` is registered")]
    Unknown(String),
    #[error("capability `{capability}` is missing option `{option}`")]
    MissingOption { capability: String, option: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("capability returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed capability response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config `{path}`: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures that escape a running program.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("uncaught exception: {0}")]
    UncaughtException(String),
    #[error("program `{0}` has no entry point named `{1}`")]
    MissingEntryPoint(String, String),
    #[error("cannot load program: {0}")]
    Load(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
