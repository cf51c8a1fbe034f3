// src/frontend/token.rs
//! Token model produced by the lexer and consumed once by the parser.
use serde::{Deserialize, Serialize};
use std::fmt;

/// One-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

impl Pos {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Reserved words of the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Class,
    Interface,
    Extends,
    Implements,
    Constructor,
    Public,
    Private,
    Protected,
    Try,
    Catch,
    Throw,
    New,
    Null,
    True,
    False,
    On,
    Emit,
    Import,
    Uses,
    From,
    Async,
    Function,
    Var,
    If,
    Else,
    While,
    For,
    In,
    Return,
    Await,
    Parallel,
    This,
}

impl Keyword {
    pub fn from_ident(word: &str) -> Option<Self> {
        let kw = match word {
            "class" => Keyword::Class,
            "interface" => Keyword::Interface,
            "extends" => Keyword::Extends,
            "implements" => Keyword::Implements,
            "constructor" => Keyword::Constructor,
            "public" => Keyword::Public,
            "private" => Keyword::Private,
            "protected" => Keyword::Protected,
            "try" => Keyword::Try,
            "catch" => Keyword::Catch,
            "throw" => Keyword::Throw,
            "new" => Keyword::New,
            "null" => Keyword::Null,
            "true" => Keyword::True,
            "false" => Keyword::False,
            "on" => Keyword::On,
            "emit" => Keyword::Emit,
            "import" => Keyword::Import,
            "uses" => Keyword::Uses,
            "from" => Keyword::From,
            "async" => Keyword::Async,
            "function" => Keyword::Function,
            "var" => Keyword::Var,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "for" => Keyword::For,
            "in" => Keyword::In,
            "return" => Keyword::Return,
            "await" => Keyword::Await,
            "parallel" => Keyword::Parallel,
            "this" => Keyword::This,
            _ => return None,
        };
        Some(kw)
    }
}

/// Operators and punctuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,
    At,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
}

impl Punct {
    pub fn as_str(self) -> &'static str {
        match self {
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::LBrace => "{",
            Punct::RBrace => "}",
            Punct::LBracket => "[",
            Punct::RBracket => "]",
            Punct::Comma => ",",
            Punct::Semi => ";",
            Punct::Colon => ":",
            Punct::Dot => ".",
            Punct::At => "@",
            Punct::Plus => "+",
            Punct::Minus => "-",
            Punct::Star => "*",
            Punct::Slash => "/",
            Punct::Percent => "%",
            Punct::Assign => "=",
            Punct::PlusAssign => "+=",
            Punct::MinusAssign => "-=",
            Punct::StarAssign => "*=",
            Punct::SlashAssign => "/=",
            Punct::EqEq => "==",
            Punct::NotEq => "!=",
            Punct::Lt => "<",
            Punct::Gt => ">",
            Punct::LtEq => "<=",
            Punct::GtEq => ">=",
            Punct::AndAnd => "&&",
            Punct::OrOr => "||",
            Punct::Bang => "!",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Keyword(Keyword),
    Number(f64),
    Str(String),
    Punct(Punct),
    Eof,
}

/// A lexed token with the exact source text it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub pos: Pos,
}

impl Token {
    pub fn is_punct(&self, p: Punct) -> bool {
        matches!(self.kind, TokenKind::Punct(q) if q == p)
    }

    pub fn is_keyword(&self, k: Keyword) -> bool {
        matches!(self.kind, TokenKind::Keyword(q) if q == k)
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    /// Human-readable description used in parse diagnostics.
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Ident(name) => format!("identifier `{}`", name),
            TokenKind::Keyword(_) => format!("keyword `{}`", self.lexeme),
            TokenKind::Number(_) => format!("number `{}`", self.lexeme),
            TokenKind::Str(_) => format!("string {}", self.lexeme),
            TokenKind::Punct(p) => format!("`{}`", p.as_str()),
        }
    }
}
