// src/frontend/parser/parser.rs
//! Token cursor shared by the grammar modules, plus the recovery machinery.
//!
//! Grammar functions return `PResult`; a failure inside a block is recorded
//! and the cursor skips to the next statement boundary, so one pass reports
//! every independent syntax error.
use crate::error::ParseError;
use crate::frontend::ast::{NodeId, Program};
use crate::frontend::token::{Keyword, Pos, Punct, Token, TokenKind};

pub type PResult<T> = Result<T, ParseError>;

/// Where the cursor may resume after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Statement inside a block, or a top-level item.
    Statement,
    /// Member inside a class or interface body.
    Member,
}

impl Boundary {
    fn starts_here(self, tok: &Token) -> bool {
        let TokenKind::Keyword(kw) = tok.kind else {
            return self == Boundary::Statement && tok.is_punct(Punct::At);
        };
        match self {
            Boundary::Statement => matches!(
                kw,
                Keyword::Var
                    | Keyword::If
                    | Keyword::While
                    | Keyword::For
                    | Keyword::Return
                    | Keyword::Throw
                    | Keyword::Try
                    | Keyword::Emit
                    | Keyword::On
                    | Keyword::Class
                    | Keyword::Interface
                    | Keyword::Function
                    | Keyword::Async
                    | Keyword::Import
                    | Keyword::Uses
            ),
            Boundary::Member => matches!(
                kw,
                Keyword::Public
                    | Keyword::Private
                    | Keyword::Protected
                    | Keyword::Var
                    | Keyword::Constructor
                    | Keyword::Async
                    | Keyword::Function
            ),
        }
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file: String,
    errors: Vec<ParseError>,
    next_id: NodeId,
}

impl Parser {
    /// `tokens` must end with a single `Eof` token, as `tokenize` produces.
    pub fn new(mut tokens: Vec<Token>, file: &str) -> Self {
        if !tokens.last().is_some_and(Token::is_eof) {
            let pos = tokens.last().map(|t| t.pos).unwrap_or(Pos::new(1, 1));
            tokens.push(Token {
                kind: TokenKind::Eof,
                lexeme: String::new(),
                pos,
            });
        }
        Self {
            tokens,
            pos: 0,
            file: file.to_string(),
            errors: Vec::new(),
            next_id: 0,
        }
    }

    pub fn parse_program(mut self) -> Result<Program, Vec<ParseError>> {
        let mut items = Vec::new();
        while !self.at_eof() {
            let start = self.pos;
            match self.parse_item() {
                Ok(item) => items.push(item),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize(start, Boundary::Statement);
                }
            }
        }
        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        Ok(Program {
            file: self.file,
            items,
            globals: Vec::new(),
            main_frame: 0,
        })
    }

    pub(super) fn fresh_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(super) fn pos_index(&self) -> usize {
        self.pos
    }

    pub(super) fn record(&mut self, err: ParseError) {
        self.errors.push(err);
    }

    pub(super) fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    pub(super) fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    pub(super) fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if !tok.is_eof() {
            self.pos += 1;
        }
        tok
    }

    pub(super) fn at_eof(&self) -> bool {
        self.peek().is_eof()
    }

    pub(super) fn check_punct(&self, p: Punct) -> bool {
        self.peek().is_punct(p)
    }

    pub(super) fn check_keyword(&self, k: Keyword) -> bool {
        self.peek().is_keyword(k)
    }

    pub(super) fn eat_punct(&mut self, p: Punct) -> bool {
        if self.check_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(super) fn eat_keyword(&mut self, k: Keyword) -> bool {
        if self.check_keyword(k) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(super) fn expect_punct(&mut self, p: Punct, context: &str) -> PResult<Token> {
        if self.check_punct(p) {
            return Ok(self.advance());
        }
        Err(self.unexpected(&format!("`{}` {}", p.as_str(), context)))
    }

    pub(super) fn expect_keyword(&mut self, k: Keyword, what: &str) -> PResult<Token> {
        if self.check_keyword(k) {
            return Ok(self.advance());
        }
        Err(self.unexpected(what))
    }

    pub(super) fn expect_ident(&mut self, what: &str) -> PResult<(String, Pos)> {
        if let TokenKind::Ident(name) = &self.peek().kind {
            let name = name.clone();
            let pos = self.advance().pos;
            return Ok((name, pos));
        }
        Err(self.unexpected(what))
    }

    /// Like `expect_ident`, but keywords are accepted too. Used for topic
    /// segments, member names and object keys, where `on.emit` is legal.
    pub(super) fn expect_name(&mut self, what: &str) -> PResult<(String, Pos)> {
        match &self.peek().kind {
            TokenKind::Ident(_) | TokenKind::Keyword(_) => {
                let tok = self.advance();
                Ok((tok.lexeme, tok.pos))
            }
            _ => Err(self.unexpected(what)),
        }
    }

    pub(super) fn expect_string(&mut self, what: &str) -> PResult<(String, Pos)> {
        if let TokenKind::Str(value) = &self.peek().kind {
            let value = value.clone();
            let pos = self.advance().pos;
            return Ok((value, pos));
        }
        Err(self.unexpected(what))
    }

    /// "expected X, found Y" at the current token.
    pub(super) fn unexpected(&self, expected: &str) -> ParseError {
        let tok = self.peek();
        self.error_at(tok.pos, format!("expected {}, found {}", expected, tok.describe()))
    }

    pub(super) fn error_at(&self, pos: Pos, message: impl Into<String>) -> ParseError {
        ParseError {
            file: self.file.clone(),
            pos,
            message: message.into(),
        }
    }

    /// Skips tokens until the cursor sits at a plausible place to resume:
    /// just past a `;`, before a `}` closing the enclosing block, or before a
    /// token that starts a new statement. Balanced `{ ... }` groups are
    /// skipped whole. Always consumes at least one token when the failed
    /// construct consumed none, so recovery cannot loop.
    pub(super) fn synchronize(&mut self, start: usize, boundary: Boundary) {
        let mut depth = 0usize;
        let mut forced = self.pos == start;
        loop {
            let tok = self.peek();
            if tok.is_eof() {
                return;
            }
            if !forced && depth == 0 && (tok.is_punct(Punct::RBrace) || boundary.starts_here(tok)) {
                return;
            }
            let closes = tok.is_punct(Punct::RBrace);
            let semi = tok.is_punct(Punct::Semi);
            if tok.is_punct(Punct::LBrace) {
                depth += 1;
            } else if closes {
                if depth == 0 {
                    // Stray `}` with nothing consumed yet.
                    self.advance();
                    return;
                }
                depth -= 1;
            }
            forced = false;
            self.advance();
            if depth == 0 && semi {
                return;
            }
        }
    }
}
