// src/frontend/lexer.rs
//! Lazy tokenizer for Synapse source text.
//!
//! Token shapes are recognized with small `nom` parsers; the `Lexer` itself
//! drives them one token at a time and tracks line/column positions. The
//! iterator is `Clone`, so a caller can snapshot it and restart from any point.
use crate::error::LexError;
use crate::frontend::token::{Keyword, Pos, Punct, Token, TokenKind};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_till, take_until};
use nom::character::complete::{alpha1, alphanumeric1, char, digit1, multispace1};
use nom::combinator::{opt, recognize, value};
use nom::multi::many0_count;
use nom::sequence::{delimited, pair};
use nom::{IResult, Parser};

fn parse_ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))
    .parse(input)
}

fn parse_number(input: &str) -> IResult<&str, &str> {
    recognize(pair(digit1, opt(pair(char('.'), digit1)))).parse(input)
}

fn parse_line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(tag("//"), take_till(|c| c == '\n'))).parse(input)
}

fn parse_block_comment(input: &str) -> IResult<&str, &str> {
    recognize(delimited(tag("/*"), take_until("*/"), tag("*/"))).parse(input)
}

fn parse_trivia(input: &str) -> IResult<&str, &str> {
    alt((multispace1, parse_line_comment, parse_block_comment)).parse(input)
}

fn parse_punct(input: &str) -> IResult<&str, Punct> {
    alt((
        alt((
            value(Punct::PlusAssign, tag("+=")),
            value(Punct::MinusAssign, tag("-=")),
            value(Punct::StarAssign, tag("*=")),
            value(Punct::SlashAssign, tag("/=")),
            value(Punct::EqEq, tag("==")),
            value(Punct::NotEq, tag("!=")),
            value(Punct::LtEq, tag("<=")),
            value(Punct::GtEq, tag(">=")),
            value(Punct::AndAnd, tag("&&")),
            value(Punct::OrOr, tag("||")),
        )),
        alt((
            value(Punct::LParen, char('(')),
            value(Punct::RParen, char(')')),
            value(Punct::LBrace, char('{')),
            value(Punct::RBrace, char('}')),
            value(Punct::LBracket, char('[')),
            value(Punct::RBracket, char(']')),
            value(Punct::Comma, char(',')),
            value(Punct::Semi, char(';')),
            value(Punct::Colon, char(':')),
            value(Punct::Dot, char('.')),
            value(Punct::At, char('@')),
            value(Punct::Plus, char('+')),
            value(Punct::Minus, char('-')),
            value(Punct::Star, char('*')),
            value(Punct::Slash, char('/')),
            value(Punct::Percent, char('%')),
            value(Punct::Assign, char('=')),
            value(Punct::Lt, char('<')),
            value(Punct::Gt, char('>')),
            value(Punct::Bang, char('!')),
        )),
    ))
    .parse(input)
}

/// Outcome of scanning a string literal body.
enum StrScan {
    Ok { len: usize, value: String },
    Unterminated { len: usize },
    BadEscape { len: usize, escape: char, offset: usize },
}

/// Scans a double-quoted literal starting at `input[0] == '"'`.
fn scan_string(input: &str) -> StrScan {
    let mut value = String::new();
    let mut chars = input.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return StrScan::Ok { len: i + 1, value },
            '\n' => return StrScan::Unterminated { len: i },
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, 'r')) => value.push('\r'),
                Some((_, '0')) => value.push('\0'),
                Some((_, '\\')) => value.push('\\'),
                Some((_, '"')) => value.push('"'),
                Some((j, other)) => {
                    // Skip to the closing quote so lexing resumes after the literal.
                    let len = input[j..]
                        .find(['"', '\n'])
                        .map(|k| j + k + usize::from(input[j + k..].starts_with('"')))
                        .unwrap_or(input.len());
                    return StrScan::BadEscape {
                        len,
                        escape: other,
                        offset: i,
                    };
                }
                None => return StrScan::Unterminated { len: input.len() },
            },
            other => value.push(other),
        }
    }
    StrScan::Unterminated { len: input.len() }
}

#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    src: &'a str,
    rest: &'a str,
    line: u32,
    column: u32,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            rest: src,
            line: 1,
            column: 1,
            done: false,
        }
    }

    /// Rewinds to the beginning of the source.
    pub fn reset(&mut self) {
        *self = Lexer::new(self.src);
    }

    fn pos(&self) -> Pos {
        Pos::new(self.line, self.column)
    }

    fn advance(&mut self, len: usize) {
        let (consumed, rest) = self.rest.split_at(len);
        for c in consumed.chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.rest = rest;
    }

    fn token(&mut self, kind: TokenKind, len: usize) -> Token {
        let pos = self.pos();
        let lexeme = self.rest[..len].to_string();
        self.advance(len);
        Token { kind, lexeme, pos }
    }

    /// Skips whitespace and comments. Fails only on an unterminated block comment.
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match parse_trivia(self.rest) {
                Ok((rest, _)) => {
                    let len = self.rest.len() - rest.len();
                    self.advance(len);
                }
                Err(_) if self.rest.starts_with("/*") => {
                    let pos = self.pos();
                    self.advance(self.rest.len());
                    return Err(LexError::UnterminatedComment { pos });
                }
                Err(_) => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia()?;
        if self.rest.is_empty() {
            self.done = true;
            return Ok(Token {
                kind: TokenKind::Eof,
                lexeme: String::new(),
                pos: self.pos(),
            });
        }

        if let Ok((rest, word)) = parse_ident(self.rest) {
            let len = self.rest.len() - rest.len();
            let kind = match Keyword::from_ident(word) {
                Some(kw) => TokenKind::Keyword(kw),
                None => TokenKind::Ident(word.to_string()),
            };
            return Ok(self.token(kind, len));
        }

        if let Ok((rest, digits)) = parse_number(self.rest) {
            let len = self.rest.len() - rest.len();
            let value = digits.parse::<f64>().unwrap_or(f64::NAN);
            return Ok(self.token(TokenKind::Number(value), len));
        }

        if self.rest.starts_with('"') {
            let pos = self.pos();
            return match scan_string(self.rest) {
                StrScan::Ok { len, value } => Ok(self.token(TokenKind::Str(value), len)),
                StrScan::Unterminated { len } => {
                    self.advance(len);
                    Err(LexError::UnterminatedString { pos })
                }
                StrScan::BadEscape {
                    len,
                    escape,
                    offset,
                } => {
                    let at = Pos::new(pos.line, pos.column + self.rest[..offset].chars().count() as u32);
                    self.advance(len);
                    Err(LexError::BadEscape { escape, pos: at })
                }
            };
        }

        if let Ok((rest, punct)) = parse_punct(self.rest) {
            let len = self.rest.len() - rest.len();
            return Ok(self.token(TokenKind::Punct(punct), len));
        }

        let pos = self.pos();
        let ch = self.rest.chars().next().unwrap_or('\0');
        self.advance(ch.len_utf8());
        Err(LexError::UnexpectedChar { ch, pos })
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        Some(self.next_token())
    }
}

impl std::iter::FusedIterator for Lexer<'_> {}

/// Lexes the whole input. On failure returns every lex error found, since the
/// lexer skips the offending text and keeps scanning.
pub fn tokenize(src: &str) -> Result<Vec<Token>, Vec<LexError>> {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    for item in Lexer::new(src) {
        match item {
            Ok(tok) => tokens.push(tok),
            Err(err) => errors.push(err),
        }
    }
    if errors.is_empty() {
        Ok(tokens)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords_idents_and_numbers() {
        let toks = kinds("var x_1 = 3.25;");
        assert_eq!(
            toks,
            vec![
                TokenKind::Keyword(Keyword::Var),
                TokenKind::Ident("x_1".to_string()),
                TokenKind::Punct(Punct::Assign),
                TokenKind::Number(3.25),
                TokenKind::Punct(Punct::Semi),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_are_discarded() {
        let toks = kinds("a // line\n/* block\n comment */ b");
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Ident("b".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_positions_track_lines() {
        let toks = tokenize("a\n  bb").unwrap();
        assert_eq!(toks[0].pos, Pos::new(1, 1));
        assert_eq!(toks[1].pos, Pos::new(2, 3));
    }

    #[test]
    fn test_string_escapes() {
        let toks = tokenize(r#""a\"b\n""#).unwrap();
        assert_eq!(toks[0].kind, TokenKind::Str("a\"b\n".to_string()));
        assert_eq!(toks[0].lexeme, r#""a\"b\n""#);
    }

    #[test]
    fn test_unterminated_string() {
        let errs = tokenize("var s = \"abc\nvar t;").unwrap_err();
        assert_eq!(errs, vec![LexError::UnterminatedString { pos: Pos::new(1, 9) }]);
    }

    #[test]
    fn test_unexpected_char_keeps_scanning() {
        let errs = tokenize("a # b $ c").unwrap_err();
        assert_eq!(errs.len(), 2);
        assert!(matches!(errs[0], LexError::UnexpectedChar { ch: '#', .. }));
        assert!(matches!(errs[1], LexError::UnexpectedChar { ch: '$', .. }));
    }

    #[test]
    fn test_two_char_operators() {
        let toks = kinds("a += b == c && !d");
        assert!(toks.contains(&TokenKind::Punct(Punct::PlusAssign)));
        assert!(toks.contains(&TokenKind::Punct(Punct::EqEq)));
        assert!(toks.contains(&TokenKind::Punct(Punct::AndAnd)));
        assert!(toks.contains(&TokenKind::Punct(Punct::Bang)));
    }

    #[test]
    fn test_lexer_is_restartable() {
        let mut lexer = Lexer::new("on x.y (e) {}");
        let first: Vec<_> = lexer.clone().collect();
        let _ = lexer.next();
        lexer.reset();
        let second: Vec<_> = lexer.collect();
        assert_eq!(first, second);
        assert!(matches!(second.last(), Some(Ok(t)) if t.is_eof()));
    }

    #[test]
    fn test_trailing_dot_is_punct() {
        assert_eq!(
            kinds("1.x"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Punct(Punct::Dot),
                TokenKind::Ident("x".to_string()),
                TokenKind::Eof
            ]
        );
    }
}
