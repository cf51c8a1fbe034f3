// src/frontend/parser/expr.rs
//! Expressions, by precedence climbing from lowest to highest:
//! assignment (right-associative), logical, relational, additive,
//! multiplicative, unary, postfix, primary.
use crate::frontend::ast::{AssignOp, BinaryOp, Expr, ExprKind, UnaryOp};
use crate::frontend::token::{Keyword, Punct, TokenKind};

use super::parser::{PResult, Parser};

impl Parser {
    pub(super) fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        let target = self.parse_logical()?;
        let op = match &self.peek().kind {
            TokenKind::Punct(Punct::Assign) => AssignOp::Assign,
            TokenKind::Punct(Punct::PlusAssign) => AssignOp::Add,
            TokenKind::Punct(Punct::MinusAssign) => AssignOp::Sub,
            TokenKind::Punct(Punct::StarAssign) => AssignOp::Mul,
            TokenKind::Punct(Punct::SlashAssign) => AssignOp::Div,
            _ => return Ok(target),
        };
        let op_pos = self.advance().pos;
        if !matches!(
            target.kind,
            ExprKind::Ident { .. } | ExprKind::Member { .. } | ExprKind::Index { .. }
        ) {
            return Err(self.error_at(op_pos, "invalid assignment target"));
        }
        let value = self.parse_assignment()?;
        let pos = target.pos;
        Ok(Expr::new(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            pos,
        ))
    }

    /// Left-associative binary level.
    fn parse_binary_level(
        &mut self,
        ops: &[(Punct, BinaryOp)],
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for &(punct, op) in ops {
                if self.eat_punct(punct) {
                    let right = next(self)?;
                    let pos = left.pos;
                    left = Expr::new(
                        ExprKind::Binary {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        pos,
                    );
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn parse_logical(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[(Punct::AndAnd, BinaryOp::And), (Punct::OrOr, BinaryOp::Or)],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[
                (Punct::EqEq, BinaryOp::Eq),
                (Punct::NotEq, BinaryOp::NotEq),
                (Punct::LtEq, BinaryOp::LtEq),
                (Punct::GtEq, BinaryOp::GtEq),
                (Punct::Lt, BinaryOp::Lt),
                (Punct::Gt, BinaryOp::Gt),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[(Punct::Plus, BinaryOp::Add), (Punct::Minus, BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[
                (Punct::Star, BinaryOp::Mul),
                (Punct::Slash, BinaryOp::Div),
                (Punct::Percent, BinaryOp::Rem),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let tok = self.peek();
        let pos = tok.pos;
        let op = match tok.kind {
            TokenKind::Punct(Punct::Bang) => Some(UnaryOp::Not),
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            TokenKind::Punct(Punct::Plus) => Some(UnaryOp::Plus),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let expr = Box::new(self.parse_unary()?);
            return Ok(Expr::new(ExprKind::Unary { op, expr }, pos));
        }
        if self.eat_keyword(Keyword::Await) {
            let inner = self.parse_unary()?;
            return Ok(Expr::new(ExprKind::Await(Box::new(inner)), pos));
        }
        if self.eat_keyword(Keyword::Parallel) {
            let inner = self.parse_unary()?;
            return Ok(Expr::new(ExprKind::Parallel(Box::new(inner)), pos));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(Punct::LParen) {
                let args = self.parse_args()?;
                let pos = expr.pos;
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    pos,
                );
            } else if self.eat_punct(Punct::LBracket) {
                let index = self.parse_expr()?;
                self.expect_punct(Punct::RBracket, "to close the index")?;
                let pos = expr.pos;
                expr = Expr::new(
                    ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    pos,
                );
            } else if self.eat_punct(Punct::Dot) {
                let (name, _) = self.expect_name("member name after `.`")?;
                let pos = expr.pos;
                expr = Expr::new(
                    ExprKind::Member {
                        object: Box::new(expr),
                        name,
                    },
                    pos,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    /// Arguments after an opening `(`, through the closing `)`.
    fn parse_args(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.check_punct(Punct::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen, "to close the argument list")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let tok = self.peek();
        let pos = tok.pos;
        let kind = match &tok.kind {
            TokenKind::Number(value) => {
                let value = *value;
                let lexeme = self.advance().lexeme;
                ExprKind::Number { value, lexeme }
            }
            TokenKind::Str(value) => {
                let value = value.clone();
                let lexeme = self.advance().lexeme;
                ExprKind::Str { value, lexeme }
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                ExprKind::Ident { name, binding: None }
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                ExprKind::Null
            }
            TokenKind::Keyword(Keyword::This) => {
                self.advance();
                ExprKind::This
            }
            TokenKind::Keyword(Keyword::New) => {
                self.advance();
                let (class, _) = self.expect_ident("class name after `new`")?;
                self.expect_punct(Punct::LParen, "after class name")?;
                let args = self.parse_args()?;
                ExprKind::New { class, args }
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_punct(Punct::RParen, "to close the group")?;
                return Ok(inner);
            }
            TokenKind::Punct(Punct::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                if !self.check_punct(Punct::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.eat_punct(Punct::Comma) || self.check_punct(Punct::RBracket) {
                            break;
                        }
                    }
                }
                self.expect_punct(Punct::RBracket, "to close the array literal")?;
                ExprKind::Array(items)
            }
            TokenKind::Punct(Punct::LBrace) => ExprKind::Object(self.parse_object_entries()?),
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr::new(kind, pos))
    }

    /// `{ key: expr, "key": expr }`, keys may be names, keywords or strings.
    pub(super) fn parse_object_entries(&mut self) -> PResult<Vec<(String, Expr)>> {
        self.expect_punct(Punct::LBrace, "to open the object literal")?;
        let mut entries = Vec::new();
        while !self.check_punct(Punct::RBrace) {
            let key = match &self.peek().kind {
                TokenKind::Str(_) => self.expect_string("object key")?.0,
                _ => self.expect_name("object key")?.0,
            };
            self.expect_punct(Punct::Colon, "after object key")?;
            entries.push((key, self.parse_expr()?));
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RBrace, "to close the object literal")?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use crate::frontend::ast::{AssignOp, BinaryOp, Expr, ExprKind, Item, Stmt, UnaryOp};
    use crate::frontend::lexer::tokenize;
    use crate::frontend::parse_source;
    use crate::frontend::token::TokenKind;

    fn expr(src: &str) -> Expr {
        let program = parse_source(&format!("{};", src), "t.syn").unwrap();
        match program.items.into_iter().next() {
            Some(Item::Stmt(Stmt::Expr(e))) => e,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_multiplication_binds_tighter() {
        let e = expr("1 + 2 * 3");
        let ExprKind::Binary { op, right, .. } = e.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let e = expr("a = b += 1");
        let ExprKind::Assign { op, value, .. } = e.kind else {
            panic!("expected assignment");
        };
        assert_eq!(op, AssignOp::Assign);
        assert!(matches!(value.kind, ExprKind::Assign { op: AssignOp::Add, .. }));
    }

    #[test]
    fn test_relational_below_additive() {
        let e = expr("a + 1 < b && c");
        let ExprKind::Binary { op, left, .. } = e.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::And);
        assert!(matches!(left.kind, ExprKind::Binary { op: BinaryOp::Lt, .. }));
    }

    #[test]
    fn test_postfix_chain_and_new() {
        let e = expr("new Box(1).items[0].name");
        let ExprKind::Member { object, name } = e.kind else {
            panic!("expected member");
        };
        assert_eq!(name, "name");
        let ExprKind::Index { object, .. } = object.kind else {
            panic!("expected index");
        };
        assert!(matches!(object.kind, ExprKind::Member { .. }));
    }

    #[test]
    fn test_await_and_parallel_prefixes() {
        let e = expr("await parallel [f(1), g(2)]");
        let ExprKind::Await(inner) = e.kind else {
            panic!("expected await");
        };
        let ExprKind::Parallel(list) = inner.kind else {
            panic!("expected parallel");
        };
        assert!(matches!(list.kind, ExprKind::Array(ref items) if items.len() == 2));
    }

    #[test]
    fn test_unary_and_literals_keep_lexemes() {
        let e = expr("-2.50");
        let ExprKind::Unary { op, expr: inner } = e.kind else {
            panic!("expected unary");
        };
        assert_eq!(op, UnaryOp::Neg);
        assert!(matches!(inner.kind, ExprKind::Number { ref lexeme, .. } if lexeme == "2.50"));
    }

    /// Literal and identifier leaves in source order.
    fn leaf_lexemes(e: &Expr, out: &mut Vec<String>) {
        match &e.kind {
            ExprKind::Number { lexeme, .. } | ExprKind::Str { lexeme, .. } => out.push(lexeme.clone()),
            ExprKind::Ident { name, .. } => out.push(name.clone()),
            ExprKind::Array(items) => items.iter().for_each(|i| leaf_lexemes(i, out)),
            ExprKind::Unary { expr, .. } => leaf_lexemes(expr, out),
            ExprKind::Binary { left, right, .. } => {
                leaf_lexemes(left, out);
                leaf_lexemes(right, out);
            }
            ExprKind::Assign { target, value, .. } => {
                leaf_lexemes(target, out);
                leaf_lexemes(value, out);
            }
            ExprKind::Call { callee, args } => {
                leaf_lexemes(callee, out);
                args.iter().for_each(|a| leaf_lexemes(a, out));
            }
            ExprKind::Index { object, index } => {
                leaf_lexemes(object, out);
                leaf_lexemes(index, out);
            }
            ExprKind::Member { object, name } => {
                leaf_lexemes(object, out);
                out.push(name.clone());
            }
            ExprKind::Bool(_) | ExprKind::Null | ExprKind::This => {}
            other => panic!("unexpected expression in sample: {:?}", other),
        }
    }

    #[test]
    fn test_leaves_reproduce_source_lexemes() {
        let src = r#"total = price * 1.50 + tax[0];
log("say \"hi\"\n", total, 007, items.first, "tab\there");
flag = -count + 0.25 == [x1, "", true];
"#;
        let expected: Vec<String> = tokenize(src)
            .unwrap()
            .into_iter()
            .filter(|t| matches!(t.kind, TokenKind::Number(_) | TokenKind::Str(_) | TokenKind::Ident(_)))
            .map(|t| t.lexeme)
            .collect();
        assert!(expected.contains(&r#""say \"hi\"\n""#.to_string()));
        assert!(expected.contains(&"007".to_string()));

        let program = parse_source(src, "t.syn").unwrap();
        let mut leaves = Vec::new();
        for item in &program.items {
            let Item::Stmt(Stmt::Expr(e)) = item else {
                panic!("expected expression statement");
            };
            leaf_lexemes(e, &mut leaves);
        }
        assert_eq!(leaves, expected);
    }

    #[test]
    fn test_object_literal_with_keyword_and_string_keys() {
        let e = expr(r#"x = { on: 1, "two words": [true, null], }"#);
        let ExprKind::Assign { value, .. } = e.kind else {
            panic!("expected assignment");
        };
        let ExprKind::Object(entries) = value.kind else {
            panic!("expected object");
        };
        assert_eq!(entries[0].0, "on");
        assert_eq!(entries[1].0, "two words");
    }

    #[test]
    fn test_invalid_assignment_target() {
        let errs = parse_source("1 = 2;", "t.syn").unwrap_err();
        assert!(errs[0].to_string().contains("invalid assignment target"));
    }
}
