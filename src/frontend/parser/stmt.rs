// src/frontend/parser/stmt.rs
//! Statements and blocks.
use crate::frontend::ast::{Block, Stmt};
use crate::frontend::token::{Keyword, Punct, TokenKind};

use super::parser::{Boundary, PResult, Parser};

impl Parser {
    /// `{ stmt* }`. A failing statement is recorded and skipped; the block
    /// itself only fails when its braces are missing.
    pub(super) fn parse_block(&mut self) -> PResult<Block> {
        let open = self.expect_punct(Punct::LBrace, "to open a block")?;
        let mut stmts = Vec::new();
        while !self.check_punct(Punct::RBrace) && !self.at_eof() {
            let start = self.pos_index();
            match self.parse_stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(err) => {
                    self.record(err);
                    self.synchronize(start, Boundary::Statement);
                }
            }
        }
        self.expect_punct(Punct::RBrace, "to close the block")?;
        Ok(Block { stmts, pos: open.pos })
    }

    pub(super) fn parse_stmt(&mut self) -> PResult<Stmt> {
        let tok = self.peek();
        let pos = tok.pos;
        let TokenKind::Keyword(kw) = tok.kind else {
            if tok.is_punct(Punct::LBrace) {
                return self.parse_block().map(Stmt::Block);
            }
            return self.parse_expr_stmt();
        };
        match kw {
            Keyword::Var => self.parse_var(),
            Keyword::If => self.parse_if(),
            Keyword::While => {
                self.advance();
                let cond = self.parse_paren_expr()?;
                let body = Box::new(self.parse_stmt()?);
                Ok(Stmt::While { cond, body, pos })
            }
            Keyword::For => self.parse_for(),
            Keyword::Return => {
                self.advance();
                let value = if self.check_punct(Punct::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect_punct(Punct::Semi, "after return")?;
                Ok(Stmt::Return { value, pos })
            }
            Keyword::Throw => {
                self.advance();
                let value = self.parse_expr()?;
                self.expect_punct(Punct::Semi, "after throw")?;
                Ok(Stmt::Throw { value, pos })
            }
            Keyword::Try => self.parse_try(),
            Keyword::Emit => {
                self.advance();
                let topic = self.parse_topic(false)?;
                let payload = if self.eat_punct(Punct::Comma) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                self.expect_punct(Punct::Semi, "after emit")?;
                Ok(Stmt::Emit { topic, payload, pos })
            }
            Keyword::On => Err(self.error_at(pos, "event handlers must be declared at the top level")),
            Keyword::Function | Keyword::Async | Keyword::Class | Keyword::Interface => {
                Err(self.error_at(pos, format!("`{}` declarations must appear at the top level", tok.lexeme)))
            }
            Keyword::Import | Keyword::Uses => {
                Err(self.error_at(pos, format!("`{}` must appear at the top level", tok.lexeme)))
            }
            _ => self.parse_expr_stmt(),
        }
    }

    fn parse_expr_stmt(&mut self) -> PResult<Stmt> {
        let expr = self.parse_expr()?;
        self.expect_punct(Punct::Semi, "after expression")?;
        Ok(Stmt::Expr(expr))
    }

    /// `var name [: type] [= expr];`
    fn parse_var(&mut self) -> PResult<Stmt> {
        let pos = self.advance().pos;
        let (name, _) = self.expect_ident("variable name")?;
        let ty = if self.eat_punct(Punct::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let init = if self.eat_punct(Punct::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect_punct(Punct::Semi, "after variable declaration")?;
        Ok(Stmt::Var {
            name,
            ty,
            init,
            pos,
            binding: None,
        })
    }

    fn parse_paren_expr(&mut self) -> PResult<crate::frontend::ast::Expr> {
        self.expect_punct(Punct::LParen, "before condition")?;
        let expr = self.parse_expr()?;
        self.expect_punct(Punct::RParen, "after condition")?;
        Ok(expr)
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let pos = self.advance().pos;
        let cond = self.parse_paren_expr()?;
        let then = Box::new(self.parse_stmt()?);
        let else_ = if self.eat_keyword(Keyword::Else) {
            Some(Box::new(self.parse_stmt()?))
        } else {
            None
        };
        Ok(Stmt::If { cond, then, else_, pos })
    }

    /// Both `for (init; cond; step) body` and `for (var x in xs) body`.
    fn parse_for(&mut self) -> PResult<Stmt> {
        let pos = self.advance().pos;
        self.expect_punct(Punct::LParen, "after `for`")?;

        let is_for_in = self.check_keyword(Keyword::Var)
            && matches!(self.peek_at(1).kind, TokenKind::Ident(_))
            && self.peek_at(2).is_keyword(Keyword::In);
        if is_for_in {
            self.advance();
            let (name, _) = self.expect_ident("loop variable")?;
            self.advance();
            let iterable = self.parse_expr()?;
            self.expect_punct(Punct::RParen, "after the iterable")?;
            let body = Box::new(self.parse_stmt()?);
            return Ok(Stmt::ForIn {
                name,
                iterable,
                body,
                pos,
                binding: None,
            });
        }

        let init = if self.eat_punct(Punct::Semi) {
            None
        } else if self.check_keyword(Keyword::Var) {
            Some(Box::new(self.parse_var()?))
        } else {
            Some(Box::new(self.parse_expr_stmt()?))
        };
        let cond = if self.check_punct(Punct::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_punct(Punct::Semi, "after loop condition")?;
        let step = if self.check_punct(Punct::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_punct(Punct::RParen, "after loop header")?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
            pos,
        })
    }

    /// `try { ... } catch (name) { ... }`
    fn parse_try(&mut self) -> PResult<Stmt> {
        let pos = self.advance().pos;
        let body = self.parse_block()?;
        self.expect_keyword(Keyword::Catch, "`catch` after try block")?;
        self.expect_punct(Punct::LParen, "after `catch`")?;
        let (catch_name, _) = self.expect_ident("exception binding name")?;
        self.expect_punct(Punct::RParen, "after exception binding")?;
        let handler = self.parse_block()?;
        Ok(Stmt::Try {
            body,
            catch_name,
            handler,
            pos,
            catch_binding: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::frontend::ast::{Item, Stmt};
    use crate::frontend::parse_source;
    use crate::frontend::token::Pos;

    fn stmts(src: &str) -> Vec<Stmt> {
        parse_source(src, "t.syn")
            .unwrap()
            .items
            .into_iter()
            .map(|item| match item {
                Item::Stmt(s) => s,
                other => panic!("expected statement, got {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_parse_control_flow() {
        let parsed = stmts(
            "var i = 0; while (i < 3) { i += 1; } if (i == 3) i = 0; else { i = 1; } \
             for (var j = 0; j < 2; j += 1) { } for (var x in [1, 2]) { }",
        );
        assert_eq!(parsed.len(), 5);
        assert!(matches!(parsed[1], Stmt::While { .. }));
        assert!(matches!(&parsed[2], Stmt::If { else_: Some(_), .. }));
        assert!(matches!(&parsed[3], Stmt::For { init: Some(_), cond: Some(_), step: Some(_), .. }));
        assert!(matches!(&parsed[4], Stmt::ForIn { name, .. } if name == "x"));
    }

    #[test]
    fn test_parse_try_and_emit() {
        let parsed = stmts("try { throw \"x\"; } catch (err) { emit app.failed, err; } emit app.done;");
        assert!(matches!(&parsed[0], Stmt::Try { catch_name, .. } if catch_name == "err"));
        assert!(matches!(&parsed[1], Stmt::Emit { topic, payload: None, .. } if topic == "app.done"));
    }

    #[test]
    fn test_emit_topic_rejects_wildcards() {
        let errs = parse_source("emit a.*;\nemit b.ok;", "t.syn").unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].pos(), Pos::new(1, 8));
        assert!(errs[0].to_string().contains("cannot contain `*`"));
    }

    #[test]
    fn test_recovers_and_reports_every_error() {
        let src = "function f() {\n  var = 1;\n  var ok = 2;\n  ok = ;\n}\nvar z = 3;";
        let errs = parse_source(src, "t.syn").unwrap_err();
        assert_eq!(errs.len(), 2);
        assert_eq!(errs[0].pos(), Pos::new(2, 7));
        assert_eq!(errs[1].pos(), Pos::new(4, 8));
    }

    #[test]
    fn test_missing_semicolon_is_reported_at_next_token() {
        let errs = parse_source("var a = 1\nvar b = 2;", "t.syn").unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].pos(), Pos::new(2, 1));
        assert!(errs[0].to_string().contains("expected `;`"));
    }

    #[test]
    fn test_nested_handler_is_rejected() {
        let errs = parse_source("function f() { on a.b (e) { } }", "t.syn").unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].to_string().contains("top level"));
    }
}
