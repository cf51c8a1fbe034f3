// src/frontend/parser/top_level.rs
//! Declarations: functions, classes, interfaces, handlers, imports and services.
use crate::frontend::ast::{
    ClassDecl, FieldDecl, FunctionDecl, HandlerDecl, ImportDecl, ImportKind, InterfaceDecl, Item,
    MethodDecl, MethodSig, Param, TypeExpr, UsesDecl, Visibility,
};
use crate::frontend::token::{Keyword, Pos, Punct};

use super::parser::{Boundary, PResult, Parser};

impl Parser {
    pub(super) fn parse_item(&mut self) -> PResult<Item> {
        let tok = self.peek();
        if tok.is_punct(Punct::At) || tok.is_keyword(Keyword::Class) {
            return self.parse_class().map(Item::Class);
        }
        if tok.is_keyword(Keyword::Interface) {
            return self.parse_interface().map(Item::Interface);
        }
        if tok.is_keyword(Keyword::Function) || tok.is_keyword(Keyword::Async) {
            return self.parse_function().map(Item::Function);
        }
        if tok.is_keyword(Keyword::On) {
            return self.parse_handler().map(Item::Handler);
        }
        if tok.is_keyword(Keyword::Import) {
            return self.parse_import().map(Item::Import);
        }
        if tok.is_keyword(Keyword::Uses) {
            return self.parse_uses().map(Item::Uses);
        }
        self.parse_stmt().map(Item::Stmt)
    }

    /// `[async] function name(params) [: type] { ... }`
    pub(super) fn parse_function(&mut self) -> PResult<FunctionDecl> {
        let start = self.peek().pos;
        let is_async = self.eat_keyword(Keyword::Async);
        self.expect_keyword(Keyword::Function, "`function`")?;
        let (name, _) = self.expect_ident("function name")?;
        self.parse_function_rest(name, is_async, start)
    }

    fn parse_function_rest(&mut self, name: String, is_async: bool, pos: Pos) -> PResult<FunctionDecl> {
        let params = self.parse_params()?;
        let ret = self.parse_return_annotation()?;
        let body = self.parse_block()?;
        Ok(FunctionDecl {
            id: self.fresh_id(),
            name,
            params,
            ret,
            is_async,
            body,
            pos,
            frame_size: 0,
        })
    }

    pub(super) fn parse_params(&mut self) -> PResult<Vec<Param>> {
        self.expect_punct(Punct::LParen, "to open the parameter list")?;
        let mut params = Vec::new();
        if !self.check_punct(Punct::RParen) {
            loop {
                let (name, pos) = self.expect_ident("parameter name")?;
                let ty = if self.eat_punct(Punct::Colon) {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                params.push(Param { name, ty, pos });
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen, "to close the parameter list")?;
        Ok(params)
    }

    fn parse_return_annotation(&mut self) -> PResult<Option<TypeExpr>> {
        if self.eat_punct(Punct::Colon) {
            Ok(Some(self.parse_type()?))
        } else {
            Ok(None)
        }
    }

    /// `name`, `name[]` or `array<T>`.
    pub(super) fn parse_type(&mut self) -> PResult<TypeExpr> {
        let (name, pos) = self.expect_ident("type name")?;
        let mut ty = if name == "array" && self.eat_punct(Punct::Lt) {
            let inner = self.parse_type()?;
            self.expect_punct(Punct::Gt, "to close the element type")?;
            TypeExpr::Array(Box::new(inner))
        } else {
            TypeExpr::Named { name, pos }
        };
        while self.check_punct(Punct::LBracket) && self.peek_at(1).is_punct(Punct::RBracket) {
            self.advance();
            self.advance();
            ty = TypeExpr::Array(Box::new(ty));
        }
        Ok(ty)
    }

    fn parse_name_list(&mut self, what: &str) -> PResult<Vec<(String, Pos)>> {
        let mut names = vec![self.expect_ident(what)?];
        while self.eat_punct(Punct::Comma) {
            names.push(self.expect_ident(what)?);
        }
        Ok(names)
    }

    fn parse_class(&mut self) -> PResult<ClassDecl> {
        let mut decorators = Vec::new();
        while self.eat_punct(Punct::At) {
            decorators.push(self.expect_ident("decorator name")?.0);
        }
        let pos = self.expect_keyword(Keyword::Class, "`class` after decorators")?.pos;
        let (name, _) = self.expect_ident("class name")?;
        let base = if self.eat_keyword(Keyword::Extends) {
            Some(self.expect_ident("base class name")?)
        } else {
            None
        };
        let interfaces = if self.eat_keyword(Keyword::Implements) || self.eat_punct(Punct::Colon) {
            self.parse_name_list("interface name")?
        } else {
            Vec::new()
        };
        self.expect_punct(Punct::LBrace, "to open the class body")?;

        let mut class = ClassDecl {
            id: self.fresh_id(),
            name,
            decorators,
            base,
            interfaces,
            fields: Vec::new(),
            methods: Vec::new(),
            constructor: None,
            pos,
        };
        while !self.check_punct(Punct::RBrace) && !self.at_eof() {
            let start = self.pos_index();
            if let Err(err) = self.parse_member(&mut class) {
                self.record(err);
                self.synchronize(start, Boundary::Member);
            }
        }
        self.expect_punct(Punct::RBrace, "to close the class body")?;
        Ok(class)
    }

    fn parse_member(&mut self, class: &mut ClassDecl) -> PResult<()> {
        let visibility = if self.eat_keyword(Keyword::Private) {
            Visibility::Private
        } else if self.eat_keyword(Keyword::Protected) {
            Visibility::Protected
        } else {
            self.eat_keyword(Keyword::Public);
            Visibility::Public
        };

        if self.eat_keyword(Keyword::Var) {
            let (name, pos) = self.expect_ident("field name")?;
            let ty = self.parse_return_annotation()?;
            let init = if self.eat_punct(Punct::Assign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect_punct(Punct::Semi, "after field declaration")?;
            class.fields.push(FieldDecl {
                name,
                visibility,
                ty,
                init,
                pos,
            });
            return Ok(());
        }

        if self.check_keyword(Keyword::Constructor) {
            let pos = self.advance().pos;
            let ctor = self.parse_function_rest("constructor".to_string(), false, pos)?;
            if class.constructor.is_some() {
                return Err(self.error_at(pos, format!("class `{}` declares more than one constructor", class.name)));
            }
            class.constructor = Some(ctor);
            return Ok(());
        }

        let pos = self.peek().pos;
        let is_async = self.eat_keyword(Keyword::Async);
        self.eat_keyword(Keyword::Function);
        let (name, _) = self.expect_ident("member declaration")?;
        let func = self.parse_function_rest(name, is_async, pos)?;
        class.methods.push(MethodDecl { visibility, func });
        Ok(())
    }

    fn parse_interface(&mut self) -> PResult<InterfaceDecl> {
        let pos = self.advance().pos;
        let (name, _) = self.expect_ident("interface name")?;
        let extends = if self.eat_keyword(Keyword::Extends) {
            self.parse_name_list("interface name")?
        } else {
            Vec::new()
        };
        self.expect_punct(Punct::LBrace, "to open the interface body")?;
        let mut methods = Vec::new();
        while !self.check_punct(Punct::RBrace) && !self.at_eof() {
            let start = self.pos_index();
            match self.parse_method_sig() {
                Ok(sig) => methods.push(sig),
                Err(err) => {
                    self.record(err);
                    self.synchronize(start, Boundary::Member);
                }
            }
        }
        self.expect_punct(Punct::RBrace, "to close the interface body")?;
        Ok(InterfaceDecl {
            id: self.fresh_id(),
            name,
            extends,
            methods,
            pos,
        })
    }

    fn parse_method_sig(&mut self) -> PResult<MethodSig> {
        self.eat_keyword(Keyword::Function);
        let (name, pos) = self.expect_ident("method signature")?;
        let params = self.parse_params()?;
        let ret = self.parse_return_annotation()?;
        self.expect_punct(Punct::Semi, "after method signature")?;
        Ok(MethodSig { name, params, ret, pos })
    }

    /// `on [async] a.b.c (binding) { ... }`
    fn parse_handler(&mut self) -> PResult<HandlerDecl> {
        let pos = self.advance().pos;
        let is_async = self.eat_keyword(Keyword::Async);
        let topic = self.parse_topic(true)?;
        self.expect_punct(Punct::LParen, "before the event binding")?;
        let (binding, _) = self.expect_ident("event binding name")?;
        self.expect_punct(Punct::RParen, "after the event binding")?;
        let body = self.parse_block()?;
        Ok(HandlerDecl {
            id: self.fresh_id(),
            topic,
            is_async,
            binding,
            body,
            pos,
            frame_size: 0,
        })
    }

    /// Dotted topic name. Segments may be keywords; `*` segments are
    /// accepted only when `wildcards` is set, as for handler topics.
    pub(super) fn parse_topic(&mut self, wildcards: bool) -> PResult<String> {
        let mut topic = self.parse_topic_segment(wildcards)?;
        while self.eat_punct(Punct::Dot) {
            topic.push('.');
            topic.push_str(&self.parse_topic_segment(wildcards)?);
        }
        Ok(topic)
    }

    fn parse_topic_segment(&mut self, wildcards: bool) -> PResult<String> {
        if self.check_punct(Punct::Star) {
            let pos = self.advance().pos;
            if !wildcards {
                return Err(self.error_at(pos, "an emitted topic cannot contain `*`"));
            }
            return Ok("*".to_string());
        }
        Ok(self.expect_name("topic segment")?.0)
    }

    fn parse_import(&mut self) -> PResult<ImportDecl> {
        let pos = self.advance().pos;
        let decl = if self.eat_punct(Punct::LBrace) {
            let names = self.parse_name_list("imported name")?;
            self.expect_punct(Punct::RBrace, "to close the import list")?;
            self.expect_keyword(Keyword::From, "`from`")?;
            let (module, _) = self.expect_string("module name string")?;
            ImportDecl {
                module,
                kind: ImportKind::Names(names),
                pos,
            }
        } else {
            let (module, _) = self.expect_ident("module name")?;
            ImportDecl {
                module,
                kind: ImportKind::Module,
                pos,
            }
        };
        self.expect_punct(Punct::Semi, "after import")?;
        Ok(decl)
    }

    /// `uses Name [from "capability"] [{ options }];` The capability defaults
    /// to the service name.
    fn parse_uses(&mut self) -> PResult<UsesDecl> {
        let pos = self.advance().pos;
        let (name, _) = self.expect_ident("service name")?;
        let capability = if self.eat_keyword(Keyword::From) {
            self.expect_string("capability name string")?.0
        } else {
            name.clone()
        };
        let config = if self.check_punct(Punct::LBrace) {
            self.parse_object_entries()?
        } else {
            Vec::new()
        };
        self.expect_punct(Punct::Semi, "after service declaration")?;
        Ok(UsesDecl {
            name,
            capability,
            config,
            pos,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::frontend::ast::{ImportKind, Item, TypeExpr, Visibility};
    use crate::frontend::parse_source;

    #[test]
    fn test_parse_class_with_members() {
        let src = r#"
            @Service @Cached
            class Sensor extends Device implements Readable, Named {
                private var raw: number = 0;
                protected var label;
                constructor(label: string) { this.label = label; }
                public read(): number { return raw; }
                async function refresh() { }
            }
        "#;
        let program = parse_source(src, "t.syn").unwrap();
        let Item::Class(class) = &program.items[0] else {
            panic!("expected class");
        };
        assert_eq!(class.decorators, vec!["Service", "Cached"]);
        assert_eq!(class.base.as_ref().unwrap().0, "Device");
        assert_eq!(class.interfaces.len(), 2);
        assert_eq!(class.fields[0].visibility, Visibility::Private);
        assert_eq!(class.fields[1].visibility, Visibility::Protected);
        assert!(class.constructor.is_some());
        assert_eq!(class.methods.len(), 2);
        assert!(class.methods[1].func.is_async);
    }

    #[test]
    fn test_parse_handler_topic_with_keyword_segments() {
        let program = parse_source("on async sensor.on.emit (e) { }", "t.syn").unwrap();
        let Item::Handler(handler) = &program.items[0] else {
            panic!("expected handler");
        };
        assert_eq!(handler.topic, "sensor.on.emit");
        assert!(handler.is_async);
        assert_eq!(handler.binding, "e");
    }

    #[test]
    fn test_parse_wildcard_handler_topic() {
        let program = parse_source("on alert.* (e) { }", "t.syn").unwrap();
        let Item::Handler(handler) = &program.items[0] else {
            panic!("expected handler");
        };
        assert_eq!(handler.topic, "alert.*");
    }

    #[test]
    fn test_parse_imports_and_uses() {
        let src = r#"
            import { sqrt, floor } from "math";
            import time;
            uses Summarizer from "chat" { model: "small", temperature: 0.2 };
        "#;
        let program = parse_source(src, "t.syn").unwrap();
        let Item::Import(first) = &program.items[0] else {
            panic!("expected import");
        };
        assert!(matches!(&first.kind, ImportKind::Names(n) if n.len() == 2));
        let Item::Import(second) = &program.items[1] else {
            panic!("expected import");
        };
        assert_eq!(second.kind, ImportKind::Module);
        let Item::Uses(uses) = &program.items[2] else {
            panic!("expected uses");
        };
        assert_eq!(uses.capability, "chat");
        assert_eq!(uses.config.len(), 2);
    }

    #[test]
    fn test_parse_array_type_annotations() {
        let program = parse_source("function f(a: number[], b: array<string>) { }", "t.syn").unwrap();
        let Item::Function(f) = &program.items[0] else {
            panic!("expected function");
        };
        assert!(matches!(f.params[0].ty, Some(TypeExpr::Array(_))));
        assert!(matches!(f.params[1].ty, Some(TypeExpr::Array(_))));
    }

    #[test]
    fn test_bad_member_recovers_within_class() {
        let src = "class A { var = 1; var ok = 2; } function g() { }";
        let errs = parse_source(src, "t.syn").unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].to_string().contains("field name"));
    }
}
