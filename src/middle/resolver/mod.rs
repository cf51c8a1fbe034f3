// src/middle/resolver/mod.rs
#[allow(clippy::module_inception)]
mod resolver;
mod typecheck;

pub use resolver::{ClassInfo, InterfaceInfo, Resolver};
pub use typecheck::literal_json;

#[cfg(test)]
mod tests {
    use crate::error::ResolveError;
    use crate::frontend::ast::{Binding, ExprKind, Item, Stmt};
    use crate::frontend::parse_source;
    use crate::frontend::token::Pos;
    use crate::middle::resolve_program;

    fn resolve(src: &str) -> Result<crate::frontend::ast::Program, Vec<ResolveError>> {
        let mut program = parse_source(src, "t.syn").expect("source should parse");
        resolve_program(&mut program).map(|()| program)
    }

    fn messages(src: &str) -> Vec<String> {
        resolve(src)
            .expect_err("expected resolution errors")
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn test_forward_references_resolve() {
        let program = resolve("var r = later(1);\nfunction later(x) { return x; }").unwrap();
        assert_eq!(program.globals, vec!["r"]);
        let Item::Stmt(Stmt::Var { init: Some(init), binding, .. }) = &program.items[0] else {
            panic!("expected var");
        };
        assert_eq!(binding, &Some(Binding::Global(0)));
        let ExprKind::Call { callee, .. } = &init.kind else {
            panic!("expected call");
        };
        assert!(matches!(&callee.kind, ExprKind::Ident { binding: Some(Binding::Function(f)), .. } if f == "later"));
    }

    #[test]
    fn test_duplicate_in_same_scope() {
        let errs = resolve("function f(a, a) { }").unwrap_err();
        assert_eq!(
            errs,
            vec![ResolveError::DuplicateSymbol {
                name: "a".into(),
                pos: Pos::new(1, 15)
            }]
        );
    }

    #[test]
    fn test_shadowing_is_allowed() {
        let program = resolve("var x = 1; function f() { var x = \"s\"; { var x = true; } }").unwrap();
        let Item::Function(f) = &program.items[1] else {
            panic!("expected function");
        };
        assert_eq!(f.frame_size, 2);
    }

    #[test]
    fn test_unresolved_symbol_reports_name_and_position() {
        let errs = resolve("function f() {\n  return missing + 1;\n}").unwrap_err();
        assert_eq!(
            errs,
            vec![ResolveError::UnresolvedSymbol {
                name: "missing".into(),
                pos: Pos::new(2, 10)
            }]
        );
    }

    #[test]
    fn test_annotated_mismatch() {
        let msgs = messages("var n: number = \"text\";");
        assert_eq!(msgs, vec!["variable `n` expects `number`, found `string`"]);
    }

    #[test]
    fn test_arity_mismatch() {
        let msgs = messages("function add(a, b) { return a + b; }\nadd(1);");
        assert_eq!(msgs, vec!["`add` expects 2 argument(s), found 1"]);
    }

    #[test]
    fn test_return_type_is_checked() {
        let msgs = messages("function f(): string { return 1; }");
        assert_eq!(msgs, vec!["return value expects `string`, found `number`"]);
    }

    #[test]
    fn test_method_binds_this_slot_and_members() {
        let src = "class Counter { var count: number = 0; inc(by: number) { count += by; return this.count; } }";
        let program = resolve(src).unwrap();
        let Item::Class(class) = &program.items[0] else {
            panic!("expected class");
        };
        // slot 0 is `this`, slot 1 is `by`.
        assert_eq!(class.methods[0].func.frame_size, 2);
        let Stmt::Expr(expr) = &class.methods[0].func.body.stmts[0] else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { target, .. } = &expr.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(&target.kind, ExprKind::Ident { binding: Some(Binding::Member(m)), .. } if m == "count"));
    }

    #[test]
    fn test_inherited_members_resolve_through_base_scope() {
        let src = "class A { protected var x = 1; } class B extends A { get() { return x; } }";
        assert!(resolve(src).is_ok());
    }

    #[test]
    fn test_private_member_is_hidden_from_subclass() {
        let msgs = messages("class A { private var x = 1; } class B extends A { get() { return x; } }");
        assert_eq!(msgs, vec!["member `x` of `A` is private"]);
    }

    #[test]
    fn test_interface_conformance() {
        let src = "interface Shape { area(): number; } class Sq implements Shape { side() { return 1; } }";
        let msgs = messages(src);
        assert_eq!(msgs, vec!["class `Sq` does not implement `Shape.area`"]);
    }

    #[test]
    fn test_inheritance_cycle_is_reported_once() {
        let msgs = messages("class A extends B { } class B extends A { }");
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("inheritance cycle"));
    }

    #[test]
    fn test_interface_cycles_are_reported_in_name_order() {
        let msgs = messages("interface B extends A { } interface A extends B { }");
        let cycles: Vec<&String> = msgs.iter().filter(|m| m.contains("inheritance cycle")).collect();
        assert_eq!(
            cycles,
            vec![
                "inheritance cycle: interface `A` extends itself",
                "inheritance cycle: interface `B` extends itself"
            ]
        );
    }

    #[test]
    fn test_subclass_is_assignable_to_base_and_interface() {
        let src = "interface Named { name(): string; }\n\
                   class Animal implements Named { name(): string { return \"a\"; } }\n\
                   class Dog extends Animal { }\n\
                   var a: Animal = new Dog();\n\
                   var n: Named = new Dog();";
        assert!(resolve(src).is_ok());
    }

    #[test]
    fn test_imports_bind_natives() {
        let src = "import { sqrt } from \"math\";\nimport time;\nvar r = sqrt(4) + time.now();";
        assert!(resolve(src).is_ok());
        let msgs = messages("import { nope } from \"math\";");
        assert_eq!(msgs, vec!["cannot find `math.nope` in this scope"]);
    }

    #[test]
    fn test_prelude_can_be_shadowed() {
        assert!(resolve("function print(x) { return x; }\nprint(1);").is_ok());
    }

    #[test]
    fn test_return_at_top_level_is_rejected() {
        let msgs = messages("return 1;");
        assert_eq!(msgs, vec!["`return` outside of a function"]);
    }

    #[test]
    fn test_await_of_async_call_yields_declared_type() {
        let src = "async function f(): number { return 1; }\n\
                   async function g() { var n: number = await f(); var s: string = await f(); }";
        let msgs = messages(src);
        assert_eq!(msgs, vec!["variable `s` expects `string`, found `number`"]);
    }

    #[test]
    fn test_await_requires_async_body() {
        let src = "import time;\n\
                   on slow (e) { await time.sleep(1000); }\n\
                   function f() { await time.sleep(1); }\n\
                   on async fine (e) { await time.sleep(1); }\n\
                   async function g() { await time.sleep(1); }\n\
                   await time.sleep(1);";
        let errs = resolve(src).unwrap_err();
        let lines: Vec<u32> = errs.iter().map(|e| e.pos().line).collect();
        assert_eq!(lines, vec![2, 3]);
        assert_eq!(
            errs[0].to_string(),
            "`await` is only allowed at top level or in an async function or handler"
        );
    }

    #[test]
    fn test_errors_accumulate_across_program() {
        let errs = resolve("var a = b;\nvar c = d;\nfunction f(x, x) { }").unwrap_err();
        assert_eq!(errs.len(), 3);
    }
}
