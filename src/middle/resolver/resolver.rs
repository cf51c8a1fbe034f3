// src/middle/resolver/resolver.rs
//! # Resolver: name binding and static checks
//!
//! Two phases over one program. `register` hoists every top-level
//! declaration (functions, classes, interfaces, imports, services and
//! program variables) so bodies may refer to names declared later in the
//! file, then wires the class hierarchy. `resolve` walks every body, binds
//! each identifier use, assigns frame slots and runs the type checks in
//! `typecheck.rs`. Errors accumulate; both phases always run to the end.
use crate::error::ResolveError;
use crate::frontend::ast::{
    Binding, Block, ClassDecl, FunctionDecl, HandlerDecl, ImportDecl, ImportKind, InterfaceDecl, Item,
    NodeId, Program, Stmt, UsesDecl, Visibility,
};
use crate::frontend::token::Pos;
use crate::middle::symbols::{
    AiServiceSymbol, FunctionSymbol, ImportSymbol, ParameterSymbol, ScopeId, ScopeKind, Symbol,
    SymbolKind, SymbolTable, TypeSymbol, TypeSymbolKind,
};
use crate::middle::types::{Type, TypeEnv};
use crate::runtime::host;
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Everything known about a class after registration.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub decl: NodeId,
    pub pos: Pos,
    pub base: Option<String>,
    pub interfaces: Vec<String>,
    pub scope: Option<ScopeId>,
    pub fields: IndexMap<String, (Type, Visibility)>,
    pub methods: IndexMap<String, FunctionSymbol>,
    pub constructor: Option<FunctionSymbol>,
}

#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub name: String,
    pub pos: Pos,
    pub extends: Vec<String>,
    pub methods: IndexMap<String, FunctionSymbol>,
}

/// What kind of body is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FnKind {
    Main,
    Function,
    Method,
    Constructor,
    Handler,
    FieldInit,
}

/// Per-body state: slot allocation and the context checks depend on.
#[derive(Debug, Clone)]
pub(super) struct FnCtx {
    pub kind: FnKind,
    pub class: Option<String>,
    pub ret: Option<Type>,
    /// Whether `await` may suspend this body.
    pub is_async: bool,
    next_slot: u16,
}

impl FnCtx {
    fn new(kind: FnKind, class: Option<String>, ret: Option<Type>) -> Self {
        // Slot 0 holds `this` in every class body.
        let next_slot = u16::from(class.is_some());
        Self {
            kind,
            class,
            ret,
            is_async: kind == FnKind::Main,
            next_slot,
        }
    }

    fn alloc(&mut self) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }
}

pub struct Resolver {
    pub table: SymbolTable,
    pub types: TypeEnv,
    pub classes: HashMap<String, ClassInfo>,
    pub interfaces: HashMap<String, InterfaceInfo>,
    pub(super) program_scope: ScopeId,
    pub(super) ctx: FnCtx,
    pub(super) errors: Vec<ResolveError>,
    globals: Vec<String>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        let mut table = SymbolTable::new();
        let prelude = table.prelude();
        for name in host::module_exports(host::PRELUDE).unwrap_or_default() {
            table.try_define(
                prelude,
                Symbol::new(
                    name,
                    Type::Any,
                    SymbolKind::Native {
                        module: host::PRELUDE.to_string(),
                    },
                    Pos::default(),
                ),
            );
        }
        let program_scope = table.create_child(prelude, ScopeKind::Program);
        Self {
            table,
            types: TypeEnv::new(),
            classes: HashMap::new(),
            interfaces: HashMap::new(),
            program_scope,
            ctx: FnCtx::new(FnKind::Main, None, None),
            errors: Vec::new(),
            globals: Vec::new(),
        }
    }

    /// Consumes the resolver, yielding every error found by both phases.
    pub fn finish(self) -> Result<(), Vec<ResolveError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    pub(super) fn error(&mut self, err: ResolveError) {
        self.errors.push(err);
    }

    pub(super) fn mismatch(&mut self, pos: Pos, message: impl Into<String>) {
        self.errors.push(ResolveError::TypeMismatch {
            message: message.into(),
            pos,
        });
    }

    pub(super) fn define(&mut self, scope: ScopeId, symbol: Symbol) {
        let (name, pos) = (symbol.name.clone(), symbol.pos);
        if !self.table.try_define(scope, symbol) {
            self.error(ResolveError::DuplicateSymbol { name, pos });
        }
    }

    // ----- Phase A: hoisting -------------------------------------------------

    pub fn register(&mut self, program: &Program) {
        let scope = self.program_scope;
        for item in &program.items {
            match item {
                Item::Function(f) => {
                    let sym = function_symbol(f, None, Visibility::Public);
                    self.define(scope, Symbol::new(&f.name, sym.signature(), SymbolKind::Function(sym), f.pos));
                }
                Item::Class(c) => self.register_type(&c.name, c.id, TypeSymbolKind::Class, c.pos),
                Item::Interface(i) => self.register_type(&i.name, i.id, TypeSymbolKind::Interface, i.pos),
                Item::Import(import) => self.register_import(import),
                Item::Uses(uses) => self.register_service(uses),
                Item::Stmt(Stmt::Var { name, ty, pos, .. }) => {
                    let index = self.globals.len() as u32;
                    let before = self.errors.len();
                    let sym = Symbol::new(
                        name,
                        Type::from_optional(ty.as_ref()),
                        SymbolKind::Variable {
                            binding: Binding::Global(index),
                        },
                        *pos,
                    );
                    self.define(scope, sym);
                    if self.errors.len() == before {
                        self.globals.push(name.clone());
                    }
                }
                Item::Handler(_) | Item::Stmt(_) => {}
            }
        }

        // Every type name is known now; wire up the hierarchy.
        for item in &program.items {
            match item {
                Item::Class(c) => self.register_class_header(c),
                Item::Interface(i) => self.register_interface(i),
                _ => {}
            }
        }
        let mut names: Vec<String> = self.classes.keys().cloned().collect();
        names.sort();
        for name in &names {
            self.ensure_class_scope(name, &mut Vec::new());
        }
        for item in &program.items {
            if let Item::Class(c) = item {
                self.register_class_members(c);
            }
        }
        self.check_interface_cycles();
        for name in &names {
            self.check_conformance(name);
        }
    }

    fn register_type(&mut self, name: &str, decl: NodeId, kind: TypeSymbolKind, pos: Pos) {
        let before = self.errors.len();
        self.define(
            self.program_scope,
            Symbol::new(name, Type::Named(name.to_string()), SymbolKind::Type(TypeSymbol { kind, decl }), pos),
        );
        if self.errors.len() == before {
            self.types.declare(name);
        }
    }

    fn register_import(&mut self, import: &ImportDecl) {
        let Some(exports) = host::module_exports(&import.module) else {
            self.error(ResolveError::UnresolvedSymbol {
                name: import.module.clone(),
                pos: import.pos,
            });
            return;
        };
        let native = |name: &str, pos: Pos| {
            Symbol::new(
                name,
                Type::Any,
                SymbolKind::Native {
                    module: import.module.clone(),
                },
                pos,
            )
        };
        match &import.kind {
            ImportKind::Names(names) => {
                for (name, pos) in names {
                    if exports.contains(&name.as_str()) {
                        self.define(self.program_scope, native(name, *pos));
                    } else {
                        self.error(ResolveError::UnresolvedSymbol {
                            name: format!("{}.{}", import.module, name),
                            pos: *pos,
                        });
                    }
                }
            }
            ImportKind::Module => {
                let exports = exports
                    .iter()
                    .map(|name| (name.to_string(), native(name, import.pos)))
                    .collect();
                let sym = ImportSymbol {
                    module: import.module.clone(),
                    exports,
                };
                self.define(
                    self.program_scope,
                    Symbol::new(&import.module, Type::Object, SymbolKind::Import(sym), import.pos),
                );
            }
        }
    }

    fn register_service(&mut self, uses: &UsesDecl) {
        let mut config = BTreeMap::new();
        for (key, expr) in &uses.config {
            match super::typecheck::literal_json(expr) {
                Some(value) => {
                    config.insert(key.clone(), value);
                }
                None => self.mismatch(
                    expr.pos,
                    format!("option `{}` of service `{}` must be a literal value", key, uses.name),
                ),
            }
        }
        let sym = AiServiceSymbol {
            capability: uses.capability.clone(),
            config,
        };
        self.define(
            self.program_scope,
            Symbol::new(&uses.name, Type::Any, SymbolKind::AiService(sym), uses.pos),
        );
    }

    /// Looks up a type name in the program scope and checks its kind.
    fn type_kind(&self, name: &str) -> Option<TypeSymbolKind> {
        match self.table.lookup(self.program_scope, name).map(|s| &s.kind) {
            Some(SymbolKind::Type(t)) => Some(t.kind),
            _ => None,
        }
    }

    fn expect_type_kind(&mut self, name: &str, pos: Pos, want: TypeSymbolKind, role: &str) -> bool {
        match self.type_kind(name) {
            Some(kind) if kind == want => true,
            Some(_) => {
                self.mismatch(pos, format!("`{}` cannot be used as {}", name, role));
                false
            }
            None => {
                self.error(ResolveError::UnresolvedSymbol {
                    name: name.to_string(),
                    pos,
                });
                false
            }
        }
    }

    fn register_class_header(&mut self, class: &ClassDecl) {
        if self.classes.contains_key(&class.name) {
            return;
        }
        let mut base = None;
        if let Some((name, pos)) = &class.base {
            if self.expect_type_kind(name, *pos, TypeSymbolKind::Class, "a base class") {
                self.types.add_super(&class.name, name);
                base = Some(name.clone());
            }
        }
        let mut interfaces = Vec::new();
        for (name, pos) in &class.interfaces {
            if self.expect_type_kind(name, *pos, TypeSymbolKind::Interface, "an interface") {
                self.types.add_super(&class.name, name);
                interfaces.push(name.clone());
            }
        }
        self.classes.insert(
            class.name.clone(),
            ClassInfo {
                name: class.name.clone(),
                decl: class.id,
                pos: class.pos,
                base,
                interfaces,
                scope: None,
                fields: IndexMap::new(),
                methods: IndexMap::new(),
                constructor: None,
            },
        );
    }

    /// Creates the class scope, parented on the base class scope so member
    /// lookup walks the inheritance chain. Reports inheritance cycles.
    fn ensure_class_scope(&mut self, name: &str, visiting: &mut Vec<String>) -> ScopeId {
        let Some(info) = self.classes.get(name) else {
            return self.program_scope;
        };
        if let Some(scope) = info.scope {
            return scope;
        }
        let (base, pos) = (info.base.clone(), info.pos);
        if visiting.iter().any(|v| v == name) {
            self.mismatch(pos, format!("inheritance cycle: class `{}` extends itself", name));
            return self.program_scope;
        }
        visiting.push(name.to_string());
        let parent = match base {
            Some(base) => self.ensure_class_scope(&base, visiting),
            None => self.program_scope,
        };
        visiting.pop();
        if let Some(scope) = self.classes.get(name).and_then(|c| c.scope) {
            // Set while unwinding a cycle.
            return scope;
        }
        let scope = self.table.create_child(parent, ScopeKind::Class);
        if let Some(info) = self.classes.get_mut(name) {
            info.scope = Some(scope);
        }
        scope
    }

    fn register_class_members(&mut self, class: &ClassDecl) {
        let Some(scope) = self.classes.get(&class.name).and_then(|c| c.scope) else {
            return;
        };
        if self.classes[&class.name].decl != class.id {
            // Duplicate class declaration, already reported.
            return;
        }
        let mut fields = IndexMap::new();
        for field in &class.fields {
            let ty = Type::from_optional(field.ty.as_ref());
            self.check_type(&ty, field.pos);
            fields.insert(field.name.clone(), (ty.clone(), field.visibility));
            self.define(
                scope,
                Symbol::new(
                    &field.name,
                    ty,
                    SymbolKind::Field {
                        visibility: field.visibility,
                        owner: class.name.clone(),
                    },
                    field.pos,
                ),
            );
        }
        let mut methods = IndexMap::new();
        for method in &class.methods {
            let sym = function_symbol(&method.func, Some(&class.name), method.visibility);
            methods.insert(method.func.name.clone(), sym.clone());
            self.define(
                scope,
                Symbol::new(&method.func.name, sym.signature(), SymbolKind::Function(sym), method.func.pos),
            );
        }
        let constructor = class
            .constructor
            .as_ref()
            .map(|ctor| function_symbol(ctor, Some(&class.name), Visibility::Public));
        if let Some(info) = self.classes.get_mut(&class.name) {
            info.fields = fields;
            info.methods = methods;
            info.constructor = constructor;
        }
    }

    fn register_interface(&mut self, iface: &InterfaceDecl) {
        if self.interfaces.contains_key(&iface.name) {
            return;
        }
        let mut extends = Vec::new();
        for (name, pos) in &iface.extends {
            if self.expect_type_kind(name, *pos, TypeSymbolKind::Interface, "an interface") {
                self.types.add_super(&iface.name, name);
                extends.push(name.clone());
            }
        }
        let mut methods = IndexMap::new();
        for sig in &iface.methods {
            let params: Vec<ParameterSymbol> = sig
                .params
                .iter()
                .enumerate()
                .map(|(index, p)| ParameterSymbol {
                    name: p.name.clone(),
                    ty: Type::from_optional(p.ty.as_ref()),
                    index,
                })
                .collect();
            let sym = FunctionSymbol {
                params,
                ret: Type::from_optional(sig.ret.as_ref()),
                is_async: false,
                owner: Some(iface.name.clone()),
                visibility: Visibility::Public,
                decl: iface.id,
            };
            if methods.insert(sig.name.clone(), sym).is_some() {
                self.error(ResolveError::DuplicateSymbol {
                    name: sig.name.clone(),
                    pos: sig.pos,
                });
            }
        }
        self.interfaces.insert(
            iface.name.clone(),
            InterfaceInfo {
                name: iface.name.clone(),
                pos: iface.pos,
                extends,
                methods,
            },
        );
    }

    fn check_interface_cycles(&mut self) {
        let mut found = Vec::new();
        for info in self.interfaces.values() {
            if info.extends.iter().any(|ext| self.types.is_subtype(ext, &info.name)) {
                found.push((info.name.clone(), info.pos));
            }
        }
        found.sort();
        for (name, pos) in found {
            self.mismatch(pos, format!("inheritance cycle: interface `{}` extends itself", name));
        }
    }

    /// All methods an interface requires, its own and inherited.
    pub fn interface_methods(&self, name: &str) -> Vec<(String, FunctionSymbol)> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(info) = self.interfaces.get(&current) {
                out.extend(info.methods.iter().map(|(n, s)| (n.clone(), s.clone())));
                stack.extend(info.extends.iter().cloned());
            }
        }
        out
    }

    /// Walks a class and its ancestors, nearest first. Stops on cycles.
    pub fn class_chain(&self, name: &str) -> Vec<&ClassInfo> {
        let mut chain = Vec::new();
        let mut current = self.classes.get(name);
        while let Some(info) = current {
            if chain.iter().any(|c: &&ClassInfo| c.name == info.name) {
                break;
            }
            chain.push(info);
            current = info.base.as_deref().and_then(|b| self.classes.get(b));
        }
        chain
    }

    pub fn find_method(&self, class: &str, method: &str) -> Option<FunctionSymbol> {
        self.class_chain(class)
            .into_iter()
            .find_map(|c| c.methods.get(method).cloned())
    }

    pub fn find_field(&self, class: &str, field: &str) -> Option<(Type, Visibility, String)> {
        self.class_chain(class).into_iter().find_map(|c| {
            c.fields
                .get(field)
                .map(|(ty, vis)| (ty.clone(), *vis, c.name.clone()))
        })
    }

    pub fn find_constructor(&self, class: &str) -> Option<FunctionSymbol> {
        self.class_chain(class)
            .into_iter()
            .find_map(|c| c.constructor.clone())
    }

    fn check_conformance(&mut self, class: &str) {
        let Some(info) = self.classes.get(class) else {
            return;
        };
        let pos = info.pos;
        let mut problems = Vec::new();
        for iface in self.class_chain(class).iter().flat_map(|c| c.interfaces.clone()) {
            for (method, required) in self.interface_methods(&iface) {
                match self.find_method(class, &method) {
                    None => problems.push(format!(
                        "class `{}` does not implement `{}.{}`",
                        class, iface, method
                    )),
                    Some(found) if found.params.len() != required.params.len() => problems.push(format!(
                        "method `{}.{}` takes {} parameter(s) but `{}.{}` requires {}",
                        class,
                        method,
                        found.params.len(),
                        iface,
                        method,
                        required.params.len()
                    )),
                    Some(_) => {}
                }
            }
        }
        for message in problems {
            self.mismatch(pos, message);
        }
    }

    /// Reports class or interface names in `ty` that were never declared.
    pub(super) fn check_type(&mut self, ty: &Type, pos: Pos) {
        let missing: Vec<String> = ty
            .named_parts()
            .into_iter()
            .filter(|name| !self.types.is_declared(name))
            .map(str::to_string)
            .collect();
        for name in missing {
            self.error(ResolveError::UnresolvedSymbol { name, pos });
        }
    }

    // ----- Phase B: bodies ---------------------------------------------------

    pub fn resolve(&mut self, program: &mut Program) {
        self.ctx = FnCtx::new(FnKind::Main, None, None);
        for item in &mut program.items {
            match item {
                Item::Function(f) => {
                    let scope = self.program_scope;
                    self.resolve_function(f, scope, None, FnKind::Function);
                }
                Item::Class(c) => self.resolve_class(c),
                Item::Handler(h) => self.resolve_handler(h),
                Item::Stmt(stmt) => self.resolve_top_stmt(stmt),
                Item::Interface(_) | Item::Import(_) | Item::Uses(_) => {}
            }
        }
        program.globals = self.globals.clone();
        program.main_frame = self.ctx.next_slot;
    }

    /// Runs `body` with a fresh function context, restoring the outer one.
    fn with_ctx<R>(&mut self, ctx: FnCtx, body: impl FnOnce(&mut Self) -> R) -> (R, u16) {
        let outer = std::mem::replace(&mut self.ctx, ctx);
        let result = body(self);
        let inner = std::mem::replace(&mut self.ctx, outer);
        (result, inner.next_slot)
    }

    fn resolve_function(&mut self, f: &mut FunctionDecl, parent: ScopeId, class: Option<&str>, kind: FnKind) {
        let ret = f.ret.as_ref().map(Type::from_annotation);
        if let Some(ret) = &ret {
            self.check_type(ret, f.pos);
        }
        let mut ctx = FnCtx::new(kind, class.map(str::to_string), ret);
        ctx.is_async = f.is_async;
        let scope = self.table.create_child(parent, ScopeKind::Function);
        let ((), frame) = self.with_ctx(ctx, |this| {
            for (index, param) in f.params.iter().enumerate() {
                let ty = Type::from_optional(param.ty.as_ref());
                this.check_type(&ty, param.pos);
                let slot = this.ctx.alloc();
                let sym = ParameterSymbol {
                    name: param.name.clone(),
                    ty: ty.clone(),
                    index,
                };
                this.define(
                    scope,
                    Symbol::new(&param.name, ty, SymbolKind::Parameter { param: sym, slot }, param.pos),
                );
            }
            this.resolve_stmts(&mut f.body.stmts, scope);
        });
        f.frame_size = frame;
    }

    fn resolve_handler(&mut self, h: &mut HandlerDecl) {
        let scope = self.table.create_child(self.program_scope, ScopeKind::Function);
        let mut ctx = FnCtx::new(FnKind::Handler, None, None);
        ctx.is_async = h.is_async;
        let ((), frame) = self.with_ctx(ctx, |this| {
            let slot = this.ctx.alloc();
            this.define(
                scope,
                Symbol::new(
                    &h.binding,
                    Type::Object,
                    SymbolKind::Variable {
                        binding: Binding::Local(slot),
                    },
                    h.pos,
                ),
            );
            this.resolve_stmts(&mut h.body.stmts, scope);
        });
        h.frame_size = frame;
    }

    fn resolve_class(&mut self, class: &mut ClassDecl) {
        let Some(scope) = self.classes.get(&class.name).and_then(|c| c.scope) else {
            return;
        };
        let name = class.name.clone();
        for field in &mut class.fields {
            let Some(init) = &mut field.init else {
                continue;
            };
            let declared = Type::from_optional(field.ty.as_ref());
            let ctx = FnCtx::new(FnKind::FieldInit, Some(name.clone()), None);
            let (actual, _) = self.with_ctx(ctx, |this| this.resolve_expr(init, scope));
            self.check_assignable(&declared, &actual, init.pos, &format!("field `{}`", field.name));
        }
        if let Some(ctor) = &mut class.constructor {
            self.resolve_function(ctor, scope, Some(&name), FnKind::Constructor);
        }
        for method in &mut class.methods {
            self.resolve_function(&mut method.func, scope, Some(&name), FnKind::Method);
        }
    }

    fn resolve_top_stmt(&mut self, stmt: &mut Stmt) {
        let scope = self.program_scope;
        if !matches!(stmt, Stmt::Var { .. }) {
            self.resolve_stmt(stmt, scope);
            return;
        }
        let Stmt::Var {
            name,
            ty,
            init,
            binding,
            pos,
        } = stmt
        else {
            return;
        };
        let declared = Type::from_optional(ty.as_ref());
        self.check_type(&declared, *pos);
        if let Some(init) = init {
            let actual = self.resolve_expr(init, scope);
            self.check_assignable(&declared, &actual, init.pos, &format!("variable `{}`", name));
        }
        *binding = match self.table.lookup_local(scope, name).map(|s| &s.kind) {
            Some(SymbolKind::Variable { binding }) => Some(binding.clone()),
            _ => None,
        };
    }

    pub(super) fn resolve_stmts(&mut self, stmts: &mut [Stmt], scope: ScopeId) {
        for stmt in stmts {
            self.resolve_stmt(stmt, scope);
        }
    }

    fn resolve_block(&mut self, block: &mut Block, parent: ScopeId) {
        let scope = self.table.create_child(parent, ScopeKind::Block);
        self.resolve_stmts(&mut block.stmts, scope);
    }

    /// Resolves a statement that forms its own scope, e.g. a loop body.
    fn resolve_nested(&mut self, stmt: &mut Stmt, parent: ScopeId) {
        let scope = self.table.create_child(parent, ScopeKind::Block);
        self.resolve_stmt(stmt, scope);
    }

    /// Declares a block-local variable in the next free frame slot.
    fn declare_local(&mut self, scope: ScopeId, name: &str, ty: Type, pos: Pos) -> Binding {
        let binding = Binding::Local(self.ctx.alloc());
        self.define(
            scope,
            Symbol::new(
                name,
                ty,
                SymbolKind::Variable {
                    binding: binding.clone(),
                },
                pos,
            ),
        );
        binding
    }

    pub(super) fn resolve_stmt(&mut self, stmt: &mut Stmt, scope: ScopeId) {
        match stmt {
            Stmt::Var {
                name,
                ty,
                init,
                pos,
                binding,
            } => {
                let declared = Type::from_optional(ty.as_ref());
                self.check_type(&declared, *pos);
                // The initializer sees the outer binding of a shadowed name.
                if let Some(init) = init {
                    let actual = self.resolve_expr(init, scope);
                    self.check_assignable(&declared, &actual, init.pos, &format!("variable `{}`", name));
                }
                *binding = Some(self.declare_local(scope, name, declared, *pos));
            }
            Stmt::Expr(expr) => {
                self.resolve_expr(expr, scope);
            }
            Stmt::If { cond, then, else_, .. } => {
                self.resolve_expr(cond, scope);
                self.resolve_nested(then, scope);
                if let Some(else_) = else_ {
                    self.resolve_nested(else_, scope);
                }
            }
            Stmt::While { cond, body, .. } => {
                self.resolve_expr(cond, scope);
                self.resolve_nested(body, scope);
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                let inner = self.table.create_child(scope, ScopeKind::Block);
                if let Some(init) = init {
                    self.resolve_stmt(init, inner);
                }
                if let Some(cond) = cond {
                    self.resolve_expr(cond, inner);
                }
                if let Some(step) = step {
                    self.resolve_expr(step, inner);
                }
                self.resolve_nested(body, inner);
            }
            Stmt::ForIn {
                name,
                iterable,
                body,
                pos,
                binding,
            } => {
                let ty = self.resolve_expr(iterable, scope);
                let element = match &ty {
                    Type::Array(inner) => (**inner).clone(),
                    Type::String => Type::String,
                    Type::Object => Type::String,
                    Type::Any => Type::Any,
                    other => {
                        self.mismatch(iterable.pos, format!("cannot iterate over a value of type `{}`", other));
                        Type::Any
                    }
                };
                let inner = self.table.create_child(scope, ScopeKind::Block);
                *binding = Some(self.declare_local(inner, name, element, *pos));
                self.resolve_nested(body, inner);
            }
            Stmt::Return { value, pos } => {
                match self.ctx.kind {
                    FnKind::Main | FnKind::FieldInit => self.mismatch(*pos, "`return` outside of a function"),
                    FnKind::Constructor if value.is_some() => {
                        self.mismatch(*pos, "a constructor cannot return a value")
                    }
                    _ => {}
                }
                if let Some(value) = value {
                    let actual = self.resolve_expr(value, scope);
                    if let Some(ret) = self.ctx.ret.clone() {
                        self.check_assignable(&ret, &actual, value.pos, "return value");
                    }
                }
            }
            Stmt::Throw { value, .. } => {
                self.resolve_expr(value, scope);
            }
            Stmt::Try {
                body,
                catch_name,
                handler,
                pos,
                catch_binding,
            } => {
                self.resolve_block(body, scope);
                let inner = self.table.create_child(scope, ScopeKind::Block);
                *catch_binding = Some(self.declare_local(inner, catch_name, Type::Any, *pos));
                self.resolve_stmts(&mut handler.stmts, inner);
            }
            Stmt::Emit { payload, .. } => {
                if let Some(payload) = payload {
                    self.resolve_expr(payload, scope);
                }
            }
            Stmt::Block(block) => self.resolve_block(block, scope),
        }
    }
}

fn function_symbol(f: &FunctionDecl, owner: Option<&str>, visibility: Visibility) -> FunctionSymbol {
    FunctionSymbol {
        params: f
            .params
            .iter()
            .enumerate()
            .map(|(index, p)| ParameterSymbol {
                name: p.name.clone(),
                ty: Type::from_optional(p.ty.as_ref()),
                index,
            })
            .collect(),
        ret: Type::from_optional(f.ret.as_ref()),
        is_async: f.is_async,
        owner: owner.map(str::to_string),
        visibility,
        decl: f.id,
    }
}
