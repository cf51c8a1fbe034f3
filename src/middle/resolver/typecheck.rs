// src/middle/resolver/typecheck.rs
//! Expression binding and type inference.
//!
//! `resolve_expr` binds every identifier inside an expression and returns
//! its inferred static type. Anything the checker cannot see through is
//! `any`, which keeps checking gradual.
use super::resolver::Resolver;
use crate::error::ResolveError;
use crate::frontend::ast::{AssignOp, Binding, BinaryOp, Expr, ExprKind, UnaryOp, Visibility};
use crate::frontend::token::Pos;
use crate::middle::symbols::{FunctionSymbol, ScopeId, SymbolKind, TypeSymbolKind};
use crate::middle::types::Type;
use serde_json::Value as Json;

/// Converts a literal-only expression (numbers, strings, booleans, null,
/// and arrays or objects of those) into JSON.
pub fn literal_json(expr: &Expr) -> Option<Json> {
    match &expr.kind {
        ExprKind::Number { value, .. } => serde_json::Number::from_f64(*value).map(Json::Number),
        ExprKind::Str { value, .. } => Some(Json::String(value.clone())),
        ExprKind::Bool(b) => Some(Json::Bool(*b)),
        ExprKind::Null => Some(Json::Null),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            expr,
        } => match &expr.kind {
            ExprKind::Number { value, .. } => serde_json::Number::from_f64(-*value).map(Json::Number),
            _ => None,
        },
        ExprKind::Array(items) => items.iter().map(literal_json).collect::<Option<Vec<_>>>().map(Json::Array),
        ExprKind::Object(entries) => entries
            .iter()
            .map(|(k, v)| literal_json(v).map(|v| (k.clone(), v)))
            .collect::<Option<serde_json::Map<_, _>>>()
            .map(Json::Object),
        _ => None,
    }
}

/// What a member access resolved to on a statically known class.
enum MemberKind {
    Field(Type),
    Method(FunctionSymbol),
}

impl Resolver {
    pub(super) fn check_assignable(&mut self, expected: &Type, actual: &Type, pos: Pos, what: &str) {
        if !self.types.is_compatible(expected, actual) {
            self.mismatch(
                pos,
                format!("{} expects `{}`, found `{}`", what, expected, actual),
            );
        }
    }

    pub fn resolve_expr(&mut self, expr: &mut Expr, scope: ScopeId) -> Type {
        let pos = expr.pos;
        match &mut expr.kind {
            ExprKind::Number { .. } => Type::Number,
            ExprKind::Str { .. } => Type::String,
            ExprKind::Bool(_) => Type::Boolean,
            ExprKind::Null => Type::Any,
            ExprKind::This => match &self.ctx.class {
                Some(class) => Type::Named(class.clone()),
                None => {
                    self.error(ResolveError::UnresolvedSymbol {
                        name: "this".to_string(),
                        pos,
                    });
                    Type::Any
                }
            },
            ExprKind::Ident { name, binding } => {
                let (bound, ty) = self.resolve_ident(name, scope, pos);
                *binding = bound;
                ty
            }
            ExprKind::Array(items) => {
                let mut element: Option<Type> = None;
                for item in items.iter_mut() {
                    let ty = self.resolve_expr(item, scope);
                    element = match element {
                        None => Some(ty),
                        Some(prev) if prev == ty => Some(prev),
                        Some(_) => Some(Type::Any),
                    };
                }
                Type::Array(Box::new(element.unwrap_or(Type::Any)))
            }
            ExprKind::Object(entries) => {
                for (_, value) in entries.iter_mut() {
                    self.resolve_expr(value, scope);
                }
                Type::Object
            }
            ExprKind::Unary { op, expr: inner } => {
                let op = *op;
                let ty = self.resolve_expr(inner, scope);
                match op {
                    UnaryOp::Not => Type::Boolean,
                    UnaryOp::Neg | UnaryOp::Plus => {
                        if !ty.is_numeric() {
                            self.mismatch(pos, format!("cannot negate a value of type `{}`", ty));
                        }
                        Type::Number
                    }
                }
            }
            ExprKind::Binary { op, left, right } => {
                let op = *op;
                let l = self.resolve_expr(left, scope);
                let r = self.resolve_expr(right, scope);
                self.binary_type(op, &l, &r, pos)
            }
            ExprKind::Assign { op, target, value } => {
                let op = *op;
                self.resolve_assign(op, target, value, scope)
            }
            ExprKind::Call { .. } => self.resolve_call(expr, scope).0,
            ExprKind::Index { object, index } => {
                let obj = self.resolve_expr(object, scope);
                let idx = self.resolve_expr(index, scope);
                match obj {
                    Type::Array(inner) => {
                        if !idx.is_numeric() {
                            self.mismatch(index.pos, format!("array index must be a number, found `{}`", idx));
                        }
                        *inner
                    }
                    Type::String => Type::String,
                    Type::Number | Type::Boolean | Type::Function { .. } => {
                        self.mismatch(pos, format!("cannot index a value of type `{}`", obj));
                        Type::Any
                    }
                    _ => Type::Any,
                }
            }
            ExprKind::Member { object, name } => {
                let name = name.clone();
                self.resolve_member(object, &name, scope, pos)
            }
            ExprKind::New { class, args } => {
                let class = class.clone();
                self.resolve_new(&class, args, scope, pos)
            }
            ExprKind::Await(inner) => {
                // Plain handlers share one dispatcher; only async bodies may suspend.
                if !self.ctx.is_async {
                    self.mismatch(pos, "`await` is only allowed at top level or in an async function or handler");
                }
                if matches!(inner.kind, ExprKind::Call { .. }) {
                    let (ty, sig) = self.resolve_call(inner, scope);
                    match sig {
                        Some(sig) if sig.is_async => sig.ret,
                        _ => ty,
                    }
                } else {
                    self.resolve_expr(inner, scope)
                }
            }
            ExprKind::Parallel(inner) => match &mut inner.kind {
                ExprKind::Array(items) => {
                    for item in items.iter_mut() {
                        self.resolve_expr(item, scope);
                    }
                    Type::Array(Box::new(Type::Any))
                }
                _ => {
                    let (ty, sig) = if matches!(inner.kind, ExprKind::Call { .. }) {
                        self.resolve_call(inner, scope)
                    } else {
                        (self.resolve_expr(inner, scope), None)
                    };
                    match sig {
                        Some(sig) if sig.is_async => sig.ret,
                        _ => ty,
                    }
                }
            },
        }
    }

    fn resolve_ident(&mut self, name: &str, scope: ScopeId, pos: Pos) -> (Option<Binding>, Type) {
        let Some(sym) = self.table.lookup(scope, name).cloned() else {
            self.error(ResolveError::UnresolvedSymbol {
                name: name.to_string(),
                pos,
            });
            return (None, Type::Any);
        };
        let Some(binding) = sym.binding() else {
            self.mismatch(pos, format!("{} `{}` is not a value", sym.describe(), name));
            return (None, Type::Any);
        };
        if let Binding::Module(_) = binding {
            self.mismatch(
                pos,
                format!("module `{}` can only be used to access its members", name),
            );
            return (None, Type::Any);
        }
        let ty = match &sym.kind {
            SymbolKind::Field { visibility, owner } => {
                self.check_visibility(*visibility, owner, name, pos);
                sym.ty.clone()
            }
            SymbolKind::Function(f) => {
                if let Some(owner) = &f.owner {
                    self.check_visibility(f.visibility, owner, name, pos);
                }
                sym.ty.clone()
            }
            SymbolKind::Variable { .. } | SymbolKind::Parameter { .. } => sym.ty.clone(),
            _ => Type::Any,
        };
        (Some(binding), ty)
    }

    /// Private members are visible only inside the declaring class; protected
    /// members also inside its subclasses.
    fn check_visibility(&mut self, visibility: Visibility, owner: &str, name: &str, pos: Pos) {
        let allowed = match (visibility, &self.ctx.class) {
            (Visibility::Public, _) => true,
            (Visibility::Private, Some(current)) => current == owner,
            (Visibility::Protected, Some(current)) => self.types.is_subtype(current, owner),
            (_, None) => false,
        };
        if !allowed {
            let level = if visibility == Visibility::Private {
                "private"
            } else {
                "protected"
            };
            self.mismatch(pos, format!("member `{}` of `{}` is {}", name, owner, level));
        }
    }

    fn lookup_member(&self, class: &str, name: &str) -> Option<(MemberKind, Visibility, String)> {
        if let Some((ty, vis, owner)) = self.find_field(class, name) {
            return Some((MemberKind::Field(ty), vis, owner));
        }
        if let Some(method) = self.find_method(class, name) {
            let (vis, owner) = (method.visibility, method.owner.clone().unwrap_or_default());
            return Some((MemberKind::Method(method), vis, owner));
        }
        None
    }

    /// Type of `object.name`. Accesses on host modules are checked against the
    /// module's exports and bind the module directly.
    fn resolve_member(&mut self, object: &mut Expr, name: &str, scope: ScopeId, pos: Pos) -> Type {
        if let ExprKind::Ident { name: module, binding } = &mut object.kind {
            if let Some(SymbolKind::Import(import)) = self.table.lookup(scope, module).map(|s| &s.kind) {
                if import.exports.contains_key(name) {
                    *binding = Some(Binding::Module(import.module.clone()));
                } else {
                    let missing = format!("{}.{}", import.module, name);
                    self.error(ResolveError::UnresolvedSymbol { name: missing, pos });
                }
                return Type::Any;
            }
        }
        let ty = self.resolve_expr(object, scope);
        self.member_type(&ty, name, pos).0
    }

    /// Returns the member's type plus its signature when it is a method.
    fn member_type(&mut self, object: &Type, name: &str, pos: Pos) -> (Type, Option<FunctionSymbol>) {
        match object {
            Type::Named(class) if self.classes.contains_key(class) => match self.lookup_member(class, name) {
                Some((member, vis, owner)) => {
                    self.check_visibility(vis, &owner, name, pos);
                    match member {
                        MemberKind::Field(ty) => (ty, None),
                        MemberKind::Method(sig) => (sig.signature(), Some(sig)),
                    }
                }
                None => {
                    self.mismatch(pos, format!("class `{}` has no member `{}`", class, name));
                    (Type::Any, None)
                }
            },
            Type::Named(iface) if self.interfaces.contains_key(iface) => {
                match self.interface_methods(iface).into_iter().find(|(n, _)| n == name) {
                    Some((_, sig)) => (sig.signature(), Some(sig)),
                    None => {
                        self.mismatch(pos, format!("interface `{}` has no method `{}`", iface, name));
                        (Type::Any, None)
                    }
                }
            }
            Type::Array(_) | Type::String if name == "length" => (Type::Number, None),
            Type::Number | Type::Boolean => {
                self.mismatch(pos, format!("a value of type `{}` has no member `{}`", object, name));
                (Type::Any, None)
            }
            _ => (Type::Any, None),
        }
    }

    /// Resolves a call, returning its type and, when statically known, the
    /// callee signature.
    pub(super) fn resolve_call(&mut self, expr: &mut Expr, scope: ScopeId) -> (Type, Option<FunctionSymbol>) {
        let pos = expr.pos;
        if !matches!(expr.kind, ExprKind::Call { .. }) {
            return (self.resolve_expr(expr, scope), None);
        }
        let ExprKind::Call { callee, args } = &mut expr.kind else {
            return (Type::Any, None);
        };

        let callee_pos = callee.pos;
        let (label, sig) = match &mut callee.kind {
            ExprKind::Member { object, name } => {
                let name = name.clone();
                let is_module = matches!(&object.kind, ExprKind::Ident { name: m, .. }
                    if matches!(self.table.lookup(scope, m).map(|s| &s.kind), Some(SymbolKind::Import(_))));
                if is_module {
                    self.resolve_member(object, &name, scope, callee_pos);
                    (name, None)
                } else {
                    let obj = self.resolve_expr(object, scope);
                    let (_, sig) = self.member_type(&obj, &name, callee_pos);
                    (name, sig)
                }
            }
            ExprKind::Ident { name, binding } => {
                let label = name.clone();
                let (bound, _) = self.resolve_ident(name, scope, callee_pos);
                let sig = match &bound {
                    Some(Binding::Function(_)) | Some(Binding::Member(_)) => {
                        match self.table.lookup(scope, name).map(|s| &s.kind) {
                            Some(SymbolKind::Function(f)) => Some(f.clone()),
                            _ => None,
                        }
                    }
                    Some(Binding::Class(class)) => {
                        self.mismatch(
                            callee_pos,
                            format!("class `{}` must be instantiated with `new`", class),
                        );
                        None
                    }
                    _ => None,
                };
                *binding = bound;
                (label, sig)
            }
            _ => {
                self.resolve_expr(callee, scope);
                (String::new(), None)
            }
        };

        let arg_types: Vec<(Type, Pos)> = args
            .iter_mut()
            .map(|arg| (self.resolve_expr(arg, scope), arg.pos))
            .collect();

        let Some(sig) = sig else {
            return (Type::Any, None);
        };
        self.check_arguments(&label, &sig, &arg_types, pos);
        // Calling an async function yields a task; `await` unwraps it.
        let ty = if sig.is_async { Type::Any } else { sig.ret.clone() };
        (ty, Some(sig))
    }

    fn check_arguments(&mut self, label: &str, sig: &FunctionSymbol, args: &[(Type, Pos)], pos: Pos) {
        if args.len() != sig.params.len() {
            self.mismatch(
                pos,
                format!(
                    "`{}` expects {} argument(s), found {}",
                    label,
                    sig.params.len(),
                    args.len()
                ),
            );
            return;
        }
        for (param, (ty, arg_pos)) in sig.params.iter().zip(args) {
            self.check_assignable(&param.ty, ty, *arg_pos, &format!("parameter `{}` of `{}`", param.name, label));
        }
    }

    fn resolve_new(&mut self, class: &str, args: &mut [Expr], scope: ScopeId, pos: Pos) -> Type {
        let arg_types: Vec<(Type, Pos)> = args
            .iter_mut()
            .map(|arg| (self.resolve_expr(arg, scope), arg.pos))
            .collect();
        match self.table.lookup(scope, class).map(|s| &s.kind) {
            Some(SymbolKind::Type(t)) if t.kind == TypeSymbolKind::Class => {}
            Some(_) => {
                self.mismatch(pos, format!("`{}` is not a class", class));
                return Type::Any;
            }
            None => {
                self.error(ResolveError::UnresolvedSymbol {
                    name: class.to_string(),
                    pos,
                });
                return Type::Any;
            }
        }
        match self.find_constructor(class) {
            Some(ctor) => {
                if ctor.visibility != Visibility::Public {
                    self.check_visibility(ctor.visibility, class, "constructor", pos);
                }
                self.check_arguments(&format!("new {}", class), &ctor, &arg_types, pos);
            }
            None if !arg_types.is_empty() => {
                self.mismatch(pos, format!("class `{}` has no constructor taking arguments", class));
            }
            None => {}
        }
        Type::Named(class.to_string())
    }

    fn resolve_assign(&mut self, op: AssignOp, target: &mut Expr, value: &mut Expr, scope: ScopeId) -> Type {
        let target_pos = target.pos;
        let target_ty = match &mut target.kind {
            ExprKind::Ident { name, binding } => match self.table.lookup(scope, name).cloned() {
                Some(sym) if sym.is_assignable() => {
                    let (bound, ty) = self.resolve_ident(name, scope, target_pos);
                    *binding = bound;
                    ty
                }
                Some(sym) => {
                    self.mismatch(target_pos, format!("cannot assign to {} `{}`", sym.describe(), name));
                    Type::Any
                }
                None => {
                    self.error(ResolveError::UnresolvedSymbol {
                        name: name.clone(),
                        pos: target_pos,
                    });
                    Type::Any
                }
            },
            ExprKind::Member { object, name } => {
                let name = name.clone();
                if let ExprKind::Ident { name: module, .. } = &object.kind {
                    if let Some(SymbolKind::Import(_)) = self.table.lookup(scope, module).map(|s| &s.kind) {
                        self.mismatch(target_pos, format!("cannot assign to host function `{}.{}`", module, name));
                        return Type::Any;
                    }
                }
                let obj = self.resolve_expr(object, scope);
                let (ty, sig) = self.member_type(&obj, &name, target_pos);
                if sig.is_some() {
                    self.mismatch(target_pos, format!("cannot assign to method `{}`", name));
                }
                ty
            }
            _ => self.resolve_expr(target, scope),
        };
        let value_ty = self.resolve_expr(value, scope);
        let result = match op.binary() {
            Some(bin) => self.binary_type(bin, &target_ty, &value_ty, value.pos),
            None => value_ty,
        };
        self.check_assignable(&target_ty, &result, value.pos, "assignment");
        result
    }

    fn binary_type(&mut self, op: BinaryOp, l: &Type, r: &Type, pos: Pos) -> Type {
        match op {
            BinaryOp::Add => match (l, r) {
                (Type::String, _) | (_, Type::String) => Type::String,
                (Type::Number, Type::Number) => Type::Number,
                (Type::Any, _) | (_, Type::Any) => Type::Any,
                _ => {
                    self.mismatch(pos, format!("cannot apply `+` to `{}` and `{}`", l, r));
                    Type::Any
                }
            },
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                if !l.is_numeric() || !r.is_numeric() {
                    self.mismatch(
                        pos,
                        format!("cannot apply `{}` to `{}` and `{}`", op.symbol(), l, r),
                    );
                }
                Type::Number
            }
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::LtEq | BinaryOp::GtEq => {
                let ok = matches!(
                    (l, r),
                    (Type::Any, _) | (_, Type::Any) | (Type::Number, Type::Number) | (Type::String, Type::String)
                );
                if !ok {
                    self.mismatch(
                        pos,
                        format!("cannot compare `{}` with `{}` using `{}`", l, r, op.symbol()),
                    );
                }
                Type::Boolean
            }
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::And | BinaryOp::Or => Type::Boolean,
        }
    }
}
