// src/middle/symbols.rs
//! Symbol table: an arena of lexical scopes linked by parent ids.
//!
//! Scopes never hold references to each other or to the AST; declarations
//! are referenced by `NodeId`, so the table can outlive the borrow of the
//! program it describes.
use crate::frontend::ast::{Binding, NodeId, Visibility};
use crate::frontend::token::Pos;
use crate::middle::types::Type;
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Host prelude, parent of the program scope so user code may shadow it.
    Prelude,
    Program,
    Class,
    Function,
    Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSymbol {
    pub name: String,
    pub ty: Type,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSymbol {
    pub params: Vec<ParameterSymbol>,
    pub ret: Type,
    pub is_async: bool,
    /// Class that declares this function when it is a method.
    pub owner: Option<String>,
    pub visibility: Visibility,
    pub decl: NodeId,
}

impl FunctionSymbol {
    pub fn signature(&self) -> Type {
        Type::Function {
            params: self.params.iter().map(|p| p.ty.clone()).collect(),
            ret: Box::new(self.ret.clone()),
        }
    }
}

/// A whole host module bound as a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSymbol {
    pub module: String,
    pub exports: HashMap<String, Symbol>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiServiceSymbol {
    pub capability: String,
    pub config: BTreeMap<String, Json>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeSymbolKind {
    Class,
    Interface,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeSymbol {
    pub kind: TypeSymbolKind,
    pub decl: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolKind {
    /// `var` declaration; `binding` is a local or global slot.
    Variable { binding: Binding },
    Parameter { param: ParameterSymbol, slot: u16 },
    Function(FunctionSymbol),
    Field { visibility: Visibility, owner: String },
    /// Single host function brought in by name.
    Native { module: String },
    Import(ImportSymbol),
    AiService(AiServiceSymbol),
    Type(TypeSymbol),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub ty: Type,
    pub kind: SymbolKind,
    pub pos: Pos,
}

impl Symbol {
    pub fn new(name: impl Into<String>, ty: Type, kind: SymbolKind, pos: Pos) -> Self {
        Self {
            name: name.into(),
            ty,
            kind,
            pos,
        }
    }

    /// How a use of this symbol is lowered, or `None` for names that are not
    /// values (interfaces).
    pub fn binding(&self) -> Option<Binding> {
        let binding = match &self.kind {
            SymbolKind::Variable { binding } => binding.clone(),
            SymbolKind::Parameter { slot, .. } => Binding::Local(*slot),
            SymbolKind::Function(f) if f.owner.is_some() => Binding::Member(self.name.clone()),
            SymbolKind::Function(_) => Binding::Function(self.name.clone()),
            SymbolKind::Field { .. } => Binding::Member(self.name.clone()),
            SymbolKind::Native { module } => Binding::Native {
                module: module.clone(),
                name: self.name.clone(),
            },
            SymbolKind::Import(import) => Binding::Module(import.module.clone()),
            SymbolKind::AiService(_) => Binding::Service(self.name.clone()),
            SymbolKind::Type(TypeSymbol {
                kind: TypeSymbolKind::Class,
                ..
            }) => Binding::Class(self.name.clone()),
            SymbolKind::Type(_) => return None,
        };
        Some(binding)
    }

    /// Whether an assignment may target this symbol.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self.kind,
            SymbolKind::Variable { .. } | SymbolKind::Parameter { .. } | SymbolKind::Field { .. }
        )
    }

    pub fn describe(&self) -> &'static str {
        match self.kind {
            SymbolKind::Variable { .. } => "variable",
            SymbolKind::Parameter { .. } => "parameter",
            SymbolKind::Function(_) => "function",
            SymbolKind::Field { .. } => "field",
            SymbolKind::Native { .. } => "host function",
            SymbolKind::Import(_) => "module",
            SymbolKind::AiService(_) => "service",
            SymbolKind::Type(TypeSymbol {
                kind: TypeSymbolKind::Class,
                ..
            }) => "class",
            SymbolKind::Type(_) => "interface",
        }
    }
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    parent: Option<ScopeId>,
    symbols: HashMap<String, Symbol>,
}

#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// Creates a table holding only the prelude scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                kind: ScopeKind::Prelude,
                parent: None,
                symbols: HashMap::new(),
            }],
        }
    }

    pub fn prelude(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn create_child(&mut self, parent: ScopeId, kind: ScopeKind) -> ScopeId {
        self.scopes.push(Scope {
            kind,
            parent: Some(parent),
            symbols: HashMap::new(),
        });
        ScopeId(self.scopes.len() - 1)
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes[scope.0].parent
    }

    pub fn kind(&self, scope: ScopeId) -> ScopeKind {
        self.scopes[scope.0].kind
    }

    /// Defines `symbol` in `scope`. Returns false, leaving the existing
    /// symbol in place, when the name is already taken in that same scope.
    /// Shadowing an outer scope's name is allowed.
    pub fn try_define(&mut self, scope: ScopeId, symbol: Symbol) -> bool {
        let symbols = &mut self.scopes[scope.0].symbols;
        if symbols.contains_key(&symbol.name) {
            return false;
        }
        symbols.insert(symbol.name.clone(), symbol);
        true
    }

    pub fn lookup_local(&self, scope: ScopeId, name: &str) -> Option<&Symbol> {
        self.scopes[scope.0].symbols.get(name)
    }

    /// Walks from `scope` outwards to the prelude.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<&Symbol> {
        self.lookup_with_scope(scope, name).map(|(_, sym)| sym)
    }

    pub fn lookup_with_scope(&self, scope: ScopeId, name: &str) -> Option<(ScopeId, &Symbol)> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &self.scopes[id.0];
            if let Some(sym) = s.symbols.get(name) {
                return Some((id, sym));
            }
            current = s.parent;
        }
        None
    }

    pub fn symbols(&self, scope: ScopeId) -> impl Iterator<Item = &Symbol> {
        self.scopes[scope.0].symbols.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, slot: u16) -> Symbol {
        Symbol::new(
            name,
            Type::Any,
            SymbolKind::Variable {
                binding: Binding::Local(slot),
            },
            Pos::default(),
        )
    }

    #[test]
    fn test_duplicate_in_same_scope_is_rejected() {
        let mut table = SymbolTable::new();
        let program = table.create_child(table.prelude(), ScopeKind::Program);
        assert!(table.try_define(program, var("x", 0)));
        assert!(!table.try_define(program, var("x", 1)));
        assert_eq!(
            table.lookup(program, "x").and_then(Symbol::binding),
            Some(Binding::Local(0))
        );
    }

    #[test]
    fn test_shadowing_outer_scope_is_allowed() {
        let mut table = SymbolTable::new();
        let program = table.create_child(table.prelude(), ScopeKind::Program);
        let block = table.create_child(program, ScopeKind::Block);
        assert!(table.try_define(program, var("x", 0)));
        assert!(table.try_define(block, var("x", 3)));
        assert_eq!(table.lookup(block, "x").and_then(Symbol::binding), Some(Binding::Local(3)));
        assert_eq!(table.lookup(program, "x").and_then(Symbol::binding), Some(Binding::Local(0)));
    }

    #[test]
    fn test_lookup_walks_to_prelude() {
        let mut table = SymbolTable::new();
        let prelude = table.prelude();
        table.try_define(
            prelude,
            Symbol::new(
                "print",
                Type::Any,
                SymbolKind::Native {
                    module: "prelude".into(),
                },
                Pos::default(),
            ),
        );
        let program = table.create_child(prelude, ScopeKind::Program);
        let func = table.create_child(program, ScopeKind::Function);
        let (scope, sym) = table.lookup_with_scope(func, "print").unwrap();
        assert_eq!(scope, prelude);
        assert_eq!(sym.describe(), "host function");
        assert!(table.lookup(func, "missing").is_none());
    }

    #[test]
    fn test_interfaces_have_no_value_binding() {
        let sym = Symbol::new(
            "Readable",
            Type::Named("Readable".into()),
            SymbolKind::Type(TypeSymbol {
                kind: TypeSymbolKind::Interface,
                decl: 0,
            }),
            Pos::default(),
        );
        assert_eq!(sym.binding(), None);
        assert!(!sym.is_assignable());
    }
}
