// src/middle/types.rs
//! Static type model.
//!
//! Checking is gradual: `any` is compatible both ways, and unannotated
//! variables are `any`. Named types are classes or interfaces; a named type
//! accepts any type that reaches it through `extends`/`implements` edges.
use crate::frontend::ast::TypeExpr;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    String,
    Number,
    Boolean,
    Array(Box<Type>),
    Object,
    Any,
    Named(String),
    Function { params: Vec<Type>, ret: Box<Type> },
}

impl Type {
    /// Lowers a written annotation. Unknown names become `Named` and are
    /// validated by the resolver.
    pub fn from_annotation(expr: &TypeExpr) -> Type {
        match expr {
            TypeExpr::Array(inner) => Type::Array(Box::new(Type::from_annotation(inner))),
            TypeExpr::Named { name, .. } => match name.as_str() {
                "string" => Type::String,
                "number" => Type::Number,
                "boolean" | "bool" => Type::Boolean,
                "object" => Type::Object,
                "any" => Type::Any,
                "array" => Type::Array(Box::new(Type::Any)),
                other => Type::Named(other.to_string()),
            },
        }
    }

    pub fn from_optional(expr: Option<&TypeExpr>) -> Type {
        expr.map(Type::from_annotation).unwrap_or(Type::Any)
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Type::Any)
    }

    /// True for `number` and `any`, the operands arithmetic accepts.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Number | Type::Any)
    }

    /// Every class or interface name mentioned, innermost included.
    pub fn named_parts(&self) -> Vec<&str> {
        match self {
            Type::Named(name) => vec![name.as_str()],
            Type::Array(inner) => inner.named_parts(),
            Type::Function { params, ret } => {
                let mut parts: Vec<&str> = params.iter().flat_map(|p| p.named_parts()).collect();
                parts.extend(ret.named_parts());
                parts
            }
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::String => write!(f, "string"),
            Type::Number => write!(f, "number"),
            Type::Boolean => write!(f, "boolean"),
            Type::Array(inner) => write!(f, "array<{}>", inner),
            Type::Object => write!(f, "object"),
            Type::Any => write!(f, "any"),
            Type::Named(name) => write!(f, "{}", name),
            Type::Function { params, ret } => {
                write!(f, "function(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, "): {}", ret)
            }
        }
    }
}

/// Nominal hierarchy: direct supertypes (base class and interfaces) per name.
#[derive(Debug, Default, Clone)]
pub struct TypeEnv {
    supers: HashMap<String, Vec<String>>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: &str) {
        self.supers.entry(name.to_string()).or_default();
    }

    pub fn add_super(&mut self, name: &str, parent: &str) {
        self.supers
            .entry(name.to_string())
            .or_default()
            .push(parent.to_string());
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.supers.contains_key(name)
    }

    /// True when `name` reaches `ancestor` through supertype edges.
    /// Terminates on cyclic hierarchies.
    pub fn is_subtype(&self, name: &str, ancestor: &str) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![name];
        while let Some(current) = stack.pop() {
            if current == ancestor {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(parents) = self.supers.get(current) {
                stack.extend(parents.iter().map(String::as_str));
            }
        }
        false
    }

    /// Whether a value of type `actual` may be used where `expected` is required.
    pub fn is_compatible(&self, expected: &Type, actual: &Type) -> bool {
        match (expected, actual) {
            (Type::Any, _) | (_, Type::Any) => true,
            (Type::Array(e), Type::Array(a)) => self.is_compatible(e, a),
            (Type::Named(e), Type::Named(a)) => self.is_subtype(a, e),
            (Type::Object, Type::Named(_) | Type::Object) => true,
            // Function types match only by structural equality.
            (Type::Function { .. }, Type::Function { .. }) => expected == actual,
            _ => expected == actual,
        }
    }
}
