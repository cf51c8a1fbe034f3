// src/backend/codegen/artifact.rs
//! Executable artifact: everything the runtime needs to run a program.
//!
//! The artifact is plain data. It serializes to JSON (`synapse build`) and
//! is loaded by the runtime without consulting the AST again.
use super::ops::Op;
use crate::frontend::ast::Visibility;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Number(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionEntry {
    pub name: String,
    pub arity: u16,
    /// Slots needed by the frame, `this` and parameters included.
    pub frame_size: u16,
    pub is_async: bool,
    /// Declaring class for methods, constructors and field initializers.
    pub owner: Option<u32>,
    pub code: Vec<Op>,
    /// Source line per instruction, for diagnostics.
    pub lines: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSlot {
    pub name: String,
    pub visibility: Visibility,
    pub owner: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSlot {
    pub func: u32,
    pub visibility: Visibility,
    pub owner: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    pub name: String,
    pub decorators: Vec<String>,
    pub base: Option<u32>,
    /// Interfaces implemented directly or through ancestors.
    pub interfaces: Vec<String>,
    /// Flattened field layout, ancestors first.
    pub fields: Vec<FieldSlot>,
    /// Method dispatch table, overrides already applied.
    pub vtable: IndexMap<String, MethodSlot>,
    /// Nearest constructor along the inheritance chain.
    pub constructor: Option<u32>,
    /// Initializers to run on a new instance, ancestors first.
    pub initializers: Vec<u32>,
}

impl ClassDescriptor {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerEntry {
    pub topic: String,
    pub is_async: bool,
    pub func: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeRef {
    pub module: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub capability: String,
    pub config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub file: String,
    pub constants: Vec<Constant>,
    pub functions: Vec<FunctionEntry>,
    /// Top-level functions callable by name from the host.
    pub entry_points: HashMap<String, u32>,
    pub classes: Vec<ClassDescriptor>,
    /// Interface names with their required method names.
    pub interfaces: IndexMap<String, Vec<String>>,
    pub handlers: Vec<HandlerEntry>,
    pub globals: Vec<String>,
    pub natives: Vec<NativeRef>,
    pub services: Vec<ServiceDescriptor>,
    /// Host modules the program imports, in first-import order.
    #[serde(default)]
    pub imports: Vec<String>,
    /// Implicit top-level function holding the program's statements.
    pub main: u32,
}

impl Artifact {
    pub fn constant_str(&self, index: u32) -> &str {
        match &self.constants[index as usize] {
            Constant::Str(s) => s,
            Constant::Number(_) => "",
        }
    }

    /// True when `class` is `ancestor` or derives from it.
    pub fn is_subclass(&self, class: u32, ancestor: u32) -> bool {
        let mut current = Some(class);
        let mut steps = 0;
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.classes.len() {
                return false;
            }
            current = self.classes.get(c as usize).and_then(|d| d.base);
        }
        false
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
