// src/backend/codegen/codegen.rs
//! Lowers a resolved program to an `Artifact`.
//!
//! Generation runs in two steps. `Declarations::collect` assigns an id to
//! every function, class, handler and service and lays out class
//! descriptors; only a `Declarations` value can `emit`, so bodies are always
//! lowered against a complete id space and forward references need no
//! patching.
use super::artifact::{
    Artifact, ClassDescriptor, Constant, FieldSlot, FunctionEntry, HandlerEntry, MethodSlot, NativeRef,
    ServiceDescriptor,
};
use super::ops::Op;
use crate::error::CodeGenError;
use crate::frontend::ast::{
    AssignOp, Binding, BinaryOp, Block, ClassDecl, Expr, ExprKind, FunctionDecl, Item, Program, Stmt, UnaryOp,
};
use crate::frontend::token::Pos;
use crate::middle::resolver::literal_json;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Number(u64),
    Str(String),
}

/// Interned constants and host function references, shared by all bodies.
#[derive(Debug, Default)]
struct Pools {
    constants: Vec<Constant>,
    constant_ids: HashMap<ConstKey, u32>,
    natives: Vec<NativeRef>,
    native_ids: HashMap<NativeRef, u32>,
}

impl Pools {
    fn number(&mut self, value: f64) -> u32 {
        let key = ConstKey::Number(value.to_bits());
        if let Some(&id) = self.constant_ids.get(&key) {
            return id;
        }
        let id = self.constants.len() as u32;
        self.constants.push(Constant::Number(value));
        self.constant_ids.insert(key, id);
        id
    }

    fn string(&mut self, value: &str) -> u32 {
        let key = ConstKey::Str(value.to_string());
        if let Some(&id) = self.constant_ids.get(&key) {
            return id;
        }
        let id = self.constants.len() as u32;
        self.constants.push(Constant::Str(value.to_string()));
        self.constant_ids.insert(key, id);
        id
    }

    fn native(&mut self, module: &str, name: &str) -> u32 {
        let key = NativeRef {
            module: module.to_string(),
            name: name.to_string(),
        };
        if let Some(&id) = self.native_ids.get(&key) {
            return id;
        }
        let id = self.natives.len() as u32;
        self.natives.push(key.clone());
        self.native_ids.insert(key, id);
        id
    }
}

/// Id assignments, fixed once declaration finishes.
#[derive(Debug, Default)]
struct Tables {
    function_ids: HashMap<String, u32>,
    class_ids: HashMap<String, u32>,
    service_ids: HashMap<String, u32>,
}

pub struct Declarations<'p> {
    program: &'p Program,
    tables: Tables,
    functions: Vec<FunctionEntry>,
    classes: Vec<ClassDescriptor>,
    handlers: Vec<HandlerEntry>,
    services: Vec<ServiceDescriptor>,
    interfaces: IndexMap<String, Vec<String>>,
    imports: Vec<String>,
    /// Work list of bodies to lower, by function id.
    bodies: Vec<(u32, Body<'p>)>,
    errors: Vec<CodeGenError>,
}

#[derive(Clone, Copy)]
enum Body<'p> {
    Main,
    Function(&'p FunctionDecl),
    Handler(&'p Block),
    FieldInit(&'p ClassDecl),
}

impl<'p> Declarations<'p> {
    pub fn collect(program: &'p Program) -> Result<Self, Vec<CodeGenError>> {
        let mut decls = Declarations {
            program,
            tables: Tables::default(),
            functions: Vec::new(),
            classes: Vec::new(),
            handlers: Vec::new(),
            services: Vec::new(),
            interfaces: IndexMap::new(),
            imports: Vec::new(),
            bodies: Vec::new(),
            errors: Vec::new(),
        };
        let main = decls.add_function("<main>", 0, program.main_frame, false, None);
        decls.bodies.push((main, Body::Main));

        for item in &program.items {
            match item {
                Item::Function(f) => {
                    let id = decls.add_function(&f.name, f.params.len() as u16, f.frame_size, f.is_async, None);
                    decls.tables.function_ids.insert(f.name.clone(), id);
                    decls.bodies.push((id, Body::Function(f)));
                }
                Item::Class(c) => {
                    let id = decls.classes.len() as u32;
                    decls.tables.class_ids.insert(c.name.clone(), id);
                    decls.classes.push(ClassDescriptor {
                        name: c.name.clone(),
                        decorators: c.decorators.clone(),
                        base: None,
                        interfaces: Vec::new(),
                        fields: Vec::new(),
                        vtable: IndexMap::new(),
                        constructor: None,
                        initializers: Vec::new(),
                    });
                }
                Item::Interface(i) => {
                    decls
                        .interfaces
                        .insert(i.name.clone(), i.methods.iter().map(|m| m.name.clone()).collect());
                }
                Item::Handler(h) => {
                    let name = format!("on {}", h.topic);
                    let id = decls.add_function(&name, 1, h.frame_size, h.is_async, None);
                    decls.handlers.push(HandlerEntry {
                        topic: h.topic.clone(),
                        is_async: h.is_async,
                        func: id,
                    });
                    decls.bodies.push((id, Body::Handler(&h.body)));
                }
                Item::Uses(u) => {
                    let config = u
                        .config
                        .iter()
                        .filter_map(|(k, v)| literal_json(v).map(|v| (k.clone(), v)))
                        .collect();
                    decls
                        .tables
                        .service_ids
                        .insert(u.name.clone(), decls.services.len() as u32);
                    decls.services.push(ServiceDescriptor {
                        name: u.name.clone(),
                        capability: u.capability.clone(),
                        config,
                    });
                }
                Item::Import(i) => {
                    if !decls.imports.contains(&i.module) {
                        decls.imports.push(i.module.clone());
                    }
                }
                Item::Stmt(_) => {}
            }
        }

        // Interfaces inherit the requirements of the interfaces they extend.
        let extends: HashMap<&str, Vec<&str>> = program
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Interface(i) => Some((i.name.as_str(), i.extends.iter().map(|(n, _)| n.as_str()).collect())),
                _ => None,
            })
            .collect();

        let classes: Vec<&ClassDecl> = program
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Class(c) => Some(c),
                _ => None,
            })
            .collect();
        for &class in &classes {
            decls.declare_members(class);
        }
        let mut done = HashSet::new();
        for class in &classes {
            decls.layout(class, &classes, &extends, &mut done, &mut Vec::new());
        }

        if decls.errors.is_empty() {
            Ok(decls)
        } else {
            Err(decls.errors)
        }
    }

    fn add_function(&mut self, name: &str, arity: u16, frame_size: u16, is_async: bool, owner: Option<u32>) -> u32 {
        let id = self.functions.len() as u32;
        self.functions.push(FunctionEntry {
            name: name.to_string(),
            arity,
            frame_size: frame_size.max(arity),
            is_async,
            owner,
            code: Vec::new(),
            lines: Vec::new(),
        });
        id
    }

    /// Allocates the class's own functions and records them on its descriptor.
    fn declare_members(&mut self, class: &'p ClassDecl) {
        let id = self.tables.class_ids[&class.name];
        if class.fields.iter().any(|f| f.init.is_some()) {
            let init = self.add_function(&format!("{}.<init>", class.name), 0, 1, false, Some(id));
            self.bodies.push((init, Body::FieldInit(class)));
            self.classes[id as usize].initializers.push(init);
        }
        if let Some(ctor) = &class.constructor {
            let f = self.add_function(
                &format!("{}.constructor", class.name),
                ctor.params.len() as u16,
                ctor.frame_size,
                false,
                Some(id),
            );
            self.bodies.push((f, Body::Function(ctor)));
            self.classes[id as usize].constructor = Some(f);
        }
        for method in &class.methods {
            let f = self.add_function(
                &format!("{}.{}", class.name, method.func.name),
                method.func.params.len() as u16,
                method.func.frame_size,
                method.func.is_async,
                Some(id),
            );
            self.bodies.push((f, Body::Function(&method.func)));
            self.classes[id as usize].vtable.insert(
                method.func.name.clone(),
                MethodSlot {
                    func: f,
                    visibility: method.visibility,
                    owner: id,
                },
            );
        }
    }

    /// Flattens fields, vtable, constructor and initializers with the base
    /// class laid out first.
    fn layout(
        &mut self,
        class: &ClassDecl,
        all: &[&ClassDecl],
        extends: &HashMap<&str, Vec<&str>>,
        done: &mut HashSet<String>,
        visiting: &mut Vec<String>,
    ) {
        if done.contains(&class.name) {
            return;
        }
        if visiting.contains(&class.name) {
            self.errors.push(CodeGenError::new(
                format!("class `{}` inherits from itself", class.name),
                class.pos,
            ));
            return;
        }
        let id = self.tables.class_ids[&class.name];
        let mut fields = Vec::new();
        let mut vtable = IndexMap::new();
        let mut interfaces = Vec::new();
        let mut initializers = Vec::new();
        let mut constructor = None;

        if let Some((base_name, pos)) = &class.base {
            let Some(base) = all.iter().find(|c| &c.name == base_name) else {
                self.errors.push(CodeGenError::new(format!("unknown base class `{}`", base_name), *pos));
                return;
            };
            visiting.push(class.name.clone());
            self.layout(base, all, extends, done, visiting);
            visiting.pop();
            let base_id = self.tables.class_ids[base_name];
            let parent = &self.classes[base_id as usize];
            fields = parent.fields.clone();
            vtable = parent.vtable.clone();
            interfaces = parent.interfaces.clone();
            initializers = parent.initializers.clone();
            constructor = parent.constructor;
            self.classes[id as usize].base = Some(base_id);
        }

        for field in &class.fields {
            let slot = FieldSlot {
                name: field.name.clone(),
                visibility: field.visibility,
                owner: id,
            };
            match fields.iter().position(|f: &FieldSlot| f.name == field.name) {
                Some(i) => fields[i] = slot,
                None => fields.push(slot),
            }
        }
        let own = &self.classes[id as usize];
        for (name, slot) in &own.vtable {
            vtable.insert(name.clone(), slot.clone());
        }
        initializers.extend(own.initializers.iter().copied());
        if own.constructor.is_some() {
            constructor = own.constructor;
        }
        let mut pending: Vec<&str> = class.interfaces.iter().map(|(n, _)| n.as_str()).collect();
        while let Some(name) = pending.pop() {
            if interfaces.iter().any(|i| i == name) {
                continue;
            }
            interfaces.push(name.to_string());
            if let Some(parents) = extends.get(name) {
                pending.extend(parents.iter().copied());
            }
        }

        let desc = &mut self.classes[id as usize];
        desc.fields = fields;
        desc.vtable = vtable;
        desc.interfaces = interfaces;
        desc.initializers = initializers;
        desc.constructor = constructor;
        done.insert(class.name.clone());
    }

    /// Lowers every body and assembles the artifact.
    pub fn emit(mut self) -> Result<Artifact, Vec<CodeGenError>> {
        let mut pools = Pools::default();
        let bodies = std::mem::take(&mut self.bodies);
        for (id, body) in bodies {
            let mut emitter = Emitter::new(&self.tables, &mut pools);
            match body {
                Body::Main => {
                    for item in &self.program.items {
                        if let Item::Stmt(stmt) = item {
                            emitter.stmt(stmt);
                        }
                    }
                }
                Body::Function(f) => emitter.block(&f.body),
                Body::Handler(block) => emitter.block(block),
                Body::FieldInit(class) => {
                    for field in &class.fields {
                        if let Some(init) = &field.init {
                            emitter.line = init.pos.line;
                            emitter.op(Op::LoadThis);
                            emitter.expr(init);
                            let name = emitter.pools.string(&field.name);
                            emitter.op(Op::SetField(name));
                            emitter.op(Op::Pop);
                        }
                    }
                }
            }
            emitter.op(Op::Null);
            emitter.op(Op::Return);
            let (code, lines, errors) = emitter.finish();
            self.errors.extend(errors);
            let entry = &mut self.functions[id as usize];
            entry.code = code;
            entry.lines = lines;
        }

        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        let entry_points = self.tables.function_ids.clone();
        Ok(Artifact {
            file: self.program.file.clone(),
            constants: pools.constants,
            functions: self.functions,
            entry_points,
            classes: self.classes,
            interfaces: self.interfaces,
            handlers: self.handlers,
            globals: self.program.globals.clone(),
            natives: pools.natives,
            services: self.services,
            imports: self.imports,
            main: 0,
        })
    }
}

/// Lowers one function body.
struct Emitter<'a> {
    tables: &'a Tables,
    pools: &'a mut Pools,
    code: Vec<Op>,
    lines: Vec<u32>,
    line: u32,
    errors: Vec<CodeGenError>,
}

impl<'a> Emitter<'a> {
    fn new(tables: &'a Tables, pools: &'a mut Pools) -> Self {
        Self {
            tables,
            pools,
            code: Vec::new(),
            lines: Vec::new(),
            line: 0,
            errors: Vec::new(),
        }
    }

    fn finish(self) -> (Vec<Op>, Vec<u32>, Vec<CodeGenError>) {
        (self.code, self.lines, self.errors)
    }

    fn op(&mut self, op: Op) -> usize {
        self.code.push(op);
        self.lines.push(self.line);
        self.code.len() - 1
    }

    fn here(&self) -> u32 {
        self.code.len() as u32
    }

    /// Points the branch at `at` to the next instruction.
    fn patch(&mut self, at: usize) {
        let target = self.here();
        self.code[at].patch_target(target);
    }

    fn fail(&mut self, message: impl Into<String>, pos: Pos) {
        self.errors.push(CodeGenError::new(message, pos));
    }

    fn block(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        self.line = stmt.pos().line;
        match stmt {
            Stmt::Var {
                init, binding, pos, ..
            } => {
                let Some(binding) = binding else {
                    self.fail("variable was not resolved", *pos);
                    return;
                };
                match (init, binding) {
                    (Some(init), _) => self.expr(init),
                    // A hoisted program variable keeps its current value.
                    (None, Binding::Global(_)) => return,
                    (None, _) => {
                        self.op(Op::Null);
                    }
                }
                self.store(binding, *pos);
            }
            Stmt::Expr(expr) => {
                self.expr(expr);
                self.op(Op::Pop);
            }
            Stmt::If { cond, then, else_, .. } => {
                self.expr(cond);
                let skip_then = self.op(Op::JumpIfFalse(0));
                self.stmt(then);
                match else_ {
                    Some(else_) => {
                        let skip_else = self.op(Op::Jump(0));
                        self.patch(skip_then);
                        self.stmt(else_);
                        self.patch(skip_else);
                    }
                    None => self.patch(skip_then),
                }
            }
            Stmt::While { cond, body, .. } => {
                let start = self.here();
                self.expr(cond);
                let exit = self.op(Op::JumpIfFalse(0));
                self.stmt(body);
                self.op(Op::Jump(start));
                self.patch(exit);
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                if let Some(init) = init {
                    self.stmt(init);
                }
                let start = self.here();
                let exit = cond.as_ref().map(|cond| {
                    self.expr(cond);
                    self.op(Op::JumpIfFalse(0))
                });
                self.stmt(body);
                if let Some(step) = step {
                    self.expr(step);
                    self.op(Op::Pop);
                }
                self.op(Op::Jump(start));
                if let Some(exit) = exit {
                    self.patch(exit);
                }
            }
            Stmt::ForIn {
                iterable,
                body,
                binding,
                pos,
                ..
            } => {
                self.expr(iterable);
                self.op(Op::IterInit);
                let next = self.here();
                let exit = self.op(Op::IterNext(0));
                match binding {
                    Some(binding) => self.store(binding, *pos),
                    None => self.fail("loop variable was not resolved", *pos),
                }
                self.stmt(body);
                self.op(Op::Jump(next));
                self.patch(exit);
            }
            Stmt::Return { value, .. } => {
                match value {
                    Some(value) => self.expr(value),
                    None => {
                        self.op(Op::Null);
                    }
                }
                self.op(Op::Return);
            }
            Stmt::Throw { value, .. } => {
                self.expr(value);
                self.op(Op::Throw);
            }
            Stmt::Try {
                body,
                handler,
                catch_binding,
                pos,
                ..
            } => {
                let enter = self.op(Op::EnterTry(0));
                self.block(body);
                self.op(Op::ExitTry);
                let skip = self.op(Op::Jump(0));
                self.patch(enter);
                match catch_binding {
                    Some(binding) => self.store(binding, *pos),
                    None => self.fail("catch binding was not resolved", *pos),
                }
                self.block(handler);
                self.patch(skip);
            }
            Stmt::Emit { topic, payload, .. } => {
                if let Some(payload) = payload {
                    self.expr(payload);
                }
                let topic = self.pools.string(topic);
                self.op(Op::Emit {
                    topic,
                    payload: payload.is_some(),
                });
            }
            Stmt::Block(block) => self.block(block),
        }
    }

    /// Pops the top value into a local or global binding.
    fn store(&mut self, binding: &Binding, pos: Pos) {
        match binding {
            Binding::Local(slot) => {
                self.op(Op::StoreLocal(*slot));
            }
            Binding::Global(index) => {
                self.op(Op::StoreGlobal(*index));
            }
            other => self.fail(format!("cannot store into {:?}", other), pos),
        }
    }

    fn load(&mut self, binding: &Binding, pos: Pos) {
        let op = match binding {
            Binding::Local(slot) => Op::LoadLocal(*slot),
            Binding::Global(index) => Op::LoadGlobal(*index),
            Binding::Function(name) => match self.tables.function_ids.get(name) {
                Some(&id) => Op::LoadFunction(id),
                None => return self.fail(format!("unknown function `{}`", name), pos),
            },
            Binding::Class(name) => match self.tables.class_ids.get(name) {
                Some(&id) => Op::LoadClass(id),
                None => return self.fail(format!("unknown class `{}`", name), pos),
            },
            Binding::Native { module, name } => Op::LoadNative(self.pools.native(module, name)),
            Binding::Service(name) => match self.tables.service_ids.get(name) {
                Some(&id) => Op::LoadService(id),
                None => return self.fail(format!("unknown service `{}`", name), pos),
            },
            Binding::Member(name) => {
                self.op(Op::LoadThis);
                Op::GetField(self.pools.string(name))
            }
            Binding::Module(module) => {
                return self.fail(format!("module `{}` used as a value", module), pos);
            }
        };
        self.op(op);
    }

    /// Host module member access, lowered to a direct native reference.
    fn module_member(&mut self, object: &Expr, name: &str) -> bool {
        if let ExprKind::Ident {
            binding: Some(Binding::Module(module)),
            ..
        } = &object.kind
        {
            let id = self.pools.native(module, name);
            self.op(Op::LoadNative(id));
            return true;
        }
        false
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Number { value, .. } => {
                let id = self.pools.number(*value);
                self.op(Op::Const(id));
            }
            ExprKind::Str { value, .. } => {
                let id = self.pools.string(value);
                self.op(Op::Const(id));
            }
            ExprKind::Bool(true) => {
                self.op(Op::True);
            }
            ExprKind::Bool(false) => {
                self.op(Op::False);
            }
            ExprKind::Null => {
                self.op(Op::Null);
            }
            ExprKind::This => {
                self.op(Op::LoadThis);
            }
            ExprKind::Ident { name, binding } => match binding {
                Some(binding) => self.load(binding, expr.pos),
                None => self.fail(format!("identifier `{}` was not resolved", name), expr.pos),
            },
            ExprKind::Array(items) => {
                for item in items {
                    self.expr(item);
                }
                self.op(Op::MakeArray(items.len() as u32));
            }
            ExprKind::Object(entries) => {
                for (key, value) in entries {
                    let key = self.pools.string(key);
                    self.op(Op::Const(key));
                    self.expr(value);
                }
                self.op(Op::MakeObject(entries.len() as u32));
            }
            ExprKind::Unary { op, expr: inner } => {
                self.expr(inner);
                self.op(match op {
                    UnaryOp::Not => Op::Not,
                    UnaryOp::Neg => Op::Neg,
                    UnaryOp::Plus => Op::ToNumber,
                });
            }
            ExprKind::Binary { op, left, right } => self.binary(*op, left, right),
            ExprKind::Assign { op, target, value } => self.assign(*op, target, value),
            ExprKind::Call { callee, args } => self.call(callee, args, false),
            ExprKind::Index { object, index } => {
                self.expr(object);
                self.expr(index);
                self.op(Op::GetIndex);
            }
            ExprKind::Member { object, name } => {
                if !self.module_member(object, name) {
                    self.expr(object);
                    let name = self.pools.string(name);
                    self.op(Op::GetField(name));
                }
            }
            ExprKind::New { class, args } => {
                for arg in args {
                    self.expr(arg);
                }
                match self.tables.class_ids.get(class) {
                    Some(&id) => {
                        self.op(Op::New {
                            class: id,
                            argc: args.len() as u8,
                        });
                    }
                    None => self.fail(format!("unknown class `{}`", class), expr.pos),
                }
            }
            ExprKind::Await(inner) => {
                self.expr(inner);
                self.op(Op::Await);
            }
            ExprKind::Parallel(inner) => match &inner.kind {
                ExprKind::Array(items) => {
                    for item in items {
                        self.deferred(item);
                    }
                    self.op(Op::JoinAll(items.len() as u32));
                }
                _ => {
                    self.deferred(inner);
                    self.op(Op::JoinAll(1));
                    let zero = self.pools.number(0.0);
                    self.op(Op::Const(zero));
                    self.op(Op::GetIndex);
                }
            },
        }
    }

    /// Starts a call concurrently instead of running it inline; other
    /// expressions are evaluated in place.
    fn deferred(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Call { callee, args } => self.call(callee, args, true),
            _ => self.expr(expr),
        }
    }

    fn call(&mut self, callee: &Expr, args: &[Expr], spawn: bool) {
        let argc = args.len() as u8;
        let method = match &callee.kind {
            ExprKind::Member { object, name } => {
                if !self.module_member(object, name) {
                    self.expr(object);
                    Some(name)
                } else {
                    None
                }
            }
            ExprKind::Ident {
                binding: Some(Binding::Member(name)),
                ..
            } => {
                self.op(Op::LoadThis);
                Some(name)
            }
            _ => {
                self.expr(callee);
                None
            }
        };
        match (method, spawn) {
            (Some(name), false) => {
                for arg in args {
                    self.expr(arg);
                }
                let name = self.pools.string(name);
                self.op(Op::CallMethod { name, argc });
            }
            (Some(name), true) => {
                // Bind the method first, then start it like any callable.
                let name = self.pools.string(name);
                self.op(Op::GetField(name));
                for arg in args {
                    self.expr(arg);
                }
                self.op(Op::Spawn(argc));
            }
            (None, spawn) => {
                for arg in args {
                    self.expr(arg);
                }
                self.op(if spawn { Op::Spawn(argc) } else { Op::Call(argc) });
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                self.expr(left);
                self.op(Op::Truthy);
                let short = self.op(if op == BinaryOp::And {
                    Op::JumpIfFalseOrPop(0)
                } else {
                    Op::JumpIfTrueOrPop(0)
                });
                self.expr(right);
                self.op(Op::Truthy);
                self.patch(short);
            }
            _ => {
                if let Some(folded) = fold_constant(op, left, right) {
                    let id = match folded {
                        Constant::Number(n) => self.pools.number(n),
                        Constant::Str(s) => self.pools.string(&s),
                    };
                    self.op(Op::Const(id));
                    return;
                }
                self.expr(left);
                self.expr(right);
                self.op(Op::Binary(op));
            }
        }
    }

    /// Leaves the assigned value on the stack.
    fn assign(&mut self, op: AssignOp, target: &Expr, value: &Expr) {
        let compound = op.binary();
        match &target.kind {
            ExprKind::Ident {
                binding: Some(Binding::Member(name)),
                ..
            } => {
                let name = self.pools.string(name);
                self.op(Op::LoadThis);
                if let Some(bin) = compound {
                    self.op(Op::Dup);
                    self.op(Op::GetField(name));
                    self.expr(value);
                    self.op(Op::Binary(bin));
                } else {
                    self.expr(value);
                }
                self.op(Op::SetField(name));
            }
            ExprKind::Ident {
                binding: Some(binding),
                ..
            } => {
                if let Some(bin) = compound {
                    self.load(binding, target.pos);
                    self.expr(value);
                    self.op(Op::Binary(bin));
                } else {
                    self.expr(value);
                }
                self.op(Op::Dup);
                self.store(binding, target.pos);
            }
            ExprKind::Member { object, name } => {
                self.expr(object);
                let name = self.pools.string(name);
                if let Some(bin) = compound {
                    self.op(Op::Dup);
                    self.op(Op::GetField(name));
                    self.expr(value);
                    self.op(Op::Binary(bin));
                } else {
                    self.expr(value);
                }
                self.op(Op::SetField(name));
            }
            ExprKind::Index { object, index } => {
                self.expr(object);
                self.expr(index);
                if let Some(bin) = compound {
                    self.op(Op::Dup2);
                    self.op(Op::GetIndex);
                    self.expr(value);
                    self.op(Op::Binary(bin));
                } else {
                    self.expr(value);
                }
                self.op(Op::SetIndex);
            }
            _ => self.fail("invalid assignment target", target.pos),
        }
    }
}

/// Folds arithmetic on two literals at compile time.
fn fold_constant(op: BinaryOp, left: &Expr, right: &Expr) -> Option<Constant> {
    match (&left.kind, &right.kind) {
        (ExprKind::Number { value: l, .. }, ExprKind::Number { value: r, .. }) => {
            let v = match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div if *r != 0.0 => l / r,
                _ => return None,
            };
            Some(Constant::Number(v))
        }
        (ExprKind::Str { value: l, .. }, ExprKind::Str { value: r, .. }) if op == BinaryOp::Add => {
            Some(Constant::Str(format!("{}{}", l, r)))
        }
        _ => None,
    }
}

/// Lowers a resolved program.
pub fn generate(program: &Program) -> Result<Artifact, Vec<CodeGenError>> {
    Declarations::collect(program)?.emit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_source;
    use crate::middle::resolve_program;

    fn build(src: &str) -> Artifact {
        let mut program = parse_source(src, "t.syn").unwrap();
        resolve_program(&mut program).unwrap();
        generate(&program).unwrap()
    }

    #[test]
    fn test_main_and_entry_points() {
        let artifact = build("function f(a) { return a; }\nvar x = f(1);");
        assert_eq!(artifact.main, 0);
        assert_eq!(artifact.functions[0].name, "<main>");
        assert_eq!(artifact.entry_points["f"], 1);
        assert_eq!(artifact.globals, vec!["x"]);
        assert!(artifact.functions[0].code.contains(&Op::StoreGlobal(0)));
        assert_eq!(artifact.functions[0].code.last(), Some(&Op::Return));
    }

    #[test]
    fn test_constants_are_interned_and_folded() {
        let artifact = build("var a = \"x\"; var b = \"x\"; var c = 2 * 3;");
        let strings = artifact
            .constants
            .iter()
            .filter(|c| matches!(c, Constant::Str(s) if s == "x"))
            .count();
        assert_eq!(strings, 1);
        assert!(artifact.constants.contains(&Constant::Number(6.0)));
        assert!(!artifact.functions[0].code.iter().any(|op| matches!(op, Op::Binary(_))));
    }

    #[test]
    fn test_class_layout_flattens_base_first() {
        let src = "interface Named { name(); }\n\
                   class A implements Named { var x = 1; name() { return \"a\"; } greet() { return 1; } }\n\
                   class B extends A { var y = 2; name() { return \"b\"; } constructor() { } }";
        let artifact = build(src);
        let b = &artifact.classes[1];
        assert_eq!(b.base, Some(0));
        let names: Vec<_> = b.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
        assert_eq!(b.vtable["name"].owner, 1);
        assert_eq!(b.vtable["greet"].owner, 0);
        assert_eq!(b.initializers.len(), 2);
        assert!(b.constructor.is_some());
        assert_eq!(b.interfaces, vec!["Named"]);
        assert!(artifact.is_subclass(1, 0));
        assert!(!artifact.is_subclass(0, 1));
    }

    #[test]
    fn test_handlers_and_services_are_declared() {
        let src = "uses Bot from \"chat\" { model: \"m\" };\non async a.b (e) { emit c.d, e; }";
        let artifact = build(src);
        assert_eq!(artifact.handlers.len(), 1);
        assert!(artifact.handlers[0].is_async);
        let handler = &artifact.functions[artifact.handlers[0].func as usize];
        assert_eq!(handler.arity, 1);
        assert!(handler.code.iter().any(|op| matches!(op, Op::Emit { payload: true, .. })));
        assert_eq!(artifact.services[0].config["model"], "m");
    }

    #[test]
    fn test_parallel_lowers_to_spawn_and_join() {
        let artifact = build("function f(x) { return x; }\nvar r = parallel [f(1), f(2)];");
        let code = &artifact.functions[0].code;
        assert_eq!(code.iter().filter(|op| matches!(op, Op::Spawn(1))).count(), 2);
        assert!(code.contains(&Op::JoinAll(2)));
    }

    #[test]
    fn test_module_members_become_natives() {
        let artifact = build("import math;\nvar r = math.floor(2.5);");
        assert_eq!(
            artifact.natives,
            vec![NativeRef {
                module: "math".into(),
                name: "floor".into()
            }]
        );
        assert!(artifact.functions[0].code.contains(&Op::LoadNative(0)));
        assert_eq!(artifact.imports, vec!["math"]);
    }

    #[test]
    fn test_artifact_json_round_trip() {
        let artifact = build("class P { var v = 1; }\non x (e) { }\nvar p = new P();");
        let json = artifact.to_json().unwrap();
        assert_eq!(Artifact::from_json(&json).unwrap(), artifact);
    }
}
