// src/runtime/vm/interpreter.rs
//! Asynchronous bytecode interpreter.
//!
//! Each call runs in its own `Frame`. Calls into other functions are boxed
//! futures, so deep recursion costs heap rather than stack and is bounded by
//! the configured call depth. Async functions, natives and services start
//! tokio tasks and hand back `Value::Task`; `await` joins them.
use super::exception::Exception;
use super::output::Output;
use super::value::{BoundMethod, Instance, TaskHandle, TaskResult, Value};
use crate::backend::codegen::{Artifact, Constant, FunctionEntry, Op};
use crate::error::RuntimeError;
use crate::frontend::ast::{BinaryOp, Visibility};
use crate::runtime::bus::EventBus;
use crate::runtime::capability::CapabilityRegistry;
use crate::runtime::dispatch::{Dispatcher, InFlight};
use crate::runtime::event::{Event, Priority};
use crate::runtime::host::{self, NativeCtx, NativeFn};
use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Per-call context threaded through nested calls.
#[derive(Debug, Clone, Copy)]
pub struct CallCtx {
    pub depth: usize,
    /// Priority given to events emitted from this call chain.
    pub priority: Priority,
}

impl CallCtx {
    pub fn root(priority: Priority) -> Self {
        Self { depth: 0, priority }
    }

    fn deeper(self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TryHandler {
    target: u32,
    depth: usize,
}

struct Frame {
    owner: Option<u32>,
    locals: Vec<Value>,
    stack: Vec<Value>,
    pc: usize,
    handlers: Vec<TryHandler>,
}

impl Frame {
    fn pop(&mut self) -> Result<Value, Exception> {
        self.stack.pop().ok_or_else(|| internal("operand stack underflow"))
    }

    fn peek(&self) -> Result<&Value, Exception> {
        self.stack.last().ok_or_else(|| internal("operand stack underflow"))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Exception> {
        if n > self.stack.len() {
            return Err(internal("operand stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn local(&self, slot: u16) -> Result<Value, Exception> {
        self.locals
            .get(slot as usize)
            .cloned()
            .ok_or_else(|| internal("frame slot out of range"))
    }

    fn set_local(&mut self, slot: u16, value: Value) -> Result<(), Exception> {
        let slot = self
            .locals
            .get_mut(slot as usize)
            .ok_or_else(|| internal("frame slot out of range"))?;
        *slot = value;
        Ok(())
    }
}

enum Flow {
    Next,
    Return(Value),
}

fn internal(message: &str) -> Exception {
    Exception::new("InternalError", message)
}

/// Loaded program state shared by every running call.
pub struct Interpreter {
    pub(crate) artifact: Artifact,
    constants: Vec<Value>,
    natives: Vec<NativeFn>,
    class_names: Vec<Arc<str>>,
    layouts: Vec<Arc<[String]>>,
    globals: Mutex<Vec<Value>>,
    pub(crate) bus: EventBus,
    capabilities: Arc<CapabilityRegistry>,
    output: Arc<dyn Output>,
    pub(crate) handle: Handle,
    pub(crate) in_flight: InFlight,
    pub(crate) dispatcher: Dispatcher,
    max_call_depth: usize,
}

impl Interpreter {
    pub(crate) fn new(
        artifact: Artifact,
        bus: EventBus,
        capabilities: Arc<CapabilityRegistry>,
        output: Arc<dyn Output>,
        handle: Handle,
        max_call_depth: usize,
    ) -> Result<Self, RuntimeError> {
        let natives = artifact
            .natives
            .iter()
            .map(|n| {
                host::lookup(&n.module, &n.name)
                    .ok_or_else(|| RuntimeError::Load(format!("unknown host function `{}.{}`", n.module, n.name)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if artifact.functions.get(artifact.main as usize).is_none() {
            return Err(RuntimeError::Load("artifact has no main function".to_string()));
        }
        let constants = artifact
            .constants
            .iter()
            .map(|c| match c {
                Constant::Number(n) => Value::Number(*n),
                Constant::Str(s) => Value::str(s.as_str()),
            })
            .collect();
        let class_names = artifact.classes.iter().map(|c| Arc::from(c.name.as_str())).collect();
        let layouts = artifact
            .classes
            .iter()
            .map(|c| c.fields.iter().map(|f| f.name.clone()).collect::<Vec<_>>().into())
            .collect();
        let globals = Mutex::new(vec![Value::Null; artifact.globals.len()]);
        let dispatcher = Dispatcher::spawn(&handle);
        Ok(Self {
            artifact,
            constants,
            natives,
            class_names,
            layouts,
            globals,
            bus,
            capabilities,
            output,
            handle,
            in_flight: InFlight::new(),
            dispatcher,
            max_call_depth,
        })
    }

    pub(crate) fn global(&self, name: &str) -> Option<Value> {
        let index = self.artifact.globals.iter().position(|g| g == name)?;
        self.globals.lock().get(index).cloned()
    }

    fn function(&self, func: u32) -> Result<&FunctionEntry, Exception> {
        self.artifact
            .functions
            .get(func as usize)
            .ok_or_else(|| internal("function index out of range"))
    }

    fn check_arity(&self, func: u32, argc: usize) -> Result<(), Exception> {
        let entry = self.function(func)?;
        if entry.arity as usize != argc {
            return Err(Exception::type_error(format!(
                "`{}` expects {} argument(s), found {}",
                entry.name, entry.arity, argc
            )));
        }
        Ok(())
    }

    /// Runs a function body to completion in the current task.
    pub(crate) async fn execute(
        self: Arc<Self>,
        func: u32,
        this: Option<Value>,
        args: Vec<Value>,
        ctx: CallCtx,
    ) -> TaskResult {
        if ctx.depth > self.max_call_depth {
            return Err(Exception::new("RangeError", "maximum call depth exceeded"));
        }
        let entry = self.function(func)?;
        let mut locals = Vec::with_capacity(entry.frame_size as usize + 1);
        locals.extend(this);
        locals.extend(args);
        if locals.len() < entry.frame_size as usize {
            locals.resize(entry.frame_size as usize, Value::Null);
        }
        let mut frame = Frame {
            owner: entry.owner,
            locals,
            stack: Vec::new(),
            pc: 0,
            handlers: Vec::new(),
        };
        loop {
            let Some(&op) = entry.code.get(frame.pc) else {
                return Ok(Value::Null);
            };
            frame.pc += 1;
            match self.step(&mut frame, op, ctx).await {
                Ok(Flow::Next) => {}
                Ok(Flow::Return(value)) => return Ok(value),
                Err(err) => {
                    let line = entry.lines.get(frame.pc - 1).copied().unwrap_or(0);
                    let err = err.at(|| format!("{} ({}:{})", entry.name, self.artifact.file, line));
                    let Some(handler) = frame.handlers.pop() else {
                        return Err(err);
                    };
                    frame.stack.truncate(handler.depth);
                    frame.stack.push(err.into_value());
                    frame.pc = handler.target as usize;
                }
            }
        }
    }

    /// Starts `fut` as a task counted as in flight until it finishes.
    pub(crate) fn spawn_task(&self, fut: BoxFuture<'static, TaskResult>) -> TaskHandle {
        let guard = self.in_flight.enter();
        let tracked = async move {
            let result = fut.await;
            drop(guard);
            result
        };
        TaskHandle::spawn(&self.handle, tracked.boxed())
    }

    /// Boxed `execute`, for call sites inside the interpreter loop itself.
    pub(crate) fn run(self: Arc<Self>, func: u32, this: Option<Value>, args: Vec<Value>, ctx: CallCtx) -> BoxFuture<'static, TaskResult> {
        self.execute(func, this, args, ctx).boxed()
    }

    /// Calls a compiled function, starting a task if it is async.
    fn invoke(self: Arc<Self>, func: u32, this: Option<Value>, args: Vec<Value>, ctx: CallCtx) -> BoxFuture<'static, TaskResult> {
        async move {
            self.check_arity(func, args.len())?;
            if self.function(func)?.is_async {
                let fut = self.clone().execute(func, this, args, ctx.deeper()).boxed();
                return Ok(Value::Task(self.spawn_task(fut)));
            }
            self.execute(func, this, args, ctx.deeper()).await
        }
        .boxed()
    }

    /// Calls any callable value.
    pub(crate) fn call_value(self: Arc<Self>, callee: Value, args: Vec<Value>, ctx: CallCtx) -> BoxFuture<'static, TaskResult> {
        async move {
            match callee {
                Value::Function(func) => self.invoke(func, None, args, ctx).await,
                Value::BoundMethod(method) => {
                    let receiver = method.receiver.clone();
                    self.invoke(method.func, Some(receiver), args, ctx).await
                }
                Value::Native(index) => {
                    let native = *self
                        .natives
                        .get(index as usize)
                        .ok_or_else(|| internal("native index out of range"))?;
                    match native {
                        NativeFn::Sync(f) => f(&NativeCtx { output: &*self.output }, &args),
                        NativeFn::Async(f) => Ok(Value::Task(self.spawn_task(f(args)))),
                    }
                }
                Value::Service(index) => self.call_service(index, args),
                Value::Class(class) => Err(Exception::type_error(format!(
                    "class `{}` must be instantiated with `new`",
                    self.class_name(class)
                ))),
                other => Err(Exception::type_error(format!("{} is not callable", other.type_name()))),
            }
        }
        .boxed()
    }

    /// Runs a call as a unit: an async function's body runs in place rather
    /// than in a second task, and a returned task is joined.
    fn run_callee(self: Arc<Self>, callee: Value, args: Vec<Value>, ctx: CallCtx) -> BoxFuture<'static, TaskResult> {
        async move {
            let (func, this) = match &callee {
                Value::Function(func) => (*func, None),
                Value::BoundMethod(method) => (method.func, Some(method.receiver.clone())),
                _ => {
                    return match self.call_value(callee, args, ctx).await? {
                        Value::Task(task) => task.join().await,
                        value => Ok(value),
                    };
                }
            };
            self.check_arity(func, args.len())?;
            self.execute(func, this, args, ctx.deeper()).await
        }
        .boxed()
    }

    fn call_service(&self, index: u32, args: Vec<Value>) -> TaskResult {
        let service = self
            .artifact
            .services
            .get(index as usize)
            .ok_or_else(|| internal("service index out of range"))?;
        if args.len() > 2 {
            return Err(Exception::type_error(format!(
                "service `{}` takes an input and optional options",
                service.name
            )));
        }
        let input = args.first().map(Value::to_json).unwrap_or(Json::Null);
        let mut options = service.config.clone();
        match args.get(1) {
            Some(Value::Object(extra)) => {
                let extra: Vec<(String, Json)> = extra.lock().iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
                options.extend(extra);
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                return Err(Exception::type_error(format!(
                    "service options must be an object, found {}",
                    other.type_name()
                )));
            }
        }
        let capabilities = self.capabilities.clone();
        let capability = service.capability.clone();
        let fut = async move {
            capabilities
                .invoke(&capability, input, &options)
                .await
                .map(|out| Value::from_json(&out))
                .map_err(|e| Exception::new("CapabilityError", e.to_string()))
        }
        .boxed();
        Ok(Value::Task(self.spawn_task(fut)))
    }

    fn class_name(&self, class: u32) -> &str {
        self.artifact
            .classes
            .get(class as usize)
            .map_or("?", |c| c.name.as_str())
    }

    fn check_access(&self, visibility: Visibility, owner: u32, accessor: Option<u32>, member: &str) -> Result<(), Exception> {
        let (allowed, word) = match visibility {
            Visibility::Public => (true, "public"),
            Visibility::Private => (accessor == Some(owner), "private"),
            Visibility::Protected => (
                accessor.is_some_and(|c| self.artifact.is_subclass(c, owner)),
                "protected",
            ),
        };
        if allowed {
            Ok(())
        } else {
            Err(Exception::new(
                "AccessError",
                format!("member `{}` of `{}` is {}", member, self.class_name(owner), word),
            ))
        }
    }

    fn get_field(&self, object: &Value, name: &str, accessor: Option<u32>) -> TaskResult {
        match object {
            Value::Instance(instance) => {
                let class = &self.artifact.classes[instance.class as usize];
                if let Some(index) = class.field_index(name) {
                    let slot = &class.fields[index];
                    self.check_access(slot.visibility, slot.owner, accessor, name)?;
                    return Ok(instance.fields.lock().get(index).cloned().unwrap_or(Value::Null));
                }
                if let Some(slot) = class.vtable.get(name) {
                    self.check_access(slot.visibility, slot.owner, accessor, name)?;
                    return Ok(Value::BoundMethod(Arc::new(BoundMethod {
                        receiver: object.clone(),
                        func: slot.func,
                    })));
                }
                Err(Exception::reference_error(format!(
                    "`{}` has no member `{}`",
                    class.name, name
                )))
            }
            Value::Object(entries) => Ok(entries.lock().get(name).cloned().unwrap_or(Value::Null)),
            Value::Array(items) if name == "length" => Ok(Value::Number(items.lock().len() as f64)),
            Value::Str(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
            other => Err(Exception::type_error(format!(
                "cannot read `{}` of {}",
                name,
                other.type_name()
            ))),
        }
    }

    fn set_field(&self, object: &Value, name: &str, value: Value, accessor: Option<u32>) -> Result<(), Exception> {
        match object {
            Value::Instance(instance) => {
                let class = &self.artifact.classes[instance.class as usize];
                let Some(index) = class.field_index(name) else {
                    return Err(Exception::reference_error(format!(
                        "`{}` has no field `{}`",
                        class.name, name
                    )));
                };
                let slot = &class.fields[index];
                self.check_access(slot.visibility, slot.owner, accessor, name)?;
                if let Some(field) = instance.fields.lock().get_mut(index) {
                    *field = value;
                }
                Ok(())
            }
            Value::Object(entries) => {
                entries.lock().insert(name.to_string(), value);
                Ok(())
            }
            other => Err(Exception::type_error(format!(
                "cannot set `{}` on {}",
                name,
                other.type_name()
            ))),
        }
    }

    fn get_index(&self, object: &Value, index: &Value, accessor: Option<u32>) -> TaskResult {
        match (object, index) {
            (Value::Array(items), Value::Number(n)) => Ok(array_slot(*n)
                .and_then(|i| items.lock().get(i).cloned())
                .unwrap_or(Value::Null)),
            (Value::Str(s), Value::Number(n)) => Ok(array_slot(*n)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::str(c.to_string()))
                .unwrap_or(Value::Null)),
            (Value::Object(_) | Value::Instance(_), Value::Str(key)) => self.get_field(object, key, accessor),
            (object, index) => Err(Exception::type_error(format!(
                "cannot index {} with {}",
                object.type_name(),
                index.type_name()
            ))),
        }
    }

    fn set_index(&self, object: &Value, index: &Value, value: Value, accessor: Option<u32>) -> Result<(), Exception> {
        match (object, index) {
            (Value::Array(items), Value::Number(n)) => {
                let mut items = items.lock();
                match array_slot(*n) {
                    Some(i) if i < items.len() => items[i] = value,
                    Some(i) if i == items.len() => items.push(value),
                    _ => {
                        return Err(Exception::new(
                            "RangeError",
                            format!("index {} out of bounds for length {}", n, items.len()),
                        ));
                    }
                }
                Ok(())
            }
            (Value::Object(_) | Value::Instance(_), Value::Str(key)) => self.set_field(object, key, value, accessor),
            (object, index) => Err(Exception::type_error(format!(
                "cannot index {} with {}",
                object.type_name(),
                index.type_name()
            ))),
        }
    }

    async fn call_method(self: &Arc<Self>, receiver: Value, name: &str, args: Vec<Value>, accessor: Option<u32>, ctx: CallCtx) -> TaskResult {
        match &receiver {
            Value::Instance(instance) => {
                let class = &self.artifact.classes[instance.class as usize];
                if let Some(slot) = class.vtable.get(name) {
                    self.check_access(slot.visibility, slot.owner, accessor, name)?;
                    let func = slot.func;
                    return self.clone().invoke(func, Some(receiver.clone()), args, ctx).await;
                }
                let callee = self.get_field(&receiver, name, accessor)?;
                self.clone().call_value(callee, args, ctx).await
            }
            Value::Array(items) => self.array_method(items.clone(), name, args, ctx).await,
            Value::Str(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::Object(_) => {
                let callee = self.get_field(&receiver, name, accessor)?;
                self.clone().call_value(callee, args, ctx).await
            }
            other => Err(Exception::type_error(format!(
                "{} has no method `{}`",
                other.type_name(),
                name
            ))),
        }
    }

    async fn array_method(self: &Arc<Self>, items: Arc<Mutex<Vec<Value>>>, name: &str, args: Vec<Value>, ctx: CallCtx) -> TaskResult {
        match name {
            "length" => Ok(Value::Number(items.lock().len() as f64)),
            "push" => {
                let mut items = items.lock();
                items.extend(args);
                Ok(Value::Number(items.len() as f64))
            }
            "pop" => Ok(items.lock().pop().unwrap_or(Value::Null)),
            "join" => {
                let separator = match args.first() {
                    Some(Value::Str(s)) => s.to_string(),
                    Some(other) => other.to_string(),
                    None => ",".to_string(),
                };
                let snapshot = items.lock().clone();
                let parts: Vec<String> = snapshot.iter().map(Value::to_string).collect();
                Ok(Value::str(parts.join(&separator)))
            }
            "map" => {
                let Some(callback) = args.into_iter().next() else {
                    return Err(Exception::type_error("map expects a function"));
                };
                let snapshot = items.lock().clone();
                let mut mapped = Vec::with_capacity(snapshot.len());
                for item in snapshot {
                    let result = self.clone().run_callee(callback.clone(), vec![item], ctx).await?;
                    mapped.push(result);
                }
                Ok(Value::array(mapped))
            }
            _ => Err(Exception::type_error(format!("array has no method `{}`", name))),
        }
    }

    async fn instantiate(self: &Arc<Self>, class: u32, args: Vec<Value>, ctx: CallCtx) -> TaskResult {
        let descriptor = self
            .artifact
            .classes
            .get(class as usize)
            .ok_or_else(|| internal("class index out of range"))?;
        let instance = Value::Instance(Arc::new(Instance {
            class,
            class_name: self.class_names[class as usize].clone(),
            field_names: self.layouts[class as usize].clone(),
            fields: Mutex::new(vec![Value::Null; descriptor.fields.len()]),
        }));
        for &init in &descriptor.initializers {
            self.clone().run(init, Some(instance.clone()), Vec::new(), ctx.deeper()).await?;
        }
        match descriptor.constructor {
            Some(ctor) => {
                self.check_arity(ctor, args.len())?;
                self.clone().run(ctor, Some(instance.clone()), args, ctx.deeper()).await?;
            }
            None if !args.is_empty() => {
                return Err(Exception::type_error(format!(
                    "`{}` has no constructor taking {} argument(s)",
                    descriptor.name,
                    args.len()
                )));
            }
            None => {}
        }
        Ok(instance)
    }

    async fn step(self: &Arc<Self>, frame: &mut Frame, op: Op, ctx: CallCtx) -> Result<Flow, Exception> {
        match op {
            Op::Const(index) => {
                let value = self
                    .constants
                    .get(index as usize)
                    .cloned()
                    .ok_or_else(|| internal("constant index out of range"))?;
                frame.push(value);
            }
            Op::Null => frame.push(Value::Null),
            Op::True => frame.push(Value::Bool(true)),
            Op::False => frame.push(Value::Bool(false)),
            Op::Pop => {
                frame.pop()?;
            }
            Op::Dup => {
                let top = frame.peek()?.clone();
                frame.push(top);
            }
            Op::Dup2 => {
                let pair = frame.pop_n(2)?;
                frame.stack.extend(pair.iter().cloned());
                frame.stack.extend(pair);
            }
            Op::LoadLocal(slot) => {
                let value = frame.local(slot)?;
                frame.push(value);
            }
            Op::StoreLocal(slot) => {
                let value = frame.pop()?;
                frame.set_local(slot, value)?;
            }
            Op::LoadGlobal(index) => {
                let value = self
                    .globals
                    .lock()
                    .get(index as usize)
                    .cloned()
                    .ok_or_else(|| internal("global index out of range"))?;
                frame.push(value);
            }
            Op::StoreGlobal(index) => {
                let value = frame.pop()?;
                let mut globals = self.globals.lock();
                let slot = globals
                    .get_mut(index as usize)
                    .ok_or_else(|| internal("global index out of range"))?;
                *slot = value;
            }
            Op::LoadFunction(func) => frame.push(Value::Function(func)),
            Op::LoadClass(class) => frame.push(Value::Class(class)),
            Op::LoadNative(native) => frame.push(Value::Native(native)),
            Op::LoadService(service) => frame.push(Value::Service(service)),
            Op::LoadThis => {
                let this = if frame.owner.is_some() {
                    frame.local(0)?
                } else {
                    Value::Null
                };
                frame.push(this);
            }
            Op::GetField(name) => {
                let object = frame.pop()?;
                let value = self.get_field(&object, self.artifact.constant_str(name), frame.owner)?;
                frame.push(value);
            }
            Op::SetField(name) => {
                let value = frame.pop()?;
                let object = frame.pop()?;
                self.set_field(&object, self.artifact.constant_str(name), value.clone(), frame.owner)?;
                frame.push(value);
            }
            Op::GetIndex => {
                let index = frame.pop()?;
                let object = frame.pop()?;
                let value = self.get_index(&object, &index, frame.owner)?;
                frame.push(value);
            }
            Op::SetIndex => {
                let value = frame.pop()?;
                let index = frame.pop()?;
                let object = frame.pop()?;
                self.set_index(&object, &index, value.clone(), frame.owner)?;
                frame.push(value);
            }
            Op::Binary(op) => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                frame.push(binary(op, &left, &right)?);
            }
            Op::Neg => match frame.pop()? {
                Value::Number(n) => frame.push(Value::Number(-n)),
                other => return Err(Exception::type_error(format!("cannot negate {}", other.type_name()))),
            },
            Op::ToNumber => {
                let value = frame.pop()?;
                frame.push(Value::Number(to_number(&value)?));
            }
            Op::Not => {
                let value = frame.pop()?;
                frame.push(Value::Bool(!value.truthy()));
            }
            Op::Truthy => {
                let value = frame.pop()?;
                frame.push(Value::Bool(value.truthy()));
            }
            Op::Jump(target) => frame.pc = target as usize,
            Op::JumpIfFalse(target) => {
                if !frame.pop()?.truthy() {
                    frame.pc = target as usize;
                }
            }
            Op::JumpIfFalseOrPop(target) => {
                if frame.peek()?.truthy() {
                    frame.pop()?;
                } else {
                    frame.pc = target as usize;
                }
            }
            Op::JumpIfTrueOrPop(target) => {
                if frame.peek()?.truthy() {
                    frame.pc = target as usize;
                } else {
                    frame.pop()?;
                }
            }
            Op::Call(argc) => {
                let args = frame.pop_n(argc as usize)?;
                let callee = frame.pop()?;
                let result = self.clone().call_value(callee, args, ctx).await?;
                frame.push(result);
            }
            Op::CallMethod { name, argc } => {
                let args = frame.pop_n(argc as usize)?;
                let receiver = frame.pop()?;
                let name = self.artifact.constant_str(name);
                let result = self.call_method(receiver, name, args, frame.owner, ctx).await?;
                frame.push(result);
            }
            Op::New { class, argc } => {
                let args = frame.pop_n(argc as usize)?;
                let instance = self.instantiate(class, args, ctx).await?;
                frame.push(instance);
            }
            Op::MakeArray(n) => {
                let items = frame.pop_n(n as usize)?;
                frame.push(Value::array(items));
            }
            Op::MakeObject(n) => {
                let flat = frame.pop_n(2 * n as usize)?;
                let mut entries = IndexMap::with_capacity(n as usize);
                let mut flat = flat.into_iter();
                while let (Some(key), Some(value)) = (flat.next(), flat.next()) {
                    entries.insert(key.to_string(), value);
                }
                frame.push(Value::object(entries));
            }
            Op::Await => match frame.pop()? {
                Value::Task(task) => {
                    let value = task.join().await?;
                    frame.push(value);
                }
                other => frame.push(other),
            },
            Op::Spawn(argc) => {
                let args = frame.pop_n(argc as usize)?;
                let callee = frame.pop()?;
                let fut = self.clone().run_callee(callee, args, ctx);
                frame.push(Value::Task(self.spawn_task(fut)));
            }
            Op::JoinAll(n) => {
                let values = frame.pop_n(n as usize)?;
                let tasks: Vec<TaskHandle> = values
                    .iter()
                    .filter_map(|v| match v {
                        Value::Task(task) => Some(task.clone()),
                        _ => None,
                    })
                    .collect();
                let joined = try_join_all(values.into_iter().map(|value| async move {
                    match value {
                        Value::Task(task) => task.join().await,
                        value => Ok(value),
                    }
                }))
                .await;
                match joined {
                    Ok(results) => frame.push(Value::array(results)),
                    Err(err) => {
                        for task in &tasks {
                            task.abort();
                        }
                        return Err(err);
                    }
                }
            }
            Op::Emit { topic, payload } => {
                let payload = if payload { frame.pop()?.to_json() } else { Json::Null };
                let event = Event::new(self.artifact.constant_str(topic), payload).with_priority(ctx.priority);
                self.bus.publish(&event);
            }
            Op::Throw => {
                let value = frame.pop()?;
                return Err(Exception::thrown(value));
            }
            Op::EnterTry(target) => frame.handlers.push(TryHandler {
                target,
                depth: frame.stack.len(),
            }),
            Op::ExitTry => {
                frame.handlers.pop();
            }
            Op::IterInit => {
                let items = match frame.pop()? {
                    Value::Array(items) => items.lock().clone(),
                    Value::Object(entries) => entries.lock().keys().map(|k| Value::str(k.as_str())).collect(),
                    Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
                    other => return Err(Exception::type_error(format!("{} is not iterable", other.type_name()))),
                };
                frame.push(Value::Iter(Arc::new(Mutex::new(items.into_iter()))));
            }
            Op::IterNext(target) => {
                let next = match frame.peek()? {
                    Value::Iter(iter) => iter.lock().next(),
                    _ => return Err(internal("loop iterator missing")),
                };
                match next {
                    Some(item) => frame.push(item),
                    None => {
                        frame.pop()?;
                        frame.pc = target as usize;
                    }
                }
            }
            Op::Return => {
                let value = frame.pop()?;
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Next)
    }
}

/// Array position for a numeric index, if it is a non-negative integer.
fn array_slot(n: f64) -> Option<usize> {
    (n >= 0.0 && n.fract() == 0.0).then_some(n as usize)
}

fn to_number(value: &Value) -> Result<f64, Exception> {
    Ok(match value {
        Value::Number(n) => *n,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Null => 0.0,
        Value::Str(s) => s.trim().parse().unwrap_or(f64::NAN),
        other => return Err(Exception::type_error(format!("cannot convert {} to a number", other.type_name()))),
    })
}

pub(crate) fn binary(op: BinaryOp, left: &Value, right: &Value) -> TaskResult {
    use Value::{Number, Str};
    let result = match (op, left, right) {
        (BinaryOp::Add, Number(a), Number(b)) => Number(a + b),
        (BinaryOp::Add, Str(_), _) | (BinaryOp::Add, _, Str(_)) => Value::str(format!("{}{}", left, right)),
        (BinaryOp::Sub, Number(a), Number(b)) => Number(a - b),
        (BinaryOp::Mul, Number(a), Number(b)) => Number(a * b),
        (BinaryOp::Div, Number(a), Number(b)) => Number(a / b),
        (BinaryOp::Rem, Number(a), Number(b)) => Number(a % b),
        (BinaryOp::Lt, Number(a), Number(b)) => Value::Bool(a < b),
        (BinaryOp::Gt, Number(a), Number(b)) => Value::Bool(a > b),
        (BinaryOp::LtEq, Number(a), Number(b)) => Value::Bool(a <= b),
        (BinaryOp::GtEq, Number(a), Number(b)) => Value::Bool(a >= b),
        (BinaryOp::Lt, Str(a), Str(b)) => Value::Bool(a < b),
        (BinaryOp::Gt, Str(a), Str(b)) => Value::Bool(a > b),
        (BinaryOp::LtEq, Str(a), Str(b)) => Value::Bool(a <= b),
        (BinaryOp::GtEq, Str(a), Str(b)) => Value::Bool(a >= b),
        (BinaryOp::Eq, _, _) => Value::Bool(left.equals(right)),
        (BinaryOp::NotEq, _, _) => Value::Bool(!left.equals(right)),
        (BinaryOp::And, _, _) => Value::Bool(left.truthy() && right.truthy()),
        (BinaryOp::Or, _, _) => Value::Bool(left.truthy() || right.truthy()),
        _ => {
            return Err(Exception::type_error(format!(
                "cannot apply `{}` to {} and {}",
                op.symbol(),
                left.type_name(),
                right.type_name()
            )));
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic_and_concatenation() {
        let n = Value::Number;
        assert_eq!(binary(BinaryOp::Add, &n(1.0), &n(2.0)).unwrap().as_number(), Some(3.0));
        assert_eq!(
            binary(BinaryOp::Add, &Value::str("n="), &n(2.0)).unwrap().to_string(),
            "n=2"
        );
        assert_eq!(binary(BinaryOp::Rem, &n(7.0), &n(4.0)).unwrap().as_number(), Some(3.0));
        let err = binary(BinaryOp::Sub, &Value::str("a"), &n(1.0)).unwrap_err();
        assert_eq!(err.message(), "cannot apply `-` to string and number");
    }

    #[test]
    fn test_comparisons() {
        let n = Value::Number;
        assert!(binary(BinaryOp::Lt, &n(1.0), &n(2.0)).unwrap().truthy());
        assert!(binary(BinaryOp::Lt, &Value::str("a"), &Value::str("b")).unwrap().truthy());
        assert!(binary(BinaryOp::Eq, &Value::Null, &Value::Null).unwrap().truthy());
        assert!(binary(BinaryOp::NotEq, &n(1.0), &Value::str("1")).unwrap().truthy());
        assert!(binary(BinaryOp::Gt, &n(1.0), &Value::Null).is_err());
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(to_number(&Value::str(" 4.5 ")).unwrap(), 4.5);
        assert!(to_number(&Value::str("x")).unwrap().is_nan());
        assert_eq!(to_number(&Value::Bool(true)).unwrap(), 1.0);
        assert_eq!(array_slot(2.0), Some(2));
        assert_eq!(array_slot(-1.0), None);
        assert_eq!(array_slot(1.5), None);
    }
}
