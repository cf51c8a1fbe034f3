// src/runtime/vm/program.rs
//! Loading and running a compiled program against an event bus.
use super::interpreter::{CallCtx, Interpreter};
use super::output::{Output, Stdout};
use super::value::Value;
use crate::backend::codegen::Artifact;
use crate::error::{HandlerFaultedError, RuntimeError};
use crate::runtime::bus::{EventBus, Subscription, SubscriptionId};
use crate::runtime::capability::{CapabilityRegistry, Echo};
use crate::runtime::event::{Event, Priority};
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Builder for the environment a program runs in.
pub struct Runtime {
    bus: Option<EventBus>,
    capabilities: CapabilityRegistry,
    output: Arc<dyn Output>,
    max_call_depth: usize,
    handle: Option<Handle>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Fresh bus, stdout output and the `echo` capability.
    pub fn new() -> Self {
        let mut capabilities = CapabilityRegistry::new();
        capabilities.register("echo", Echo);
        Self {
            bus: None,
            capabilities,
            output: Arc::new(Stdout),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            handle: None,
        }
    }

    /// Runs the program against an existing bus, e.g. one shared with pods.
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn capabilities(mut self, capabilities: CapabilityRegistry) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn output(mut self, output: Arc<dyn Output>) -> Self {
        self.output = output;
        self
    }

    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Tokio runtime to run tasks on. Defaults to the current one.
    pub fn handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn load(self, artifact: Artifact) -> Result<Program, RuntimeError> {
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| RuntimeError::Load(e.to_string()))?,
        };
        let bus = self.bus.unwrap_or_default();
        let vm = Interpreter::new(
            artifact,
            bus,
            Arc::new(self.capabilities),
            self.output,
            handle,
            self.max_call_depth,
        )?;
        Ok(Program {
            vm: Arc::new(vm),
            subscriptions: Mutex::new(Vec::new()),
        })
    }
}

/// A loaded program. Dropping it cancels its subscriptions.
pub struct Program {
    vm: Arc<Interpreter>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Program {
    pub fn bus(&self) -> &EventBus {
        &self.vm.bus
    }

    pub fn artifact(&self) -> &Artifact {
        &self.vm.artifact
    }

    /// Current value of a program-level variable.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.vm.global(name)
    }

    /// Registers every `on` handler, then runs the top-level statements.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        self.register_handlers();
        info!(
            file = %self.vm.artifact.file,
            handlers = self.vm.artifact.handlers.len(),
            "program started"
        );
        let main = self.vm.artifact.main;
        self.vm
            .clone()
            .run(main, None, Vec::new(), CallCtx::root(Priority::Standard))
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::UncaughtException(e.to_string()))
    }

    fn register_handlers(&self) {
        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.is_empty() {
            return;
        }
        for handler in &self.vm.artifact.handlers {
            let weak = Arc::downgrade(&self.vm);
            let id = Arc::new(OnceLock::new());
            let handler_id = id.clone();
            let (func, is_async) = (handler.func, handler.is_async);
            let subscription = self.vm.bus.subscribe(handler.topic.clone(), move |event| {
                if let Some(vm) = weak.upgrade() {
                    deliver(vm, func, is_async, handler_id.clone(), event.clone());
                }
                Ok(())
            });
            let _ = id.set(subscription.id());
            debug!(topic = %handler.topic, subscription = %subscription.id(), "handler registered");
            subscriptions.push(subscription);
        }
    }

    /// Resolves once no handler job or task of this program is in flight.
    pub async fn idle(&self) {
        self.vm.in_flight.idle().await;
    }

    /// Cancels every handler subscription. Running handlers finish.
    pub fn shutdown(&self) {
        for subscription in self.subscriptions.lock().drain(..) {
            subscription.cancel();
        }
    }

    /// Calls a top-level function by name, joining it if it is async.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let Some(&func) = self.vm.artifact.entry_points.get(name) else {
            return Err(RuntimeError::MissingEntryPoint(
                self.vm.artifact.file.clone(),
                name.to_string(),
            ));
        };
        let result = self
            .vm
            .clone()
            .call_value(Value::Function(func), args, CallCtx::root(Priority::Standard))
            .await;
        let result = match result {
            Ok(Value::Task(task)) => task.join().await,
            other => other,
        };
        result.map_err(|e| RuntimeError::UncaughtException(e.to_string()))
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs one handler invocation: queued on the dispatcher for plain
/// handlers, as an independent task for async ones.
fn deliver(vm: Arc<Interpreter>, func: u32, is_async: bool, subscription: Arc<OnceLock<SubscriptionId>>, event: Event) {
    let guard = vm.in_flight.enter();
    let priority = event.priority();
    let worker = vm.clone();
    let job = async move {
        let payload = Value::from_json(event.payload());
        let result = worker.clone().run(func, None, vec![payload], CallCtx::root(priority)).await;
        if let Err(err) = result {
            match subscription.get() {
                Some(&id) => worker.bus.report_fault(HandlerFaultedError {
                    topic: event.topic().to_string(),
                    subscription: id,
                    message: err.to_string(),
                }),
                None => warn!(topic = %event.topic(), "handler faulted: {}", err),
            }
        }
    }
    .boxed();
    if is_async {
        vm.handle.spawn(async move {
            job.await;
            drop(guard);
        });
    } else {
        vm.dispatcher.enqueue(priority, job, guard);
    }
}
