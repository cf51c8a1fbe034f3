// src/runtime/vm/value.rs
//! Runtime values.
//!
//! Primitives are held inline; arrays, objects and instances are shared
//! references (`Arc` plus a `parking_lot` lock), so aliasing and identity
//! equality behave as in other dynamic languages.
use super::exception::Exception;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::fmt;
use std::sync::Arc;
use tokio::task::AbortHandle;

pub type TaskResult = Result<Value, Exception>;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(Arc<str>),
    Array(Arc<Mutex<Vec<Value>>>),
    Object(Arc<Mutex<IndexMap<String, Value>>>),
    Instance(Arc<Instance>),
    Function(u32),
    BoundMethod(Arc<BoundMethod>),
    Class(u32),
    Native(u32),
    Service(u32),
    Task(TaskHandle),
    Iter(Arc<Mutex<std::vec::IntoIter<Value>>>),
}

pub struct Instance {
    pub class: u32,
    pub class_name: Arc<str>,
    pub field_names: Arc<[String]>,
    pub fields: Mutex<Vec<Value>>,
}

pub struct BoundMethod {
    pub receiver: Value,
    pub func: u32,
}

/// A running function call. Cloning shares the same result.
#[derive(Clone)]
pub struct TaskHandle {
    result: Shared<BoxFuture<'static, TaskResult>>,
    abort: AbortHandle,
}

impl TaskHandle {
    /// Spawns `fut` on `handle`.
    pub fn spawn(handle: &tokio::runtime::Handle, fut: BoxFuture<'static, TaskResult>) -> Self {
        let join = handle.spawn(fut);
        let abort = join.abort_handle();
        let result = async move {
            match join.await {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => Err(Exception::new("Cancelled", "task was cancelled")),
                Err(err) => Err(Exception::new("Panic", err.to_string())),
            }
        }
        .boxed()
        .shared();
        Self { result, abort }
    }

    pub async fn join(&self) -> TaskResult {
        self.result.clone().await
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    fn same(&self, other: &TaskHandle) -> bool {
        self.result.ptr_eq(&other.result)
    }
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(Mutex::new(items)))
    }

    pub fn object(entries: IndexMap<String, Value>) -> Self {
        Value::Object(Arc::new(Mutex::new(entries)))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".into(),
            Value::Bool(_) => "boolean".into(),
            Value::Number(_) => "number".into(),
            Value::Str(_) => "string".into(),
            Value::Array(_) => "array".into(),
            Value::Object(_) => "object".into(),
            Value::Instance(i) => i.class_name.to_string(),
            Value::Function(_) | Value::BoundMethod(_) | Value::Native(_) => "function".into(),
            Value::Class(_) => "class".into(),
            Value::Service(_) => "service".into(),
            Value::Task(_) => "task".into(),
            Value::Iter(_) => "iterator".into(),
        }
    }

    /// `==`: primitives by value, everything else by identity.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::BoundMethod(a), Value::BoundMethod(b)) => Arc::ptr_eq(a, b),
            (Value::Iter(a), Value::Iter(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b))
            | (Value::Class(a), Value::Class(b))
            | (Value::Native(a), Value::Native(b))
            | (Value::Service(a), Value::Service(b)) => a == b,
            (Value::Task(a), Value::Task(b)) => a.same(b),
            _ => false,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Converts to a JSON payload. Callables and tasks have no JSON form
    /// and become `null`.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::Str(s) => Json::String(s.to_string()),
            Value::Array(items) => Json::Array(items.lock().iter().map(Value::to_json).collect()),
            Value::Object(entries) => Json::Object(
                entries
                    .lock()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Instance(instance) => {
                let fields = instance.fields.lock();
                Json::Object(
                    instance
                        .field_names
                        .iter()
                        .zip(fields.iter())
                        .map(|(k, v)| (k.clone(), v.to_json()))
                        .collect(),
                )
            }
            _ => Json::Null,
        }
    }

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::str(s.as_str()),
            Json::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::object(map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect()),
        }
    }
}

/// Integral numbers become JSON integers, so `42` round-trips as `42`.
fn number_to_json(n: f64) -> Json {
    const MAX_SAFE: f64 = 9_007_199_254_740_992.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        Json::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number)
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", s),
            other => write_nested(other, f),
        }
    }
}

/// Container contents render with quoted strings.
fn write_nested(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::Null => write!(f, "null"),
        Value::Bool(b) => write!(f, "{}", b),
        Value::Number(n) => write!(f, "{}", format_number(*n)),
        Value::Str(s) => write!(f, "{:?}", s.as_ref()),
        Value::Array(items) => {
            let items = items.lock().clone();
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_nested(item, f)?;
            }
            write!(f, "]")
        }
        Value::Object(entries) => {
            let entries = entries.lock().clone();
            write!(f, "{{")?;
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: ", k)?;
                write_nested(v, f)?;
            }
            write!(f, "}}")
        }
        Value::Instance(instance) => {
            let fields = instance.fields.lock().clone();
            write!(f, "{} {{", instance.class_name)?;
            for (i, (k, v)) in instance.field_names.iter().zip(fields.iter()).enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, " {}: ", k)?;
                write_nested(v, f)?;
            }
            write!(f, " }}")
        }
        Value::Function(_) | Value::BoundMethod(_) | Value::Native(_) => write!(f, "<function>"),
        Value::Class(_) => write!(f, "<class>"),
        Value::Service(_) => write!(f, "<service>"),
        Value::Task(_) => write!(f, "<task>"),
        Value::Iter(_) => write!(f, "<iterator>"),
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_nested(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Number(0.0).truthy());
        assert!(!Value::str("").truthy());
        assert!(Value::str("0").truthy());
        assert!(Value::array(vec![]).truthy());
    }

    #[test]
    fn test_equality_is_identity_for_references() {
        let a = Value::array(vec![Value::Number(1.0)]);
        let b = Value::array(vec![Value::Number(1.0)]);
        assert!(a.equals(&a.clone()));
        assert!(!a.equals(&b));
        assert!(Value::str("x").equals(&Value::str("x")));
        assert!(!Value::Number(1.0).equals(&Value::str("1")));
    }

    #[test]
    fn test_json_conversion() {
        let v = Value::from_json(&json!({"n": 42, "xs": [1.5, "a", null], "ok": true}));
        assert_eq!(v.to_json(), json!({"n": 42, "xs": [1.5, "a", null], "ok": true}));
        assert_eq!(Value::Number(3.0).to_json().to_string(), "3");
        assert_eq!(Value::Function(0).to_json(), Json::Null);
    }

    #[test]
    fn test_display() {
        let v = Value::from_json(&json!({"a": [1, "b"], "c": 2.5}));
        assert_eq!(v.to_string(), "{a: [1, \"b\"], c: 2.5}");
        assert_eq!(Value::str("hi").to_string(), "hi");
        assert_eq!(format_number(-0.5), "-0.5");
        assert_eq!(format_number(1e21), "1000000000000000000000");
    }
}
