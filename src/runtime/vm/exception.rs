// src/runtime/vm/exception.rs
//! Thrown values.
use super::value::Value;
use indexmap::IndexMap;
use std::fmt;

/// A value in flight between `throw` and `catch`. Runtime faults and
/// capability failures are error objects of the form `{ name, message }`.
#[derive(Clone)]
pub struct Exception {
    value: Value,
    /// Where it was first raised, `function (file:line)`.
    origin: Option<String>,
}

impl Exception {
    pub fn new(name: &str, message: impl Into<String>) -> Self {
        let mut fields = IndexMap::new();
        fields.insert("name".to_string(), Value::str(name));
        fields.insert("message".to_string(), Value::str(message.into()));
        Self::thrown(Value::object(fields))
    }

    pub fn thrown(value: Value) -> Self {
        Self { value, origin: None }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::new("ReferenceError", message)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Records the raise site unless one is already set.
    pub fn at(mut self, origin: impl FnOnce() -> String) -> Self {
        if self.origin.is_none() {
            self.origin = Some(origin());
        }
        self
    }

    fn field(&self, name: &str) -> Option<String> {
        match &self.value {
            Value::Object(entries) => entries.lock().get(name).map(|v| v.to_string()),
            _ => None,
        }
    }

    /// `name` of an error object.
    pub fn name(&self) -> Option<String> {
        self.field("name")
    }

    pub fn message(&self) -> String {
        self.field("message").unwrap_or_else(|| self.value.to_string())
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}: {}", name, self.message())?,
            None => write!(f, "{}", self.value)?,
        }
        if let Some(origin) = &self.origin {
            write!(f, " at {}", origin)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exception")
            .field("value", &self.value)
            .field("origin", &self.origin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_object_display() {
        let e = Exception::type_error("bad").at(|| "f (t.syn:3)".into());
        assert_eq!(e.name().as_deref(), Some("TypeError"));
        assert_eq!(e.to_string(), "TypeError: bad at f (t.syn:3)");
        let e = e.at(|| "g (t.syn:9)".into());
        assert_eq!(e.origin(), Some("f (t.syn:3)"));
    }

    #[test]
    fn test_plain_thrown_value() {
        let e = Exception::thrown(Value::Number(7.0));
        assert_eq!(e.name(), None);
        assert_eq!(e.message(), "7");
        assert_eq!(e.to_string(), "7");
    }
}
