// src/runtime/host.rs
//! Host functions callable from programs.
//!
//! Every native is registered once in a static table, keyed by module and
//! name. The resolver consults the table for imports and the prelude; the
//! artifact refers to natives by `(module, name)` and the runtime resolves
//! each reference to a function pointer once at load time.
use crate::runtime::vm::{Exception, Output, Value, format_number};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::time::Duration;

/// Module whose exports are visible without an import.
pub const PRELUDE: &str = "prelude";

/// Context handed to synchronous natives.
pub struct NativeCtx<'a> {
    pub output: &'a dyn Output,
}

pub type SyncNative = fn(&NativeCtx<'_>, &[Value]) -> Result<Value, Exception>;
pub type AsyncNative = fn(Vec<Value>) -> BoxFuture<'static, Result<Value, Exception>>;

#[derive(Clone, Copy)]
pub enum NativeFn {
    /// Runs inline and returns its result.
    Sync(SyncNative),
    /// Runs as a task; the call yields a task value.
    Async(AsyncNative),
}

type Module = (&'static str, &'static [(&'static str, NativeFn)]);

static MODULES: &[Module] = &[
    (
        PRELUDE,
        &[
            ("print", NativeFn::Sync(print)),
            ("len", NativeFn::Sync(len)),
            ("str", NativeFn::Sync(to_str)),
            ("keys", NativeFn::Sync(keys)),
        ],
    ),
    ("console", &[("log", NativeFn::Sync(print))]),
    (
        "math",
        &[
            ("floor", NativeFn::Sync(floor)),
            ("ceil", NativeFn::Sync(ceil)),
            ("sqrt", NativeFn::Sync(sqrt)),
            ("abs", NativeFn::Sync(abs)),
            ("min", NativeFn::Sync(min)),
            ("max", NativeFn::Sync(max)),
            ("pow", NativeFn::Sync(pow)),
        ],
    ),
    (
        "time",
        &[("now", NativeFn::Sync(now)), ("sleep", NativeFn::Async(sleep))],
    ),
];

fn module(name: &str) -> Option<&'static [(&'static str, NativeFn)]> {
    MODULES.iter().find(|(m, _)| *m == name).map(|(_, fns)| *fns)
}

/// Names exported by a host module, or `None` if no such module exists.
pub fn module_exports(name: &str) -> Option<Vec<&'static str>> {
    module(name).map(|fns| fns.iter().map(|(n, _)| *n).collect())
}

pub fn lookup(module_name: &str, name: &str) -> Option<NativeFn> {
    module(module_name)?
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, f)| *f)
}

fn number(name: &str, args: &[Value], index: usize) -> Result<f64, Exception> {
    match args.get(index) {
        Some(Value::Number(n)) => Ok(*n),
        Some(other) => Err(Exception::type_error(format!(
            "{} expects a number, found {}",
            name,
            other.type_name()
        ))),
        None => Err(Exception::type_error(format!("{} expects at least {} argument(s)", name, index + 1))),
    }
}

fn print(ctx: &NativeCtx<'_>, args: &[Value]) -> Result<Value, Exception> {
    let line = args.iter().map(Value::to_string).collect::<Vec<_>>().join(" ");
    ctx.output.write_line(&line);
    Ok(Value::Null)
}

fn len(_: &NativeCtx<'_>, args: &[Value]) -> Result<Value, Exception> {
    let n = match args.first() {
        Some(Value::Array(items)) => items.lock().len(),
        Some(Value::Str(s)) => s.chars().count(),
        Some(Value::Object(entries)) => entries.lock().len(),
        Some(other) => return Err(Exception::type_error(format!("len: {} has no length", other.type_name()))),
        None => return Err(Exception::type_error("len expects 1 argument")),
    };
    Ok(Value::Number(n as f64))
}

fn to_str(_: &NativeCtx<'_>, args: &[Value]) -> Result<Value, Exception> {
    Ok(match args.first() {
        Some(Value::Number(n)) => Value::str(format_number(*n)),
        Some(v) => Value::str(v.to_string()),
        None => Value::str(""),
    })
}

fn keys(_: &NativeCtx<'_>, args: &[Value]) -> Result<Value, Exception> {
    let keys: Vec<Value> = match args.first() {
        Some(Value::Object(entries)) => entries.lock().keys().map(|k| Value::str(k.as_str())).collect(),
        Some(Value::Instance(instance)) => instance.field_names.iter().map(|k| Value::str(k.as_str())).collect(),
        Some(other) => return Err(Exception::type_error(format!("keys: {} has no keys", other.type_name()))),
        None => return Err(Exception::type_error("keys expects 1 argument")),
    };
    Ok(Value::array(keys))
}

fn floor(_: &NativeCtx<'_>, args: &[Value]) -> Result<Value, Exception> {
    Ok(Value::Number(number("math.floor", args, 0)?.floor()))
}

fn ceil(_: &NativeCtx<'_>, args: &[Value]) -> Result<Value, Exception> {
    Ok(Value::Number(number("math.ceil", args, 0)?.ceil()))
}

fn sqrt(_: &NativeCtx<'_>, args: &[Value]) -> Result<Value, Exception> {
    Ok(Value::Number(number("math.sqrt", args, 0)?.sqrt()))
}

fn abs(_: &NativeCtx<'_>, args: &[Value]) -> Result<Value, Exception> {
    Ok(Value::Number(number("math.abs", args, 0)?.abs()))
}

fn min(_: &NativeCtx<'_>, args: &[Value]) -> Result<Value, Exception> {
    let mut acc = number("math.min", args, 0)?;
    for i in 1..args.len() {
        acc = acc.min(number("math.min", args, i)?);
    }
    Ok(Value::Number(acc))
}

fn max(_: &NativeCtx<'_>, args: &[Value]) -> Result<Value, Exception> {
    let mut acc = number("math.max", args, 0)?;
    for i in 1..args.len() {
        acc = acc.max(number("math.max", args, i)?);
    }
    Ok(Value::Number(acc))
}

fn pow(_: &NativeCtx<'_>, args: &[Value]) -> Result<Value, Exception> {
    Ok(Value::Number(number("math.pow", args, 0)?.powf(number("math.pow", args, 1)?)))
}

/// Milliseconds since the Unix epoch.
fn now(_: &NativeCtx<'_>, _: &[Value]) -> Result<Value, Exception> {
    Ok(Value::Number(chrono::Utc::now().timestamp_millis() as f64))
}

fn sleep(args: Vec<Value>) -> BoxFuture<'static, Result<Value, Exception>> {
    async move {
        let ms = number("time.sleep", &args, 0)?;
        tokio::time::sleep(Duration::from_millis(ms.max(0.0) as u64)).await;
        Ok(Value::Null)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::vm::CapturedOutput;

    fn call(module_name: &str, name: &str, args: &[Value]) -> Result<Value, Exception> {
        let out = CapturedOutput::new();
        let ctx = NativeCtx { output: &out };
        match lookup(module_name, name) {
            Some(NativeFn::Sync(f)) => f(&ctx, args),
            _ => panic!("no sync native {}.{}", module_name, name),
        }
    }

    #[test]
    fn test_exports() {
        assert_eq!(module_exports(PRELUDE).unwrap(), vec!["print", "len", "str", "keys"]);
        assert!(module_exports("math").unwrap().contains(&"sqrt"));
        assert!(module_exports("fs").is_none());
        assert!(matches!(lookup("time", "sleep"), Some(NativeFn::Async(_))));
        assert!(lookup("math", "nope").is_none());
    }

    #[test]
    fn test_math() {
        let n = Value::Number;
        assert_eq!(call("math", "floor", &[n(2.7)]).unwrap().as_number(), Some(2.0));
        assert_eq!(call("math", "max", &[n(1.0), n(5.0), n(3.0)]).unwrap().as_number(), Some(5.0));
        assert_eq!(call("math", "pow", &[n(2.0), n(10.0)]).unwrap().as_number(), Some(1024.0));
        let err = call("math", "sqrt", &[Value::str("x")]).unwrap_err();
        assert_eq!(err.name().as_deref(), Some("TypeError"));
    }

    #[test]
    fn test_print_writes_one_line() {
        let out = CapturedOutput::new();
        let ctx = NativeCtx { output: &out };
        print(&ctx, &[Value::str("a"), Value::Number(1.0), Value::Null]).unwrap();
        assert_eq!(out.lines(), vec!["a 1 null"]);
    }

    #[test]
    fn test_len_and_str() {
        assert_eq!(call(PRELUDE, "len", &[Value::str("héllo")]).unwrap().as_number(), Some(5.0));
        assert_eq!(call(PRELUDE, "str", &[Value::Number(4.0)]).unwrap().to_string(), "4");
        assert!(call(PRELUDE, "len", &[Value::Null]).is_err());
    }

    #[tokio::test]
    async fn test_async_sleep() {
        let Some(NativeFn::Async(f)) = lookup("time", "sleep") else {
            panic!("sleep should be async");
        };
        assert!(matches!(f(vec![Value::Number(1.0)]).await, Ok(Value::Null)));
    }
}
