// src/tests.rs
//! End-to-end tests: source text through the compiler into a running program.
use crate::compile;
use crate::error::{CompileError, RuntimeError};
use crate::runtime::reflex::{PodSet, ReflexConfig, ThresholdSettings};
use crate::runtime::vm::{CapturedOutput, Program, Runtime, Value};
use crate::runtime::{Event, EventBus, Priority};
use crate::Artifact;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn build(src: &str) -> Artifact {
    compile(src, "e2e.syn").unwrap_or_else(|errs| panic!("compile failed: {:?}", errs))
}

fn load(src: &str, bus: &EventBus) -> (Program, CapturedOutput) {
    let out = CapturedOutput::new();
    let program = Runtime::new()
        .bus(bus.clone())
        .output(Arc::new(out.clone()))
        .load(build(src))
        .unwrap();
    (program, out)
}

async fn run(src: &str) -> (Program, CapturedOutput) {
    let (program, out) = load(src, &EventBus::new());
    program.start().await.unwrap();
    program.idle().await;
    (program, out)
}

fn record(bus: &EventBus, pattern: &str) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe(pattern, move |e| {
        sink.lock().push(e.clone());
        Ok(())
    });
    seen
}

fn global_json(program: &Program, name: &str) -> serde_json::Value {
    program
        .global(name)
        .unwrap_or_else(|| panic!("no global `{}`", name))
        .to_json()
}

#[tokio::test]
async fn test_handler_republishes_payload_exactly_once() {
    let bus = EventBus::new();
    let processed = record(&bus, "data.processed");
    let (program, _) = load("on data.ready (e) { emit data.processed, e; }", &bus);
    program.start().await.unwrap();

    bus.publish(&Event::new("data.ready", json!(42)));
    program.idle().await;

    let processed = processed.lock();
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].topic(), "data.processed");
    assert_eq!(processed[0].payload(), &json!(42));
}

#[tokio::test]
async fn test_top_level_statements_loops_and_recursion() {
    let src = r#"
function fib(n) {
    if (n < 2) { return n; }
    return fib(n - 1) + fib(n - 2);
}
var xs = [];
for (var i = 0; i < 6; i += 1) { xs.push(fib(i)); }
print(xs.join(","));
var total = 0;
for (var x in xs) { total += x; }
print("total " + total);
var k = 0;
while (k < 3 && total > 0) { k = k + 1; }
print(k, len(xs), str(2.5));
"#;
    let (program, out) = run(src).await;
    assert_eq!(out.lines(), vec!["0,1,1,2,3,5", "total 12", "3 6 2.5"]);
    assert_eq!(global_json(&program, "total"), json!(12));
}

#[tokio::test]
async fn test_classes_inheritance_and_visibility() {
    let src = r#"
interface Speaker { speak(): string; }

class Animal implements Speaker {
    protected var name: string;
    private var secret = "hidden";
    constructor(name: string) { this.name = name; }
    speak(): string { return name + " makes a sound"; }
}

@Trained
class Dog extends Animal {
    var tricks = 0;
    speak(): string { return name + " barks"; }
    learn() { tricks += 1; return tricks; }
}

var pets = [new Animal("Generic"), new Dog("Rex")];
for (var p in pets) { print(p.speak()); }
var d = new Dog("Fido");
d.learn();
print("tricks " + d.learn());
try { print(d.secret); } catch (e) { print(e.name); }
"#;
    let (program, out) = run(src).await;
    assert_eq!(
        out.lines(),
        vec!["Generic makes a sound", "Rex barks", "tricks 2", "AccessError"]
    );
    let dog = &program.artifact().classes[1];
    assert_eq!(dog.decorators, vec!["Trained"]);
    assert_eq!(dog.interfaces, vec!["Speaker"]);
    assert_eq!(
        dog.fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
        vec!["name", "secret", "tricks"]
    );
}

#[tokio::test]
async fn test_runtime_faults_and_throws_are_catchable() {
    let src = r#"
var n = null;
try { var y = n.x; } catch (e) { print(e.name + ": " + e.message); }
function thrower() { throw { name: "Custom", message: "boom" }; }
try { thrower(); } catch (e) { print(e.name + "/" + e.message); }
try { throw 7; } catch (e) { print(e + 1); }
"#;
    let (_, out) = run(src).await;
    assert_eq!(
        out.lines(),
        vec!["TypeError: cannot read `x` of null", "Custom/boom", "8"]
    );
}

#[tokio::test]
async fn test_uncaught_exception_fails_start() {
    let (program, out) = load("print(\"before\");\nthrow \"fatal\";\nprint(\"after\");", &EventBus::new());
    let err = program.start().await.unwrap_err();
    assert!(matches!(&err, RuntimeError::UncaughtException(msg) if msg.contains("fatal")));
    assert_eq!(out.lines(), vec!["before"]);
}

#[tokio::test]
async fn test_handler_fault_is_reported_and_siblings_still_run() {
    let src = r#"
on job.start (e) { throw "broken " + e; }
on job.start (e) { print("second saw " + e); }
"#;
    let bus = EventBus::new();
    let mut faults = bus.subscribe_faults();
    let (program, out) = load(src, &bus);
    program.start().await.unwrap();

    bus.publish(&Event::new("job.start", json!(7)));
    program.idle().await;

    let fault = faults.try_recv().unwrap();
    assert_eq!(fault.topic, "job.start");
    assert!(fault.message.contains("broken 7"), "{}", fault.message);
    assert_eq!(out.lines(), vec!["second saw 7"]);
}

#[tokio::test]
async fn test_parallel_joins_and_fails_fast() {
    let src = r#"
var r = null;
var caught = null;
function f(x) {
    if (x == 2) { throw "f failed on " + x; }
    return x * 10;
}
var ok = parallel [f(1), f(3)];
try { r = parallel [f(1), f(2), f(3)]; } catch (e) { caught = e; }
"#;
    let (program, _) = run(src).await;
    assert_eq!(global_json(&program, "ok"), json!([10, 30]));
    assert!(matches!(program.global("r"), Some(Value::Null)));
    assert_eq!(global_json(&program, "caught"), json!("f failed on 2"));
}

#[tokio::test]
async fn test_async_functions_and_await() {
    let src = r#"
import time;
async function slow(x: number): number {
    await time.sleep(5);
    return x + 1;
}
var started = slow(41);
var result = await started;
var direct = await slow(1);
var both = parallel [slow(1), slow(2)];
var plain = await 5;
"#;
    let (program, _) = run(src).await;
    assert_eq!(global_json(&program, "result"), json!(42));
    assert_eq!(global_json(&program, "direct"), json!(2));
    assert_eq!(global_json(&program, "both"), json!([2, 3]));
    assert_eq!(global_json(&program, "plain"), json!(5));
}

#[tokio::test]
async fn test_async_handler_awaits_service() {
    let src = r#"
uses Echo from "echo";
on async ask (q) {
    var answer = await Echo(q);
    emit answered, answer;
}
"#;
    let bus = EventBus::new();
    let answered = record(&bus, "answered");
    let (program, _) = load(src, &bus);
    program.start().await.unwrap();

    bus.publish(&Event::new("ask", json!({"q": "ping"})));
    program.idle().await;

    let answered = answered.lock();
    assert_eq!(answered.len(), 1);
    assert_eq!(answered[0].payload(), &json!({"q": "ping"}));
}

#[tokio::test]
async fn test_slow_async_handler_does_not_hold_up_plain_handlers() {
    let src = r#"
import time;
on async slow (e) { await time.sleep(1000); print("slow"); }
on fast (e) { print("fast"); }
"#;
    let bus = EventBus::new();
    let (program, out) = load(src, &bus);
    program.start().await.unwrap();

    bus.publish(&Event::new("slow", json!(null)));
    bus.publish(&Event::new("fast", json!(null)));
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(out.lines(), vec!["fast"]);
    program.shutdown();
}

#[test]
fn test_await_in_plain_handler_is_a_compile_error() {
    let errs = compile("import time;\non slow (e) { await time.sleep(1000); }", "bad.syn").unwrap_err();
    assert_eq!(errs.len(), 1);
    assert!(matches!(errs[0], CompileError::Resolve { .. }));
    assert_eq!(errs[0].pos().line, 2);
}

#[tokio::test]
async fn test_unknown_capability_is_thrown_at_await() {
    let src = r#"
uses Speech from "tts";
var failure = null;
try { await Speech("hello"); } catch (e) { failure = e.name; }
"#;
    let (program, _) = run(src).await;
    assert_eq!(global_json(&program, "failure"), json!("CapabilityError"));
}

#[tokio::test]
async fn test_emit_priority_is_inherited_from_trigger() {
    let src = r#"
on sensor.alert (e) { emit alert.forwarded, e; }
emit boot;
"#;
    let bus = EventBus::new();
    let boot = record(&bus, "boot");
    let forwarded = record(&bus, "alert.forwarded");
    let (program, _) = load(src, &bus);
    program.start().await.unwrap();

    bus.publish(&Event::new("sensor.alert", json!({"v": 1})).with_priority(Priority::High));
    program.idle().await;

    let boot = boot.lock();
    assert_eq!(boot.len(), 1);
    assert_eq!(boot[0].priority(), Priority::Standard);
    assert_eq!(boot[0].payload(), &json!(null));
    let forwarded = forwarded.lock();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].priority(), Priority::High);
    assert_eq!(forwarded[0].payload(), &json!({"v": 1}));
}

#[tokio::test]
async fn test_wildcard_handler_uses_substring_rule() {
    let bus = EventBus::new();
    let (program, out) = load("on alert.* (e) { print(\"alert: \" + e); }", &bus);
    program.start().await.unwrap();

    bus.publish(&Event::new("alert.temperature.high", json!("hot")));
    // Pieces are found as ordered substrings, not aligned to segments.
    bus.publish(&Event::new("xalertyz", json!("odd")));
    bus.publish(&Event::new("status.ok", json!("no")));
    program.idle().await;

    assert_eq!(out.lines(), vec!["alert: hot", "alert: odd"]);
}

#[tokio::test]
async fn test_reflex_pod_feeds_program_handler() {
    let src = "on alert.temperature.high (a) { print(\"alert from \" + a.source + \" at \" + a.value); }";
    let bus = EventBus::new();
    let config = ReflexConfig {
        threshold: vec![ThresholdSettings {
            source: "sensor.temp".into(),
            threshold: 80.0,
            alert: "alert.temperature.high".into(),
            field: None,
        }],
        relay: Vec::new(),
    };
    let pods = PodSet::from_config(&bus, &config).unwrap();
    let (program, out) = load(src, &bus);
    program.start().await.unwrap();

    bus.publish(&Event::new("sensor.temp", json!(60)));
    bus.publish(&Event::new("sensor.temp", json!(90)));
    program.idle().await;

    assert_eq!(out.lines(), vec!["alert from sensor.temp at 90"]);
    assert_eq!(pods.iter().map(|p| p.fired()).sum::<u64>(), 1);
}

#[tokio::test]
async fn test_host_calls_and_shutdown() {
    let src = "function add(a, b) { return a + b; }\non tick (e) { print(\"tick\"); }";
    let bus = EventBus::new();
    let (program, out) = load(src, &bus);
    program.start().await.unwrap();

    let sum = program.call("add", vec![Value::Number(2.0), Value::Number(3.0)]).await.unwrap();
    assert_eq!(sum.as_number(), Some(5.0));
    assert!(matches!(
        program.call("missing", Vec::new()).await,
        Err(RuntimeError::MissingEntryPoint(..))
    ));

    program.shutdown();
    assert_eq!(bus.subscription_count(), 0);
    bus.publish(&Event::new("tick", json!(null)));
    program.idle().await;
    assert!(out.lines().is_empty());
}

#[tokio::test]
async fn test_artifact_survives_json_round_trip() {
    let artifact = build("class P { var v = 20; double() { return v * 2; } }\nprint(new P().double());");
    let restored = Artifact::from_json(&artifact.to_json().unwrap()).unwrap();
    assert_eq!(restored, artifact);

    let out = CapturedOutput::new();
    let program = Runtime::new().output(Arc::new(out.clone())).load(restored).unwrap();
    program.start().await.unwrap();
    assert_eq!(out.lines(), vec!["40"]);
}

#[test]
fn test_parse_errors_are_batched() {
    let errs = compile("var a = ;\nvar b = 1 +;\nvar c = 3;", "bad.syn").unwrap_err();
    assert_eq!(errs.len(), 2);
    assert!(errs.iter().all(|e| matches!(e, CompileError::Parse(_))));
    assert_eq!(errs.iter().map(|e| e.pos().line).collect::<Vec<_>>(), vec![1, 2]);
    assert!(errs.iter().all(|e| e.file() == "bad.syn"));
}

#[test]
fn test_resolve_errors_render_with_position_and_kind() {
    let errs = compile("var a = b;\nvar c = d;", "bad.syn").unwrap_err();
    let rendered: Vec<String> = errs.iter().map(|e| e.to_string()).collect();
    assert_eq!(
        rendered,
        vec![
            "bad.syn:1:9: unresolved symbol: cannot find `b` in this scope",
            "bad.syn:2:9: unresolved symbol: cannot find `d` in this scope",
        ]
    );
}

#[test]
fn test_lex_errors_stop_before_parsing() {
    let errs = compile("var s = \"open;\nvar t = 1;", "bad.syn").unwrap_err();
    assert!(!errs.is_empty());
    assert!(errs.iter().all(|e| matches!(e, CompileError::Lex { .. })));
}
