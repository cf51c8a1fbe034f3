// benches/synapse_bench.rs
use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use synapse::compile;
use synapse::runtime::bus::{SegmentMatcher, SubstringMatcher, TopicMatcher};
use synapse::runtime::{Event, EventBus};

const PROGRAM: &str = r#"
interface Shape { area(): number; }

class Rect implements Shape {
    protected var w: number = 0;
    protected var h: number = 0;
    constructor(w: number, h: number) { this.w = w; this.h = h; }
    area(): number { return w * h; }
}

class Square extends Rect {
    constructor(side: number) { this.w = side; this.h = side; }
}

function total(shapes) {
    var sum = 0;
    for (var s in shapes) { sum += s.area(); }
    return sum;
}

on sensor.reading (r) {
    if (r.value > 100) { emit alert.sensor.high, r; }
}

var shapes = [new Rect(2, 3), new Rect(4, 5)];
print("total " + total(shapes));
"#;

fn bench_compile(c: &mut Criterion) {
    c.bench_function("synapse_compile", |b| {
        b.iter(|| black_box(compile(black_box(PROGRAM), "bench.syn").is_ok()))
    });
}

fn bench_publish_exact(c: &mut Criterion) {
    let bus = EventBus::new();
    for i in 0..64 {
        bus.subscribe(format!("topic.{}", i), |_| Ok(()));
    }
    let event = Event::new("topic.7", json!({"value": 1}));
    c.bench_function("synapse_publish_exact", |b| b.iter(|| black_box(bus.publish(black_box(&event)))));
}

fn bench_publish_wildcard(c: &mut Criterion) {
    let bus = EventBus::new();
    for i in 0..64 {
        bus.subscribe(format!("sensor.{}.*", i), |_| Ok(()));
    }
    let event = Event::new("sensor.7.temperature", json!(21.5));
    c.bench_function("synapse_publish_wildcard", |b| b.iter(|| black_box(bus.publish(black_box(&event)))));
}

fn bench_matchers(c: &mut Criterion) {
    let topic = "alert.temperature.high.zone7";
    c.bench_function("synapse_match_substring", |b| {
        b.iter(|| black_box(SubstringMatcher.matches(black_box("alert.*.high.*"), black_box(topic))))
    });
    c.bench_function("synapse_match_segment", |b| {
        b.iter(|| black_box(SegmentMatcher.matches(black_box("alert.*.high.*"), black_box(topic))))
    });
}

criterion_group!(
    benches,
    bench_compile,
    bench_publish_exact,
    bench_publish_wildcard,
    bench_matchers
);
criterion_main!(benches);
