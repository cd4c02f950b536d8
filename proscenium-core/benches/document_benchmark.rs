use criterion::{criterion_group, criterion_main, Criterion};
use proscenium_core::{ActorClock, Document, DocumentConfig, LinePosition, Record};
use serde_json::{json, Value};
use std::hint::black_box;

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

fn populated(lines: usize) -> Document {
    let mut doc = Document::new("bench");
    let mut author = ActorClock::new("author");
    for i in 0..lines {
        doc.apply_operation(author.upsert_line(
            record(json!({"line_id": format!("l{i}"), "text": "Hello there"})),
            LinePosition::End,
        ));
        doc.apply_operation(author.upsert_node(record(json!({"id": format!("n{i}"), "kind": "dialogue"}))));
    }
    doc
}

fn bench_apply_title(c: &mut Criterion) {
    c.bench_function("apply_field_set", |b| {
        let mut doc = Document::new("bench");
        let mut author = ActorClock::new("author");
        b.iter(|| {
            black_box(doc.apply_operation(author.set_title(Some("Act I"))));
        })
    });
}

fn bench_apply_duplicate(c: &mut Criterion) {
    let mut doc = Document::new("bench");
    let mut author = ActorClock::new("author");
    let op = author.set_title(Some("Act I"));
    doc.apply_operation(op.clone());

    c.bench_function("apply_duplicate", |b| {
        b.iter(|| {
            black_box(doc.apply_operation(black_box(op.clone())));
        })
    });
}

fn bench_line_insert_after(c: &mut Criterion) {
    c.bench_function("line_insert_after_500", |b| {
        b.iter_batched(
            || (populated(500), ActorClock::new("editor")),
            |(mut doc, mut editor)| {
                let op = editor.upsert_line(
                    record(json!({"line_id": "inserted"})),
                    LinePosition::After("l250".into()),
                );
                black_box(doc.apply_operation(op));
            },
            criterion::BatchSize::LargeInput,
        )
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let doc = populated(500);
    c.bench_function("snapshot_500_lines", |b| {
        b.iter(|| {
            black_box(black_box(&doc).snapshot());
        })
    });
}

fn bench_history_eviction(c: &mut Criterion) {
    c.bench_function("apply_with_eviction_max_64", |b| {
        let mut doc = Document::with_config("bench", DocumentConfig { max_history: 64 });
        let mut author = ActorClock::new("author");
        b.iter(|| {
            let op = author.update_meta(record(json!({"beat": 1})));
            black_box(doc.apply_operation(op));
        })
    });
}

criterion_group!(
    benches,
    bench_apply_title,
    bench_apply_duplicate,
    bench_line_insert_after,
    bench_snapshot,
    bench_history_eviction,
);
criterion_main!(benches);
