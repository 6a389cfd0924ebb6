//! Model resolver benchmarks.

use bpmnflow_core::{ConditionEvaluator, Document, ExpressionEvaluator, ModelGraph, ModelResolver};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};

/// A chain of `tasks` tasks, each with one event leading to the next task.
fn chain_model(version: &str, tasks: i64) -> Value {
    let mut elements = Vec::new();
    let mut flows = Vec::new();
    for i in 1..=tasks {
        elements.push(json!({
            "id": format!("t{}", i), "kind": "task", "name": format!("Task {}", i),
            "process": "p1", "task": {"id": i * 100}
        }));
        if i < tasks {
            elements.push(json!({
                "id": format!("e{}", i), "kind": "event", "name": "next",
                "process": "p1", "event": {"id": 10}
            }));
            flows.push(json!({"source": format!("t{}", i), "target": format!("e{}", i)}));
            flows.push(json!({"source": format!("e{}", i), "target": format!("t{}", i + 1)}));
        }
    }
    json!({
        "version": version,
        "processes": [{"id": "p1", "name": "Bench"}],
        "elements": elements,
        "flows": flows
    })
}

fn bench_add_model(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolver_add_model");

    for tasks in [10i64, 100] {
        let json = chain_model("bench-1.0", tasks);
        group.bench_with_input(BenchmarkId::new("tasks", tasks), &json, |b, json| {
            b.iter(|| {
                let resolver = ModelResolver::new();
                black_box(resolver.add_model_json(json).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_find_event(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolver_find_event");

    let resolver = ModelResolver::new();
    resolver.add_model_json(&chain_model("bench-1.0", 100)).unwrap();
    let graph = resolver.get_model("bench-1.0").unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("cached", |b| {
        b.iter(|| black_box(resolver.find_event_by_id(&graph, 5000, 10).unwrap()));
    });

    // A graph that is not the registered one bypasses the caches
    let detached = ModelGraph::from_json(&chain_model("bench-detached", 100)).unwrap();
    group.bench_function("uncached", |b| {
        b.iter(|| black_box(resolver.find_event_by_id(&detached, 5000, 10).unwrap()));
    });

    group.finish();
}

fn bench_model_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolver_find_model");

    let resolver = ModelResolver::new();
    for minor in 0..20 {
        resolver
            .add_model_json(&chain_model(&format!("bench-1.{:02}", minor), 10))
            .unwrap();
    }

    group.bench_function("exact", |b| {
        b.iter(|| {
            let mut doc = Document::new().model("bench-1.05");
            black_box(resolver.find_model_for_document(&mut doc).unwrap())
        });
    });

    group.bench_function("regex", |b| {
        b.iter(|| {
            let mut doc = Document::new().model(r"bench-1\..*");
            black_box(resolver.find_model_for_document(&mut doc).unwrap())
        });
    });

    group.bench_function("group", |b| {
        b.iter(|| {
            let mut doc = Document::new()
                .model("bench-0.9")
                .with("$workflowgroup", "Bench");
            black_box(resolver.find_model_for_document(&mut doc).unwrap())
        });
    });

    group.finish();
}

fn bench_condition_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("condition_evaluation");

    let evaluator = ConditionEvaluator::default();
    let doc = Document::new()
        .with("amount", 150)
        .with("priority", "high")
        .with("approved", true);

    let conditions = [
        ("simple", "amount > 100"),
        ("compound", "amount > 100 && priority == 'high'"),
        ("nested", "(amount > 100 || priority == 'low') && !(approved == false)"),
    ];
    for (name, condition) in conditions {
        group.bench_function(name, |b| {
            b.iter(|| black_box(evaluator.evaluate_boolean(condition, &doc).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_add_model,
    bench_find_event,
    bench_model_resolution,
    bench_condition_evaluation,
);

criterion_main!(benches);
