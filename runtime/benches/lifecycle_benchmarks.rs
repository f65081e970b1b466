//! Lifecycle Benchmarks
//!
//! Measures the hot paths of a request:
//! - Reducer transitions (pure, in-memory)
//! - Target construction with data and callback placeholder
//! - A full submit and deliver round trip against the in-memory host
//!
//! Run with: `cargo bench`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use jsonp_core::reducer::Reducer;
use jsonp_core::target::{RequestData, build_target};
use jsonp_runtime::lifecycle::{LifecycleAction, LifecycleReducer, LifecycleState};
use jsonp_runtime::{ClientConfig, JsonpClient, RequestDescriptor};
use jsonp_testing::{MockDocument, test_clock};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn bench_reducer(c: &mut Criterion) {
    let mut group = c.benchmark_group("reducer");
    group.throughput(Throughput::Elements(1));

    group.bench_function("start_then_deliver", |b| {
        let reducer = LifecycleReducer;
        b.iter(|| {
            let mut state = LifecycleState::new(Some("http://x?cb=_jsonp".to_string()));
            let start = reducer.reduce(
                &mut state,
                LifecycleAction::Start {
                    cached: None,
                    timeout: Some(Duration::from_secs(5)),
                },
                &(),
            );
            let done = reducer.reduce(&mut state, LifecycleAction::Delivered(json!(1)), &());
            black_box((start, done))
        });
    });

    group.bench_function("late_signal_ignored", |b| {
        let reducer = LifecycleReducer;
        let mut state = LifecycleState::new(None);
        reducer.reduce(&mut state, LifecycleAction::Start { cached: None, timeout: None }, &());
        reducer.reduce(&mut state, LifecycleAction::Abort, &());
        b.iter(|| black_box(reducer.reduce(&mut state, LifecycleAction::Delivered(json!(1)), &())));
    });

    group.finish();
}

fn bench_target(c: &mut Criterion) {
    let data = RequestData::pairs([("q", "rust lang"), ("page", "2"), ("sort", "desc")]);
    c.bench_function("build_target", |b| {
        b.iter(|| {
            let target = build_target(
                black_box("http://api.test/search?v=1"),
                &data,
                Some("callback"),
                Some(1_735_689_600_000),
            );
            black_box(target.resolve("_jsonp42"))
        });
    });
}

fn bench_round_trip(c: &mut Criterion) {
    let document = Arc::new(MockDocument::new());
    document.respond_on_insert("cb", json!({"items": [1, 2, 3]}));
    let client = JsonpClient::with_config(document, Arc::new(test_clock()), ClientConfig::default());

    c.bench_function("submit_and_deliver", |b| {
        b.iter(|| {
            let handle = client.submit(
                RequestDescriptor::new("http://api.test/feed").with_callback_parameter("cb"),
            );
            black_box(handle.resolution().expect("delivered on insert"))
        });
    });
}

criterion_group!(benches, bench_reducer, bench_target, bench_round_trip);
criterion_main!(benches);
