//! Performance benchmarks for a3s-recovery
//!
//! Run with: cargo bench

use a3s_recovery::{
    classify, delay_for, ErrorClassifier, ManualClock, ManualScheduler, MemoryChannel,
    MemoryObserver, RawError, RecoveryCoordinator, RoomKey,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::time::Duration;

fn bench_classify(c: &mut Criterion) {
    let inputs = vec![
        RawError::from("failed to lazily initialize a collection of role: X"),
        RawError::from("Unauthorized: expired"),
        RawError::code(1006),
        RawError::from_value(serde_json::json!({
            "error": "INTERNAL_SERVER_ERROR",
            "message": "Room is full"
        })),
        RawError::from("something odd"),
    ];

    c.bench_function("classify default rules", |b| {
        b.iter(|| {
            for input in &inputs {
                criterion::black_box(classify(input));
            }
        });
    });

    let classifier = ErrorClassifier::default();
    c.bench_function("ErrorClassifier::classify unknown", |b| {
        let odd = RawError::from("something odd");
        b.iter(|| classifier.classify(&odd));
    });

    let frame = serde_json::json!({
        "body": r#"{"error":"INTERNAL_SERVER_ERROR","message":"could not initialize proxy"}"#
    });
    c.bench_function("RawError::from_value frame", |b| {
        b.iter(|| RawError::from_value(frame.clone()));
    });
}

fn bench_backoff(c: &mut Criterion) {
    let base = Duration::from_millis(1000);
    let cap = Duration::from_millis(15_000);

    c.bench_function("delay_for 0..32", |b| {
        b.iter(|| {
            for n in 0..32 {
                criterion::black_box(delay_for(n, base, cap));
            }
        });
    });
}

fn bench_handle_error(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("RecoveryCoordinator handle_error", |b| {
        b.to_async(&rt).iter(|| async {
            let clock = ManualClock::new(0);
            let coordinator = RecoveryCoordinator::builder(MemoryChannel::connected())
                .scheduler(ManualScheduler::new(clock.clone()))
                .clock(clock)
                .observer(MemoryObserver::default())
                .build()
                .unwrap();
            let room = RoomKey::from("guild.7");
            let err = RawError::from("could not initialize proxy - no Session");
            for _ in 0..5 {
                coordinator.handle_error(&err, &room).await;
            }
        });
    });
}

criterion_group!(benches, bench_classify, bench_backoff, bench_handle_error);
criterion_main!(benches);
