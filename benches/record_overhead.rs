//! Capture hot-path benchmark
//!
//! Measures what an application thread pays per observed statement:
//!
//! 1. `normalize_statement` - fingerprinting the statement text
//! 2. `before_execute` + `on_after_execute` with an explicit stack
//! 3. The same with a native stack walk (the default when the ORM supplies
//!    no frames)
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench record_overhead
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use querylens::callsite::Frame;
use querylens::config::ProfilerConfig;
use querylens::event::{ExecutionContext, Outcome};
use querylens::hook::QueryObserver;
use querylens::normalize::normalize_statement;
use querylens::profiler::Profiler;

const STATEMENT: &str = "SELECT p.id, p.title, p.body FROM posts p \
                         WHERE p.author_id = 42 AND p.status IN ('draft', 'published') \
                         ORDER BY p.created_at DESC LIMIT 20";

fn bench_normalize(c: &mut Criterion) {
    c.bench_function("normalize_statement", |b| {
        b.iter(|| black_box(normalize_statement(black_box(STATEMENT))));
    });
}

/// Target: well under the cost of a database round trip (~100μs)
fn bench_record_explicit_stack(c: &mut Criterion) {
    let profiler = Profiler::new(ProfilerConfig::default()).unwrap();
    let session = profiler.start_session();
    let hook = session.hook();
    let context = ExecutionContext::new().with_stack(vec![
        Frame::new("diesel::query_dsl::load", "diesel/src/query_dsl/mod.rs", 1500),
        Frame::new("app::handlers::list_posts", "src/handlers.rs", 42),
    ]);

    c.bench_function("record_explicit_stack", |b| {
        b.iter(|| {
            let token = hook.before_execute(black_box(STATEMENT), &(42, "draft"), &context);
            hook.on_after_execute(token, Outcome::Success);
        });
    });
}

fn bench_record_native_stack(c: &mut Criterion) {
    let profiler = Profiler::new(ProfilerConfig::default()).unwrap();
    let session = profiler.start_session();
    let hook = session.hook();
    let context = ExecutionContext::new();

    c.bench_function("record_native_stack", |b| {
        b.iter(|| {
            let token = hook.before_execute(black_box(STATEMENT), &(42, "draft"), &context);
            hook.on_after_execute(token, Outcome::Success);
        });
    });
}

/// How the number of distinct entries affects record latency
fn bench_record_varying_entries(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_distinct_entries");

    for entries in [1usize, 16, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(entries), &entries, |b, &entries| {
            let profiler = Profiler::new(ProfilerConfig::default()).unwrap();
            let session = profiler.start_session();
            let hook = session.hook();
            let contexts: Vec<ExecutionContext> = (0..entries)
                .map(|i| {
                    ExecutionContext::new().with_stack(vec![Frame::new(
                        "app::worker",
                        "src/worker.rs",
                        i as u32 + 1,
                    )])
                })
                .collect();
            let mut i = 0usize;

            b.iter(|| {
                let token = hook.before_execute(STATEMENT, &(), &contexts[i % entries]);
                hook.on_after_execute(token, Outcome::Success);
                i += 1;
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_normalize,
    bench_record_explicit_stack,
    bench_record_native_stack,
    bench_record_varying_entries
);
criterion_main!(benches);
