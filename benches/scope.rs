use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ferrous_scope::*;
use std::sync::Arc;

// ===== Micro Benchmarks =====

fn bench_context_lookup(c: &mut Criterion) {
    struct Needle(u64);
    struct Filler(u64);

    let mut group = c.benchmark_group("context_lookup");
    for depth in [1usize, 4, 16] {
        let mut ctx = AmbientContext::of(Needle(7));
        for i in 0..depth {
            ctx = ctx.with(Filler(i as u64));
        }
        group.bench_with_input(BenchmarkId::from_parameter(depth), &ctx, |b, ctx| {
            b.iter(|| {
                let v = ctx.get::<Needle>().unwrap();
                black_box(v.0);
            })
        });
    }
    group.finish();
}

fn bench_context_merge(c: &mut Criterion) {
    struct Outer(u64);
    struct Inner(u64);

    let outer = AmbientContext::of(Outer(1)).with(Outer(2)).with(Outer(3));
    let inner = AmbientContext::of(Inner(1)).with(Inner(2));

    c.bench_function("context_merge", |b| {
        b.iter(|| {
            let merged = inner.merged_over(&outer);
            black_box(merged.len());
        })
    });
}

fn bench_scope_registration(c: &mut Criterion) {
    c.bench_function("scope_register_100", |b| {
        b.iter(|| {
            let scope = CancelScope::new();
            begin_async_in(AmbientContext::of(scope.clone()), move || {
                let _: () = suspend_async(|resume, _fail| {
                    let scope = get_context::<CancelScope>().unwrap();
                    for _ in 0..100 {
                        scope.add(Arc::new(RequestHandle::new()));
                    }
                    resume.resume(());
                })?;
                Ok(())
            })
            .unwrap();
            black_box(scope.is_cancelled());
        })
    });
}

fn bench_cancel_fanout(c: &mut Criterion) {
    c.bench_function("cancel_fanout_100", |b| {
        b.iter_batched(
            || {
                let scope = CancelScope::new();
                let inner = scope.clone();
                begin_async_in(AmbientContext::of(inner), move || {
                    let outcome: Result<(), _> = suspend_async(|_resume, _fail| {
                        let scope = get_context::<CancelScope>().unwrap();
                        for _ in 0..100 {
                            scope.add(Arc::new(RequestHandle::new()));
                        }
                    });
                    let _ = outcome;
                    Ok(())
                })
                .unwrap();
                scope
            },
            |scope| {
                scope.cancel();
                black_box(scope.is_cancelled());
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_suspend_resume_round_trip(c: &mut Criterion) {
    c.bench_function("suspend_resume_round_trip", |b| {
        b.iter(|| {
            begin_async(|| {
                let v: u64 = suspend_async_value(|resume| resume.resume(1));
                black_box(v);
                Ok(())
            })
            .unwrap();
        })
    });
}

fn bench_begin_sync_body(c: &mut Criterion) {
    c.bench_function("begin_sync_body", |b| {
        b.iter(|| {
            begin_async(|| Ok(black_box(()))).unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_context_lookup,
    bench_context_merge,
    bench_scope_registration,
    bench_cancel_fanout,
    bench_suspend_resume_round_trip,
    bench_begin_sync_body,
);
criterion_main!(benches);
