use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use cmdq::{Command, CommandEngine, CommandVec, UndoablePeriod};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

fn counter_command(counter: &Arc<AtomicU64>) -> Command {
    let (apply, revert) = (counter.clone(), counter.clone());
    Command::from_fn(
        move |_| {
            apply.fetch_add(1, Ordering::Relaxed);
            Ok(())
        },
        move |_| {
            revert.fetch_sub(1, Ordering::Relaxed);
            Ok(())
        },
    )
}

/// Benchmark the enqueue + apply path (hot path for every collaborator)
fn bench_enqueue_and_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue_and_run");

    for history in [10usize, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(history), &history, |b, &history| {
            let engine = CommandEngine::new();
            let counter = Arc::new(AtomicU64::new(0));
            for _ in 0..history {
                engine.enqueue_and_run(counter_command(&counter)).unwrap();
            }
            b.iter(|| {
                engine.enqueue_and_run(counter_command(&counter)).unwrap();
                engine.undo_last().unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark undo/redo over nested command trees of growing depth
fn bench_nested_undo_redo(c: &mut Criterion) {
    let mut group = c.benchmark_group("nested_undo_redo");

    for depth in [1usize, 8, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let engine = CommandEngine::new();
            let counter = Arc::new(AtomicU64::new(0));
            let tree = nested(&counter, depth);
            engine.enqueue_and_run(tree).unwrap();
            b.iter(|| {
                black_box(engine.undo_last().unwrap());
                black_box(engine.redo_last().unwrap());
            });
        });
    }
    group.finish();
}

fn nested(counter: &Arc<AtomicU64>, depth: usize) -> Command {
    let counter = counter.clone();
    Command::apply_only(move |engine| {
        engine.enqueue_and_run(counter_command(&counter))?;
        if depth > 1 {
            engine.enqueue_and_run(nested(&counter, depth - 1))?;
        }
        Ok(())
    })
}

/// Benchmark replay-based redo of an undoable period
fn bench_period_replay(c: &mut Criterion) {
    let engine = CommandEngine::new();
    let list: CommandVec<u64> = CommandVec::new(&engine);
    engine
        .perform_undoable_period(UndoablePeriod::new("Fill"), |_| {
            for i in 0..100 {
                list.push(i)?;
            }
            Ok(())
        })
        .unwrap();

    c.bench_function("period_replay_100", |b| {
        b.iter(|| {
            engine.undo_last().unwrap();
            engine.redo_last().unwrap();
            black_box(list.len());
        });
    });
}

criterion_group!(
    benches,
    bench_enqueue_and_run,
    bench_nested_undo_redo,
    bench_period_replay
);
criterion_main!(benches);
