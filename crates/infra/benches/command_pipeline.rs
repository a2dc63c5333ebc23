use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use procflow_core::EngineResult;
use procflow_infra::ExecutionContext;
use procflow_infra::ProcessEngine;
use procflow_infra::jobs::CreateJobCmd;
use procflow_infra::tasks::TaskEntity;

fn engine_with_tasks(count: usize) -> ProcessEngine {
    let engine = ProcessEngine::builder().build();
    for i in 0..count {
        engine
            .save_task(TaskEntity::new().with_priority((i % 100) as i32))
            .expect("seed task");
    }
    engine
}

/// One command through log → context → retry → invoker, including the flush.
fn bench_command_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_latency");

    group.bench_function("noop_command", |b| {
        let engine = ProcessEngine::builder().build();
        b.iter(|| {
            engine
                .execute(&|_: &mut ExecutionContext| -> EngineResult<()> { Ok(()) })
                .expect("noop");
        });
    });

    group.bench_function("save_task", |b| {
        let engine = ProcessEngine::builder().build();
        b.iter(|| {
            let task = engine.save_task(TaskEntity::new().with_name("bench")).expect("save");
            black_box(task);
        });
    });

    group.bench_function("create_and_delete_job", |b| {
        let engine = ProcessEngine::builder().build();
        b.iter(|| {
            let job = engine.create_job(CreateJobCmd::new("bench")).expect("create");
            engine.delete_job(Some(job.id.as_str())).expect("delete");
        });
    });

    group.finish();
}

/// Many staged mutations flushed in one unit of work.
fn bench_flush_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush_batch");

    for batch_size in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), batch_size, |b, &size| {
            let engine = ProcessEngine::builder().build();
            b.iter(|| {
                engine
                    .execute(&|ctx: &mut ExecutionContext| -> EngineResult<()> {
                        for _ in 0..size {
                            ctx.tasks().insert(TaskEntity::new())?;
                        }
                        Ok(())
                    })
                    .expect("batch");
            });
        });
    }

    group.finish();
}

fn bench_task_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("task_query");

    for task_count in [10, 100, 1000].iter() {
        let engine = engine_with_tasks(*task_count);
        group.bench_with_input(BenchmarkId::new("first_page_by_priority", task_count), task_count, |b, _| {
            b.iter(|| {
                let page = engine
                    .create_task_query()
                    .min_priority(10)
                    .order_by_task_priority()
                    .desc()
                    .list_page(0, 10)
                    .expect("query");
                black_box(page);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_command_latency,
    bench_flush_batch,
    bench_task_query
);
criterion_main!(benches);
