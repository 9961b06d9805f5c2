use cronometri::{Monitor, MonitorConfig, SectionKind};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const NUM_THREADS: usize = 8;
const ITERATIONS_PER_THREAD: usize = 100_000;

fn bench_start_stop(c: &mut Criterion) {
    let mut group = c.benchmark_group("section_start_stop");

    group.bench_function("by label (single thread)", |b| {
        let mut monitor = Monitor::initialize(MonitorConfig::default().with_threads(1));
        monitor
            .declare("kernel", SectionKind::Computation, true)
            .unwrap();
        b.iter(|| {
            monitor.start(black_box("kernel")).unwrap();
            monitor.stop(black_box("kernel"), 1.0, 1).unwrap();
        })
    });

    group.bench_function("by handle (single thread)", |b| {
        let mut monitor = Monitor::initialize(MonitorConfig::default().with_threads(1));
        monitor
            .declare("kernel", SectionKind::Computation, true)
            .unwrap();
        let kernel = monitor.section("kernel").unwrap();
        b.iter(|| {
            kernel.start().unwrap();
            kernel.stop(black_box(1.0), 1).unwrap();
        })
    });

    group.bench_function(
        BenchmarkId::new(
            "by handle (threads)",
            format!("{}threads x {}iter", NUM_THREADS, ITERATIONS_PER_THREAD),
        ),
        |b| {
            let mut monitor =
                Monitor::initialize(MonitorConfig::default().with_threads(NUM_THREADS));
            monitor
                .declare("kernel", SectionKind::Computation, true)
                .unwrap();
            b.iter(|| {
                std::thread::scope(|s| {
                    for _ in 0..NUM_THREADS {
                        let kernel = monitor.section("kernel").unwrap();
                        s.spawn(move || {
                            for _ in 0..ITERATIONS_PER_THREAD {
                                kernel.start().unwrap();
                                kernel.stop(1.0, 1).unwrap();
                            }
                        });
                    }
                });
            })
        },
    );

    group.bench_function("disabled monitor", |b| {
        let mut monitor = Monitor::initialize(MonitorConfig::default().with_enabled(false));
        b.iter(|| {
            monitor.start(black_box("kernel")).unwrap();
            monitor.stop(black_box("kernel"), 1.0, 1).unwrap();
        })
    });

    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut monitor = Monitor::initialize(MonitorConfig::default().with_threads(1));
    for i in 0..100 {
        let label = format!("section-{i}");
        monitor.start(&label).unwrap();
        monitor.stop(&label, 1.0, 1).unwrap();
    }
    c.bench_function("aggregate 100 sections", |b| {
        b.iter(|| {
            monitor.aggregate();
            black_box(monitor.display_order().len())
        })
    });
}

criterion_group!(benches, bench_start_stop, bench_aggregate);
criterion_main!(benches);
