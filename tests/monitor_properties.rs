use std::sync::{Arc, Barrier};
use std::time::Duration;

use cronometri::clock::ManualClock;
use cronometri::comm::{Communicator, LocalComm};
use cronometri::hwpc::Category;
use cronometri::report::Scope;
use cronometri::sections::{current_slot, NUM_SLOTS};
use cronometri::{
    Monitor, MonitorConfig, MonitorError, MonitorSnapshot, SectionKind, SortMode,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn manual() -> (Monitor, Arc<ManualClock>) {
    init_logging();
    let clock = Arc::new(ManualClock::new());
    let monitor = Monitor::builder(MonitorConfig::default().with_threads(1))
        .with_clock(Arc::clone(&clock))
        .initialize();
    (monitor, clock)
}

fn timed(monitor: &mut Monitor, clock: &ManualClock, label: &str, ms: u64, work: f64) {
    monitor.start(label).unwrap();
    clock.advance(Duration::from_millis(ms));
    monitor.stop(label, work, 1).unwrap();
}

fn stable(monitor: &Monitor) -> MonitorSnapshot {
    monitor.snapshot().unwrap().without_timestamp()
}

#[test]
fn test_aggregation_is_idempotent() {
    let (mut monitor, clock) = manual();
    timed(&mut monitor, &clock, "a", 3, 10.0);
    timed(&mut monitor, &clock, "b", 1, 0.0);

    monitor.aggregate();
    let first = stable(&monitor);
    let order = monitor.display_order().to_vec();
    monitor.aggregate();
    assert_eq!(stable(&monitor), first);
    assert_eq!(monitor.display_order(), order.as_slice());
}

#[test]
fn test_call_counts_are_conserved() {
    let (mut monitor, clock) = manual();
    for i in 0..7 {
        timed(&mut monitor, &clock, "a", 1, 0.0);
        if i % 2 == 0 {
            timed(&mut monitor, &clock, "b", 1, 0.0);
        }
    }
    monitor.aggregate();
    let snapshot = monitor.snapshot().unwrap();
    assert_eq!(snapshot.get("a").unwrap().count_sum, 7);
    assert_eq!(snapshot.get("b").unwrap().count_sum, 4);
}

#[test]
fn test_stop_of_unknown_label_changes_nothing() {
    let (mut monitor, clock) = manual();
    timed(&mut monitor, &clock, "a", 2, 0.0);
    monitor.aggregate();
    let before = stable(&monitor);
    let sections = monitor.registry().len();

    let err = monitor.stop("ghost", 1.0, 1).unwrap_err();
    assert!(matches!(err, MonitorError::UnknownLabel(label) if label == "ghost"));
    assert_eq!(monitor.registry().len(), sections);

    monitor.aggregate();
    assert_eq!(stable(&monitor), before);
}

#[test]
fn test_start_declares_missing_sections() {
    let (mut monitor, _) = manual();
    assert!(monitor.registry().find("fresh").is_none());
    monitor.start("fresh").unwrap();
    let fresh = monitor.registry().find("fresh").unwrap();
    assert_eq!(fresh.kind(), SectionKind::Computation);
    assert!(fresh.is_exclusive());
    assert_eq!(fresh.id(), 1);
}

#[test]
fn test_display_order() {
    let (mut monitor, clock) = manual();
    timed(&mut monitor, &clock, "A", 10, 0.0);
    timed(&mut monitor, &clock, "B", 1, 0.0);
    timed(&mut monitor, &clock, "C", 5, 0.0);
    monitor.aggregate();

    // Root spans every section and leads.
    assert_eq!(monitor.display_order(), &[0, 1, 3, 2]);

    let elapsed = monitor.basic_report("", "", SortMode::Elapsed).unwrap();
    let labels: Vec<&str> = elapsed.rows.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["A", "C", "B"]);

    let registration = monitor
        .basic_report("", "", SortMode::Registration)
        .unwrap();
    let labels: Vec<&str> = registration.rows.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["A", "B", "C"]);
}

#[test]
fn test_sections_registered_after_sort_keep_elapsed_order() {
    let (mut monitor, clock) = manual();
    timed(&mut monitor, &clock, "fast", 1, 0.0);
    timed(&mut monitor, &clock, "slow", 9, 0.0);
    monitor.aggregate();
    monitor
        .declare("late", SectionKind::Computation, true)
        .unwrap();
    let report = monitor.group_report(&[0], 1, false, SortMode::Elapsed).unwrap();
    let labels: Vec<&str> = report.sections.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["slow", "fast", "late"]);

    let report = monitor
        .group_report(&[0], 1, false, SortMode::Registration)
        .unwrap();
    let labels: Vec<&str> = report.sections.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["fast", "slow", "late"]);
}

#[test]
fn test_reset_only_touches_its_section() {
    let (mut monitor, clock) = manual();
    timed(&mut monitor, &clock, "a", 4, 1.0);
    timed(&mut monitor, &clock, "b", 2, 1.0);
    monitor.reset("a").unwrap();
    monitor.aggregate();

    let snapshot = monitor.snapshot().unwrap();
    let a = snapshot.get("a").unwrap();
    assert_eq!((a.count_sum, a.time_av, a.work_av), (0, 0.0, 0.0));
    let b = snapshot.get("b").unwrap();
    assert_eq!(b.count_sum, 1);
    assert!((b.time_av - 0.002).abs() < 1e-9);
}

#[test]
fn test_reset_all_preserves_identity() {
    let (mut monitor, clock) = manual();
    monitor
        .declare("io", SectionKind::Communication, false)
        .unwrap();
    timed(&mut monitor, &clock, "io", 1, 64.0);
    timed(&mut monitor, &clock, "calc", 1, 64.0);
    monitor.reset_all();
    clock.advance(Duration::from_millis(4));
    monitor.aggregate();

    let snapshot = monitor.snapshot().unwrap();
    assert_eq!(snapshot.sections.len(), 3);
    let io = snapshot.get("io").unwrap();
    assert_eq!(io.id, 1);
    assert_eq!(io.kind, SectionKind::Communication);
    assert!(!io.exclusive);
    assert!(snapshot.sections[1..].iter().all(|s| s.count_sum == 0));

    // The root section restarted at the reset.
    let root = &snapshot.sections[0];
    assert_eq!(root.count_sum, 1);
    assert!((root.time_av - 0.004).abs() < 1e-9);
}

#[test]
fn test_percentages_stay_below_total() {
    let (mut monitor, clock) = manual();
    timed(&mut monitor, &clock, "a", 3, 0.0);
    clock.advance(Duration::from_millis(2));
    timed(&mut monitor, &clock, "b", 5, 0.0);

    let report = monitor.basic_report("", "", SortMode::Elapsed).unwrap();
    assert!(report.rows.iter().all(|r| r.time_pct <= 100.0 + 1e-9));
    let exclusive: f64 = report
        .rows
        .iter()
        .filter(|r| r.exclusive)
        .map(|r| r.time_pct)
        .sum();
    assert!((exclusive - 80.0).abs() < 1e-6);
}

#[test]
fn test_init_and_exchange_scenario() {
    let (mut monitor, clock) = manual();
    monitor
        .declare("init", SectionKind::Computation, true)
        .unwrap();
    monitor
        .declare("comm", SectionKind::Communication, true)
        .unwrap();

    timed(&mut monitor, &clock, "init", 10, 5.0e6);
    for _ in 0..3 {
        timed(&mut monitor, &clock, "comm", 2, 1.0e3);
    }

    let report = monitor.basic_report("node", "scenario", SortMode::Elapsed).unwrap();
    let init = report.row("init").unwrap();
    assert_eq!(init.calls, 1);
    assert!((init.time_av - 0.010).abs() < 1e-9);
    let comm = report.row("comm").unwrap();
    assert_eq!(comm.calls, 3);
    assert!((report.sums.time_flop - 0.010).abs() < 1e-9);
    assert!((report.sums.time_comm - 0.006).abs() < 1e-9);
    assert!(report.subtotal(Scope::PerProcess, Category::Comm).is_some());
    assert_eq!(report.header.hostname, "node");
    assert!((report.header.total_time - 0.016).abs() < 1e-9);
}

#[test]
fn test_threads_share_a_section() {
    let mut monitor = Monitor::initialize(MonitorConfig::default().with_threads(4));
    monitor
        .declare("kernel", SectionKind::Computation, true)
        .unwrap();

    // Threads that exit early hand their slot to the next one.
    let barrier = Barrier::new(4);
    std::thread::scope(|s| {
        for _ in 0..4 {
            let kernel = monitor.section("kernel").unwrap();
            let barrier = &barrier;
            s.spawn(move || {
                kernel.start().unwrap();
                barrier.wait();
                kernel.stop(100.0, 2).unwrap();
            });
        }
    });

    let threads = monitor.thread_report(SortMode::Elapsed).unwrap();
    let kernel = threads.sections.iter().find(|s| s.label == "kernel").unwrap();
    assert_eq!(kernel.threads.len(), 4);

    monitor.aggregate();
    let snapshot = monitor.snapshot().unwrap();
    let kernel = snapshot.get("kernel").unwrap();
    assert_eq!(kernel.count_sum, 4);
    assert_eq!(kernel.work_av, 800.0);
    assert_eq!(snapshot.num_threads, 4);
}

#[test]
fn test_more_live_threads_than_preallocated_slots() {
    let workers = NUM_SLOTS + 16;
    let mut monitor = Monitor::initialize(MonitorConfig::default().with_threads(workers));
    monitor
        .declare("kernel", SectionKind::Computation, true)
        .unwrap();
    let kernel = monitor.section("kernel").unwrap();

    kernel.start().unwrap();
    let barrier = Barrier::new(workers);
    let results: Vec<(usize, bool, bool)> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let barrier = &barrier;
                s.spawn(move || {
                    let started = kernel.start().is_ok();
                    barrier.wait();
                    let stopped = kernel.stop(1.0, 1).is_ok();
                    (current_slot(), started, stopped)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    kernel.stop(1.0, 1).unwrap();

    assert!(results.iter().all(|&(_, started, stopped)| started && stopped));
    let mut slots: Vec<usize> = results.iter().map(|&(slot, _, _)| slot).collect();
    slots.push(current_slot());
    slots.sort_unstable();
    slots.dedup();
    assert_eq!(slots.len(), workers + 1);

    let threads = monitor.thread_report(SortMode::Elapsed).unwrap();
    let rows = threads.sections.iter().find(|s| s.label == "kernel").unwrap();
    assert_eq!(rows.threads.len(), workers + 1);
    let snapshot = monitor.snapshot().unwrap();
    let kernel = snapshot.get("kernel").unwrap();
    assert_eq!(kernel.count_sum, workers as u64 + 1);
    assert_eq!(kernel.work_av, workers as f64 + 1.0);
}

#[test]
fn test_ranks_are_gathered_on_rank_zero() {
    let comms = LocalComm::cluster(3);
    let outputs: Vec<(Option<MonitorSnapshot>, String)> = std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                s.spawn(move || {
                    let rank = comm.rank();
                    let clock = Arc::new(ManualClock::new());
                    let mut monitor = Monitor::builder(MonitorConfig::default().with_threads(1))
                        .with_communicator(comm)
                        .with_clock(Arc::clone(&clock))
                        .initialize();
                    monitor
                        .declare("solve", SectionKind::Computation, true)
                        .unwrap();
                    monitor
                        .declare("all", SectionKind::Communication, true)
                        .unwrap();

                    if rank < 2 {
                        monitor.start("solve").unwrap();
                        clock.advance(Duration::from_millis(2 * (rank as u64 + 1)));
                        monitor.stop("solve", 0.0, 1).unwrap();
                    }
                    for _ in 0..=rank {
                        monitor.start("all").unwrap();
                        clock.advance(Duration::from_millis(1));
                        monitor.stop("all", 0.0, 1).unwrap();
                    }

                    let mut out = Vec::new();
                    monitor
                        .print_detail(&mut out, false, SortMode::Elapsed)
                        .unwrap();
                    monitor
                        .print_comm(&mut out, (rank % 2) as i64, false, SortMode::Elapsed)
                        .unwrap();
                    (monitor.snapshot(), String::from_utf8(out).unwrap())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let (snapshot, text) = &outputs[0];
    let snapshot = snapshot.as_ref().unwrap();
    assert_eq!(snapshot.num_process, 3);

    let solve = snapshot.get("solve").unwrap();
    assert_eq!(solve.active_ranks, 2);
    assert_eq!(solve.count_sum, 2);
    assert!((solve.time_av - 0.003).abs() < 1e-9);
    assert!((solve.time_sd - 0.001 * 2.0_f64.sqrt()).abs() < 1e-9);

    let all = snapshot.get("all").unwrap();
    assert_eq!(all.count_sum, 6);
    assert_eq!(all.calls, 2);
    assert_eq!(all.active_ranks, 3);

    assert!(text.contains("#2"));
    assert!(text.contains("Process Group [    0]"));
    assert!(text.contains("Process Group [    1]"));

    for (_, text) in &outputs[1..] {
        assert!(text.is_empty());
    }
}

#[test]
fn test_disabled_monitor_is_inert() {
    let mut monitor = Monitor::initialize(MonitorConfig::default().with_enabled(false));
    monitor.start("a").unwrap();
    monitor.stop("a", 1.0, 1).unwrap();
    monitor.stop("never", 1.0, 1).unwrap();
    monitor.reset("never").unwrap();
    monitor.aggregate();

    assert!(!monitor.is_enabled());
    assert!(monitor.registry().is_empty());
    assert!(monitor.snapshot().is_none());

    let mut out = Vec::new();
    monitor.print(&mut out, "", "", SortMode::Elapsed).unwrap();
    monitor.print_progress(&mut out, "", SortMode::Elapsed).unwrap();
    assert!(out.is_empty());
}

#[test]
fn test_print_lists_sections() {
    let (mut monitor, clock) = manual();
    timed(&mut monitor, &clock, "assemble", 4, 1.0e6);
    monitor
        .declare("sampler", SectionKind::Computation, false)
        .unwrap();
    timed(&mut monitor, &clock, "sampler", 1, 0.0);

    let mut out = Vec::new();
    monitor
        .print(&mut out, "host-a", "release build", SortMode::Elapsed)
        .unwrap();
    monitor
        .print_progress(&mut out, "after print", SortMode::Registration)
        .unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("Basic Report"));
    assert!(text.contains("Progress Report"));
    assert!(text.contains("assemble"));
    assert!(text.contains("sampler(*)"));
    assert!(text.contains("host-a"));
    assert!(text.contains(cronometri::version()));
    assert!(!text.contains("Root Section"));
}

#[cfg(feature = "json")]
#[test]
fn test_snapshot_to_json() {
    use cronometri::observers::json::JsonObserver;

    let (mut monitor, clock) = manual();
    timed(&mut monitor, &clock, "a", 1, 0.0);
    monitor.aggregate();
    let json = JsonObserver::new().to_json(&monitor.snapshot().unwrap()).unwrap();
    let parsed = JsonObserver::from_json(&json).unwrap();
    assert_eq!(parsed, stable(&monitor));
}

#[cfg(feature = "json")]
#[test]
fn test_post_trace_labels_sections() {
    use cronometri::trace::ChromeTraceRecorder;

    let recorder = Arc::new(ChromeTraceRecorder::new());
    let clock = Arc::new(ManualClock::new());
    let mut monitor = Monitor::builder(MonitorConfig::default().with_threads(1))
        .with_clock(Arc::clone(&clock))
        .with_tracer(Arc::clone(&recorder))
        .initialize();
    timed(&mut monitor, &clock, "step", 2, 0.0);
    monitor.post_trace().unwrap();

    assert_eq!(recorder.len(), 3);
    let json = recorder.to_json().unwrap();
    assert!(json.contains("\"Root Section\""));
    assert!(json.contains("\"step\""));
}

#[cfg(feature = "prometheus")]
#[test]
fn test_snapshot_to_prometheus() {
    use cronometri::observers::prometheus::PrometheusObserver;

    let (mut monitor, clock) = manual();
    timed(&mut monitor, &clock, "solve", 1, 0.0);
    monitor.aggregate();
    let output = PrometheusObserver::new()
        .render(&monitor.snapshot().unwrap())
        .unwrap();
    assert!(output.contains("section=\"solve\""));
}
