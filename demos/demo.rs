//! Demo application timing a small synthetic solver and printing the reports
//! in the available formats.
//!
//! Run with:
//! ```bash
//! cargo run --example demo --features demo -- --help
//! RUST_LOG=debug cargo run --example demo --features demo -- --ranks 4 --detail
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use cronometri::comm::{Communicator, LocalComm};
use cronometri::observers::json::JsonObserver;
use cronometri::observers::prometheus::PrometheusObserver;
use cronometri::observers::table::{TableObserver, TableStyle};
use cronometri::trace::ChromeTraceRecorder;
use cronometri::{Monitor, MonitorConfig, SectionKind, SortMode};

/// Output format for the basic report.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Text tables
    Table,
    /// JSON snapshot
    Json,
    /// Prometheus exposition format
    Prometheus,
}

/// Table style selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum StyleChoice {
    Ascii,
    #[default]
    Rounded,
    Sharp,
    Modern,
    Markdown,
    Dots,
    Blank,
}

impl From<StyleChoice> for TableStyle {
    fn from(choice: StyleChoice) -> Self {
        match choice {
            StyleChoice::Ascii => TableStyle::Ascii,
            StyleChoice::Rounded => TableStyle::Rounded,
            StyleChoice::Sharp => TableStyle::Sharp,
            StyleChoice::Modern => TableStyle::Modern,
            StyleChoice::Markdown => TableStyle::Markdown,
            StyleChoice::Dots => TableStyle::Dots,
            StyleChoice::Blank => TableStyle::Blank,
        }
    }
}

/// Demo application for cronometri - section timing statistics.
///
/// Every rank of an in-process cluster runs a few time steps of a fake
/// solver; rank 0 prints the aggregated reports.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Table style
    #[arg(short, long, value_enum, default_value = "rounded")]
    style: StyleChoice,

    /// Number of ranks in the in-process cluster
    #[arg(long, default_value = "1")]
    ranks: usize,

    /// Worker threads per rank in the compute phase
    #[arg(long, default_value = "2")]
    threads: usize,

    /// Time steps to simulate
    #[arg(long, default_value = "5")]
    steps: usize,

    /// Sort sections by registration instead of elapsed time
    #[arg(long)]
    registration_order: bool,

    /// Also print the per-rank and per-thread reports
    #[arg(long)]
    detail: bool,

    /// Split ranks in N color groups and print one report per group
    #[arg(long)]
    colors: Option<usize>,

    /// Hide the column names of the tables
    #[arg(long)]
    no_header: bool,

    /// Pretty print JSON output
    #[arg(long)]
    pretty: bool,

    /// Include timestamp in JSON output
    #[arg(long)]
    timestamp: bool,

    /// Prometheus metric namespace (prefix)
    #[arg(long, default_value = "demo")]
    namespace: String,

    /// Prometheus instance label
    #[arg(long)]
    instance: Option<String>,

    /// Write a Chrome trace of rank 0 to this file
    #[arg(long)]
    trace: Option<String>,

    /// Comment printed in the report header
    #[arg(long, default_value = "cronometri demo")]
    comment: String,
}

fn busy(micros: u64) {
    thread::sleep(Duration::from_micros(micros));
}

/// One time step: exchange halos, then compute with the worker threads.
fn step(monitor: &mut Monitor, rank: usize, threads: usize) {
    monitor.start("halo exchange").ok();
    busy(200 + 50 * rank as u64);
    monitor.stop("halo exchange", 8.0 * 1024.0, 6).ok();

    if let Some(compute) = monitor.section("compute") {
        thread::scope(|s| {
            for t in 0..threads {
                s.spawn(move || {
                    compute.start().ok();
                    busy(500 + 100 * t as u64);
                    compute.stop(2.0e6, 1).ok();
                });
            }
        });
    }

    monitor.start("residual").ok();
    busy(100);
    monitor.stop("residual", 1.0e5, 1).ok();
}

fn run_rank(args: &Args, comm: LocalComm) -> Option<String> {
    let rank = comm.rank();
    let config = MonitorConfig::from_env()
        .with_threads(args.threads)
        .with_table_style(args.style.into());
    let mut builder = Monitor::builder(config).with_communicator(comm);
    let recorder = match (&args.trace, rank) {
        (Some(path), 0) => Some(Arc::new(ChromeTraceRecorder::new().with_output(path))),
        _ => None,
    };
    if let Some(recorder) = &recorder {
        builder = builder.with_tracer(Arc::clone(recorder));
    }
    let mut monitor = builder.initialize();

    monitor
        .declare("halo exchange", SectionKind::Communication, true)
        .ok();
    monitor
        .declare("compute", SectionKind::Computation, true)
        .ok();
    monitor
        .declare("time step", SectionKind::Computation, false)
        .ok();

    for i in 0..args.steps {
        monitor.start("time step").ok();
        step(&mut monitor, rank, args.threads);
        monitor.stop("time step", 0.0, 1).ok();
        if i == args.steps / 2 {
            let mut out = Vec::new();
            if let Err(err) = monitor.print_progress(&mut out, "half way", SortMode::Elapsed) {
                log::error!("progress report failed: {err}");
            }
            if !out.is_empty() {
                eprintln!("{}", String::from_utf8_lossy(&out));
            }
        }
    }

    let sort = if args.registration_order {
        SortMode::Registration
    } else {
        SortMode::Elapsed
    };
    let mut out = Vec::new();
    let report = monitor.basic_report("", &args.comment, sort);

    if args.detail {
        monitor.print_detail(&mut out, true, sort).ok();
        monitor.print_threads(&mut out, 0, sort).ok();
    }
    if let Some(colors) = args.colors {
        let color = (rank % colors.max(1)) as i64;
        monitor.print_comm(&mut out, color, false, sort).ok();
    }
    if let Err(err) = monitor.post_trace() {
        log::error!("trace failed: {err}");
    }

    let report = report?;
    let rendered = match args.format {
        OutputFormat::Table => TableObserver::new()
            .with_style(args.style.into())
            .with_header(!args.no_header)
            .render_basic(&report),
        OutputFormat::Json => monitor.snapshot().map_or_else(String::new, |snapshot| {
            JsonObserver::new()
                .pretty(args.pretty)
                .include_timestamp(args.timestamp)
                .to_json(&snapshot)
                .unwrap_or_else(|e| format!("Error: {e}"))
        }),
        OutputFormat::Prometheus => monitor.snapshot().map_or_else(String::new, |snapshot| {
            let mut observer = PrometheusObserver::new().with_namespace(&args.namespace);
            if let Some(ref instance) = args.instance {
                observer = observer.with_const_label("instance", instance);
            }
            observer
                .render(&snapshot)
                .unwrap_or_else(|e| format!("Error: {e}"))
        }),
    };
    Some(format!("{rendered}{}", String::from_utf8_lossy(&out)))
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    eprintln!(
        "Simulating {} ranks x {} threads, {} steps...",
        args.ranks, args.threads, args.steps
    );
    let outputs: Vec<Option<String>> = thread::scope(|s| {
        let handles: Vec<_> = LocalComm::cluster(args.ranks)
            .into_iter()
            .map(|comm| {
                let args = &args;
                s.spawn(move || run_rank(args, comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(None))
            .collect()
    });

    for output in outputs.into_iter().flatten() {
        println!("{output}");
    }
}
