//! Demonstration harness for the packed triple buffer
//!
//! One thread publishes strictly increasing integers as fast as it can while
//! another thread keeps reading the latest one. The reader checks that it
//! never observes a value going backwards, and reports how many of the
//! published values it actually got to see.

use clap::Parser;
use color_eyre::eyre::{bail, eyre, Result};
use packed_triple_buffer::TripleBuffer;
use std::thread;
use std::time::Instant;
use tracing::{debug, info};

/// Run a writer and a reader thread against one triple buffer
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Number of values the writer publishes
    #[arg(long, default_value_t = 1_000_000)]
    updates: u64,

    /// Log reader progress every N distinct observed values
    #[arg(long, default_value_t = 100_000)]
    report_every: u64,
}

/// What the reader thread saw
#[derive(Debug)]
struct ReaderReport {
    /// Number of distinct values observed
    observed: u64,

    /// Number of read_last calls that found nothing new
    stale_reads: u64,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    debug!(?args, "Parsed configuration");

    walkthrough();
    race(&args)
}

/// Single-threaded tour of the operation set
fn walkthrough() {
    let mut buf = TripleBuffer::new("Hello!");
    info!(value = buf.snap(), "Initial value");

    buf.update("Lost");
    buf.update("World!");
    let fresh = buf.new_snap();
    info!(value = buf.snap(), fresh, "After two updates");

    let fresh = buf.new_snap();
    info!(value = buf.snap(), fresh, "After no update");
}

/// Concurrent writer/reader run
fn race(args: &Args) -> Result<()> {
    let updates = args.updates;
    let report_every = args.report_every.max(1);
    let (mut writer, mut reader) = TripleBuffer::new(0u64).split();

    info!(updates, "Starting writer and reader threads");
    let start = Instant::now();

    let writer_thread = thread::spawn(move || {
        for value in 1..=updates {
            writer.update(value);
        }
    });

    let reader_thread = thread::spawn(move || -> Result<ReaderReport> {
        let mut report = ReaderReport {
            observed: 0,
            stale_reads: 0,
        };
        let mut last_value = 0;
        while last_value < updates {
            if !reader.new_snap() {
                report.stale_reads += 1;
                continue;
            }
            let value = reader.snap();
            if value < last_value {
                bail!("Reader went back in time: {value} after {last_value}");
            }
            if value > updates {
                bail!("Reader observed {value}, which was never written");
            }
            last_value = value;
            report.observed += 1;
            if report.observed % report_every == 0 {
                debug!(observed = report.observed, last_value, "Reader progress");
            }
        }
        Ok(report)
    });

    writer_thread
        .join()
        .map_err(|_| eyre!("Writer thread panicked"))?;
    let report = reader_thread
        .join()
        .map_err(|_| eyre!("Reader thread panicked"))??;

    let elapsed = start.elapsed();
    info!(
        observed = report.observed,
        skipped = updates - report.observed,
        stale_reads = report.stale_reads,
        ?elapsed,
        "Run complete"
    );
    Ok(())
}
