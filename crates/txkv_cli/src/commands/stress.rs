//! Stress command implementation.

use super::open_engine;
use serde::Serialize;
use std::path::Path;
use txkv_core::{ConcurrencyMode, EngineStats};
use txkv_testkit::{run_contention, StressConfig, StressTestResult};

/// Stress run report.
#[derive(Debug, Serialize)]
pub struct StressReport {
    /// Workload outcome counts.
    pub result: StressTestResult,
    /// Engine statistics after the run.
    pub stats: EngineStats,
}

/// Runs the stress command.
pub fn run(
    path: Option<&Path>,
    mode: ConcurrencyMode,
    threads: usize,
    ops: usize,
    keys: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if threads == 0 || keys == 0 {
        return Err("--threads and --keys must be at least 1".into());
    }

    let engine = open_engine(path, mode)?;
    let config = StressConfig {
        threads,
        transactions_per_thread: ops,
        keys,
        ..Default::default()
    };
    tracing::info!(%mode, threads, ops, keys, "starting contention run");

    let report = StressReport {
        result: run_contention(&engine, &config),
        stats: engine.stats(),
    };
    engine.close();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text(&report);
        }
    }

    Ok(())
}

fn print_text(report: &StressReport) {
    let result = &report.result;
    let stats = &report.stats;

    println!("txkv Contention Run");
    println!("===================");
    println!();
    println!("Mode: {}", result.mode);
    println!();
    println!("Transactions:");
    println!("  Attempted:  {}", result.attempted);
    println!("  Committed:  {}", result.committed);
    println!("  Conflicts:  {}", result.conflicts);
    println!("  Timeouts:   {}", result.timeouts);
    println!("  Deadlocks:  {}", result.deadlocks);
    println!("  Other:      {}", result.other_errors);
    println!();
    println!("Throughput: {:.2} commits/sec over {:?}", result.commits_per_second, result.duration);
    println!();
    println!("Engine:");
    println!("  Lock waits:       {}", stats.lock_waits);
    println!("  Held locks:       {}", stats.held_locks);
    println!("  Active txns:      {}", stats.active_transactions);
    println!("  Rolled back:      {}", stats.transactions_rolled_back);
}
