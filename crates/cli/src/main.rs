//! Relay CLI - one-shot runs against an in-process bounded queue

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use relay_core::application::lock_order::{lock_all, lock_pair};
use relay_core::domain::{Fairness, QueueConfig, WakePolicy};
use relay_core::port::LoggingHandler;
use relay_core::{Pipeline, PipelineConfig, PipelineReport};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tabled::{Table, Tabled};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "relay=warn";
/// Starting balance of each account in the lock-order scenario
const LOCK_ORDER_BALANCE: i64 = 1_000;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Bounded blocking queue toolkit", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run producers and consumers to completion and report delivery
    Run {
        /// Queue capacity (must be positive)
        #[arg(short, long, env = "RELAY_CAPACITY", default_value = "16", allow_negative_numbers = true)]
        capacity: i64,

        /// Number of producer threads
        #[arg(short, long, default_value = "2")]
        producers: usize,

        /// Number of consumer threads
        #[arg(short = 'n', long, default_value = "2")]
        consumers: usize,

        /// Messages each producer puts
        #[arg(short, long, default_value = "100")]
        items: u64,

        /// Serve blocked threads in arrival order
        #[arg(long)]
        fair: bool,

        /// Waiters woken per put/take
        #[arg(long, value_enum, default_value = "broadcast")]
        wake: WakeArg,

        /// Simulated processing time per message
        #[arg(long, default_value = "0")]
        consumer_delay_ms: u64,

        /// Give up waiting for delivery after this long
        #[arg(long, default_value = "30")]
        drain_timeout_secs: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Transfer between two locks from opposite directions without deadlock
    LockOrder {
        /// Transfers per thread
        #[arg(short, long, default_value = "10000")]
        rounds: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum WakeArg {
    Broadcast,
    Single,
}

impl From<WakeArg> for WakePolicy {
    fn from(arg: WakeArg) -> Self {
        match arg {
            WakeArg::Broadcast => WakePolicy::Broadcast,
            WakeArg::Single => WakePolicy::Single,
        }
    }
}

#[derive(Tabled)]
struct MetricRow {
    metric: &'static str,
    value: String,
}

impl MetricRow {
    fn new(metric: &'static str, value: impl ToString) -> Self {
        Self {
            metric,
            value: value.to_string(),
        }
    }
}

#[derive(Tabled)]
struct WorkerRow {
    worker: String,
    messages: u64,
    failed: u64,
    panicked: u64,
    cancelled: bool,
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("Failed to create env filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            capacity,
            producers,
            consumers,
            items,
            fair,
            wake,
            consumer_delay_ms,
            drain_timeout_secs,
            json,
        } => {
            let fairness = if fair { Fairness::Fifo } else { Fairness::Unordered };
            let config = PipelineConfig {
                queue: QueueConfig::new("relay-cli", capacity)
                    .with_fairness(fairness)
                    .with_wake_policy(wake.into()),
                producers,
                consumers,
                items_per_producer: items,
                consumer_delay: Duration::from_millis(consumer_delay_ms),
                drain_timeout: Duration::from_secs(drain_timeout_secs),
            };

            let report = Pipeline::new(config, Arc::new(LoggingHandler))
                .run()
                .context("Pipeline run failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }

            if !report.is_lossless() {
                bail!(
                    "delivery check failed: {} lost, {} duplicated",
                    report.lost,
                    report.duplicates
                );
            }
        }

        Commands::LockOrder { rounds } => {
            println!("{}", "Lock ordering check".cyan().bold());
            println!();

            let started = Instant::now();
            let (left, right) = run_lock_order(rounds);
            let total = left + right;

            println!("  {} {}", "Rounds per thread:".bold(), rounds);
            println!("  {} {} / {}", "Balances:".bold(), left, right);
            println!("  {} {:?}", "Elapsed:".bold(), started.elapsed());
            println!();

            if total != 2 * LOCK_ORDER_BALANCE {
                bail!("balance not conserved: {} != {}", total, 2 * LOCK_ORDER_BALANCE);
            }
            println!("{}", "✓ Completed without deadlock".green().bold());
        }
    }

    Ok(())
}

fn metric_rows(report: &PipelineReport) -> Vec<MetricRow> {
    vec![
        MetricRow::new("expected", report.expected),
        MetricRow::new("produced", report.produced),
        MetricRow::new("consumed", report.consumed),
        MetricRow::new("handled", report.handled),
        MetricRow::new("failed", report.failed),
        MetricRow::new("panicked", report.panicked),
        MetricRow::new("duplicates", report.duplicates),
        MetricRow::new("lost", report.lost),
        MetricRow::new("high water mark", report.stats.high_water_mark),
        MetricRow::new("elapsed", format!("{} ms", report.elapsed_ms)),
    ]
}

fn print_report(report: &PipelineReport) {
    let stats = &report.stats;
    let header = format!(
        "Pipeline on queue '{}' (capacity {}, {}, {} wake)",
        stats.name, stats.capacity, stats.fairness, stats.wake_policy
    );
    println!("{}", header.cyan().bold());
    println!();

    let rows = metric_rows(report);
    println!("{}", Table::new(rows));
    println!();

    let workers = report
        .producers
        .iter()
        .map(|p| WorkerRow {
            worker: format!("producer-{}", p.producer),
            messages: p.produced,
            failed: 0,
            panicked: 0,
            cancelled: p.cancelled,
        })
        .chain(report.consumers.iter().map(|c| WorkerRow {
            worker: format!("consumer-{}", c.consumer),
            messages: c.consumed,
            failed: c.failed,
            panicked: c.panicked,
            cancelled: c.cancelled,
        }));
    println!("{}", Table::new(workers));
    println!();

    if report.is_lossless() {
        println!("{}", "✓ Every message delivered exactly once".green().bold());
    } else {
        println!("{}", "✗ Delivery check failed".red().bold());
    }
}

/// Two threads move money between the same two accounts in opposite
/// directions while a third audits both; returns the final balances.
fn run_lock_order(rounds: u64) -> (i64, i64) {
    let left = Mutex::new(LOCK_ORDER_BALANCE);
    let right = Mutex::new(LOCK_ORDER_BALANCE);

    thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..rounds {
                let (mut from, mut to) = lock_pair(&left, &right);
                *from -= 1;
                *to += 1;
            }
        });
        scope.spawn(|| {
            for _ in 0..rounds {
                let (mut from, mut to) = lock_pair(&right, &left);
                *from -= 1;
                *to += 1;
            }
        });
        scope.spawn(|| {
            for _ in 0..rounds {
                let guards = lock_all(&[&right, &left]);
                let total: i64 = guards.iter().map(|guard| **guard).sum();
                debug_assert_eq!(total, 2 * LOCK_ORDER_BALANCE);
            }
        });
    });

    let left = left.into_inner().unwrap_or_else(PoisonError::into_inner);
    let right = right.into_inner().unwrap_or_else(PoisonError::into_inner);
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "relay", "run", "--capacity", "3", "--producers", "4", "--fair", "--wake", "single",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                capacity,
                producers,
                fair,
                wake,
                ..
            } => {
                assert_eq!(capacity, 3);
                assert_eq!(producers, 4);
                assert!(fair);
                assert_eq!(WakePolicy::from(wake), WakePolicy::Single);
            }
            Commands::LockOrder { .. } => panic!("parsed the wrong subcommand"),
        }
    }

    #[test]
    fn test_metric_rows_follow_report() {
        let config = PipelineConfig {
            producers: 1,
            consumers: 1,
            items_per_producer: 2,
            ..Default::default()
        };
        let report = Pipeline::new(config, Arc::new(LoggingHandler)).run().unwrap();

        let rows = metric_rows(&report);
        let value = |metric: &str| {
            rows.iter()
                .find(|row| row.metric == metric)
                .map(|row| row.value.clone())
        };
        assert_eq!(value("produced").as_deref(), Some("2"));
        assert_eq!(value("lost").as_deref(), Some("0"));
        assert!(value("elapsed").unwrap().ends_with(" ms"));
    }

    #[test]
    fn test_lock_order_conserves_balance() {
        let (left, right) = run_lock_order(2_000);
        assert_eq!(left + right, 2 * LOCK_ORDER_BALANCE);
        // Both directions ran the same number of transfers
        assert_eq!(left, LOCK_ORDER_BALANCE);
    }
}
