//! Simulate command implementation.

use parking_lot::Mutex;
use serde::Serialize;
use shardtx_core::{
    BackendType, CoreError, DataSourceConfig, Sleeper, Transacter, TransacterOptions,
};
use shardtx_driver::{DriverError, InMemoryDatabase, Record, RecordId};
use std::sync::Arc;
use std::time::Duration;

const TABLE: &str = "customers";

/// Arguments of the simulate command.
#[derive(Debug, Clone)]
pub struct SimulateArgs {
    /// Maximum attempts.
    pub attempts: u32,
    /// Attempts that run into a conflict.
    pub conflicts: u32,
    /// Minimum retry delay in milliseconds.
    pub min_delay_ms: u64,
    /// Maximum retry delay in milliseconds.
    pub max_delay_ms: u64,
    /// Retry jitter in milliseconds.
    pub jitter_ms: u64,
    /// Run read-only.
    pub read_only: bool,
}

/// Outcome of a simulated transaction.
#[derive(Debug, Serialize)]
pub struct SimulateReport {
    /// Maximum attempts allowed.
    pub max_attempts: u32,
    /// Attempts the transaction made.
    pub attempts: u32,
    /// Conflicting attempts requested.
    pub conflicts: u32,
    /// Whether the transaction ran read-only.
    pub read_only: bool,
    /// Delays slept between attempts, in milliseconds.
    pub sleeps_ms: Vec<u64>,
    /// Whether the transaction committed.
    pub committed: bool,
    /// Error of the last attempt if the transaction failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Commits seen by the driver.
    pub commits: u64,
    /// Rollbacks seen by the driver.
    pub rollbacks: u64,
}

/// Sleeps for real and remembers how long.
#[derive(Debug, Default)]
struct TimedSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl Sleeper for TimedSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
        std::thread::sleep(duration);
    }
}

/// Runs the simulate command.
pub fn run(args: &SimulateArgs, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = simulate(args)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    if let Some(error) = report.error {
        let attempts = report.attempts;
        return Err(format!("transaction failed after {attempts} attempts: {error}").into());
    }
    Ok(())
}

/// Runs one transaction whose first `conflicts` attempts hit a conflicting
/// writer.
///
/// # Errors
///
/// Returns an error if the options are invalid. A transaction that fails
/// is reported, not returned.
pub fn simulate(args: &SimulateArgs) -> Result<SimulateReport, CoreError> {
    let options = TransacterOptions::new()
        .max_attempts(args.attempts)
        .retry_delay(
            Duration::from_millis(args.min_delay_ms),
            Duration::from_millis(args.max_delay_ms),
        )
        .retry_jitter(Duration::from_millis(args.jitter_ms))
        .read_only(args.read_only);

    let db = InMemoryDatabase::new();
    let id = db.insert(Record::root(TABLE).with_field("name", "ada"));
    let sleeper = Arc::new(TimedSleeper::default());
    let transacter = Transacter::builder(Arc::new(db.clone()))
        .data_source(DataSourceConfig::new("simulated", BackendType::MySql))
        .options(options)
        .sleeper(Arc::clone(&sleeper) as Arc<dyn Sleeper>)
        .span_tracing(true)
        .build()?;

    let mut attempts = 0u32;
    let result = transacter.transaction(|session| {
        attempts += 1;
        let conflicting = attempts <= args.conflicts;
        let mut record = session.load(TABLE, id)?;

        if args.read_only {
            // Nothing is flushed, so the conflict has to be reported directly.
            if conflicting {
                return Err(stale(id));
            }
            return Ok(());
        }

        if conflicting {
            db.touch(TABLE, id);
        }
        record.set("name", format!("attempt {attempts}"));
        session.update(&record)
    });

    let stats = db.stats();
    let sleeps_ms = sleeper
        .delays
        .lock()
        .iter()
        .map(|delay| u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
        .collect();

    Ok(SimulateReport {
        max_attempts: args.attempts,
        attempts,
        conflicts: args.conflicts,
        read_only: args.read_only,
        sleeps_ms,
        committed: result.is_ok(),
        error: result.err().map(|error| error.to_string()),
        commits: stats.commits,
        rollbacks: stats.rollbacks,
    })
}

fn stale(id: RecordId) -> CoreError {
    DriverError::StaleObject {
        table: TABLE.to_string(),
        id,
    }
    .into()
}

fn print_text_output(report: &SimulateReport) {
    println!("shardtx Transaction Simulation");
    println!("==============================");
    println!();
    println!("Mode:      {}", if report.read_only { "read-only" } else { "read-write" });
    println!("Conflicts: {}", report.conflicts);
    println!("Attempts:  {} of {}", report.attempts, report.max_attempts);
    println!();
    println!("Backoff:");
    if report.sleeps_ms.is_empty() {
        println!("  (no retries)");
    }
    for (i, delay) in report.sleeps_ms.iter().enumerate() {
        println!("  after attempt {}: {} ms", i + 1, delay);
    }
    println!();
    println!("Driver:");
    println!("  Commits:   {}", report.commits);
    println!("  Rollbacks: {}", report.rollbacks);
    println!();
    match &report.error {
        None => println!("Outcome: committed"),
        Some(error) => println!("Outcome: failed ({error})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(attempts: u32, conflicts: u32) -> SimulateArgs {
        SimulateArgs {
            attempts,
            conflicts,
            min_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
            read_only: false,
        }
    }

    #[test]
    fn conflicts_within_budget_commit() {
        let report = simulate(&args(3, 2)).unwrap();
        assert!(report.committed);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.commits, 1);
        assert_eq!(report.rollbacks, 2);
        assert!(report.sleeps_ms.is_empty());
    }

    #[test]
    fn too_many_conflicts_fail() {
        let report = simulate(&args(2, 5)).unwrap();
        assert!(!report.committed);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.commits, 0);
        assert!(report.error.is_some());
    }

    #[test]
    fn read_only_conflicts_are_retried() {
        let report = simulate(&SimulateArgs {
            read_only: true,
            ..args(3, 1)
        })
        .unwrap();
        assert!(report.committed);
        assert_eq!(report.attempts, 2);
    }

    #[test]
    fn delays_are_recorded() {
        let report = simulate(&SimulateArgs {
            min_delay_ms: 1,
            max_delay_ms: 2,
            ..args(2, 1)
        })
        .unwrap();
        assert!(report.committed);
        assert_eq!(report.sleeps_ms.len(), 1);
        assert!((1..=2).contains(&report.sleeps_ms[0]));
    }

    #[test]
    fn invalid_options_are_rejected() {
        assert!(simulate(&args(0, 0)).is_err());
    }

    #[test]
    fn report_serializes_without_error_on_success() {
        let report = simulate(&args(1, 0)).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["committed"], true);
        assert!(json.get("error").is_none());
    }
}
