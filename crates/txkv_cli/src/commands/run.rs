//! Run command implementation.

use clap::{Args, ValueEnum};
use serde::Serialize;
use std::process::ExitCode;
use tracing::error;
use txkv_core::{DeadlockPolicy, EnvConfig, StatsSnapshot};
use txkv_workload::{
    Coordinator, CountMode, EngineStore, KvStore, RunSummary, SummaryReport, WorkloadConfig,
    WorkloadError, WriterIdSequence, DEFAULT_DATABASE, DEFAULT_MAX_RETRIES,
};

/// Arguments of `txkv run`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Number of concurrent writers
    #[arg(short, long, default_value_t = 5)]
    pub writers: usize,

    /// Units of work per writer
    #[arg(short, long, default_value_t = 50)]
    pub units: usize,

    /// Puts per unit, one per key
    #[arg(short, long, default_value_t = 10)]
    pub keys: usize,

    /// Lock conflicts tolerated per unit
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Bytes of record data the environment may hold
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    pub cache_size: u64,

    /// Size of the in-memory log buffer in bytes
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    pub log_buffer_size: u64,

    /// Records per leaf page
    #[arg(long, default_value_t = 16)]
    pub page_capacity: usize,

    /// Which transaction of a deadlock cycle is failed
    #[arg(long, value_enum, default_value_t = PolicyArg::MinWrite)]
    pub deadlock_policy: PolicyArg,

    /// Where each unit's record count comes from
    #[arg(long, value_enum, default_value_t = CountArg::InTransaction)]
    pub count_mode: CountArg,

    /// Database name
    #[arg(long, default_value = DEFAULT_DATABASE)]
    pub database: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    pub format: Format,
}

/// Victim selection on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// Fewest write locks
    MinWrite,
    /// Most write locks
    MaxWrite,
    /// Fewest locks
    MinLocks,
    /// Most locks
    MaxLocks,
    /// Oldest transaction
    Oldest,
    /// Youngest transaction
    Youngest,
    /// Any member of the cycle
    Random,
}

impl From<PolicyArg> for DeadlockPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::MinWrite => Self::MinWrite,
            PolicyArg::MaxWrite => Self::MaxWrite,
            PolicyArg::MinLocks => Self::MinLocks,
            PolicyArg::MaxLocks => Self::MaxLocks,
            PolicyArg::Oldest => Self::Oldest,
            PolicyArg::Youngest => Self::Youngest,
            PolicyArg::Random => Self::Random,
        }
    }
}

/// Count mode on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CountArg {
    /// Through the unit's own transaction
    InTransaction,
    /// Without locks, including other writers' pending puts
    ReadUncommitted,
    /// In a separate transaction after commit
    AfterCommit,
}

impl From<CountArg> for CountMode {
    fn from(arg: CountArg) -> Self {
        match arg {
            CountArg::InTransaction => Self::InTransaction,
            CountArg::ReadUncommitted => Self::ReadUncommitted,
            CountArg::AfterCommit => Self::AfterCommit,
        }
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable lines
    Text,
    /// A single JSON document
    Json,
}

impl RunArgs {
    fn env_config(&self) -> EnvConfig {
        EnvConfig::new()
            .cache_size(self.cache_size)
            .log_buffer_size(self.log_buffer_size)
            .page_capacity(self.page_capacity)
            .deadlock_policy(self.deadlock_policy.into())
    }

    fn workload_config(&self) -> WorkloadConfig {
        WorkloadConfig::new()
            .writers(self.writers)
            .units_per_writer(self.units)
            .keys(self.keys)
            .max_retries(self.max_retries)
            .count_mode(self.count_mode.into())
            .database(self.database.clone())
    }
}

/// Engine counters worth reporting.
#[derive(Debug, Serialize)]
pub struct EngineLine {
    /// Transactions committed.
    pub committed: u64,
    /// Transactions aborted.
    pub aborted: u64,
    /// Deadlock victims.
    pub deadlocks: u64,
    /// Lock requests that waited.
    pub lock_waits: u64,
    /// Puts that created a key group or split a page.
    pub structural_changes: u64,
}

impl From<&StatsSnapshot> for EngineLine {
    fn from(stats: &StatsSnapshot) -> Self {
        Self {
            committed: stats.transactions_committed,
            aborted: stats.transactions_aborted,
            deadlocks: stats.deadlocks,
            lock_waits: stats.lock_waits,
            structural_changes: stats.structural_changes,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// Whether setup, every writer and teardown succeeded.
    pub succeeded: bool,
    /// Whether the store was opened.
    pub setup_completed: bool,
    /// The workload that was run.
    pub config: WorkloadConfig,
    /// Writer outcomes, absent if setup failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<SummaryReport>,
    /// Committed records after every writer finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
    /// Engine counters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineLine>,
    /// Setup and teardown errors.
    pub errors: Vec<String>,
}

/// Runs the workload and prints the report.
pub fn run(args: &RunArgs) -> ExitCode {
    let report = execute(args.env_config(), args.workload_config());

    let printed = match args.format {
        Format::Json => serde_json::to_string_pretty(&report).map(|json| println!("{json}")),
        Format::Text => {
            print_text_output(&report);
            Ok(())
        }
    };
    if let Err(e) = printed {
        error!(error = %e, "failed to print report");
    }

    println!("{}", status_line(&report));
    if report.succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn execute(env: EnvConfig, config: WorkloadConfig) -> RunReport {
    let mut report = RunReport {
        succeeded: false,
        setup_completed: false,
        config: config.clone(),
        workload: None,
        records: None,
        engine: None,
        errors: Vec::new(),
    };

    let store = match EngineStore::open(env, &config.database) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "setup failed");
            report.errors.push(e.to_string());
            return report;
        }
    };
    report.setup_completed = true;

    let ids = WriterIdSequence::new();
    let summary = Coordinator::new(&store, &ids, config).run();
    let workload_ok = match &summary {
        Ok(summary) => summary.succeeded(),
        Err(e) => {
            report.errors.push(e.to_string());
            false
        }
    };
    report.workload = summary.as_ref().ok().map(RunSummary::to_report);

    match store.count_committed() {
        Ok(records) => report.records = Some(records),
        Err(e) => {
            let e = WorkloadError::operation("count committed records", e);
            error!(error = %e, "final count failed");
            report.errors.push(e.to_string());
        }
    }
    report.engine = Some(EngineLine::from(&store.environment().stats()));

    let teardown_ok = match store.close() {
        Ok(()) => true,
        Err(e) => {
            report.errors.push(e.to_string());
            false
        }
    };

    report.succeeded = workload_ok && teardown_ok && report.records.is_some();
    report
}

fn print_text_output(report: &RunReport) {
    let config = &report.config;
    println!("=== txkv run ===");
    println!(
        "Writers: {}  Units: {}  Keys: {}  Max retries: {}",
        config.writers, config.units_per_writer, config.keys, config.max_retries
    );

    if let Some(workload) = &report.workload {
        println!();
        for line in &workload.workers {
            match (&line.report, &line.error) {
                (Some(r), _) => println!(
                    "  slot {}: {} committed {} units, {} retries (max {} per unit), last count {}",
                    line.slot,
                    r.writer,
                    r.units_committed,
                    r.retries,
                    r.max_unit_retries,
                    r.last_count.map_or_else(|| "-".to_string(), |c| c.to_string()),
                ),
                (None, Some(e)) => println!(
                    "  slot {}: FAILED after {} units: {}",
                    line.slot,
                    line.units_committed.unwrap_or_default(),
                    e
                ),
                (None, None) => println!("  slot {}: no result", line.slot),
            }
        }
        println!();
        println!("Units committed: {}", workload.units_committed);
        println!("Retries: {}", workload.retries);
        println!("Elapsed: {} ms", workload.elapsed_ms);
    }

    if let Some(records) = report.records {
        println!("Records: {records}");
    }
    if let Some(engine) = &report.engine {
        println!(
            "Engine: {} committed, {} aborted, {} deadlocks, {} lock waits, {} structural changes",
            engine.committed,
            engine.aborted,
            engine.deadlocks,
            engine.lock_waits,
            engine.structural_changes
        );
    }
    for e in &report.errors {
        println!("Error: {e}");
    }
}

fn status_line(report: &RunReport) -> String {
    let failed = report
        .workload
        .as_ref()
        .map_or(0, |w| w.workers.iter().filter(|l| l.error.is_some()).count());
    if report.succeeded {
        format!(
            "OK: {} records committed",
            report.records.unwrap_or_default()
        )
    } else if !report.setup_completed {
        "FAILED: setup did not complete".to_string()
    } else if report.workload.is_none() {
        "FAILED: workload rejected before any writer started".to_string()
    } else {
        format!(
            "FAILED: {failed} writer(s) failed, {} error(s) outside writers",
            report.errors.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: RunArgs,
    }

    fn parse(argv: &[&str]) -> RunArgs {
        Harness::parse_from(std::iter::once("txkv").chain(argv.iter().copied())).args
    }

    #[test]
    fn defaults_match_the_workload() {
        let args = parse(&[]);
        let config = args.workload_config();
        assert_eq!(config.writers, 5);
        assert_eq!(config.units_per_writer, 50);
        assert_eq!(config.keys, 10);
        assert_eq!(config.max_retries, 20);
        assert_eq!(config.count_mode, CountMode::InTransaction);
        assert_eq!(args.format, Format::Text);
    }

    #[test]
    fn flags_map_onto_configs() {
        let args = parse(&[
            "--writers",
            "2",
            "--units",
            "3",
            "--keys",
            "4",
            "--deadlock-policy",
            "youngest",
            "--count-mode",
            "after-commit",
            "--page-capacity",
            "2",
            "--format",
            "json",
        ]);
        let env = args.env_config();
        assert_eq!(env.deadlock_policy, DeadlockPolicy::Youngest);
        assert_eq!(env.page_capacity, 2);
        assert_eq!(args.workload_config().count_mode, CountMode::AfterCommit);
        assert_eq!(args.format, Format::Json);
    }

    #[test]
    fn small_run_succeeds() {
        let config = WorkloadConfig::new().writers(2).units_per_writer(3).keys(4);
        let report = execute(EnvConfig::default(), config);
        assert!(report.succeeded, "{:?}", report.errors);
        assert_eq!(report.records, Some(24));
        assert_eq!(status_line(&report), "OK: 24 records committed");
    }

    #[test]
    fn setup_failure_is_reported() {
        let report = execute(
            EnvConfig::default().log_buffer_size(1),
            WorkloadConfig::default(),
        );
        assert!(!report.succeeded);
        assert!(!report.setup_completed);
        assert!(report.workload.is_none());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(status_line(&report), "FAILED: setup did not complete");
    }

    #[test]
    fn invalid_workload_still_tears_down() {
        let report = execute(EnvConfig::default(), WorkloadConfig::new().writers(0));
        assert!(!report.succeeded);
        assert!(report.setup_completed);
        assert!(report.workload.is_none());
        assert_eq!(report.records, Some(0));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(
            status_line(&report),
            "FAILED: workload rejected before any writer started"
        );
    }

    #[test]
    fn json_report_names_every_writer() {
        let config = WorkloadConfig::new().writers(3).units_per_writer(1).keys(2);
        let report = execute(EnvConfig::default(), config);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["succeeded"], true);
        assert_eq!(json["workload"]["workers"].as_array().unwrap().len(), 3);
        assert_eq!(json["config"]["count_mode"], "in-transaction");
    }
}
