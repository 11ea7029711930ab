//! Push orchestrator - main workflow coordinator.
//!
//! A run expands a directory tree into [`Target`]s, groups them by instance
//! and hands the groups to a fixed pool of workers. Each worker processes the
//! targets of one group sequentially:
//!
//! 1. Materialize the desired definitions in a workspace
//! 2. Diff the live schema against them
//! 3. Verify ALTERs by replaying them in a workspace
//! 4. Compile and print the DDL, then execute it unless this is a dry run

mod printer;
mod target;

pub use printer::Printer;
pub use target::{group_targets, targets_for_dir, Target, TargetGroup};

use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{OptionSet, RunOptions};
use crate::core::SchemaDiff;
use crate::ddl::{statement_modifiers, DdlStatement};
use crate::error::{PushError, Result, EXIT_DIFFERENCES, EXIT_PARTIAL_ERROR, EXIT_SUCCESS};
use crate::fs::Dir;
use crate::instance::PoolRegistry;
use crate::verify::verify_diff;
use crate::workspace::{exec_logical_schema, Lifecycle, WorkspaceOptions};

/// Outcome counters of a run or part of one. Sums field by field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResult {
    /// True if any target had differences.
    pub differences: bool,

    /// Targets, directories and statements skipped because of errors.
    pub skip_count: usize,

    /// Objects skipped because their changes cannot be expressed.
    pub unsupported_count: usize,
}

impl Add for PushResult {
    type Output = PushResult;

    fn add(self, other: PushResult) -> PushResult {
        PushResult {
            differences: self.differences || other.differences,
            skip_count: self.skip_count + other.skip_count,
            unsupported_count: self.unsupported_count + other.unsupported_count,
        }
    }
}

impl AddAssign for PushResult {
    fn add_assign(&mut self, other: PushResult) {
        *self = *self + other;
    }
}

impl Sum for PushResult {
    fn sum<I: Iterator<Item = PushResult>>(iter: I) -> PushResult {
        iter.fold(PushResult::default(), Add::add)
    }
}

impl PushResult {
    /// Process exit code: partial errors first, then differences (dry run only).
    pub fn exit_code(&self, dry_run: bool) -> u8 {
        if self.skip_count + self.unsupported_count > 0 {
            EXIT_PARTIAL_ERROR
        } else if dry_run && self.differences {
            EXIT_DIFFERENCES
        } else {
            EXIT_SUCCESS
        }
    }
}

/// Summary of a completed run, printed with `--output-json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Number of targets processed.
    pub targets_total: usize,

    pub dry_run: bool,

    #[serde(flatten)]
    pub result: PushResult,
}

impl RunSummary {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Shared state of one run's workers.
struct WorkerContext {
    run: RunOptions,
    lifecycle: Arc<Lifecycle>,
    printer: Arc<Printer>,
    /// Cancelled on interrupt or on the first fatal error.
    cancel: CancellationToken,
    /// First fatal error wins.
    fatal: Mutex<Option<PushError>>,
}

impl WorkerContext {
    fn record_fatal(&self, err: PushError) {
        let mut slot = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(err);
        }
        self.cancel.cancel();
    }
}

/// Push orchestrator.
pub struct Orchestrator {
    path: PathBuf,
    options: OptionSet,
    run: RunOptions,
    registry: Arc<PoolRegistry>,
    lifecycle: Arc<Lifecycle>,
    printer: Arc<Printer>,
}

impl Orchestrator {
    /// Create an orchestrator for the tree rooted at `path`.
    ///
    /// `options` carries command-line overrides applied on top of every
    /// directory's option files.
    pub fn new(
        path: impl Into<PathBuf>,
        options: OptionSet,
        run: RunOptions,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        let printer = Arc::new(Printer::new(run.brief));
        Self {
            path: path.into(),
            options,
            run,
            registry: Arc::new(PoolRegistry::new()),
            lifecycle,
            printer,
        }
    }

    /// Connection pools opened by this run.
    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Run every target under the root directory.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Starting run {} on {} (environment {})",
            run_id,
            self.path.display(),
            self.run.environment
        );

        let root = Dir::load(&self.path, &self.options, &self.run.environment)?;
        let (targets, dir_skips) =
            targets_for_dir(root, self.run.get_max_depth(), &self.registry).await;
        let targets_total = targets.len();
        let groups = group_targets(targets);
        info!(
            "{} targets on {} instances, {} skipped",
            targets_total,
            groups.len(),
            dir_skips
        );

        let ctx = Arc::new(WorkerContext {
            run: self.run.clone(),
            lifecycle: self.lifecycle.clone(),
            printer: self.printer.clone(),
            cancel: cancel.child_token(),
            fatal: Mutex::new(None),
        });
        let mut result = PushResult {
            skip_count: dir_skips,
            ..Default::default()
        };
        result += run_groups(groups, self.run.get_concurrent_instances(), ctx.clone()).await?;

        let fatal = ctx.fatal.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(err) = fatal {
            return Err(err);
        }
        if cancel.is_cancelled() {
            warn!("Run {} cancelled", run_id);
            return Err(PushError::Cancelled);
        }

        let completed_at = Utc::now();
        let status = if result.skip_count + result.unsupported_count > 0 {
            "partial"
        } else {
            "completed"
        };
        info!(
            "Run {} {}: differences={} skipped={} unsupported={}",
            run_id, status, result.differences, result.skip_count, result.unsupported_count
        );
        Ok(RunSummary {
            run_id,
            status: status.to_string(),
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            targets_total,
            dry_run: self.run.dry_run,
            result,
        })
    }
}

/// Feed `groups` to `workers` tasks through a shared queue and sum their results.
async fn run_groups(
    groups: Vec<TargetGroup>,
    workers: usize,
    ctx: Arc<WorkerContext>,
) -> Result<PushResult> {
    if groups.is_empty() {
        return Ok(PushResult::default());
    }
    let workers = workers.clamp(1, groups.len());
    let (tx, rx) = mpsc::channel(groups.len());
    for group in groups {
        // Capacity covers every group, so this never waits.
        if tx.send(group).await.is_err() {
            break;
        }
    }
    drop(tx);

    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let rx = rx.clone();
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            let mut result = PushResult::default();
            loop {
                if ctx.cancel.is_cancelled() {
                    break;
                }
                let group = { rx.lock().await.recv().await };
                let Some(group) = group else { break };
                debug!(
                    "Worker {}: {} targets on {}",
                    worker_id,
                    group.targets.len(),
                    group.instance
                );
                result += process_group(group, &ctx).await;
            }
            result
        }));
    }

    let mut total = PushResult::default();
    for handle in handles {
        total += handle
            .await
            .map_err(|e| PushError::Fatal(format!("worker task failed: {}", e)))?;
    }
    Ok(total)
}

async fn process_group(group: TargetGroup, ctx: &WorkerContext) -> PushResult {
    let mut result = PushResult::default();
    for target in &group.targets {
        if ctx.cancel.is_cancelled() {
            debug!("{}: cancelled before start", target);
            break;
        }
        match push_target(target, ctx).await {
            Ok(r) => result += r,
            Err(e) if e.is_fatal() => {
                error!("{}: {}", target, e);
                ctx.record_fatal(e);
                break;
            }
            Err(e) => {
                error!("Skipping {}: {}", target, e);
                result.skip_count += 1;
            }
        }
    }
    result
}

/// Diff, verify, compile and apply one target.
async fn push_target(target: &Target, ctx: &WorkerContext) -> Result<PushResult> {
    let registry = target.instance.registry().clone();
    let workspace = WorkspaceOptions::from_options(&target.options, &target.instance, registry).await?;

    let desired = exec_logical_schema(&target.logical_schema, &workspace, &ctx.lifecycle).await?;
    if !desired.failures.is_empty() {
        for failure in &desired.failures {
            error!("{}: {}", target, failure);
        }
        return Ok(PushResult {
            skip_count: 1,
            ..Default::default()
        });
    }

    let live = target.instance.introspect_schema(&target.schema_name).await?;
    let mut desired_schema = desired.schema;
    desired_schema.name = target.schema_name.clone();
    if let Some(live) = &live {
        // Without configured defaults the live schema's defaults are kept.
        if target.logical_schema.char_set.is_empty() {
            desired_schema.char_set = live.char_set.clone();
        }
        if target.logical_schema.collation.is_empty() {
            desired_schema.collation = live.collation.clone();
        }
    }

    let mut diff = SchemaDiff::new(live.as_ref(), &desired_schema);
    if let Some(pattern) = target.options.get_regex("ignore-table")? {
        let ignored = diff.ignore_tables(&pattern);
        if ignored > 0 {
            debug!("{}: ignoring {} tables matching {}", target, ignored, pattern);
        }
    }
    if diff.is_empty() {
        debug!("{}: no differences", target);
        return Ok(PushResult::default());
    }

    if let Err(e) = verify_diff(&diff, target, &workspace, &ctx.lifecycle).await {
        if e.is_fatal() {
            return Err(e);
        }
        error!("{}: {}", target, e);
        return Ok(PushResult {
            differences: true,
            skip_count: diff.object_diffs.len(),
            ..Default::default()
        });
    }

    let flavor = target.instance.flavor().await?;
    let mods = statement_modifiers(&target.options, flavor)?;
    let mut result = PushResult::default();
    let mut statements = Vec::new();
    for object_diff in &diff.object_diffs {
        match DdlStatement::compile(object_diff, &mods, target).await {
            Ok(Some(stmt)) => statements.push(stmt),
            Ok(None) => {}
            Err(e) if e.is_unsupported() => {
                warn!("{}: {}", target, e);
                debug!(
                    "{}: current definition:\n{}\ndesired definition:\n{}",
                    target,
                    object_diff.from_definition().unwrap_or_default(),
                    object_diff.to_definition().unwrap_or_default()
                );
                result.unsupported_count += 1;
            }
            Err(e) => {
                error!("{}: {}", target, e);
                result.skip_count += 1;
            }
        }
    }
    result.differences = !statements.is_empty() || result.skip_count + result.unsupported_count > 0;
    if statements.is_empty() {
        return Ok(result);
    }

    ctx.printer.print(target, &statements);
    if !ctx.run.dry_run {
        result.skip_count += execute_statements(target, &statements).await;
    }
    Ok(result)
}

/// Execute statements in order, stopping at the first failure.
///
/// Returns the number of statements not successfully run, counting the
/// failed one.
pub async fn execute_statements(target: &Target, statements: &[DdlStatement]) -> usize {
    for (i, stmt) in statements.iter().enumerate() {
        if let Err(e) = stmt.execute().await {
            let skipped = statements.len() - i;
            error!(
                "{}: error executing {}: {}; skipping {} remaining statements",
                target,
                stmt,
                e,
                skipped
            );
            return skipped;
        }
    }
    info!("{}: applied {} statements", target, statements.len());
    0
}
