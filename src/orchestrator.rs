use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::copier::{StreamingCopier, TransferOutcome};
use crate::error::{TransferError, TransferStage};
use crate::keymap::CopyTask;
use crate::lister::Inventory;
use crate::progress::{CopyProgress, CopySummary};
use crate::store::BucketAccess;

/// Everything a run needs besides the inventory.
pub struct CopyPlan {
    pub source: BucketAccess,
    pub dest: BucketAccess,
    pub source_prefix: String,
    pub dest_prefix: String,
    /// Maximum number of objects transferred at once.
    pub concurrency: usize,
    pub verbose: bool,
}

/// Read-only state shared by every worker.
struct Shared {
    copier: StreamingCopier,
    source: BucketAccess,
    dest: BucketAccess,
    cancel: CancellationToken,
    progress: CopyProgress,
    verbose: bool,
    finished: AtomicUsize,
    total: usize,
}

/// Drives an inventory through the [`StreamingCopier`] with bounded parallelism.
pub struct CopyOrchestrator {
    copier: StreamingCopier,
    cancel: CancellationToken,
}

impl CopyOrchestrator {
    pub fn new(copier: StreamingCopier, cancel: CancellationToken) -> Self {
        Self { copier, cancel }
    }

    /// Copy every object of `inventory` and wait for all of them.
    ///
    /// Per-object failures are logged and counted, never propagated. Once the
    /// cancellation token fires no further object is started. Outcomes are
    /// folded into the summary as tasks finish, so only in-flight objects are
    /// held in memory.
    pub async fn run(&self, inventory: Inventory, plan: CopyPlan) -> CopySummary {
        let started = Instant::now();
        let total = inventory.len();
        let total_bytes = inventory.total_bytes();

        if plan.verbose {
            println!("{}", describe_run(&plan, total, total_bytes));
        }

        let source_prefix_len = plan.source_prefix.len();
        let dest_prefix = plan.dest_prefix;
        let mut pending = inventory
            .into_iter()
            .map(|summary| CopyTask::from_summary(summary, source_prefix_len, &dest_prefix));

        let shared = Arc::new(Shared {
            copier: self.copier.clone(),
            source: plan.source,
            dest: plan.dest,
            cancel: self.cancel.clone(),
            progress: CopyProgress::new(total_bytes, plan.verbose),
            verbose: plan.verbose,
            finished: AtomicUsize::new(0),
            total,
        });

        // Create semaphore for concurrency control
        let semaphore = Arc::new(Semaphore::new(plan.concurrency.max(1)));
        let mut workers: JoinSet<TransferOutcome> = JoinSet::new();
        let mut running: HashMap<task::Id, CopyTask> = HashMap::new();
        let mut summary = CopySummary::new(total);

        while let Some(copy_task) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                summary.skipped = 1 + pending.len();
                warn!(
                    skipped = summary.skipped,
                    "copy cancelled, remaining objects not started"
                );
                break;
            };

            while let Some(joined) = workers.try_join_next_with_id() {
                settle(joined, &mut running, &shared, &mut summary);
            }

            let shared_for_task = shared.clone();
            let task_for_join = copy_task.clone();
            let handle = workers.spawn(async move {
                let _permit = permit;
                let outcome = shared_for_task
                    .copier
                    .copy(
                        copy_task,
                        &shared_for_task.source,
                        &shared_for_task.dest,
                        &shared_for_task.cancel,
                    )
                    .await;
                report(&shared_for_task, &outcome);
                outcome
            });
            running.insert(handle.id(), task_for_join);
        }

        // Wait for every dispatched object before reporting
        while let Some(joined) = workers.join_next_with_id().await {
            settle(joined, &mut running, &shared, &mut summary);
        }
        summary.elapsed = started.elapsed();
        shared.progress.finish();

        if shared.verbose {
            println!("{}", describe_summary(&summary));
        }
        summary
    }
}

/// Fold one finished worker into the summary. A worker that panicked is
/// recorded as a failure of the object it was copying.
fn settle(
    joined: Result<(task::Id, TransferOutcome), JoinError>,
    running: &mut HashMap<task::Id, CopyTask>,
    shared: &Shared,
    summary: &mut CopySummary,
) {
    match joined {
        Ok((id, outcome)) => {
            running.remove(&id);
            summary.record(&outcome);
        }
        Err(join_err) => {
            let Some(copy_task) = running.remove(&join_err.id()) else {
                error!("unknown copy worker stopped: {join_err}");
                return;
            };
            let outcome = TransferOutcome::failure(
                copy_task,
                TransferError::new(TransferStage::Panicked, join_err),
            );
            report(shared, &outcome);
            summary.record(&outcome);
        }
    }
}

/// Header printed before dispatch on verbose runs.
fn describe_run(plan: &CopyPlan, objects: usize, bytes: i64) -> String {
    format!(
        "s3://{}/{} -> s3://{}/{}: {} object(s), {} byte(s)",
        plan.source.bucket, plan.source_prefix, plan.dest.bucket, plan.dest_prefix, objects, bytes
    )
}

/// Footer printed after the barrier on verbose runs.
fn describe_summary(summary: &CopySummary) -> String {
    format!(
        "{} second(s), ~{:.2} MB/sec\n{} succeeded, {} failed, {} skipped, {} byte(s) copied",
        summary.elapsed.as_secs_f64(),
        summary.throughput_mib_s(),
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.bytes_transferred
    )
}

/// Log one finished object and advance the progress display.
fn report(shared: &Shared, outcome: &TransferOutcome) {
    let finished = shared.finished.fetch_add(1, Ordering::SeqCst) + 1;
    let copy_task = &outcome.task;
    match &outcome.error {
        None => {
            info!(
                source_key = %copy_task.source_key,
                dest_key = %copy_task.dest_key,
                bytes = outcome.bytes_transferred,
                "object copied"
            );
            if shared.verbose {
                shared.progress.println(format!(
                    "{} -> {}: {} byte(s)",
                    copy_task.source_key, copy_task.dest_key, outcome.bytes_transferred
                ));
            }
        }
        Some(e) => {
            error!(
                source_key = %copy_task.source_key,
                dest_key = %copy_task.dest_key,
                "copy failed: {e}"
            );
        }
    }
    shared.progress.object_done(outcome, finished, shared.total);
}
