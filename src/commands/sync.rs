//! `sync`: one apply pass, or the daemon loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use mysql_trigger_source::{ApplyQueue, ApplyStats, DaemonSummary, IncrementalSync};
use sync_core::{EventSink, SyncConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const QUEUE_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Once(ApplyStats),
    Daemon(DaemonSummary),
}

/// Drain the audit log once, or keep draining until `cancel` fires.
///
/// With the queue enabled, records are handed to an [`ApplyQueue`]; a
/// single pass then waits for the queue to empty before returning.
pub async fn run_sync(
    sync: IncrementalSync,
    config: &SyncConfig,
    events: Arc<dyn EventSink>,
    daemon: bool,
    cancel: CancellationToken,
) -> Result<SyncOutcome> {
    let queue_cancel = cancel.child_token();
    let (sync, queue) = if config.performance.use_queue {
        let (queue, worker) = ApplyQueue::start(
            config.performance.queue_name.clone(),
            sync.applier(),
            events,
            queue_cancel.clone(),
        );
        info!("Dispatching audit records to queue {}", queue.name());
        (sync.with_queue(queue.clone()), Some((queue, worker)))
    } else {
        (sync, None)
    };

    let outcome = if daemon {
        SyncOutcome::Daemon(sync.run_daemon(cancel.clone()).await?)
    } else {
        info!("Processing pending sync records");
        let stats = sync.process_pending().await?;
        if let Some((queue, _)) = &queue {
            while queue.in_flight() > 0 && !cancel.is_cancelled() {
                tokio::time::sleep(QUEUE_POLL).await;
            }
        }
        SyncOutcome::Once(stats)
    };

    if let Some((_, worker)) = queue {
        queue_cancel.cancel();
        if let Err(e) = worker.await {
            warn!("Queue worker ended abnormally: {e}");
        }
    }
    Ok(outcome)
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (processed, success, failed) = match self {
            SyncOutcome::Once(stats) => (
                stats.processed as u64,
                stats.success as u64,
                stats.failed as u64,
            ),
            SyncOutcome::Daemon(summary) => {
                writeln!(f, "Iterations: {}", summary.iterations)?;
                (summary.processed, summary.success, summary.failed)
            }
        };
        writeln!(f, "Processed:  {processed}")?;
        writeln!(f, "Success:    {success}")?;
        writeln!(f, "Failed:     {failed}")?;
        if let SyncOutcome::Once(stats) = self {
            if stats.dispatched > 0 {
                writeln!(f, "Dispatched: {}", stats.dispatched)?;
            }
            for failure in &stats.errors {
                writeln!(
                    f,
                    "  #{} {} on {}: {}",
                    failure.id, failure.operation, failure.table, failure.error
                )?;
            }
        }
        if failed > 0 {
            writeln!(f, "Some records failed to sync; they are retried on later passes.")?;
        }
        Ok(())
    }
}
