//! In-process work queue for audit records.
//!
//! When queueing is enabled the apply pass hands each record to an
//! [`ApplyQueue`] instead of applying it inline. Records are routed to one
//! lane per table; a lane applies its records one at a time in dispatch
//! order, so a record waiting out a retry holds back later changes to the
//! same table. Each record gets up to [`MAX_ATTEMPTS`] attempts, waiting
//! according to [`RETRY_SCHEDULE`] between them. A record that is still in
//! flight is never dispatched a second time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sync_core::{AuditRecord, EventSink, SyncEvent};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::incremental_sync::{ColumnCache, RecordApplier};

pub const MAX_ATTEMPTS: u32 = 3;

/// Wait after the n-th failed attempt; the last attempt has no wait.
pub const RETRY_SCHEDULE: [Duration; MAX_ATTEMPTS as usize - 1] =
    [Duration::from_secs(60), Duration::from_secs(5 * 60)];

type InFlight = Arc<Mutex<HashSet<i64>>>;

/// Handle to a running queue worker.
#[derive(Clone)]
pub struct ApplyQueue {
    name: String,
    tx: mpsc::UnboundedSender<AuditRecord>,
    in_flight: InFlight,
}

impl ApplyQueue {
    /// Spawn the worker. It stops when `cancel` fires or every handle is
    /// dropped.
    pub fn start(
        name: impl Into<String>,
        applier: Arc<RecordApplier>,
        events: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let in_flight: InFlight = Arc::new(Mutex::new(HashSet::new()));
        let lane = Lane {
            applier,
            events,
            in_flight: in_flight.clone(),
            cancel,
        };
        let worker = tokio::spawn(run_worker(name.clone(), rx, lane));
        (
            Self {
                name,
                tx,
                in_flight,
            },
            worker,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `record`. Returns false when it is already in flight or the
    /// worker is gone.
    pub fn dispatch(&self, record: AuditRecord) -> bool {
        let id = record.id;
        match self.in_flight.lock() {
            Ok(mut set) => {
                if !set.insert(id) {
                    debug!("Audit record {id} already queued on {}", self.name);
                    return false;
                }
            }
            Err(_) => return false,
        }
        if self.tx.send(record).is_err() {
            release(&self.in_flight, id);
            return false;
        }
        true
    }

    /// Records dispatched and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|s| s.len()).unwrap_or(0)
    }
}

fn release(in_flight: &InFlight, id: i64) {
    if let Ok(mut set) = in_flight.lock() {
        set.remove(&id);
    }
}

/// Everything a lane task needs to apply records.
#[derive(Clone)]
struct Lane {
    applier: Arc<RecordApplier>,
    events: Arc<dyn EventSink>,
    in_flight: InFlight,
    cancel: CancellationToken,
}

async fn run_worker(name: String, mut rx: mpsc::UnboundedReceiver<AuditRecord>, lane: Lane) {
    info!("Queue {name} started");
    let mut lanes: HashMap<String, mpsc::UnboundedSender<AuditRecord>> = HashMap::new();
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            _ = lane.cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(record) => {
                    let sender = lanes.entry(record.table_name.clone()).or_insert_with(|| {
                        debug!("Queue {name} opened a lane for {}", record.table_name);
                        let (tx, lane_rx) = mpsc::unbounded_channel();
                        tasks.spawn(run_lane(lane_rx, lane.clone()));
                        tx
                    });
                    if let Err(mpsc::error::SendError(record)) = sender.send(record) {
                        release(&lane.in_flight, record.id);
                    }
                }
                None => break,
            },
        }
    }
    // Closing the lane senders lets each lane drain and exit.
    drop(lanes);
    while tasks.join_next().await.is_some() {}
    info!("Queue {name} stopped");
}

/// Apply one table's records strictly in arrival order.
async fn run_lane(mut rx: mpsc::UnboundedReceiver<AuditRecord>, lane: Lane) {
    loop {
        let record = tokio::select! {
            _ = lane.cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(record) => record,
                None => break,
            },
        };
        run_job(record, &lane).await;
    }
    rx.close();
    while let Ok(record) = rx.try_recv() {
        release(&lane.in_flight, record.id);
    }
}

async fn run_job(record: AuditRecord, lane: &Lane) {
    for attempt in 1..=MAX_ATTEMPTS {
        let mut cache = ColumnCache::new();
        let error = match lane.applier.apply(&record, &mut cache).await {
            Ok(()) => break,
            Err(error) => error,
        };

        let Some(wait) = RETRY_SCHEDULE.get((attempt - 1) as usize).copied() else {
            warn!(
                "Audit record {} on {} failed after {attempt} attempts: {error}",
                record.id, record.table_name
            );
            lane.events.emit(SyncEvent::RecordAbandoned {
                id: record.id,
                table: record.table_name.clone(),
                attempts: attempt,
                error,
            });
            break;
        };

        debug!("Retrying audit record {} in {wait:?}", record.id);
        tokio::select! {
            _ = lane.cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }
    release(&lane.in_flight, record.id);
}
