// crates/server/src/jobs/bus.rs
//! Per-job fan-out of progress events to live observers.

use std::sync::Arc;

use dashmap::DashMap;
use mediaferry_core::{JobId, ProgressEvent};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Events a single observer may fall behind before it sees `Lagged`.
pub const CHANNEL_CAPACITY: usize = 64;

/// Keyed multi-subscriber registry: one broadcast channel per observed job.
///
/// Entries are sharded, so subscribe, publish and cleanup for one job only
/// lock that job's shard. An entry is removed as soon as its last observer
/// goes away. Nothing is buffered for observers that subscribe after an event
/// was published.
pub struct ProgressBus {
    topics: DashMap<JobId, broadcast::Sender<ProgressEvent>>,
}

impl ProgressBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            topics: DashMap::new(),
        })
    }

    /// Register a new observer for `job_id`.
    pub fn subscribe(self: &Arc<Self>, job_id: JobId) -> Subscription {
        let rx = self
            .topics
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        Subscription {
            job_id,
            rx: Some(rx),
            bus: Arc::clone(self),
        }
    }

    /// Deliver `event` to every current observer of `job_id`.
    ///
    /// Returns the number of observers reached.
    pub fn publish(&self, job_id: JobId, event: ProgressEvent) -> usize {
        match self.topics.get(&job_id) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Remove an observer. Equivalent to dropping the subscription.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    pub fn observer_count(&self, job_id: JobId) -> usize {
        self.topics
            .get(&job_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of jobs that currently have at least one observer.
    pub fn tracked_jobs(&self) -> usize {
        self.topics.len()
    }

    /// Drop the entry for `job_id` once no receivers remain. The count is read
    /// under the shard lock, so a concurrent subscribe cannot be stranded on a
    /// detached channel.
    fn prune(&self, job_id: JobId) {
        self.topics
            .remove_if(&job_id, |_, tx| tx.receiver_count() == 0);
    }
}

/// One observer's handle on a job's event stream.
///
/// Dropping it unsubscribes; an explicit `close` is idempotent.
pub struct Subscription {
    job_id: JobId,
    rx: Option<broadcast::Receiver<ProgressEvent>>,
    bus: Arc<ProgressBus>,
}

impl Subscription {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Next event, `Lagged` if this observer fell behind, `Closed` after `close`.
    pub async fn recv(&mut self) -> Result<ProgressEvent, RecvError> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => Err(RecvError::Closed),
        }
    }

    pub fn close(&mut self) {
        if let Some(rx) = self.rx.take() {
            drop(rx);
            self.bus.prune(self.job_id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
