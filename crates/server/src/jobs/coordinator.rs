// crates/server/src/jobs/coordinator.rs
//! Public entry point of download orchestration: submission, cancellation,
//! listing, and live progress subscriptions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::Stream;
use mediaferry_core::{
    DownloaderSpec, Job, JobError, JobId, JobResult, JobStatus, JobStore, OwnerId,
    ProgressEvent, Requester, StateUpdate,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::bus::ProgressBus;
use super::runner::{JobRunner, RunOutcome};
use crate::metrics::record_job_submitted;

/// Message recorded when a runner task dies without resolving.
pub const RUNNER_PANIC_MESSAGE: &str = "runner panicked";

#[derive(Debug, Clone, Default)]
pub struct CoordinatorOptions {
    pub downloader: DownloaderSpec,
    /// Kill the downloader when its job is cancelled instead of letting it
    /// run to completion.
    pub terminate_on_cancel: bool,
}

/// What `cancel` did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job was running and is now `cancelled`.
    Cancelled,
    /// The job was not running and its record was removed.
    Deleted,
}

type ActiveRunners = Arc<Mutex<HashMap<JobId, CancellationToken>>>;

pub struct JobCoordinator {
    store: Arc<dyn JobStore>,
    bus: Arc<ProgressBus>,
    downloader: Arc<DownloaderSpec>,
    terminate_on_cancel: bool,
    active: ActiveRunners,
}

impl JobCoordinator {
    pub fn new(store: Arc<dyn JobStore>, bus: Arc<ProgressBus>, options: CoordinatorOptions) -> Self {
        Self {
            store,
            bus,
            downloader: Arc::new(options.downloader),
            terminate_on_cancel: options.terminate_on_cancel,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.bus
    }

    fn active(&self) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        lock_active(&self.active)
    }

    /// Create a pending job and start its runner in the background.
    ///
    /// Returns as soon as the pending record exists; the outcome of the
    /// download is only observable through the store and progress stream.
    pub async fn submit(&self, owner: OwnerId, target: &str) -> JobResult<Job> {
        let target = target.trim();
        if target.is_empty() {
            return Err(JobError::Validation("url required".to_string()));
        }

        let job = self.store.insert(owner, target).await?;
        tracing::info!(job_id = job.id, owner_id = owner, target = %job.target, "Job submitted");
        record_job_submitted();
        self.start(job.clone());
        Ok(job)
    }

    fn start(&self, job: Job) {
        let id = job.id;
        let token = CancellationToken::new();
        {
            let mut active = self.active();
            if active.contains_key(&id) {
                tracing::warn!(job_id = id, "Runner already active; not starting another");
                return;
            }
            active.insert(id, token.clone());
        }

        let runner = JobRunner::new(
            Arc::clone(&self.store),
            Arc::clone(&self.bus),
            Arc::clone(&self.downloader),
            token,
            self.terminate_on_cancel,
        );
        let store = Arc::clone(&self.store);
        let bus = Arc::clone(&self.bus);
        let active = Arc::clone(&self.active);

        tokio::spawn(async move {
            match tokio::spawn(runner.run(job)).await {
                Ok(outcome) => log_outcome(id, &outcome),
                Err(join_err) => {
                    tracing::error!(job_id = id, error = %join_err, "Job runner task failed");
                    record_runner_death(store.as_ref(), &bus, id).await;
                }
            }
            lock_active(&active).remove(&id);
        });
    }

    /// Load a job the requester may act on.
    async fn authorize(&self, id: JobId, requester: &Requester) -> JobResult<Job> {
        let job = self.store.get(id).await?.ok_or(JobError::NotFound(id))?;
        if !job.is_visible_to(requester) {
            tracing::warn!(job_id = id, requester = requester.id, "Forbidden job access");
            return Err(JobError::Forbidden {
                job_id: id,
                requester: requester.id,
            });
        }
        Ok(job)
    }

    pub async fn get(&self, id: JobId, requester: &Requester) -> JobResult<Job> {
        self.authorize(id, requester).await
    }

    /// Admins see every job with its owner's name; others see their own.
    pub async fn list(&self, requester: &Requester) -> JobResult<Vec<Job>> {
        self.store.list(requester.scope()).await
    }

    /// Cancel a running job, or delete a job that is not running.
    ///
    /// A running job is never deleted outright. The status may move under us
    /// (pending -> running, running -> terminal); each move is one step along
    /// a finite graph, so a few re-reads always settle.
    pub async fn cancel(&self, id: JobId, requester: &Requester) -> JobResult<CancelOutcome> {
        let mut job = self.authorize(id, requester).await?;

        for _ in 0..JobStatus::ALL.len() {
            if job.status == JobStatus::Running {
                if self.store.update_state(id, StateUpdate::cancelled()).await? {
                    self.after_cancel(id).await;
                    return Ok(CancelOutcome::Cancelled);
                }
            } else if self.store.delete(id).await? {
                tracing::info!(job_id = id, status = %job.status, "Job deleted");
                if job.status == JobStatus::Pending {
                    // Observers of a job that never ran must still see an end.
                    self.bus.publish(id, ProgressEvent::cancelled(id, 0.0));
                }
                return Ok(CancelOutcome::Deleted);
            }

            match self.store.get(id).await? {
                Some(current) => job = current,
                None => return Ok(CancelOutcome::Deleted),
            }
        }

        Err(JobError::Store(format!("job {id} kept changing state during cancel")))
    }

    async fn after_cancel(&self, id: JobId) {
        let progress = match self.store.get(id).await {
            Ok(Some(job)) => job.progress,
            _ => 0.0,
        };
        tracing::info!(job_id = id, progress, "Job cancelled");
        self.bus.publish(id, ProgressEvent::cancelled(id, progress));

        if self.terminate_on_cancel {
            if let Some(token) = self.active().get(&id) {
                token.cancel();
            }
        }
    }

    /// Live progress for one job.
    ///
    /// Emits a snapshot of the stored state first, then live events. Ends after
    /// the first terminal event; dropping the stream unsubscribes. An unknown
    /// job yields an empty stream.
    pub fn subscribe_progress(&self, id: JobId) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let store = Arc::clone(&self.store);
        // Subscribe before reading the snapshot so nothing falls in between.
        let mut subscription = self.bus.subscribe(id);

        async_stream::stream! {
            let snapshot = match store.get(id).await {
                Ok(Some(job)) => ProgressEvent::snapshot(&job),
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(job_id = id, error = %e, "Failed to load job snapshot");
                    return;
                }
            };
            let mut filter = MonotonicFilter::default();
            filter.admit(&snapshot);
            let done = snapshot.is_terminal();
            yield snapshot;
            if done {
                return;
            }

            loop {
                let event = match subscription.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(job_id = id, skipped, "Progress observer lagged; resending snapshot");
                        match store.get(id).await {
                            Ok(Some(job)) => ProgressEvent::snapshot(&job),
                            _ => break,
                        }
                    }
                    Err(RecvError::Closed) => break,
                };
                if !filter.admit(&event) {
                    continue;
                }
                let done = event.is_terminal();
                yield event;
                if done {
                    break;
                }
            }
        }
    }

    /// Ids of jobs whose runner is currently executing.
    pub fn active_jobs(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.active().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

fn lock_active(active: &ActiveRunners) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
    active.lock().unwrap_or_else(|e| {
        tracing::error!("Mutex poisoned on active runners: {e}");
        e.into_inner()
    })
}

fn log_outcome(id: JobId, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Done => tracing::debug!(job_id = id, "Runner finished: done"),
        RunOutcome::Failed(e) => tracing::debug!(job_id = id, error = %e, "Runner finished: error"),
        RunOutcome::Cancelled => tracing::debug!(job_id = id, "Runner finished: cancelled"),
        RunOutcome::Abandoned => tracing::debug!(job_id = id, "Runner finished: abandoned"),
    }
}

/// A runner died without a terminal write. Record it so the job does not stay
/// `running` forever.
async fn record_runner_death(store: &dyn JobStore, bus: &ProgressBus, id: JobId) {
    match store.update_state(id, StateUpdate::error(RUNNER_PANIC_MESSAGE)).await {
        Ok(true) => {
            let progress = match store.get(id).await {
                Ok(Some(job)) => job.progress,
                _ => 0.0,
            };
            bus.publish(id, ProgressEvent::error(id, progress, RUNNER_PANIC_MESSAGE));
        }
        Ok(false) => {}
        Err(e) => tracing::error!(job_id = id, error = %e, "Failed to record runner failure"),
    }
}

/// Keeps an observer's sequence ordered: once a `running` event is delivered,
/// later `running` events must strictly increase progress.
#[derive(Debug, Default)]
struct MonotonicFilter {
    last_running: Option<f64>,
}

impl MonotonicFilter {
    fn admit(&mut self, event: &ProgressEvent) -> bool {
        if event.status != JobStatus::Running {
            return true;
        }
        match self.last_running {
            Some(last) if event.progress <= last => false,
            _ => {
                self.last_running = Some(event.progress);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::bus::CHANNEL_CAPACITY;
    use futures_util::StreamExt;
    use mediaferry_core::MemoryJobStore;
    use std::time::Duration;

    fn coordinator(store: Arc<MemoryJobStore>, downloader: DownloaderSpec) -> JobCoordinator {
        JobCoordinator::new(
            store,
            ProgressBus::new(),
            CoordinatorOptions {
                downloader,
                terminate_on_cancel: false,
            },
        )
    }

    fn sh(body: &str) -> DownloaderSpec {
        DownloaderSpec::new("sh", std::env::temp_dir()).with_leading_args(["-c", body, "downloader"])
    }

    async fn wait_for_status(store: &MemoryJobStore, id: JobId, status: JobStatus) -> Job {
        for _ in 0..300 {
            if let Some(job) = store.get(id).await.unwrap() {
                if job.status == status {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached {status}");
    }

    async fn collect(stream: impl Stream<Item = ProgressEvent>) -> Vec<ProgressEvent> {
        tokio::time::timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
            .await
            .expect("stream should terminate")
    }

    #[test]
    fn test_monotonic_filter() {
        let mut filter = MonotonicFilter::default();
        assert!(filter.admit(&ProgressEvent::running(1, 0.0)));
        assert!(filter.admit(&ProgressEvent::running(1, 30.0)));
        assert!(!filter.admit(&ProgressEvent::running(1, 30.0)));
        assert!(!filter.admit(&ProgressEvent::running(1, 10.0)));
        assert!(filter.admit(&ProgressEvent::done(1)));
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_target() {
        let store = Arc::new(MemoryJobStore::new());
        let coordinator = coordinator(store.clone(), sh("exit 0"));
        for target in ["", "   "] {
            let err = coordinator.submit(1, target).await.unwrap_err();
            assert!(matches!(err, JobError::Validation(_)));
        }
        assert!(store.list(mediaferry_core::OwnerScope::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_returns_pending_and_runs_to_done() {
        let store = Arc::new(MemoryJobStore::new());
        let coordinator = coordinator(store.clone(), sh("echo 50%; exit 0"));

        let job = coordinator.submit(1, " https://example.com/v ").await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.target, "https://example.com/v");

        let done = wait_for_status(&store, job.id, JobStatus::Done).await;
        assert_eq!(done.progress, 100.0);
    }

    #[tokio::test]
    async fn test_start_failure_is_observable() {
        let store = Arc::new(MemoryJobStore::new());
        let coordinator = coordinator(
            store.clone(),
            DownloaderSpec::new("/nonexistent/mediaferry-downloader", "/tmp"),
        );
        let job = coordinator.submit(1, "t").await.unwrap();
        let failed = wait_for_status(&store, job.id, JobStatus::Error).await;
        assert!(failed.error.unwrap().contains("failed to start"));

        let listed = coordinator.list(&Requester::user(1)).await.unwrap();
        assert_eq!(listed[0].status, JobStatus::Error);
    }

    #[tokio::test]
    async fn test_cancel_not_found_and_forbidden() {
        let store = Arc::new(MemoryJobStore::new());
        let coordinator = coordinator(store.clone(), sh("exit 0"));

        let err = coordinator.cancel(404, &Requester::user(1)).await.unwrap_err();
        assert!(matches!(err, JobError::NotFound(404)));

        let job = store.insert(1, "t").await.unwrap();
        store.update_state(job.id, StateUpdate::running(0.0)).await.unwrap();
        store.update_state(job.id, StateUpdate::progress(42.0)).await.unwrap();

        let err = coordinator.cancel(job.id, &Requester::user(2)).await.unwrap_err();
        assert!(matches!(err, JobError::Forbidden { .. }));
        let unchanged = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, JobStatus::Running);
        assert_eq!(unchanged.progress, 42.0);
    }

    #[tokio::test]
    async fn test_admin_may_cancel_any_job() {
        let store = Arc::new(MemoryJobStore::new());
        let coordinator = coordinator(store.clone(), sh("exit 0"));
        let job = store.insert(1, "t").await.unwrap();
        store.update_state(job.id, StateUpdate::running(0.0)).await.unwrap();

        let outcome = coordinator.cancel(job.id, &Requester::admin(99)).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);
        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_terminal_or_pending_deletes() {
        let store = Arc::new(MemoryJobStore::new());
        let coordinator = coordinator(store.clone(), sh("exit 0"));

        let pending = store.insert(1, "p").await.unwrap();
        assert_eq!(
            coordinator.cancel(pending.id, &Requester::user(1)).await.unwrap(),
            CancelOutcome::Deleted
        );
        assert!(store.get(pending.id).await.unwrap().is_none());

        let finished = store.insert(1, "f").await.unwrap();
        store.update_state(finished.id, StateUpdate::running(0.0)).await.unwrap();
        store.update_state(finished.id, StateUpdate::done()).await.unwrap();
        assert_eq!(
            coordinator.cancel(finished.id, &Requester::user(1)).await.unwrap(),
            CancelOutcome::Deleted
        );
        assert!(store.get(finished.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_race_keeps_cancelled_state() {
        let store = Arc::new(MemoryJobStore::new());
        let coordinator = coordinator(store.clone(), sh("echo 42%; sleep 0.5; exit 1"));

        let job = coordinator.submit(1, "t").await.unwrap();
        for _ in 0..300 {
            let current = store.get(job.id).await.unwrap().unwrap();
            if current.progress >= 42.0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            coordinator.cancel(job.id, &Requester::user(1)).await.unwrap(),
            CancelOutcome::Cancelled
        );

        for _ in 0..300 {
            if coordinator.active_jobs().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(coordinator.active_jobs().is_empty());
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert_eq!(stored.error, None);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_done_snapshot_then_end() {
        let store = Arc::new(MemoryJobStore::new());
        let coordinator = coordinator(store.clone(), sh("exit 0"));
        let job = store.insert(1, "t").await.unwrap();
        store.update_state(job.id, StateUpdate::running(0.0)).await.unwrap();
        store.update_state(job.id, StateUpdate::done()).await.unwrap();

        let events = collect(coordinator.subscribe_progress(job.id)).await;
        assert_eq!(events, vec![ProgressEvent::done(job.id)]);
        assert_eq!(coordinator.bus().tracked_jobs(), 0);
    }

    #[tokio::test]
    async fn test_unknown_job_stream_is_empty() {
        let store = Arc::new(MemoryJobStore::new());
        let coordinator = coordinator(store, sh("exit 0"));
        let events = collect(coordinator.subscribe_progress(77)).await;
        assert!(events.is_empty());
        assert_eq!(coordinator.bus().tracked_jobs(), 0);
    }

    #[tokio::test]
    async fn test_two_observers_see_same_sequence() {
        let store = Arc::new(MemoryJobStore::new());
        let coordinator = coordinator(
            store.clone(),
            sh("sleep 0.2; echo 10%; echo 35%; echo 72%; exit 0"),
        );
        let job = coordinator.submit(1, "t").await.unwrap();

        let a = tokio::spawn(collect(coordinator.subscribe_progress(job.id)));
        let b = tokio::spawn(collect(coordinator.subscribe_progress(job.id)));
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        let progress = |events: &[ProgressEvent]| -> Vec<f64> {
            events
                .iter()
                .filter(|e| e.status != JobStatus::Pending && !(e.status == JobStatus::Running && e.progress == 0.0))
                .map(|e| e.progress)
                .collect()
        };
        assert_eq!(progress(&a), vec![10.0, 35.0, 72.0, 100.0]);
        assert_eq!(progress(&a), progress(&b));
        assert_eq!(a.last().unwrap().status, JobStatus::Done);
        assert_eq!(b.last().unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_lagged_stream_resends_snapshot_and_stays_monotonic() {
        let store = Arc::new(MemoryJobStore::new());
        let coordinator = coordinator(store.clone(), sh("exit 0"));
        let job = store.insert(1, "t").await.unwrap();
        store.update_state(job.id, StateUpdate::running(0.0)).await.unwrap();
        store.update_state(job.id, StateUpdate::progress(50.0)).await.unwrap();

        let mut stream = Box::pin(coordinator.subscribe_progress(job.id));
        let first = stream.next().await.unwrap();
        assert_eq!((first.status, first.progress), (JobStatus::Running, 50.0));

        // Overflow the unread stream with stale values, then move the store on.
        let bus = coordinator.bus();
        for i in 0..(CHANNEL_CAPACITY + 10) {
            bus.publish(job.id, ProgressEvent::running(job.id, i as f64));
        }
        store.update_state(job.id, StateUpdate::progress(80.0)).await.unwrap();

        let resent = stream.next().await.unwrap();
        assert_eq!((resent.status, resent.progress), (JobStatus::Running, 80.0));

        bus.publish(job.id, ProgressEvent::running(job.id, 90.0));
        store.update_state(job.id, StateUpdate::done()).await.unwrap();
        bus.publish(job.id, ProgressEvent::done(job.id));

        let rest = collect(stream).await;
        let progress: Vec<f64> = rest.iter().map(|e| e.progress).collect();
        assert_eq!(progress, vec![90.0, 100.0]);
        assert_eq!(rest.last().unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_stream_ends_when_pending_job_is_deleted() {
        let store = Arc::new(MemoryJobStore::new());
        let coordinator = coordinator(store.clone(), sh("exit 0"));
        let job = store.insert(1, "t").await.unwrap();

        let stream = coordinator.subscribe_progress(job.id);
        let collector = tokio::spawn(collect(stream));
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.cancel(job.id, &Requester::user(1)).await.unwrap();

        let events = collector.await.unwrap();
        assert_eq!(events.first().unwrap().status, JobStatus::Pending);
        assert_eq!(events.last().unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_list_scoping() {
        let store = Arc::new(MemoryJobStore::new());
        store.add_owner(1, "alice", "");
        store.add_owner(2, "bob", "");
        let coordinator = coordinator(store.clone(), sh("exit 0"));
        store.insert(1, "a").await.unwrap();
        store.insert(2, "b").await.unwrap();

        let own = coordinator.list(&Requester::user(1)).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].owner_id, 1);

        let all = coordinator.list(&Requester::admin(1)).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|j| j.owner_name.is_some()));
    }
}
