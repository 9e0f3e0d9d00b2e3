// crates/server/src/scheduler.rs
//! Periodic submission of a fixed target list.

use std::sync::Arc;
use std::time::Duration;

use mediaferry_core::OwnerId;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::jobs::JobCoordinator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub interval: Duration,
    pub owner: OwnerId,
    pub targets: Vec<String>,
}

/// Submit every configured target once per interval until `shutdown` fires.
///
/// The first round runs one interval after start. A failed submission is
/// logged and the remaining targets still go out.
pub fn spawn_periodic_submissions(
    coordinator: Arc<JobCoordinator>,
    schedule: ScheduleConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            interval_secs = schedule.interval.as_secs(),
            targets = schedule.targets.len(),
            owner_id = schedule.owner,
            "Scheduled submissions enabled"
        );
        let mut ticker = interval_at(Instant::now() + schedule.interval, schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            for target in &schedule.targets {
                match coordinator.submit(schedule.owner, target).await {
                    Ok(job) => tracing::info!(job_id = job.id, target = %target, "Scheduled job submitted"),
                    Err(e) => tracing::warn!(target = %target, error = %e, "Scheduled submission failed"),
                }
            }
        }
        tracing::debug!("Scheduled submissions stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{CoordinatorOptions, ProgressBus};
    use mediaferry_core::{DownloaderSpec, JobStore, MemoryJobStore, OwnerScope};

    async fn job_count(store: &MemoryJobStore) -> usize {
        store.list(OwnerScope::All).await.unwrap().len()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_round_waits_one_interval() {
        let store = Arc::new(MemoryJobStore::new());
        let coordinator = Arc::new(JobCoordinator::new(
            store.clone(),
            ProgressBus::new(),
            CoordinatorOptions {
                downloader: DownloaderSpec::new("/nonexistent/mediaferry-downloader", "/tmp"),
                terminate_on_cancel: false,
            },
        ));
        let shutdown = CancellationToken::new();
        let handle = spawn_periodic_submissions(
            coordinator,
            ScheduleConfig {
                interval: Duration::from_secs(3600),
                owner: 7,
                targets: vec!["https://a".into(), "https://b".into()],
            },
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(job_count(&store).await, 0);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        for _ in 0..100 {
            if job_count(&store).await == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let jobs = store.list(OwnerScope::All).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.owner_id == 7));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
