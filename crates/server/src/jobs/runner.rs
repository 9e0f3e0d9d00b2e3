// crates/server/src/jobs/runner.rs
//! Executes one download job: spawns the downloader, streams its stdout into
//! progress updates, and reconciles the final state on exit.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use mediaferry_core::{
    DownloaderSpec, Job, JobError, JobId, JobResult, JobStatus, JobStore, ProgressEvent,
    ProgressTracker, StateUpdate,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;

use super::bus::ProgressBus;
use crate::metrics::{record_job_finished, record_job_started};

/// Attempts for a state write the job's lifecycle depends on.
const STATE_WRITE_ATTEMPTS: u32 = 4;
const STATE_WRITE_BACKOFF: Duration = Duration::from_millis(50);

/// Longest stdout record parsed for progress. Longer records are skipped.
const MAX_OUTPUT_RECORD: usize = 8 * 1024;

/// How a runner resolved.
#[derive(Debug)]
pub enum RunOutcome {
    Done,
    Failed(JobError),
    /// The job was marked cancelled while the process was alive.
    Cancelled,
    /// The job left `pending` (cancelled or deleted) before the process started.
    Abandoned,
}

impl RunOutcome {
    pub fn status(&self) -> Option<JobStatus> {
        match self {
            RunOutcome::Done => Some(JobStatus::Done),
            RunOutcome::Failed(_) => Some(JobStatus::Error),
            RunOutcome::Cancelled => Some(JobStatus::Cancelled),
            RunOutcome::Abandoned => None,
        }
    }
}

/// Single-use executor bound to one job.
///
/// It is the only writer of the job's progress and terminal state. Every write
/// is a guarded transition; once the store refuses one, the job is no longer
/// `running` and the runner stops writing and publishing for good.
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    bus: Arc<ProgressBus>,
    downloader: Arc<DownloaderSpec>,
    cancel: CancellationToken,
    terminate_on_cancel: bool,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        bus: Arc<ProgressBus>,
        downloader: Arc<DownloaderSpec>,
        cancel: CancellationToken,
        terminate_on_cancel: bool,
    ) -> Self {
        Self {
            store,
            bus,
            downloader,
            cancel,
            terminate_on_cancel,
        }
    }

    pub async fn run(self, job: Job) -> RunOutcome {
        let id = job.id;
        let started = Instant::now();

        match self.write_state(id, StateUpdate::running(0.0)).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(job_id = id, "Job left pending before start; not spawning");
                return RunOutcome::Abandoned;
            }
            Err(e) => return self.abort_pending(id, e).await,
        }
        record_job_started();
        self.publish(ProgressEvent::running(id, 0.0));

        let outcome = self.execute(&job).await;
        record_job_finished(outcome.status(), started.elapsed());
        outcome
    }

    async fn execute(&self, job: &Job) -> RunOutcome {
        let id = job.id;
        let folder = match self.store.owner_folder(job.owner_id).await {
            Ok(folder) => folder,
            Err(e) => {
                tracing::warn!(job_id = id, error = %e, "Owner folder lookup failed; using downloads root");
                None
            }
        };
        let output_dir = self.downloader.output_dir(folder.as_deref());
        let args = self.downloader.args(&output_dir, &job.target);

        tracing::info!(
            job_id = id,
            owner_id = job.owner_id,
            program = %self.downloader.program,
            output_dir = %output_dir.display(),
            "Starting download"
        );

        let mut child = match Command::new(&self.downloader.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let err = JobError::ProcessStart(format!(
                    "failed to start {}: {e}",
                    self.downloader.program
                ));
                return self.fail(id, 0.0, err).await;
            }
        };

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(id, stderr));
        }

        let mut tracker = ProgressTracker::new();
        let mut watch_cancel = self.terminate_on_cancel;
        if let Some(stdout) = child.stdout.take() {
            watch_cancel = self.follow_stdout(id, stdout, &mut tracker, watch_cancel).await;
            if !watch_cancel && self.terminate_on_cancel && self.cancel.is_cancelled() {
                terminate(&mut child, id);
            }
        }

        let status = self.wait(&mut child, id, watch_cancel).await;
        self.reconcile(id, status, tracker.current()).await
    }

    /// Reads stdout until EOF, or until cancellation when forced termination
    /// is enabled. Returns whether the caller should keep watching for cancel.
    ///
    /// Records end at `\r` or `\n`, so carriage-return progress bars are seen
    /// as they are drawn.
    async fn follow_stdout(
        &self,
        id: JobId,
        stdout: impl AsyncRead + Unpin,
        tracker: &mut ProgressTracker,
        watch_cancel: bool,
    ) -> bool {
        let codec = AnyDelimiterCodec::new_with_max_length(b"\r\n".to_vec(), Vec::new(), MAX_OUTPUT_RECORD);
        let mut records = FramedRead::new(stdout, codec);
        let mut live = true;
        let mut skipped = false;

        loop {
            let next = tokio::select! {
                next = records.next() => next,
                _ = self.cancel.cancelled(), if watch_cancel => return false,
            };
            let record = match next {
                Some(Ok(record)) => {
                    skipped = false;
                    record
                }
                Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                    tracing::debug!(job_id = id, limit = MAX_OUTPUT_RECORD, "Skipping overlong downloader output");
                    skipped = true;
                    continue;
                }
                Some(Err(e)) => {
                    tracing::warn!(job_id = id, error = %e, "Failed reading downloader output");
                    return watch_cancel;
                }
                // FramedRead yields a single `None` after a decode error, then resumes.
                None if skipped => {
                    skipped = false;
                    continue;
                }
                None => return watch_cancel,
            };
            if !live {
                continue;
            }
            let Some(progress) = tracker.observe(&String::from_utf8_lossy(&record)) else {
                continue;
            };
            match self.store.update_state(id, StateUpdate::progress(progress)).await {
                Ok(true) => {
                    self.publish(ProgressEvent::running(id, progress));
                }
                Ok(false) => {
                    tracing::debug!(job_id = id, "Job no longer running; ignoring further output");
                    live = false;
                }
                Err(e) => {
                    tracing::warn!(job_id = id, error = %e, "Failed to store progress");
                }
            }
        }
    }

    async fn wait(&self, child: &mut Child, id: JobId, mut watch_cancel: bool) -> std::io::Result<ExitStatus> {
        loop {
            tokio::select! {
                status = child.wait() => return status,
                _ = self.cancel.cancelled(), if watch_cancel => {}
            }
            watch_cancel = false;
            terminate(child, id);
        }
    }

    /// Map the exit status onto exactly one terminal transition.
    async fn reconcile(&self, id: JobId, status: std::io::Result<ExitStatus>, progress: f64) -> RunOutcome {
        match status {
            Ok(status) if status.success() => {
                match self.write_state(id, StateUpdate::done()).await {
                    Ok(true) => {
                        tracing::info!(job_id = id, "Download complete");
                        self.publish(ProgressEvent::done(id));
                        RunOutcome::Done
                    }
                    Ok(false) => self.resolve_left_running(id).await,
                    Err(e) => {
                        tracing::error!(job_id = id, error = %e, "Failed to store completion; recording failure");
                        self.fail(id, progress, e).await
                    }
                }
            }
            Ok(status) => {
                self.fail(id, progress, JobError::ProcessExit { code: status.code() })
                    .await
            }
            Err(e) => {
                tracing::warn!(job_id = id, error = %e, "Failed to wait for downloader");
                self.fail(id, progress, JobError::ProcessExit { code: None }).await
            }
        }
    }

    async fn fail(&self, id: JobId, progress: f64, err: JobError) -> RunOutcome {
        let message = err.to_string();
        match self.write_state(id, StateUpdate::error(&message)).await {
            Ok(true) => {
                tracing::warn!(
                    job_id = id,
                    kind = ?err.failure_kind(),
                    error = %message,
                    "Download failed"
                );
                self.publish(ProgressEvent::error(id, progress, message));
                RunOutcome::Failed(err)
            }
            Ok(false) => self.resolve_left_running(id).await,
            Err(e) => {
                // The row stays `running` until startup recovery; observers still get an end.
                tracing::error!(job_id = id, error = %e, "Failed to store job failure");
                self.publish(ProgressEvent::error(id, progress, message));
                RunOutcome::Failed(err)
            }
        }
    }

    /// The job could not be marked running. Drop the pending row so it does not
    /// linger, and end any open progress streams.
    async fn abort_pending(&self, id: JobId, err: JobError) -> RunOutcome {
        tracing::error!(job_id = id, error = %err, "Failed to mark job running; dropping it");
        if let Err(e) = self.store.delete(id).await {
            tracing::error!(job_id = id, error = %e, "Failed to remove unstarted job");
        }
        self.publish(ProgressEvent::error(id, 0.0, err.to_string()));
        RunOutcome::Failed(err)
    }

    /// `update_state` with bounded exponential backoff on store errors. A
    /// refused transition is an answer, not an error, and is returned at once.
    async fn write_state(&self, id: JobId, update: StateUpdate) -> JobResult<bool> {
        let mut delay = STATE_WRITE_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.store.update_state(id, update.clone()).await {
                Err(e) if attempt < STATE_WRITE_ATTEMPTS => {
                    tracing::warn!(job_id = id, attempt, status = %update.status, error = %e, "State write failed; retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// The store refused a terminal write: someone else moved the job out of
    /// `running`. The only such writer is the cancel path.
    async fn resolve_left_running(&self, id: JobId) -> RunOutcome {
        match self.store.get(id).await {
            Ok(Some(job)) if job.status == JobStatus::Cancelled => {
                tracing::info!(job_id = id, "Downloader exited after cancellation");
                RunOutcome::Cancelled
            }
            Ok(Some(job)) => {
                tracing::warn!(job_id = id, status = %job.status, "Job left running unexpectedly");
                RunOutcome::Abandoned
            }
            Ok(None) => RunOutcome::Cancelled,
            Err(e) => {
                tracing::error!(job_id = id, error = %e, "Failed to re-read job after exit");
                RunOutcome::Failed(e)
            }
        }
    }

    fn publish(&self, event: ProgressEvent) {
        let id = event.id;
        let reached = self.bus.publish(id, event);
        tracing::trace!(job_id = id, observers = reached, "Published progress");
    }
}

fn terminate(child: &mut Child, id: JobId) {
    tracing::info!(job_id = id, "Terminating cancelled downloader");
    if let Err(e) = child.start_kill() {
        tracing::warn!(job_id = id, error = %e, "Failed to signal downloader");
    }
}

async fn log_stderr(id: JobId, stderr: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => {
                tracing::debug!(target: "mediaferry::downloader", job_id = id, "{}", line.trim());
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(job_id = id, error = %e, "Stopped reading downloader stderr");
                break;
            }
        }
    }
}
