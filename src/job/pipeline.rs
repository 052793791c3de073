//! # Print Pipeline
//!
//! Accepts payloads, queues them, and streams them to the connected device
//! one job at a time from a single worker task.
//!
//! ## Per-Job Sequence
//!
//! 1. Optional status preflight (blocking device error or no paper fails the job)
//! 2. `Printing` + [`Event::PrintStarted`]
//! 3. For each chunk: write with a per-write timeout, update progress,
//!    wait the inter-chunk delay (skipped after the last chunk)
//! 4. One commit write
//! 5. `Completed` + [`Event::PrintCompleted`]
//!
//! Any failure ends the job in `Error` with [`Event::PrintError`]. Failed
//! writes are not retried.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::{JobFailure, JobId, JobStatus, Payload, PrintJob};
use crate::braille::{self, DotCell};
use crate::config::{JobConfig, LinkConfig};
use crate::device::{Connection, ConnectionManager};
use crate::error::{BraillinkError, Result};
use crate::events::{Event, EventBus};
use crate::lock;
use crate::status::StatusPoller;
use crate::transfer::{self, wire};

/// Caller's view of a submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    status: watch::Receiver<JobStatus>,
    inner: Arc<Inner>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Stop the job. A queued job ends immediately; a printing job stops
    /// before its next write. No-op once the job has finished.
    pub fn cancel(&self) -> bool {
        self.inner.cancel(self.id)
    }

    /// Wait for the terminal status.
    pub async fn wait(&mut self) -> JobStatus {
        loop {
            let status = self.status.borrow_and_update().clone();
            if status.is_terminal() {
                return status;
            }
            if self.status.changed().await.is_err() {
                return self.status.borrow().clone();
            }
        }
    }
}

struct Entry {
    job: PrintJob,
    cancel: CancellationToken,
    status_tx: watch::Sender<JobStatus>,
}

#[derive(Default)]
struct JobTable {
    live: HashMap<JobId, Entry>,
    queue: VecDeque<JobId>,
    active: Option<JobId>,
    history: VecDeque<PrintJob>,
}

struct Inner {
    manager: Arc<ConnectionManager>,
    poller: Option<Arc<StatusPoller>>,
    events: EventBus,
    link: LinkConfig,
    jobs: JobConfig,
    table: Mutex<JobTable>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintPipeline").finish_non_exhaustive()
    }
}

/// Single-worker job queue bound to a connection manager.
pub struct PrintPipeline {
    inner: Arc<Inner>,
    queue: mpsc::UnboundedSender<JobId>,
}

impl PrintPipeline {
    /// Create the pipeline and spawn its worker on the current runtime.
    ///
    /// With a poller, each job checks device status before its first write
    /// (when `jobs.check_status_before_print` is set).
    pub fn new(
        manager: Arc<ConnectionManager>,
        poller: Option<Arc<StatusPoller>>,
        events: EventBus,
        link: LinkConfig,
        jobs: JobConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            manager,
            poller,
            events,
            link,
            jobs,
            table: Mutex::new(JobTable::default()),
        });
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(Arc::clone(&inner), rx));
        Self { inner, queue }
    }

    /// Queue a payload for the connected device.
    ///
    /// ## Errors
    ///
    /// - `NotConnected`: no device connected
    /// - `UnmappedCharacters`: text with untranslatable characters while
    ///   `jobs.reject_unmapped` is set
    /// - `InvalidInput`: nothing to print
    pub fn submit(&self, payload: impl Into<Payload>) -> Result<JobHandle> {
        let conn = self
            .inner
            .manager
            .connection()
            .filter(|c| c.is_open())
            .ok_or(BraillinkError::NotConnected)?;

        let cells = match payload.into() {
            Payload::Text(text) => {
                let translation = braille::encode(&text);
                if !translation.skipped.is_empty() {
                    if self.inner.jobs.reject_unmapped {
                        return Err(BraillinkError::UnmappedCharacters(translation.skipped));
                    }
                    warn!("Dropping untranslatable characters: {:?}", translation.skipped);
                }
                translation.cells
            }
            Payload::Cells(cells) => cells,
        };
        if cells.is_empty() {
            return Err(BraillinkError::InvalidInput("print payload is empty".to_string()));
        }

        let job = PrintJob::new(conn.device_id(), cells);
        let id = job.id;
        let (status_tx, status) = watch::channel(JobStatus::Queued);
        {
            let mut table = lock(&self.inner.table);
            table.live.insert(
                id,
                Entry {
                    job,
                    cancel: CancellationToken::new(),
                    status_tx,
                },
            );
            table.queue.push_back(id);
        }
        self.inner.events.publish(Event::PrintQueued { job_id: id });
        info!("Queued job {} for {}", id, conn.device_id());

        if self.queue.send(id).is_err() {
            self.inner.finish(id, JobStatus::Error(JobFailure::Transfer(
                "print worker stopped".to_string(),
            )));
        }

        Ok(JobHandle {
            id,
            status,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Translate and queue text.
    pub fn submit_text(&self, text: &str) -> Result<JobHandle> {
        self.submit(Payload::Text(text.to_string()))
    }

    /// Queue pre-translated cells.
    pub fn submit_cells(&self, cells: Vec<DotCell>) -> Result<JobHandle> {
        self.submit(Payload::Cells(cells))
    }

    pub fn cancel(&self, id: JobId) -> bool {
        self.inner.cancel(id)
    }

    /// Live or finished job by id.
    pub fn job(&self, id: JobId) -> Option<PrintJob> {
        let table = lock(&self.inner.table);
        table
            .live
            .get(&id)
            .map(|e| e.job.clone())
            .or_else(|| table.history.iter().find(|j| j.id == id).cloned())
    }

    pub fn active_job(&self) -> Option<PrintJob> {
        let table = lock(&self.inner.table);
        table
            .active
            .and_then(|id| table.live.get(&id))
            .map(|e| e.job.clone())
    }

    /// Jobs waiting to run, in run order.
    pub fn queued_jobs(&self) -> Vec<PrintJob> {
        let table = lock(&self.inner.table);
        table
            .queue
            .iter()
            .filter_map(|id| table.live.get(id))
            .map(|e| e.job.clone())
            .collect()
    }

    /// Finished jobs, oldest first.
    pub fn history(&self) -> Vec<PrintJob> {
        lock(&self.inner.table).history.iter().cloned().collect()
    }
}

async fn worker(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<JobId>) {
    while let Some(id) = rx.recv().await {
        let Some((job, cancel)) = inner.start(id) else {
            continue;
        };
        let status = match inner.run(&job, &cancel).await {
            Ok(()) => JobStatus::Completed,
            Err(failure) => JobStatus::Error(failure),
        };
        inner.finish(id, status);
    }
    debug!("Print worker stopped");
}

impl Inner {
    /// Take a queued job off the queue. None if it was cancelled meanwhile.
    fn start(&self, id: JobId) -> Option<(PrintJob, CancellationToken)> {
        let mut table = lock(&self.table);
        table.queue.retain(|queued| *queued != id);
        let entry = table.live.get(&id)?;
        let started = (entry.job.clone(), entry.cancel.clone());
        table.active = Some(id);
        Some(started)
    }

    async fn run(&self, job: &PrintJob, cancel: &CancellationToken) -> Result<(), JobFailure> {
        let conn = self
            .manager
            .connection()
            .filter(|c| c.is_open() && c.device_id() == job.device_id)
            .ok_or(JobFailure::Disconnected)?;

        if self.jobs.check_status_before_print {
            if let Some(poller) = &self.poller {
                let status = poller.read_status().await;
                if status.connected && !status.stale {
                    if let Some(code) = status.blocking_error() {
                        warn!("Job {} refused: {}", job.id, code);
                        return Err(JobFailure::DeviceReported(code));
                    }
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(JobFailure::Cancelled);
        }

        self.update(job.id, |job| {
            job.status = JobStatus::Printing;
            job.started_at = Some(Utc::now());
        });
        self.events.publish(Event::PrintStarted { job_id: job.id });
        info!("Printing job {} ({} cells)", job.id, job.cell_count());

        let chunks = transfer::chunk(&job.payload, self.link.max_chunk_size)
            .map_err(|e| JobFailure::Transfer(e.to_string()))?;
        let total = job.cell_count();
        let mut written = 0usize;
        let mut reported = 0u8;

        for (i, chunk) in chunks.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(JobFailure::Cancelled);
            }
            self.write(&conn, chunk).await?;

            written += chunk.len();
            let last = i + 1 == chunks.len();
            let progress = progress_percent(written, total, last);
            self.update(job.id, |job| {
                job.dots_completed = written;
                job.progress = job.progress.max(progress);
            });
            if progress > reported {
                reported = progress;
                self.events.publish(Event::PrintProgress {
                    job_id: job.id,
                    percent: progress,
                });
            }
            debug!("Job {}: chunk {}/{} ({}%)", job.id, i + 1, chunks.len(), progress);

            if !last && !self.link.chunk_delay().is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(JobFailure::Cancelled),
                    _ = tokio::time::sleep(self.link.chunk_delay()) => {}
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(JobFailure::Cancelled);
        }
        self.write(&conn, &wire::commit()).await
    }

    async fn write(&self, conn: &Connection, data: &[u8]) -> Result<(), JobFailure> {
        let Err(e) = conn.write(data, self.link.write_timeout()).await else {
            return Ok(());
        };
        warn!("Write to {} failed: {}", conn.device_id(), e);
        let failure = JobFailure::from(&e);
        if matches!(failure, JobFailure::Transfer(_)) && !self.manager.check_link().await {
            return Err(JobFailure::Disconnected);
        }
        Err(failure)
    }

    fn update(&self, id: JobId, change: impl FnOnce(&mut PrintJob)) {
        let mut table = lock(&self.table);
        if let Some(entry) = table.live.get_mut(&id) {
            change(&mut entry.job);
            entry.status_tx.send_replace(entry.job.status.clone());
        }
    }

    fn finish(&self, id: JobId, status: JobStatus) {
        let mut table = lock(&self.table);
        self.finish_locked(&mut table, id, status);
    }

    /// Move a job to history with its terminal status and notify.
    fn finish_locked(&self, table: &mut JobTable, id: JobId, status: JobStatus) {
        let Some(entry) = table.live.remove(&id) else {
            return;
        };
        table.queue.retain(|queued| *queued != id);
        if table.active == Some(id) {
            table.active = None;
        }

        let mut job = entry.job;
        job.status = status.clone();
        job.finished_at = Some(Utc::now());

        match &status {
            JobStatus::Completed => {
                info!("Job {} completed", id);
                self.events.publish(Event::PrintCompleted { job_id: id });
            }
            JobStatus::Error(reason) => {
                warn!("Job {} failed: {}", id, reason);
                self.events.publish(Event::PrintError {
                    job_id: id,
                    reason: reason.clone(),
                });
            }
            _ => {}
        }

        table.history.push_back(job);
        while table.history.len() > self.jobs.history_capacity {
            table.history.pop_front();
        }
        entry.status_tx.send_replace(status);
    }

    fn cancel(&self, id: JobId) -> bool {
        let mut table = lock(&self.table);
        let Some(entry) = table.live.get(&id) else {
            return false;
        };
        entry.cancel.cancel();
        if table.active != Some(id) {
            self.finish_locked(&mut table, id, JobStatus::Error(JobFailure::Cancelled));
        }
        true
    }
}

/// `round(written / total * 100)`, held at 99 until the last chunk.
fn progress_percent(written: usize, total: usize, last: bool) -> u8 {
    if last {
        return 100;
    }
    let percent = (written as f64 / total.max(1) as f64 * 100.0).round() as u8;
    percent.min(99)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_caps_before_last_chunk() {
        assert_eq!(progress_percent(20, 40, false), 50);
        assert_eq!(progress_percent(199, 200, false), 99);
        assert_eq!(progress_percent(200, 200, true), 100);
        assert_eq!(progress_percent(1, 3, false), 33);
        assert_eq!(progress_percent(2, 3, false), 67);
    }
}
