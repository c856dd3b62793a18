//! The translation queue: one external process at a time, strict FIFO.
//!
//! `enqueue` appends a job and kicks the dispatcher. The dispatcher runs on
//! the Tokio runtime the queue was built in and drains queued jobs one
//! after another; a single `processing` flag guarantees no two runs
//! overlap. While draining, the dispatcher holds the [`RuntimeLease`] on the
//! runtime directory, so queues in other processes wait their turn. Every
//! mutation of a running job is mirrored into the [`HistoryStore`] and
//! reported to the [`EventSink`].

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::broadcast::{EventSink, JobOutcome, NoopEvents};
use crate::config::{Config, TranslationOptions};
use crate::environment::{EnvironmentProvisioner, PathProvisioner};
use crate::error::{QueueError, RunError};
use crate::history::{HistoryEntry, HistoryPatch, HistoryStore, MemoryHistoryStore};
use crate::metadata::{FilenameMetadata, MetadataExtractor};
use crate::progress::{interpret_line, ProgressSource};
use crate::worker::job::{JobInput, JobRecord, JobStatus};
use crate::worker::lease::RuntimeLease;
use crate::worker::process::{kill_process_tree, pump_lines, Invocation};

/// Error text for jobs a previous process left unfinished.
pub const INTERRUPTED_ERROR: &str = "Interrupted: the application exited while the job was active";

/// How often a dispatcher retries a lease held by another queue.
const LEASE_RETRY: Duration = Duration::from_millis(250);

/// How long to keep reading output after killing a timed-out run.
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Default)]
struct QueueState {
    /// Every job enqueued this session, in insertion order.
    jobs: Vec<JobRecord>,
    /// Enqueued jobs whose `queued` event has not been sent yet. Dispatch
    /// stops in front of them.
    unannounced: HashSet<String>,
    processing: bool,
}

impl QueueState {
    fn next_queued(&self) -> Option<String> {
        self.jobs
            .iter()
            .find(|j| j.status == JobStatus::Queued)
            .filter(|j| !self.unannounced.contains(&j.id))
            .map(|j| j.id.clone())
    }

    fn has_queued(&self) -> bool {
        self.jobs.iter().any(|j| j.status == JobStatus::Queued)
    }

    fn find(&self, id: &str) -> Option<&JobRecord> {
        self.jobs.iter().find(|j| j.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut JobRecord> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    history: Arc<dyn HistoryStore>,
    events: Arc<dyn EventSink>,
    provisioner: Arc<dyn EnvironmentProvisioner>,
    metadata: Arc<dyn MetadataExtractor>,
    runtime_dir: PathBuf,
    options: TranslationOptions,
    job_timeout: Option<Duration>,
    /// `true` while nothing is queued or running.
    idle: watch::Sender<bool>,
    runtime: Handle,
}

/// Handle to the queue. Cloning is cheap and every clone drives the same
/// queue.
#[derive(Clone)]
pub struct TranslationQueue {
    inner: Arc<QueueInner>,
}

/// Builder for [`TranslationQueue`]. Collaborators that are not supplied
/// fall back to in-memory history, no events, `PATH` lookup with default
/// tool names, and file-name metadata.
pub struct TranslationQueueBuilder {
    runtime_dir: PathBuf,
    history: Option<Arc<dyn HistoryStore>>,
    events: Option<Arc<dyn EventSink>>,
    provisioner: Option<Arc<dyn EnvironmentProvisioner>>,
    metadata: Option<Arc<dyn MetadataExtractor>>,
    options: TranslationOptions,
    job_timeout: Option<Duration>,
}

impl TranslationQueueBuilder {
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
            history: None,
            events: None,
            provisioner: None,
            metadata: None,
            options: TranslationOptions::default(),
            job_timeout: None,
        }
    }

    /// Runtime directory, translation options, timeout and tool lookup from
    /// `config`. History and events still have to be supplied.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.runtime_dir())
            .options(config.translation.clone())
            .job_timeout(config.queue.job_timeout_secs.map(Duration::from_secs))
            .provisioner(Arc::new(PathProvisioner::new(config.environment.clone())))
    }

    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn provisioner(mut self, provisioner: Arc<dyn EnvironmentProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn metadata(mut self, metadata: Arc<dyn MetadataExtractor>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn options(mut self, options: TranslationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Must be called from within a Tokio runtime; jobs run on it.
    pub fn build(self) -> Result<TranslationQueue, QueueError> {
        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        let (idle, _) = watch::channel(true);

        Ok(TranslationQueue {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                history: self
                    .history
                    .unwrap_or_else(|| Arc::new(MemoryHistoryStore::new())),
                events: self.events.unwrap_or_else(|| Arc::new(NoopEvents)),
                provisioner: self.provisioner.unwrap_or_else(|| {
                    Arc::new(PathProvisioner::new(Default::default()))
                }),
                metadata: self.metadata.unwrap_or_else(|| Arc::new(FilenameMetadata)),
                runtime_dir: self.runtime_dir,
                options: self.options,
                job_timeout: self.job_timeout,
                idle,
                runtime,
            }),
        })
    }
}

impl TranslationQueue {
    pub fn builder(runtime_dir: impl Into<PathBuf>) -> TranslationQueueBuilder {
        TranslationQueueBuilder::new(runtime_dir)
    }

    /// Adds a job to the end of the queue and returns it immediately. The
    /// job starts once every job queued before it has finished.
    pub fn enqueue(&self, input: JobInput) -> JobRecord {
        let record = JobRecord::new(input);
        {
            let mut state = self.inner.lock();
            state.jobs.push(record.clone());
            state.unannounced.insert(record.id.clone());
            self.inner.idle.send_replace(false);
        }
        self.inner
            .events
            .status(&record.id, JobStatus::Queued, Some(record.progress));
        self.inner.lock().unannounced.remove(&record.id);
        log::info!(
            "Queued translation job {} for {}",
            record.id,
            record.source_path.display()
        );

        self.dispatch();
        record
    }

    /// Snapshot of every job enqueued this session, in insertion order.
    pub fn get_queue(&self) -> Vec<JobRecord> {
        self.inner.lock().jobs.clone()
    }

    pub fn get_job(&self, id: &str) -> Option<JobRecord> {
        self.inner.lock().find(id).cloned()
    }

    /// Records where the user saved a finished job's output and moves it to
    /// `success`.
    ///
    /// Jobs that are still queued or running are refused. A job from an
    /// earlier session is updated in history only. Returns `Ok(None)` for an
    /// id known nowhere.
    pub fn mark_saved(
        &self,
        id: &str,
        save_path: impl Into<PathBuf>,
    ) -> Result<Option<JobRecord>, QueueError> {
        let save_path = save_path.into();

        let updated = {
            let mut state = self.inner.lock();
            match state.find_mut(id) {
                Some(job) if job.status.is_active() => {
                    return Err(QueueError::JobActive {
                        id: id.to_string(),
                        status: job.status,
                    });
                }
                Some(job) => {
                    job.mark_saved(save_path.clone());
                    Some(job.clone())
                }
                None => None,
            }
        };

        let patch = HistoryPatch {
            status: Some(JobStatus::Success),
            progress: Some(100),
            save_path: Some(save_path.clone()),
            error: Some(None),
            ..Default::default()
        };

        match updated {
            Some(record) => {
                self.inner.persist(&record.id, &patch);
                self.inner
                    .events
                    .status(&record.id, record.status, Some(record.progress));
                log::info!("Job {} saved to {}", id, save_path.display());
                Ok(Some(record))
            }
            None => {
                let Some(entry) = self.inner.history.get(id)? else {
                    log::debug!("mark_saved: unknown job {}", id);
                    return Ok(None);
                };
                refuse_active(&entry)?;
                if !self.inner.history.upsert(id, &patch)? {
                    return Ok(None);
                }
                log::info!("Job {} (from history) saved to {}", id, save_path.display());
                Ok(self.inner.history.get(id)?.map(|e| e.to_record()))
            }
        }
    }

    /// Queues the source document of a finished job again as a new job.
    pub fn rerun(&self, id: &str) -> Result<Option<JobRecord>, QueueError> {
        let input = match self.get_job(id) {
            Some(job) if job.status.is_active() => {
                return Err(QueueError::JobActive {
                    id: id.to_string(),
                    status: job.status,
                });
            }
            Some(job) => job.input(),
            None => match self.inner.history.get(id)? {
                Some(entry) => {
                    refuse_active(&entry)?;
                    entry.to_record().input()
                }
                None => return Ok(None),
            },
        };

        log::info!("Re-running job {} as a new job", id);
        Ok(Some(self.enqueue(input)))
    }

    /// All persisted jobs, newest first.
    pub fn history(&self) -> Result<Vec<HistoryEntry>, QueueError> {
        Ok(self.inner.history.list()?)
    }

    /// Refused while the job is active, here or in another process.
    pub fn remove_from_history(&self, id: &str) -> Result<bool, QueueError> {
        match self.get_job(id) {
            Some(job) if job.status.is_active() => {
                return Err(QueueError::JobActive {
                    id: id.to_string(),
                    status: job.status,
                });
            }
            Some(_) => {}
            None => {
                if let Some(entry) = self.inner.history.get(id)? {
                    refuse_active(&entry)?;
                }
            }
        }
        Ok(self.inner.history.remove(id)?)
    }

    /// Fails history entries that an earlier process left queued or
    /// running. Returns how many were changed.
    ///
    /// Does nothing while any queue holds the runtime lease: its active
    /// entries may be live.
    pub fn recover_interrupted(&self) -> Result<usize, QueueError> {
        let runtime_dir = &self.inner.runtime_dir;
        let _lease = match RuntimeLease::try_acquire(runtime_dir) {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                log::info!(
                    "Another queue is running jobs in {}, skipping recovery",
                    runtime_dir.display()
                );
                return Ok(0);
            }
            Err(source) => {
                return Err(QueueError::Lease {
                    path: runtime_dir.clone(),
                    source,
                })
            }
        };

        let stale: Vec<String> = {
            let state = self.inner.lock();
            self.inner
                .history
                .list()?
                .into_iter()
                .filter(|e| e.status.is_active() && state.find(&e.id).is_none())
                .map(|e| e.id)
                .collect()
        };

        let patch = HistoryPatch {
            status: Some(JobStatus::Failed),
            progress: Some(100),
            error: Some(Some(INTERRUPTED_ERROR.to_string())),
            ..Default::default()
        };
        let mut recovered = 0;
        for id in &stale {
            if self.inner.history.upsert(id, &patch)? {
                recovered += 1;
            }
        }
        if recovered > 0 {
            log::warn!("Marked {} interrupted job(s) as failed", recovered);
        }
        Ok(recovered)
    }

    /// True while a job is queued or running.
    pub fn is_busy(&self) -> bool {
        !*self.inner.idle.borrow()
    }

    /// Resolves once nothing is queued or running.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.idle.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|idle| *idle).await;
    }

    fn dispatch(&self) {
        let first = {
            let mut state = self.inner.lock();
            if state.processing {
                return;
            }
            let Some(id) = state.next_queued() else {
                return;
            };
            state.processing = true;
            id
        };

        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(inner.drain(first));
    }
}

/// History-only entries still marked active belong to a live run elsewhere
/// (or to a crash that `recover_interrupted` has not cleaned up yet).
fn refuse_active(entry: &HistoryEntry) -> Result<(), QueueError> {
    if entry.status.is_active() {
        return Err(QueueError::JobActive {
            id: entry.id.clone(),
            status: entry.status,
        });
    }
    Ok(())
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Queue state lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Applies `f` to job `id` under the state lock.
    fn update<T>(&self, id: &str, f: impl FnOnce(&mut JobRecord) -> T) -> Option<T> {
        self.lock().find_mut(id).map(f)
    }

    async fn drain(self: Arc<Self>, first: String) {
        let mut lease: Option<RuntimeLease> = None;
        let mut next = Some(first);
        while let Some(id) = next {
            let blocked = match lease {
                Some(_) => None,
                None => match self.wait_for_lease().await {
                    Ok(acquired) => {
                        lease = Some(acquired);
                        None
                    }
                    Err(e) => Some(e),
                },
            };
            self.run_job(&id, blocked).await;

            let mut state = self.lock();
            next = state.next_queued();
            if next.is_none() {
                // Released before going idle so the next owner can start at once.
                drop(lease.take());
                state.processing = false;
                if !state.has_queued() {
                    self.idle.send_replace(true);
                }
            }
        }
        log::debug!("Translation queue drained");
    }

    /// Waits until no other queue holds the runtime directory.
    async fn wait_for_lease(&self) -> Result<RuntimeLease, RunError> {
        let mut announced = false;
        loop {
            match RuntimeLease::try_acquire(&self.runtime_dir) {
                Ok(Some(lease)) => return Ok(lease),
                Ok(None) => {
                    if !announced {
                        log::info!(
                            "Another queue is running jobs in {}, waiting",
                            self.runtime_dir.display()
                        );
                        announced = true;
                    }
                    tokio::time::sleep(LEASE_RETRY).await;
                }
                Err(source) => {
                    return Err(RunError::Lease {
                        path: self.runtime_dir.clone(),
                        source,
                    })
                }
            }
        }
    }

    fn timed_out(&self) -> RunError {
        RunError::TimedOut(self.job_timeout.unwrap_or_default())
    }

    /// Runs one episode. `blocked` fails it before anything starts.
    async fn run_job(&self, id: &str, blocked: Option<RunError>) {
        let span = tracing::info_span!("translation_job", job_id = %id);
        async {
            let Some(started) = self.update(id, |job| {
                job.begin_run();
                job.clone()
            }) else {
                return;
            };
            log::info!("Starting translation of {}", started.original_name);

            self.record_start(&started);
            self.events.status(id, JobStatus::Running, Some(0));

            let deadline = self.job_timeout.map(|limit| Instant::now() + limit);
            let result = match blocked {
                Some(e) => Err(e),
                None => self.execute(&started, deadline).await,
            };

            match result {
                Ok(output_dir) => self.finish_success(id, output_dir),
                Err(e) => self.finish_failure(id, &e),
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        job: &JobRecord,
        deadline: Option<Instant>,
    ) -> Result<PathBuf, RunError> {
        let env = match deadline {
            Some(at) => tokio::time::timeout_at(at, self.provisioner.ensure())
                .await
                .map_err(|_| self.timed_out())??,
            None => self.provisioner.ensure().await?,
        };

        let output_dir = self.runtime_dir.join("jobs").join(&job.id);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|source| RunError::OutputDir {
                path: output_dir.clone(),
                source,
            })?;

        let invocation = Invocation::build(&env, &job.source_path, &output_dir, &self.options);
        let mut child = invocation.spawn()?;
        log::info!(
            "Spawned {} (pid {:?})",
            invocation.program.display(),
            child.id()
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(pump_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(pump_lines(stderr, tx.clone()));
        }
        drop(tx);

        let supervised = async {
            while let Some(line) = rx.recv().await {
                self.handle_line(&job.id, line);
            }
            child.wait().await
        };
        let exited = match deadline {
            Some(at) => tokio::time::timeout_at(at, supervised).await.ok(),
            None => Some(supervised.await),
        };

        let Some(status) = exited else {
            log::warn!("Job {} hit its time limit, killing the process tree", job.id);
            kill_process_tree(&mut child).await;
            let drained = tokio::time::timeout(KILL_GRACE, async {
                while let Some(line) = rx.recv().await {
                    self.handle_line(&job.id, line);
                }
            })
            .await;
            if let Err(e) = child.wait().await {
                log::warn!("Failed to reap timed-out job {}: {}", job.id, e);
            }
            if drained.is_ok() {
                self.join_pumps(&job.id, pumps).await;
            } else {
                log::warn!("Output of job {} stayed open after kill", job.id);
                pumps.iter().for_each(JoinHandle::abort);
            }
            return Err(self.timed_out());
        };

        self.join_pumps(&job.id, pumps).await;
        let status = status.map_err(RunError::Io)?;
        if status.success() {
            Ok(output_dir)
        } else {
            match status.code() {
                Some(code) => Err(RunError::ExitCode(code)),
                None => Err(RunError::Terminated),
            }
        }
    }

    async fn join_pumps(&self, id: &str, pumps: Vec<JoinHandle<std::io::Result<()>>>) {
        for pump in pumps {
            match pump.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Reading output of job {} failed: {}", id, e),
                Err(e) => log::warn!("Output reader for job {} panicked: {}", id, e),
            }
        }
    }

    fn handle_line(&self, id: &str, line: String) {
        let Some((patch, advanced)) = self.update(id, |job| {
            job.push_log(line.clone());
            let update = interpret_line(&line, job.progress)
                .filter(|update| job.advance_progress(update.value));
            let patch = HistoryPatch {
                progress: update.as_ref().map(|_| job.progress),
                ..HistoryPatch::logs(job)
            };
            (patch, update)
        }) else {
            return;
        };

        self.persist(id, &patch);
        self.events.progress(id, &line);

        if let Some(update) = advanced {
            if let ProgressSource::Stage { milestone } = update.source {
                log::debug!("Job {} reached stage '{}'", id, milestone);
            }
            self.events.status(id, JobStatus::Running, Some(update.value));
        }
    }

    fn finish_success(&self, id: &str, output_dir: PathBuf) {
        let Some(record) = self.update(id, |job| {
            job.complete(output_dir.clone());
            job.clone()
        }) else {
            return;
        };
        log::info!(
            "Translation of {} finished, output in {}",
            record.original_name,
            output_dir.display()
        );

        self.persist(id, &HistoryPatch::state_of(&record));
        self.events
            .status(id, JobStatus::AwaitingUser, Some(record.progress));
        self.events.completed(id, &JobOutcome::succeeded(output_dir));
    }

    fn finish_failure(&self, id: &str, error: &RunError) {
        let message = error.to_string();
        log::warn!("Translation job {} failed: {}", id, message);

        let Some(record) = self.update(id, |job| {
            job.fail(message.clone());
            job.clone()
        }) else {
            return;
        };

        self.persist(id, &HistoryPatch::state_of(&record));
        self.events.status(id, JobStatus::Failed, Some(record.progress));
        self.events.completed(
            id,
            &JobOutcome::failed(record.error.unwrap_or(message)),
        );
    }

    /// Creates the history entry on a job's first run, or refreshes it.
    fn record_start(&self, record: &JobRecord) {
        match self.history.get(&record.id) {
            Ok(Some(_)) => self.persist(&record.id, &HistoryPatch::full(record)),
            Ok(None) => {
                let metadata = self.metadata.extract(&record.source_path);
                if let Err(e) = self
                    .history
                    .append(HistoryEntry::from_record(record, metadata))
                {
                    log::warn!("Failed to add job {} to history: {}", record.id, e);
                }
            }
            Err(e) => log::warn!("Failed to read history for job {}: {}", record.id, e),
        }
    }

    /// Best-effort history write. Failures are logged, never propagated.
    fn persist(&self, id: &str, patch: &HistoryPatch) {
        match self.history.upsert(id, patch) {
            Ok(true) => {}
            Ok(false) => log::warn!("No history entry for job {}, update dropped", id),
            Err(e) => log::warn!("Failed to update history for job {}: {}", id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::ResolvedEnvironment;
    use crate::error::ProvisionError;
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    /// Fails every `ensure`, optionally after taking a permit from `gate`.
    struct FailingProvisioner {
        gate: Option<Arc<Semaphore>>,
    }

    #[async_trait]
    impl EnvironmentProvisioner for FailingProvisioner {
        async fn ensure(&self) -> Result<ResolvedEnvironment, ProvisionError> {
            if let Some(gate) = &self.gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            Err(ProvisionError::Missing {
                tool: "pdf2zh".into(),
                searched: "test".into(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl EventSink for RecordingSink {
        fn status(&self, job_id: &str, status: JobStatus, progress: Option<u8>) {
            self.events
                .lock()
                .unwrap()
                .push(format!("status {} {} {:?}", job_id, status, progress));
        }

        fn progress(&self, job_id: &str, line: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("line {} {}", job_id, line));
        }

        fn completed(&self, job_id: &str, outcome: &JobOutcome) {
            self.events
                .lock()
                .unwrap()
                .push(format!("completed {} {}", job_id, outcome.success));
        }
    }

    fn queue_with(
        gate: Option<Arc<Semaphore>>,
    ) -> (TranslationQueue, Arc<RecordingSink>, Arc<MemoryHistoryStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let history = Arc::new(MemoryHistoryStore::new());
        let queue = TranslationQueue::builder(dir.path())
            .provisioner(Arc::new(FailingProvisioner { gate }))
            .events(sink.clone())
            .history(history.clone())
            .build()
            .unwrap();
        (queue, sink, history, dir)
    }

    #[test]
    fn test_build_outside_runtime() {
        let err = TranslationQueue::builder("/tmp/doctrans").build().err();
        assert!(matches!(err, Some(QueueError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_enqueue_returns_queued_record() {
        let gate = Arc::new(Semaphore::new(0));
        let (queue, _sink, _history, _dir) = queue_with(Some(gate.clone()));

        let job = queue.enqueue(JobInput::local("/docs/a.pdf"));
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert!(queue.is_busy());
        assert_eq!(queue.get_queue().len(), 1);

        gate.add_permits(1);
        queue.wait_idle().await;
    }

    #[tokio::test]
    async fn test_provisioning_failure_fails_job_and_continues() {
        let (queue, sink, history, _dir) = queue_with(None);

        let a = queue.enqueue(JobInput::local("/docs/a.pdf"));
        let b = queue.enqueue(JobInput::local("/docs/b.pdf"));
        queue.wait_idle().await;

        for id in [&a.id, &b.id] {
            let job = queue.get_job(id).unwrap();
            assert_eq!(job.status, JobStatus::Failed);
            assert_eq!(job.progress, 100);
            assert!(job.error.as_deref().unwrap().contains("pdf2zh"));

            let entry = history.get(id).unwrap().unwrap();
            assert_eq!(entry.status, JobStatus::Failed);
            assert_eq!(entry.metadata.title.as_deref(), Some(if *id == a.id { "a" } else { "b" }));
        }

        let events = sink.take();
        let completed: Vec<&String> = events.iter().filter(|e| e.starts_with("completed")).collect();
        assert_eq!(
            completed,
            vec![
                &format!("completed {} false", a.id),
                &format!("completed {} false", b.id)
            ]
        );
        assert!(events.contains(&format!("status {} running Some(0)", a.id)));
        assert!(events.contains(&format!("status {} failed Some(100)", b.id)));
    }

    #[tokio::test]
    async fn test_active_jobs_are_guarded() {
        let gate = Arc::new(Semaphore::new(0));
        let (queue, _sink, _history, _dir) = queue_with(Some(gate.clone()));

        let a = queue.enqueue(JobInput::local("/docs/a.pdf"));
        let b = queue.enqueue(JobInput::local("/docs/b.pdf"));
        tokio::task::yield_now().await;

        assert!(matches!(
            queue.mark_saved(&b.id, "/out/b.pdf"),
            Err(QueueError::JobActive { status: JobStatus::Queued, .. })
        ));
        assert!(matches!(queue.rerun(&a.id), Err(QueueError::JobActive { .. })));
        assert!(matches!(
            queue.remove_from_history(&b.id),
            Err(QueueError::JobActive { .. })
        ));

        gate.add_permits(2);
        queue.wait_idle().await;
        assert!(queue.get_queue().iter().all(|j| j.status == JobStatus::Failed));
    }

    #[tokio::test]
    async fn test_mark_saved_unknown_is_none() {
        let (queue, _sink, _history, _dir) = queue_with(None);
        assert!(queue.mark_saved("nope", "/out/x.pdf").unwrap().is_none());
        assert!(queue.rerun("nope").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_saved_failed_job() {
        let (queue, _sink, history, _dir) = queue_with(None);
        let a = queue.enqueue(JobInput::local("/docs/a.pdf"));
        queue.wait_idle().await;

        let saved = queue.mark_saved(&a.id, "/out/a.pdf").unwrap().unwrap();
        assert_eq!(saved.status, JobStatus::Success);
        assert!(saved.error.is_none());
        assert_eq!(saved.save_path, Some(PathBuf::from("/out/a.pdf")));

        let entry = history.get(&a.id).unwrap().unwrap();
        assert_eq!(entry.status, JobStatus::Success);
        assert!(entry.error.is_none());
    }

    #[tokio::test]
    async fn test_rerun_creates_new_job() {
        let (queue, _sink, _history, _dir) = queue_with(None);
        let a = queue.enqueue(JobInput::downloaded("/docs/a.pdf", "dl-3"));
        queue.wait_idle().await;

        let again = queue.rerun(&a.id).unwrap().unwrap();
        assert_ne!(again.id, a.id);
        assert_eq!(again.source_path, a.source_path);
        assert_eq!(again.download_id.as_deref(), Some("dl-3"));
        queue.wait_idle().await;
        assert_eq!(queue.get_queue().len(), 2);
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let (queue, _sink, history, _dir) = queue_with(None);

        let mut stale = JobRecord::new(JobInput::local("/docs/old.pdf"));
        stale.begin_run();
        history
            .append(HistoryEntry::from_record(&stale, Default::default()))
            .unwrap();
        let mut done = JobRecord::new(JobInput::local("/docs/done.pdf"));
        done.complete(PathBuf::from("/rt/jobs/done"));
        history
            .append(HistoryEntry::from_record(&done, Default::default()))
            .unwrap();

        assert_eq!(queue.recover_interrupted().unwrap(), 1);
        let entry = history.get(&stale.id).unwrap().unwrap();
        assert_eq!(entry.status, JobStatus::Failed);
        assert_eq!(entry.progress, 100);
        assert_eq!(entry.error.as_deref(), Some(INTERRUPTED_ERROR));
        assert_eq!(
            history.get(&done.id).unwrap().unwrap().status,
            JobStatus::AwaitingUser
        );
        assert_eq!(queue.recover_interrupted().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_history_only_active_entries_are_refused() {
        let (queue, _sink, history, _dir) = queue_with(None);
        let mut elsewhere = JobRecord::new(JobInput::local("/docs/live.pdf"));
        elsewhere.begin_run();
        history
            .append(HistoryEntry::from_record(&elsewhere, Default::default()))
            .unwrap();

        assert!(matches!(
            queue.mark_saved(&elsewhere.id, "/out/live.pdf"),
            Err(QueueError::JobActive { status: JobStatus::Running, .. })
        ));
        assert!(matches!(queue.rerun(&elsewhere.id), Err(QueueError::JobActive { .. })));
        assert!(matches!(
            queue.remove_from_history(&elsewhere.id),
            Err(QueueError::JobActive { .. })
        ));

        let entry = history.get(&elsewhere.id).unwrap().unwrap();
        assert_eq!(entry.status, JobStatus::Running);
        assert!(entry.save_path.is_none());
        assert!(queue.get_queue().is_empty());
    }

    #[tokio::test]
    async fn test_recover_skipped_while_runtime_leased() {
        let (queue, _sink, history, dir) = queue_with(None);
        let mut live = JobRecord::new(JobInput::local("/docs/live.pdf"));
        live.begin_run();
        history
            .append(HistoryEntry::from_record(&live, Default::default()))
            .unwrap();

        let other = RuntimeLease::try_acquire(dir.path()).unwrap().unwrap();
        assert_eq!(queue.recover_interrupted().unwrap(), 0);
        assert_eq!(history.get(&live.id).unwrap().unwrap().status, JobStatus::Running);

        drop(other);
        assert_eq!(queue.recover_interrupted().unwrap(), 1);
    }

    /// Looks the job up again from inside every status event.
    #[derive(Default)]
    struct ReentrantSink {
        queue: std::sync::OnceLock<TranslationQueue>,
        seen: Mutex<Vec<(JobStatus, Option<JobStatus>)>>,
    }

    impl EventSink for ReentrantSink {
        fn status(&self, job_id: &str, status: JobStatus, _progress: Option<u8>) {
            if let Some(queue) = self.queue.get() {
                let current = queue.get_job(job_id).map(|j| j.status);
                let _ = queue.get_queue();
                self.seen.lock().unwrap().push((status, current));
            }
        }

        fn progress(&self, _job_id: &str, _line: &str) {}

        fn completed(&self, _job_id: &str, _outcome: &JobOutcome) {}
    }

    #[tokio::test]
    async fn test_sink_may_call_back_into_queue() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(ReentrantSink::default());
        let queue = TranslationQueue::builder(dir.path())
            .provisioner(Arc::new(FailingProvisioner { gate: None }))
            .events(sink.clone())
            .build()
            .unwrap();
        let _ = sink.queue.set(queue.clone());

        let a = queue.enqueue(JobInput::local("/docs/a.pdf"));
        let b = queue.enqueue(JobInput::local("/docs/b.pdf"));
        queue.wait_idle().await;

        let seen = sink.seen.lock().unwrap().clone();
        assert_eq!(seen[0], (JobStatus::Queued, Some(JobStatus::Queued)));
        assert!(seen.contains(&(JobStatus::Failed, Some(JobStatus::Failed))));
        assert_eq!(queue.get_job(&a.id).unwrap().status, JobStatus::Failed);
        assert_eq!(queue.get_job(&b.id).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_wait_idle_when_empty() {
        let (queue, _sink, _history, _dir) = queue_with(None);
        assert!(!queue.is_busy());
        queue.wait_idle().await;
    }
}
