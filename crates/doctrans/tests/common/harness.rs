//! Test harness for isolated queue execution.
//!
//! The `TestHarness` struct provides a temporary environment in which the
//! real `TranslationQueue` drives small shell scripts standing in for the
//! translation tool:
//! - Temporary directories for documents, the runtime dir and tool scripts
//! - A provisioner that hands out a chosen script as the executable
//! - An in-memory (or SQLite) history store and an event broadcaster

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use doctrans::config::TranslationOptions;
use doctrans::environment::{EnvironmentProvisioner, ResolvedEnvironment};
use doctrans::error::ProvisionError;
use doctrans::worker::TranslationQueueBuilder;
use doctrans::{
    HistoryStore, JobEventBroadcaster, JobStatus, MemoryHistoryStore, QueueEvent,
    TranslationQueue,
};

/// Hands out a fixed environment and counts how often it was asked.
pub struct StaticProvisioner {
    result: Result<ResolvedEnvironment, ProvisionError>,
    pub calls: AtomicUsize,
}

impl StaticProvisioner {
    pub fn executable(path: &Path) -> Self {
        let bin = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self {
            result: Ok(ResolvedEnvironment {
                interpreter_path: PathBuf::from("/bin/sh"),
                tool_manager_path: PathBuf::from("/bin/sh"),
                executable_path: path.to_path_buf(),
                tool_bin_dir: bin,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(tool: &str) -> Self {
        Self {
            result: Err(ProvisionError::Missing {
                tool: tool.to_string(),
                searched: "nowhere".to_string(),
            }),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EnvironmentProvisioner for StaticProvisioner {
    async fn ensure(&self) -> Result<ResolvedEnvironment, ProvisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Test harness providing an isolated queue environment.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Where source documents are written.
    pub docs_dir: PathBuf,
    /// The queue's runtime directory.
    pub runtime_dir: PathBuf,
    /// Where fake tool scripts are written.
    pub bin_dir: PathBuf,
    pub history: Arc<MemoryHistoryStore>,
    pub events: JobEventBroadcaster,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let docs_dir = base.join("docs");
        let runtime_dir = base.join("runtime");
        let bin_dir = base.join("bin");
        std::fs::create_dir_all(&docs_dir).expect("Failed to create docs dir");
        std::fs::create_dir_all(&bin_dir).expect("Failed to create bin dir");

        Self {
            temp_dir,
            docs_dir,
            runtime_dir,
            bin_dir,
            history: Arc::new(MemoryHistoryStore::new()),
            // Large enough that no test ever lags.
            events: JobEventBroadcaster::new(16 * 1024),
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes a placeholder source document.
    pub fn document(&self, name: &str) -> PathBuf {
        let path = self.docs_dir.join(name);
        std::fs::write(&path, b"%PDF-1.7\n%placeholder\n").expect("Failed to write document");
        path
    }

    /// Writes an executable `/bin/sh` script with the given body.
    #[cfg(unix)]
    pub fn tool(&self, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.bin_dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write tool");
        let mut perms = std::fs::metadata(&path)
            .expect("Failed to stat tool")
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("Failed to chmod tool");
        path
    }

    pub fn builder(&self, provisioner: Arc<dyn EnvironmentProvisioner>) -> TranslationQueueBuilder {
        TranslationQueue::builder(&self.runtime_dir)
            .provisioner(provisioner)
            .history(self.history.clone() as Arc<dyn HistoryStore>)
            .events(Arc::new(self.events.clone()))
    }

    /// A queue running `tool` with default options.
    pub fn queue(&self, tool: &Path) -> TranslationQueue {
        self.queue_with(tool, TranslationOptions::default(), None)
    }

    pub fn queue_with(
        &self,
        tool: &Path,
        options: TranslationOptions,
        timeout: Option<Duration>,
    ) -> TranslationQueue {
        self.builder(Arc::new(StaticProvisioner::executable(tool)))
            .options(options)
            .job_timeout(timeout)
            .build()
            .expect("Failed to build queue")
    }

    /// Every event that is currently buffered for `rx`.
    pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<QueueEvent>) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// The progress values of a job's status events, in order.
pub fn progress_values(events: &[QueueEvent], id: &str) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            QueueEvent::Status {
                job_id,
                progress: Some(p),
                ..
            } if job_id == id => Some(*p),
            _ => None,
        })
        .collect()
}

/// The statuses a job went through, in order, without repeats.
pub fn status_sequence(events: &[QueueEvent], id: &str) -> Vec<JobStatus> {
    let mut seq: Vec<JobStatus> = Vec::new();
    for event in events {
        if let QueueEvent::Status { job_id, status, .. } = event {
            if job_id == id && seq.last() != Some(status) {
                seq.push(*status);
            }
        }
    }
    seq
}
