//! Job records and their lifecycle state.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of output lines retained per job.
pub const MAX_LOG_LINES: usize = 500;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Queued,
    Running,
    AwaitingUser,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::AwaitingUser => "awaiting-user",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    /// Parses the persisted form produced by [`JobStatus::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "awaiting-user" => Some(JobStatus::AwaitingUser),
            "success" => Some(JobStatus::Success),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Queued and running jobs are owned by the dispatch loop.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the source document came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Local,
    Download,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Local => "local",
            SourceType::Download => "download",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(SourceType::Local),
            "download" => Some(SourceType::Download),
            _ => None,
        }
    }
}

/// Caller-supplied description of a document to translate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInput {
    pub source_path: PathBuf,
    pub original_name: String,
    pub source_type: SourceType,
    /// Correlation id for an external download-progress channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_id: Option<String>,
}

impl JobInput {
    /// Input for a file already on disk, named after its file name.
    pub fn local(source_path: impl Into<PathBuf>) -> Self {
        let source_path = source_path.into();
        let original_name = display_name(&source_path);
        Self {
            source_path,
            original_name,
            source_type: SourceType::Local,
            download_id: None,
        }
    }

    /// Input for a file fetched by the download helper.
    pub fn downloaded(source_path: impl Into<PathBuf>, download_id: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::Download,
            download_id: Some(download_id.into()),
            ..Self::local(source_path)
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// One translation unit and its current state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub source_path: PathBuf,
    pub original_name: String,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_id: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    pub logs: VecDeque<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Creates a queued job with a fresh id.
    pub fn new(input: JobInput) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_path: input.source_path,
            original_name: input.original_name,
            source_type: input.source_type,
            download_id: input.download_id,
            status: JobStatus::Queued,
            progress: 0,
            logs: VecDeque::new(),
            output_dir: None,
            save_path: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The input that would reproduce this job.
    pub fn input(&self) -> JobInput {
        JobInput {
            source_path: self.source_path.clone(),
            original_name: self.original_name.clone(),
            source_type: self.source_type,
            download_id: self.download_id.clone(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Starts a new run episode: logs and progress are reset.
    pub fn begin_run(&mut self) {
        self.status = JobStatus::Running;
        self.progress = 0;
        self.logs.clear();
        self.error = None;
        self.touch();
    }

    /// Appends an output line, evicting the oldest once the buffer is full.
    pub fn push_log(&mut self, line: impl Into<String>) {
        if self.logs.len() == MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.logs.push_back(line.into());
        self.touch();
    }

    /// Raises progress to `value`. Returns false (and changes nothing) when
    /// `value` would not move progress forward.
    pub fn advance_progress(&mut self, value: u8) -> bool {
        let value = value.min(100);
        if value <= self.progress {
            return false;
        }
        self.progress = value;
        self.touch();
        true
    }

    /// The external process finished cleanly; output waits for the user.
    pub fn complete(&mut self, output_dir: PathBuf) {
        self.status = JobStatus::AwaitingUser;
        self.progress = 100;
        self.output_dir = Some(output_dir);
        self.error = None;
        self.touch();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "Translation failed".to_string();
        }
        self.status = JobStatus::Failed;
        self.progress = 100;
        self.error = Some(error);
        self.touch();
    }

    /// The user confirmed a persistent save destination.
    pub fn mark_saved(&mut self, save_path: PathBuf) {
        self.status = JobStatus::Success;
        self.progress = 100;
        self.save_path = Some(save_path);
        self.error = None;
        self.touch();
    }
}
