use std::path::PathBuf;
use thiserror::Error;

use crate::worker::job::JobStatus;

#[derive(Error, Debug)]
pub enum DoctransError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Environment error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Failures while resolving the interpreter / tool manager / executable triplet.
#[derive(Error, Debug, Clone)]
pub enum ProvisionError {
    #[error("Required tool '{tool}' was not found (searched: {searched})")]
    Missing { tool: String, searched: String },

    #[error("Configured path for '{tool}' is not a file: {path}")]
    NotAFile { tool: String, path: PathBuf },
}

/// Errors scoped to a single run episode. The `Display` text is what the
/// job record carries in its `error` field.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Environment setup failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Failed to create output directory '{path}': {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start translation process '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Translation process I/O failed: {0}")]
    Io(#[source] std::io::Error),

    #[error("Translation process exited with code {0}")]
    ExitCode(i32),

    #[error("Translation process was terminated by a signal")]
    Terminated,

    #[error("Translation process timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("Cannot lock runtime directory '{path}': {source}")]
    Lease {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("The translation queue must be created inside a Tokio runtime")]
    NoRuntime,

    #[error("Job {id} is {status} and cannot be changed right now")]
    JobActive { id: String, status: JobStatus },

    #[error("History store error: {0}")]
    History(#[from] crate::db::DatabaseError),

    #[error("Cannot lock runtime directory '{path}': {source}")]
    Lease {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Failed to open log file '{path}': {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install log subscriber: {0}")]
    Install(String),
}

pub type Result<T> = std::result::Result<T, DoctransError>;
