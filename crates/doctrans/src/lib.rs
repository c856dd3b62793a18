pub mod broadcast;
pub mod config;
pub mod db;
pub mod environment;
pub mod error;
pub mod history;
pub mod logging;
pub mod metadata;
pub mod progress;
pub mod worker;

pub use broadcast::{EventSink, JobEventBroadcaster, JobOutcome, NoopEvents, QueueEvent};
pub use config::{load_config, Config};
pub use environment::{EnvironmentProvisioner, PathProvisioner, ResolvedEnvironment};
pub use error::{
    ConfigError, DoctransError, LoggingError, ProvisionError, QueueError, Result, RunError,
};
pub use history::{
    HistoryEntry, HistoryPatch, HistoryStore, MemoryHistoryStore, SqliteHistoryStore,
};
pub use metadata::{DocumentMetadata, FilenameMetadata, MetadataExtractor};
pub use worker::{JobInput, JobRecord, JobStatus, SourceType, TranslationQueue};
