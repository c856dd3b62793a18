pub mod job;
pub mod lease;
pub mod lines;
pub mod process;
pub mod queue;

pub use job::{JobInput, JobRecord, JobStatus, SourceType, MAX_LOG_LINES};
pub use lease::RuntimeLease;
pub use lines::LineSplitter;
pub use process::Invocation;
pub use queue::{TranslationQueue, TranslationQueueBuilder, INTERRUPTED_ERROR};
