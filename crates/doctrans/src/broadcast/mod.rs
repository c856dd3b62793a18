//! Broadcasting of queue events for real-time observation.
//!
//! The queue reports through the [`EventSink`] trait; any front-end (the
//! CLI, a desktop shell, tests) subscribes to a [`JobEventBroadcaster`].

pub mod job_events;

pub use job_events::{EventSink, JobEventBroadcaster, JobOutcome, NoopEvents, QueueEvent};
