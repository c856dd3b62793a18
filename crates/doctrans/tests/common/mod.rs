//! Shared test utilities for doctrans integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated queue execution with temp directories
//! - `StaticProvisioner` to point the queue at a fake translation tool
//! - Helpers to pick apart collected queue events

pub mod harness;

pub use harness::{progress_values, status_sequence, StaticProvisioner, TestHarness};
