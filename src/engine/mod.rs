// src/engine/mod.rs

//! Run engine for deploydag.
//!
//! The pure planner (`dag::plan`) decides *what* runs; this module runs it:
//! - [`runner`] fans each step out to one worker per host, enforces the
//!   per-step barrier and fail-fast cancellation;
//! - [`record`] accumulates the per-command outcomes of a run.

pub mod record;
pub mod runner;

pub use record::{
    CommandOutcome, RecordEntry, RunRecord, RunRecorder, RunStatus, new_release_id,
};
pub use runner::TaskRunner;
