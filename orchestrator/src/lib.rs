//! Exploration job orchestrator.
//!
//! Drives an external worker process through one UI exploration per job and
//! turns its output into a stored test procedure with uploaded evidence.

pub mod artifacts;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod jobs;
pub mod persister;
pub mod pipeline;
pub mod pool;
pub mod procedures;
pub mod registry;
pub mod scope;
pub mod storage;
pub mod worker;
pub mod workspace;

pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineSettings};
pub use pool::WorkerPool;
