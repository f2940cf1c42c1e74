//! Highlight reel worker.
//!
//! This crate provides:
//! - The staged job pipeline (identity detection and highlight render)
//! - Job/video/identity persistence behind the `JobStore` trait
//! - Model capabilities loaded once per worker
//! - Structured job logging and Prometheus metrics

pub mod capabilities;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod store;

pub use capabilities::{Capabilities, CapabilityRegistry};
pub use config::WorkerConfig;
pub use error::{ErrorKind, WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use pipeline::{IdentityReport, JobOutcome, Pipeline, RenderReport};
pub use store::{IdentitySet, JobStore, MemoryStore, StoreError, StoreResult};
