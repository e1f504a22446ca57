//! Workflow execution engine
//!
//! Admits runs under a concurrency cap, walks each run's nodes applying the
//! per-node error policy, and keeps metrics and a bounded history of
//! finished runs.

mod config;
mod engine;
mod history;
pub mod metrics;
mod queue;
mod registry;
mod run;
mod validate;
mod walker;

pub use config::EngineConfig;
pub use engine::Engine;
pub use history::HistoryStore;
pub use metrics::{error_type_key, MetricsCollector, MetricsSnapshot};
pub use queue::{AdmissionQueue, Queued};
pub use registry::ExecutorRegistry;
pub use validate::validate_definition;
