//! Colligo - multi-tenant security alert correlation.
//!
//! Groups alerts that represent the same underlying event across tenants,
//! enriches groups through a rate-limited gateway, scores them
//! deterministically, and routes them to automated action, human
//! escalation, or informational close. No alert is silently lost or
//! duplicated; no destructive action executes without human approval.
//!
//! The binary in main.rs uses this library to run the daemon.

pub mod alert;
pub mod config;
pub mod config_broadcast;
pub mod correlation;
pub mod enrichment;
pub mod gateway;
pub mod ingest;
pub mod metrics;
pub mod normalize;
pub mod notify;
pub mod pipeline;
pub mod routing;
pub mod scoring;

// Re-export commonly used types
pub use alert::{Alert, RawAlert, Severity};
pub use config::Config;
pub use pipeline::Pipeline;
