//! Shared storage clients for the monitoring worker.
//!
//! Three backends, each behind its own client type:
//!
//! - [`Kv`] — the shared KV store holding leases, suppression keys, caches,
//!   and the `job_queue` / `alert_queue` FIFOs.
//! - [`Database`] — the relational store owning jobs, alerts, and job runs.
//!   The worker holds read/mutate contracts against it; schema is managed
//!   elsewhere.
//! - [`DocumentStore`] — the document store collaborator receiving raw scrape
//!   and analysis payloads. Write-only from the worker's point of view.

pub mod db;
pub mod docs;
pub mod error;
pub mod kv;

pub use db::Database;
pub use docs::DocumentStore;
pub use error::StoreError;
pub use kv::Kv;
