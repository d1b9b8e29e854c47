//! OTA Agent - device-side client for fleet-managed firmware rollouts
//!
//! Each cycle authenticates with an HMAC-signed login, registers the
//! device once, asks the backend for a pending rollout, resolves the
//! image's content identifier through the ledger, downloads and applies
//! the image, reports the outcome and restarts.

pub mod agent;

pub use agent::backend::{Backend, HttpBackend};
pub use agent::config::AgentConfig;
pub use agent::orchestrator::{CycleContext, CycleOutcome, Orchestrator};
pub use agent::updater::{HttpUpdater, Updater};
