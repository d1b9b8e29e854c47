// OTA agent - core module structure
pub mod backend;
pub mod config;
pub mod orchestrator;
pub mod signer;
pub mod updater;

pub use config::AgentConfig;
pub use orchestrator::{CycleContext, CycleOutcome, Orchestrator};
