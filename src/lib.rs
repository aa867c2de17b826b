#![forbid(unsafe_code)]

//! Process lifecycle and activity observability for terminal sessions.

pub mod config;
pub mod errors;
pub mod log_manager;
pub mod models;
pub mod orchestrator;
pub mod ports;
pub mod process;
pub mod status;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
