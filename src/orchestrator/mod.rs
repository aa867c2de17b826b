//! Dev-server orchestration.
//!
//! Covers spawning session dev servers, turning their output into ordered
//! events, and detecting when they are ready to serve.

pub mod child_events;
pub mod dev_server;
pub mod url_detector;
