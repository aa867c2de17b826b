//! Domain model module declarations.

pub mod activity;
pub mod log;
pub mod process;
pub mod server;
pub mod status;

/// Identifier of a user-facing session, as assigned by the session registry.
pub type SessionId = u32;
