//! Port assignment and listening-socket discovery.

pub mod manager;
pub mod scanner;
