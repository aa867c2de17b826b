//! Process-table access and activity classification.
//!
//! Covers descendant enumeration, the periodic activity monitor, and
//! signal delivery for stopping processes.

pub mod activity;
pub mod signal;
pub mod tree;
