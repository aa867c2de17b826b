//! Status file exchange between the service and UI processes.
//!
//! The service is the only writer: [`publisher::StatusPublisher`] replaces
//! the whole document through [`file::StatusWriter`]. The UI is the only
//! reader: [`watcher::StatusWatcher`] turns file-system notifications
//! (with a polling fallback) into parsed documents.

pub mod file;
pub mod paths;
pub mod publisher;
pub mod watcher;
