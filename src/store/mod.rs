//! In-memory stores shared between listener workers and control callers.
//!
//! - [`LogStore`]: size-bounded byte log with logical offsets and windowed reads
//! - [`ErrorLog`]: bounded queue of timestamped error messages
//!
//! Both are safe to share behind an `Arc`. Every operation takes a single
//! short lock and never holds it across I/O.

pub mod errors;
pub mod log;

pub use errors::{ErrorEntry, ErrorLog};
pub use log::{LogStore, LogWindow};
