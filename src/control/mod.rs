//! Control surface.
//!
//! - [`protocol`]: request/response message types
//! - [`encoding`]: `utf8` / `base64` payload encoding
//! - [`dispatch`]: applies requests to a [`Registry`](crate::registry::Registry)
//! - [`server`]: newline-delimited JSON loop over any async reader/writer
//!
//! The binary serves this protocol on stdin/stdout.

pub mod dispatch;
pub mod encoding;
pub mod error;
pub mod protocol;
pub mod server;

pub use dispatch::Dispatcher;
pub use encoding::Encoding;
pub use error::{ControlError, ControlResult};
pub use protocol::{ReadArgs, ReadResult, Request, Response};
pub use server::serve;
