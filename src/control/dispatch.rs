//! Request dispatch onto the registry.

use super::encoding::Encoding;
use super::error::{ControlError, ControlResult};
use super::protocol::{PortResult, ReadArgs, ReadResult, Request, Response, SendResult};
use crate::listener::Protocol;
use crate::registry::Registry;
use crate::tunnel::TunnelProvider;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Executes control requests against a shared registry.
pub struct Dispatcher<P: TunnelProvider> {
    registry: Arc<Registry<P>>,
}

impl<P: TunnelProvider> Dispatcher<P> {
    /// Create a dispatcher for `registry`.
    pub fn new(registry: Arc<Registry<P>>) -> Self {
        Self { registry }
    }

    /// The registry requests are applied to.
    pub fn registry(&self) -> &Arc<Registry<P>> {
        &self.registry
    }

    /// Parse and execute one request line.
    ///
    /// Never fails: parse and execution errors become failure responses.
    pub async fn handle_line(&self, line: &str) -> Response {
        let request = match serde_json::from_str::<Request>(line) {
            Ok(request) => request,
            Err(e) => return Response::failure(ControlError::from(e).to_string()),
        };

        match self.handle(request).await {
            Ok(result) => Response::success(result),
            Err(e) => {
                debug!("Control request failed: {}", e);
                Response::failure(e.to_string())
            }
        }
    }

    /// Execute a request and return its JSON result.
    ///
    /// # Errors
    ///
    /// Returns the registry error, or an argument error for bad encodings
    /// and negative offsets.
    pub async fn handle(&self, request: Request) -> ControlResult<Value> {
        match request {
            Request::Status => to_value(&self.registry.status()),
            Request::ListenTcp { port } => to_value(&self.registry.open_tcp(port).await?),
            Request::ListenHttp { port } => to_value(&self.registry.open_http(port).await?),
            Request::CloseTcp { port } => {
                self.registry.close_tcp(port).await?;
                to_value(&PortResult { port })
            }
            Request::CloseHttp { port } => {
                self.registry.close_http(port).await?;
                to_value(&PortResult { port })
            }
            Request::SendTcp {
                port,
                data,
                encoding,
            } => {
                let payload = Encoding::parse(encoding.as_deref())?.decode(&data)?;
                let bytes = self.registry.send_tcp(port, &payload).await?;
                to_value(&SendResult { port, bytes })
            }
            Request::ReadTcp(args) => self.read(Protocol::Tcp, args),
            Request::ReadHttp(args) => self.read(Protocol::Http, args),
        }
    }

    fn read(&self, protocol: Protocol, args: ReadArgs) -> ControlResult<Value> {
        let encoding = Encoding::parse(args.encoding.as_deref())?;
        let offset =
            u64::try_from(args.offset).map_err(|_| ControlError::NegativeOffset(args.offset))?;
        let limit = if args.limit <= 0 {
            0
        } else {
            usize::try_from(args.limit).unwrap_or(usize::MAX)
        };

        let window = match protocol {
            Protocol::Tcp => self.registry.read_tcp(args.port, offset, limit)?,
            Protocol::Http => self.registry.read_http(args.port, offset, limit)?,
        };

        to_value(&ReadResult {
            port: args.port,
            offset,
            next: window.next,
            total: window.total,
            truncated: window.truncated,
            encoding,
            data: encoding.encode(&window.data),
        })
    }
}

fn to_value<T: Serialize>(value: &T) -> ControlResult<Value> {
    Ok(serde_json::to_value(value)?)
}
