//! Control protocol message types.
//!
//! Requests and responses are single JSON objects, one per line.
//!
//! # Message Flow
//!
//! ```text
//! {"op":"listen_tcp","port":4444}
//!     -> {"ok":true,"result":{"port":4444,"public_url":"tcp://127.0.0.1:4444"}}
//! {"op":"read_tcp","port":4444,"offset":0,"limit":64,"encoding":"base64"}
//!     -> {"ok":true,"result":{"port":4444,"offset":0,"next":12,...}}
//! {"op":"close_tcp","port":1}
//!     -> {"ok":false,"error":"port 1 not listening (tcp)"}
//! ```

use super::encoding::Encoding;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A control request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Snapshot of listeners and background errors.
    Status,
    /// Open a TCP listener.
    ListenTcp {
        /// Port to listen on.
        port: u16,
    },
    /// Open an HTTP listener.
    ListenHttp {
        /// Port to listen on.
        port: u16,
    },
    /// Close a TCP listener.
    CloseTcp {
        /// Listener port.
        port: u16,
    },
    /// Close an HTTP listener.
    CloseHttp {
        /// Listener port.
        port: u16,
    },
    /// Send data on a TCP listener's connection.
    SendTcp {
        /// Listener port.
        port: u16,
        /// Payload, encoded per `encoding`.
        data: String,
        /// `utf8` (default) or `base64`.
        #[serde(default)]
        encoding: Option<String>,
    },
    /// Read a window of a TCP listener's log.
    ReadTcp(ReadArgs),
    /// Read a window of an HTTP listener's log.
    ReadHttp(ReadArgs),
}

/// Arguments of `read_tcp` / `read_http`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadArgs {
    /// Listener port.
    pub port: u16,
    /// Logical offset to start at.
    #[serde(default)]
    pub offset: i64,
    /// Maximum bytes to return; zero or less reads to the end.
    #[serde(default)]
    pub limit: i64,
    /// `utf8` (default) or `base64`.
    #[serde(default)]
    pub encoding: Option<String>,
}

/// Result of `close_tcp` / `close_http`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortResult {
    /// Listener port.
    pub port: u16,
}

/// Result of `send_tcp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendResult {
    /// Listener port.
    pub port: u16,
    /// Bytes written.
    pub bytes: usize,
}

/// Result of `read_tcp` / `read_http`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadResult {
    /// Listener port.
    pub port: u16,
    /// Offset as requested.
    pub offset: u64,
    /// Offset to request next.
    pub next: u64,
    /// Total bytes ever retained.
    pub total: u64,
    /// True when the requested offset had been evicted.
    pub truncated: bool,
    /// Encoding of `data`.
    pub encoding: Encoding,
    /// Window contents.
    pub data: String,
}

/// A control response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the request succeeded.
    pub ok: bool,
    /// Operation result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Successful response carrying `result`.
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// Failed response carrying `message`.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        let req: Request = serde_json::from_str(r#"{"op":"status"}"#).unwrap();
        assert_eq!(req, Request::Status);
    }

    #[test]
    fn test_parse_send_defaults_encoding() {
        let req: Request =
            serde_json::from_str(r#"{"op":"send_tcp","port":4444,"data":"hi"}"#).unwrap();
        assert_eq!(
            req,
            Request::SendTcp {
                port: 4444,
                data: "hi".to_string(),
                encoding: None,
            }
        );
    }

    #[test]
    fn test_parse_read_defaults() {
        let req: Request = serde_json::from_str(r#"{"op":"read_http","port":8080}"#).unwrap();
        assert_eq!(
            req,
            Request::ReadHttp(ReadArgs {
                port: 8080,
                offset: 0,
                limit: 0,
                encoding: None,
            })
        );
    }

    #[test]
    fn test_unknown_op_rejected() {
        let result: Result<Request, _> = serde_json::from_str(r#"{"op":"reboot"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_port_out_of_range_rejected() {
        let result: Result<Request, _> =
            serde_json::from_str(r#"{"op":"listen_tcp","port":70000}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_response_shapes() {
        let ok = serde_json::to_string(&Response::success(serde_json::json!({"port": 1}))).unwrap();
        assert_eq!(ok, r#"{"ok":true,"result":{"port":1}}"#);

        let err = serde_json::to_string(&Response::failure("boom")).unwrap();
        assert_eq!(err, r#"{"ok":false,"error":"boom"}"#);
    }
}
