//! Newline-delimited JSON control server.
//!
//! Reads one request per line and writes one response per line. Blank lines
//! are skipped. A line that is not valid UTF-8 gets an error response like
//! any other malformed request. The loop ends at end of input.

use super::dispatch::Dispatcher;
use super::error::ControlError;
use super::protocol::Response;
use crate::tunnel::TunnelProvider;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Serve control requests from `reader`, answering on `writer`.
///
/// # Errors
///
/// Returns an I/O error if reading a line or writing a response fails.
pub async fn serve<R, W, P>(
    mut reader: R,
    mut writer: W,
    dispatcher: &Dispatcher<P>,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    P: TunnelProvider,
{
    let mut buf = Vec::new();
    info!("Control server ready");

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }

        let response = match std::str::from_utf8(&buf) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                debug!("Control request: {}", line);
                dispatcher.handle_line(line).await
            }
            Err(e) => {
                debug!("Control request is not UTF-8: {}", e);
                Response::failure(ControlError::from(e).to_string())
            }
        };
        write_response(&mut writer, &response).await?;
    }

    info!("Control input closed");
    Ok(())
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
) -> io::Result<()> {
    let mut encoded = serde_json::to_vec(response).map_err(io::Error::other)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerOptions;
    use crate::registry::Registry;
    use crate::tunnel::LoopbackTunnelProvider;
    use std::sync::Arc;
    use tokio::io::BufReader;

    async fn run(input: &str) -> Vec<Response> {
        run_bytes(input.as_bytes()).await
    }

    async fn run_bytes(input: &[u8]) -> Vec<Response> {
        let registry = Arc::new(Registry::new(
            LoopbackTunnelProvider::default(),
            ListenerOptions::default(),
        ));
        let dispatcher = Dispatcher::new(registry.clone());

        let mut output = Vec::new();
        serve(BufReader::new(input), &mut output, &dispatcher)
            .await
            .unwrap();
        registry.close_all().await;

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_one_response_per_line() {
        let responses = run("{\"op\":\"status\"}\n\n{\"op\":\"status\"}\n").await;
        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|r| r.ok));
    }

    #[tokio::test]
    async fn test_bad_line_does_not_stop_server() {
        let responses = run("garbage\n{\"op\":\"status\"}\n").await;
        assert_eq!(responses.len(), 2);
        assert!(!responses[0].ok);
        assert!(responses[1].ok);
    }

    #[tokio::test]
    async fn test_non_utf8_line_does_not_stop_server() {
        let responses = run_bytes(b"\xff\xfe\n{\"op\":\"status\"}\n").await;
        assert_eq!(responses.len(), 2);
        assert!(!responses[0].ok);
        assert!(
            responses[0]
                .error
                .as_deref()
                .unwrap()
                .starts_with("invalid request: ")
        );
        assert!(responses[1].ok);
    }

    #[tokio::test]
    async fn test_error_response_for_unknown_port() {
        let responses = run("{\"op\":\"read_tcp\",\"port\":9}").await;
        assert_eq!(responses.len(), 1);
        assert_eq!(
            responses[0].error.as_deref(),
            Some("port 9 not listening (tcp)")
        );
    }
}
