//! HTTP capture listener.
//!
//! Serves HTTP/1.1 with hyper and records every request as one formatted
//! entry in the listener's log. Every request is answered with `200 OK` and
//! the body `ok\n`, whatever it asked for.
//!
//! # Log Entry Format
//!
//! ```text
//! ----
//! 2026-01-07T14:32:01Z GET /x?y=1 HTTP/1.1 from 203.0.113.7:51234
//! Host: probe.example
//! Accept: */*
//! Foo: bar
//!
//! <body>
//! [body truncated]
//! ----
//! ```
//!
//! The blank line and body appear only when the body is non-empty, and the
//! truncation marker only when the body exceeded the configured cap.
//!
//! # Architecture
//!
//! One accept-loop task per listener. Each connection runs on its own task
//! inside a `JoinSet`, so closing the listener can abort in-flight
//! connections before the socket is released.

use super::{ListenerError, ListenerOptions, ListenerResult, shutdown_signalled};
use crate::store::{ErrorLog, LogStore, LogWindow};
use crate::telemetry::{EventLogger, ProbeEvent};
use crate::tunnel::Tunnel;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::header::{CONTENT_TYPE, HOST, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, Uri, Version};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// State shared by the accept loop and every connection task.
struct CaptureContext {
    port: u16,
    log: LogStore,
    errors: ErrorLog,
    requests: AtomicU64,
    max_body_bytes: usize,
    events: Arc<EventLogger>,
}

/// An HTTP capture listener.
pub struct HttpCaptureListener {
    id: Uuid,
    ctx: Arc<CaptureContext>,
    local_addr: SocketAddr,
    tunnel: Mutex<Option<Box<dyn Tunnel>>>,
    public_url: OnceLock<String>,
    shutdown_tx: watch::Sender<bool>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl HttpCaptureListener {
    /// Bind `host:port` and start serving.
    ///
    /// The listener has no tunnel yet; attach one with
    /// [`attach_tunnel`](Self::attach_tunnel).
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::BindFailed`] if the address is unavailable.
    pub async fn bind(host: IpAddr, port: u16, options: &ListenerOptions) -> ListenerResult<Self> {
        let socket = TcpListener::bind((host, port))
            .await
            .map_err(|source| ListenerError::BindFailed { host, port, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| ListenerError::BindFailed { host, port, source })?;

        let ctx = Arc::new(CaptureContext {
            port: local_addr.port(),
            log: LogStore::new(options.log_max_bytes),
            errors: ErrorLog::new(options.error_log_capacity),
            requests: AtomicU64::new(0),
            max_body_bytes: options.max_body_bytes,
            events: options.events.clone(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(serve(socket, ctx.clone(), shutdown_rx));

        info!("HTTP listener serving on {}", local_addr);

        Ok(Self {
            id: Uuid::new_v4(),
            ctx,
            local_addr,
            tunnel: Mutex::new(None),
            public_url: OnceLock::new(),
            shutdown_tx,
            server: Mutex::new(Some(handle)),
        })
    }

    /// Hand the listener its tunnel. The first tunnel attached wins.
    pub fn attach_tunnel(&self, tunnel: Box<dyn Tunnel>) {
        let _ = self.public_url.set(tunnel.public_url());
        let mut slot = self.tunnel.lock().unwrap();
        if slot.is_none() {
            *slot = Some(tunnel);
        }
    }

    /// Unique listener id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Local port.
    pub fn port(&self) -> u16 {
        self.ctx.port
    }

    /// Bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Public URL of the attached tunnel, empty before one is attached.
    pub fn public_url(&self) -> String {
        self.public_url.get().cloned().unwrap_or_default()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> u64 {
        self.ctx.requests.load(Ordering::Relaxed)
    }

    /// Read a window of the request log.
    pub fn read(&self, offset: u64, limit: usize) -> LogWindow {
        self.ctx.log.read(offset, limit)
    }

    /// Request log.
    pub fn log(&self) -> &LogStore {
        &self.ctx.log
    }

    /// Recorded error messages, oldest first.
    pub fn errors(&self) -> Vec<String> {
        self.ctx.errors.messages()
    }

    /// Close the listener: tunnel first, then the server and its socket.
    ///
    /// In-flight connections are aborted. Returns once the socket is
    /// released.
    pub async fn close(&self) -> ListenerResult<()> {
        let tunnel = self.tunnel.lock().unwrap().take();
        let tunnel_result = match tunnel {
            Some(mut tunnel) => tunnel.close().map_err(ListenerError::from),
            None => Ok(()),
        };

        let _ = self.shutdown_tx.send(true);
        let handle = self.server.lock().unwrap().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("HTTP server on port {} ended abnormally: {}", self.ctx.port, e);
        }

        info!("HTTP listener on port {} closed", self.ctx.port);
        tunnel_result
    }
}

impl Drop for HttpCaptureListener {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Accept loop. Runs until shutdown, then aborts every connection task.
async fn serve(
    socket: TcpListener,
    ctx: Arc<CaptureContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = socket.accept() => match result {
                Ok((stream, remote)) => {
                    debug!("HTTP connection on port {} from {}", ctx.port, remote);
                    connections.spawn(serve_connection(stream, remote, ctx.clone()));
                }
                Err(e) => {
                    warn!("HTTP accept failed on port {}: {}", ctx.port, e);
                    ctx.errors
                        .push(format!("http accept failed port={}: {}", ctx.port, e));
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown_signalled(&mut shutdown_rx) => {
                debug!("HTTP listener on port {} shutting down", ctx.port);
                break;
            }
        }
    }

    drop(socket);
    connections.abort_all();
    while connections.join_next().await.is_some() {}
}

/// Serve one HTTP/1.1 connection.
async fn serve_connection(stream: TcpStream, remote: SocketAddr, ctx: Arc<CaptureContext>) {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let ctx = ctx.clone();
        async move { capture_request(req, remote, ctx).await }
    });

    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
        debug!("HTTP connection from {} ended: {}", remote, e);
    }
}

/// Record one request and answer `200 OK`.
async fn capture_request(
    req: Request<Incoming>,
    remote: SocketAddr,
    ctx: Arc<CaptureContext>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Infallible> {
    ctx.requests.fetch_add(1, Ordering::Relaxed);

    let (parts, body) = req.into_parts();
    let body = read_capped(body, ctx.max_body_bytes).await;

    let entry = format_entry(
        &RequestHead {
            method: &parts.method,
            uri: &parts.uri,
            version: parts.version,
            headers: &parts.headers,
            remote,
        },
        &body,
        Utc::now(),
    );
    ctx.log.append(&entry);

    ctx.events.log(ProbeEvent::HttpRequest {
        port: ctx.port,
        method: parts.method.to_string(),
        uri: parts.uri.to_string(),
        remote: remote.to_string(),
    });

    Ok(ok_response())
}

/// Create the fixed response.
fn ok_response() -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full_body("ok\n"));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Create a full body from static content.
fn full_body(content: &'static str) -> BoxBody<Bytes, hyper::Error> {
    Full::new(Bytes::from_static(content.as_bytes()))
        .map_err(|never| match never {})
        .boxed()
}

/// Request body as it will be logged.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CapturedBody {
    data: Vec<u8>,
    truncated: bool,
}

/// Read at most `cap` bytes of body, noting whether more was sent.
///
/// A read error replaces the body with an inline marker.
async fn read_capped<B>(body: B, cap: usize) -> CapturedBody
where
    B: Body<Data = Bytes>,
    B::Error: fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut data = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                return CapturedBody {
                    data: format!("[body read error: {}]\n", e).into_bytes(),
                    truncated: false,
                };
            }
        };
        let Ok(chunk) = frame.into_data() else {
            continue;
        };

        let room = cap - data.len();
        if chunk.len() > room {
            data.extend_from_slice(&chunk[..room]);
            return CapturedBody {
                data,
                truncated: true,
            };
        }
        data.extend_from_slice(&chunk);
    }

    CapturedBody {
        data,
        truncated: false,
    }
}

/// The parts of a request that appear in the log entry.
struct RequestHead<'a> {
    method: &'a Method,
    uri: &'a Uri,
    version: Version,
    headers: &'a HeaderMap,
    remote: SocketAddr,
}

/// Format one log entry.
fn format_entry(head: &RequestHead<'_>, body: &CapturedBody, now: DateTime<Utc>) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + body.data.len());

    out.extend_from_slice(b"----\n");
    out.extend_from_slice(
        format!(
            "{} {} {} {:?} from {}\n",
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
            head.method,
            head.uri,
            head.version,
            head.remote,
        )
        .as_bytes(),
    );

    let host = head
        .headers
        .get(HOST)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .or_else(|| head.uri.authority().map(|a| a.to_string()));
    if let Some(host) = host.filter(|h| !h.is_empty()) {
        out.extend_from_slice(format!("Host: {}\n", host).as_bytes());
    }

    let mut lines: Vec<(String, String)> = head
        .headers
        .keys()
        .filter(|name| *name != HOST)
        .map(|name| {
            let values: Vec<String> = head
                .headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            (canonical_header_name(name.as_str()), values.join(", "))
        })
        .collect();
    lines.sort();

    for (name, value) in lines {
        out.extend_from_slice(format!("{}: {}\n", name, value).as_bytes());
    }

    if !body.data.is_empty() {
        out.push(b'\n');
        out.extend_from_slice(&body.data);
        if body.data.last() != Some(&b'\n') {
            out.push(b'\n');
        }
    }
    if body.truncated {
        out.extend_from_slice(b"[body truncated]\n");
    }
    out.extend_from_slice(b"----\n");

    out
}

/// Canonical MIME form: `x-forwarded-for` becomes `X-Forwarded-For`.
fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hyper::body::Frame;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 7, 14, 32, 1).unwrap()
    }

    fn remote() -> SocketAddr {
        "203.0.113.7:51234".parse().unwrap()
    }

    fn entry_for(req: &Request<()>, body: CapturedBody) -> String {
        let head = RequestHead {
            method: req.method(),
            uri: req.uri(),
            version: req.version(),
            headers: req.headers(),
            remote: remote(),
        };
        String::from_utf8(format_entry(&head, &body, fixed_time())).unwrap()
    }

    fn no_body() -> CapturedBody {
        CapturedBody {
            data: Vec::new(),
            truncated: false,
        }
    }

    struct FailingBody;

    impl Body for FailingBody {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Ready(Some(Err(std::io::Error::other("connection reset"))))
        }
    }

    #[test]
    fn test_canonical_header_name() {
        assert_eq!(canonical_header_name("foo"), "Foo");
        assert_eq!(canonical_header_name("content-type"), "Content-Type");
        assert_eq!(canonical_header_name("x-FORWARDED-for"), "X-Forwarded-For");
    }

    #[test]
    fn test_entry_shape_without_body() {
        let req = Request::builder()
            .method("GET")
            .uri("/x")
            .header("host", "probe.example")
            .header("foo", "bar")
            .body(())
            .unwrap();

        let entry = entry_for(&req, no_body());
        assert_eq!(
            entry,
            "----\n\
             2026-01-07T14:32:01Z GET /x HTTP/1.1 from 203.0.113.7:51234\n\
             Host: probe.example\n\
             Foo: bar\n\
             ----\n"
        );
    }

    #[test]
    fn test_headers_sorted_and_joined() {
        let req = Request::builder()
            .method("POST")
            .uri("/cb?id=7")
            .header("x-trace", "1")
            .header("accept", "text/html")
            .header("x-trace", "2")
            .body(())
            .unwrap();

        let entry = entry_for(&req, no_body());
        let accept = entry.find("Accept: text/html\n").unwrap();
        let trace = entry.find("X-Trace: 1, 2\n").unwrap();
        assert!(accept < trace);
        assert!(entry.contains("POST /cb?id=7 HTTP/1.1"));
        assert!(!entry.contains("Host:"));
    }

    #[test]
    fn test_body_gets_blank_line_and_newline() {
        let req = Request::builder().uri("/").body(()).unwrap();
        let body = CapturedBody {
            data: b"a=1".to_vec(),
            truncated: false,
        };

        let entry = entry_for(&req, body);
        assert!(entry.ends_with("\n\na=1\n----\n"));
    }

    #[test]
    fn test_truncated_marker() {
        let req = Request::builder().uri("/").body(()).unwrap();
        let body = CapturedBody {
            data: b"abc\n".to_vec(),
            truncated: true,
        };

        let entry = entry_for(&req, body);
        assert!(entry.ends_with("\n\nabc\n[body truncated]\n----\n"));
    }

    #[tokio::test]
    async fn test_read_capped_within_limit() {
        let body = read_capped(Full::new(Bytes::from_static(b"hello")), 5).await;
        assert_eq!(body.data, b"hello");
        assert!(!body.truncated);
    }

    #[tokio::test]
    async fn test_read_capped_truncates() {
        let body = read_capped(Full::new(Bytes::from_static(b"hello world")), 5).await;
        assert_eq!(body.data, b"hello");
        assert!(body.truncated);
    }

    #[tokio::test]
    async fn test_read_error_is_inlined() {
        let body = read_capped(FailingBody, 1024).await;
        assert_eq!(body.data, b"[body read error: connection reset]\n");
        assert!(!body.truncated);
    }

    #[tokio::test]
    async fn test_request_is_captured_and_answered() {
        let listener = HttpCaptureListener::bind(
            IpAddr::from([127, 0, 0, 1]),
            0,
            &ListenerOptions::default(),
        )
        .await
        .unwrap();

        let mut client = TcpStream::connect(listener.local_addr()).await.unwrap();
        client
            .write_all(b"GET /x HTTP/1.1\r\nHost: probe\r\nFoo: bar\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("text/plain; charset=utf-8"));
        assert!(response.ends_with("ok\n"));

        assert_eq!(listener.request_count(), 1);
        let logged = String::from_utf8(listener.read(0, 0).data).unwrap();
        assert!(logged.starts_with("----\n"));
        assert!(logged.contains(" GET /x HTTP/1.1 from 127.0.0.1:"));
        assert!(logged.contains("Host: probe\n"));
        assert!(logged.contains("Foo: bar\n"));
        assert!(logged.ends_with("----\n"));

        listener.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_requests_do_not_interleave() {
        const CLIENTS: usize = 16;

        let listener = HttpCaptureListener::bind(
            IpAddr::from([127, 0, 0, 1]),
            0,
            &ListenerOptions::default(),
        )
        .await
        .unwrap();
        let addr = listener.local_addr();

        let mut clients = JoinSet::new();
        for i in 0..CLIENTS {
            clients.spawn(async move {
                let body = format!("payload-{}\n", i).repeat(64);
                let mut request = format!("POST /req/{} HTTP/1.1\r\nHost: probe\r\n", i);
                request.push_str(&format!("Content-Length: {}\r\n", body.len()));
                request.push_str("Connection: close\r\n\r\n");
                request.push_str(&body);
                let mut client = TcpStream::connect(addr).await.unwrap();
                client.write_all(request.as_bytes()).await.unwrap();
                let mut response = Vec::new();
                client.read_to_end(&mut response).await.unwrap();
                assert!(response.starts_with(b"HTTP/1.1 200 OK"));
            });
        }
        while let Some(result) = clients.join_next().await {
            result.unwrap();
        }

        assert_eq!(listener.request_count(), CLIENTS as u64);

        let logged = String::from_utf8(listener.read(0, 0).data).unwrap();
        let entries: Vec<&str> = logged
            .split("----\n")
            .filter(|chunk| !chunk.is_empty())
            .collect();
        assert_eq!(entries.len(), CLIENTS);

        let mut seen: Vec<usize> = entries
            .iter()
            .map(|entry| {
                let request_lines: Vec<&str> = entry
                    .lines()
                    .filter(|line| line.contains(" from 127.0.0.1:"))
                    .collect();
                assert_eq!(request_lines.len(), 1, "entry: {}", entry);

                let path = request_lines[0].split(' ').nth(2).unwrap();
                let i: usize = path.trim_start_matches("/req/").parse().unwrap();
                let expected = format!("payload-{}\n", i).repeat(64);
                assert!(entry.ends_with(&expected), "entry: {}", entry);
                i
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..CLIENTS).collect::<Vec<_>>());

        listener.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_releases_port() {
        let host = IpAddr::from([127, 0, 0, 1]);
        let listener = HttpCaptureListener::bind(host, 0, &ListenerOptions::default())
            .await
            .unwrap();
        let port = listener.port();

        listener.close().await.unwrap();
        assert!(TcpListener::bind((host, port)).await.is_ok());
    }
}
