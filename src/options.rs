//! Request options, connection defaults, and the per-request datum.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Method;

use crate::headers::Headers;
use crate::instrument::Instrumentor;
use crate::middleware::{self, Middleware, Stack};
use crate::proxy::{Proxy, ProxySetting};
use crate::query::Query;
use crate::response::Response;
use crate::transport::Transport;

/// Default read granularity and streaming chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default retry budget for idempotent requests.
pub const DEFAULT_RETRY_LIMIT: u32 = 2;

/// Default per-phase socket deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Socket address family hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrFamily {
    V4,
    V6,
}

/// Request payload.
pub enum Body {
    Empty,
    Bytes(Bytes),
    /// Streamed from disk in `chunk_size` slices; rewound to the start before
    /// each send, sized via metadata.
    File(File),
    /// Any reader, streamed in `chunk_size` slices. `length` feeds
    /// `Content-Length`; without it the declared length falls back to zero.
    Reader {
        reader: Box<dyn Read + Send>,
        length: Option<u64>,
    },
}

impl Body {
    /// A reader body with a declared length.
    pub fn reader(reader: impl Read + Send + 'static, length: Option<u64>) -> Self {
        Self::Reader {
            reader: Box::new(reader),
            length,
        }
    }

    /// Whether no payload is present at all. An empty byte body still counts
    /// as present and emits `Content-Length: 0`.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Declared length for `Content-Length`.
    pub(crate) fn content_length(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::File(file) => file.metadata().map(|meta| meta.len()).unwrap_or(0),
            Self::Reader { length, .. } => length.unwrap_or(0),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::Empty
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Body::Empty"),
            Self::Bytes(bytes) => write!(f, "Body::Bytes({} bytes)", bytes.len()),
            Self::File(_) => f.write_str("Body::File"),
            Self::Reader { length, .. } => write!(f, "Body::Reader(length: {length:?})"),
        }
    }
}

impl From<&str> for Body {
    fn from(body: &str) -> Self {
        Self::Bytes(Bytes::copy_from_slice(body.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(body: String) -> Self {
        Self::Bytes(Bytes::from(body))
    }
}

impl From<Vec<u8>> for Body {
    fn from(body: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(body))
    }
}

impl From<Bytes> for Body {
    fn from(body: Bytes) -> Self {
        Self::Bytes(body)
    }
}

impl From<File> for Body {
    fn from(file: File) -> Self {
        Self::File(file)
    }
}

/// Pull source for chunked uploads. An empty chunk terminates the stream.
pub type ChunkSource = Box<dyn FnMut() -> Bytes + Send>;

/// Push sink for streamed downloads, called as `(chunk, remaining, total)`.
///
/// Chunked framing passes `(chunk, None, None)`; content-length framing
/// passes the bytes left after this chunk and the declared total; read-to-
/// close framing passes the chunk length and no total.
pub type ChunkSink = Box<dyn FnMut(&[u8], Option<u64>, Option<u64>) + Send>;

/// Connection defaults, bound at construction and merged under each
/// request's overrides.
#[derive(Clone)]
pub struct Options {
    /// Target components; `None` falls back to the base URL.
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub query: Option<Query>,
    /// Default headers, overlaid with per-request headers.
    pub headers: Headers,
    /// Basic auth credentials; base-URL userinfo fills these when unset.
    pub user: Option<String>,
    pub password: Option<String>,
    pub chunk_size: usize,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub retry_limit: u32,
    pub idempotent: bool,
    /// Acceptable status codes; empty accepts anything.
    pub expects: Vec<u16>,
    pub proxy: ProxySetting,
    /// Route requests through the stub registry instead of the wire.
    pub mock: bool,
    pub family: Option<AddrFamily>,
    /// Nonblocking-socket hint, forwarded opaquely to the transport. The
    /// built-in blocking transports take no action on it.
    pub nonblock: bool,
    /// Extra PEM trust anchors for the TLS transport.
    pub ssl_ca_file: Option<PathBuf>,
    /// Disabling peer verification skips all certificate checks.
    pub ssl_verify_peer: bool,
    pub instrumentor: Option<Arc<dyn Instrumentor>>,
    /// Event name prefix for instrumentation.
    pub instrumentor_name: String,
    /// Middleware list, outermost first.
    pub middlewares: Vec<Arc<dyn Middleware>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            scheme: None,
            host: None,
            port: None,
            path: None,
            query: None,
            headers: Headers::new(),
            user: None,
            password: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout: Some(DEFAULT_TIMEOUT),
            read_timeout: Some(DEFAULT_TIMEOUT),
            write_timeout: Some(DEFAULT_TIMEOUT),
            retry_limit: DEFAULT_RETRY_LIMIT,
            idempotent: false,
            expects: Vec::new(),
            proxy: ProxySetting::default(),
            mock: false,
            family: None,
            nonblock: false,
            ssl_ca_file: None,
            ssl_verify_peer: true,
            instrumentor: None,
            instrumentor_name: "wraith".to_string(),
            middlewares: middleware::default_middlewares(),
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn query(mut self, query: impl Into<Query>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Add a default header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    pub fn retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn expects<I: IntoIterator<Item = u16>>(mut self, statuses: I) -> Self {
        self.expects = statuses.into_iter().collect();
        self
    }

    pub fn proxy(mut self, setting: ProxySetting) -> Self {
        self.proxy = setting;
        self
    }

    /// Proxy via a URL string, parsed at connection construction.
    pub fn proxy_url(mut self, url: impl Into<String>) -> Self {
        self.proxy = ProxySetting::Url(url.into());
        self
    }

    /// Disable proxying, including environment resolution.
    pub fn no_proxy(mut self) -> Self {
        self.proxy = ProxySetting::Disabled;
        self
    }

    pub fn mock(mut self, mock: bool) -> Self {
        self.mock = mock;
        self
    }

    pub fn family(mut self, family: AddrFamily) -> Self {
        self.family = Some(family);
        self
    }

    pub fn nonblock(mut self, nonblock: bool) -> Self {
        self.nonblock = nonblock;
        self
    }

    pub fn ssl_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssl_ca_file = Some(path.into());
        self
    }

    pub fn ssl_verify_peer(mut self, verify: bool) -> Self {
        self.ssl_verify_peer = verify;
        self
    }

    pub fn instrumentor(mut self, instrumentor: Arc<dyn Instrumentor>) -> Self {
        self.instrumentor = Some(instrumentor);
        self
    }

    pub fn instrumentor_name(mut self, name: impl Into<String>) -> Self {
        self.instrumentor_name = name.into();
        self
    }

    pub fn middlewares(mut self, middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        self.middlewares = middlewares;
        self
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "REDACTED"))
            .field("chunk_size", &self.chunk_size)
            .field("retry_limit", &self.retry_limit)
            .field("idempotent", &self.idempotent)
            .field("expects", &self.expects)
            .field("proxy", &self.proxy)
            .field("mock", &self.mock)
            .finish_non_exhaustive()
    }
}

/// Per-request overrides merged over the connection defaults.
#[derive(Default)]
pub struct RequestOptions {
    pub(crate) method: Option<Method>,
    pub(crate) method_name: Option<String>,
    pub(crate) path: Option<String>,
    pub(crate) query: Option<Query>,
    pub(crate) headers: Headers,
    pub(crate) body: Option<Body>,
    pub(crate) request_block: Option<ChunkSource>,
    pub(crate) response_block: Option<ChunkSink>,
    pub(crate) expects: Option<Vec<u16>>,
    pub(crate) idempotent: Option<bool>,
    pub(crate) retry_limit: Option<u32>,
    pub(crate) retries_remaining: Option<u32>,
    pub(crate) chunk_size: Option<usize>,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
    pub(crate) mock: Option<bool>,
    pub(crate) captures: Option<HashMap<String, String>>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Verb by name, case-insensitively; emitted uppercase on the wire.
    pub fn method_name(mut self, name: impl Into<String>) -> Self {
        self.method_name = Some(name.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn query(mut self, query: impl Into<Query>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Stream the request body from a pull source, forcing chunked encoding.
    /// The source is called until it returns an empty chunk.
    pub fn request_block(mut self, source: impl FnMut() -> Bytes + Send + 'static) -> Self {
        self.request_block = Some(Box::new(source));
        self
    }

    /// Stream the response body into a push sink instead of accumulating it.
    pub fn response_block(
        mut self,
        sink: impl FnMut(&[u8], Option<u64>, Option<u64>) + Send + 'static,
    ) -> Self {
        self.response_block = Some(Box::new(sink));
        self
    }

    pub fn expects<I: IntoIterator<Item = u16>>(mut self, statuses: I) -> Self {
        self.expects = Some(statuses.into_iter().collect());
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    pub fn retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = Some(retry_limit);
        self
    }

    pub fn retries_remaining(mut self, retries_remaining: u32) -> Self {
        self.retries_remaining = Some(retries_remaining);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    pub fn mock(mut self, mock: bool) -> Self {
        self.mock = Some(mock);
        self
    }

    /// Caller-provided captures, surfaced to stub middleware.
    pub fn captures(mut self, captures: HashMap<String, String>) -> Self {
        self.captures = Some(captures);
        self
    }
}

/// The mutable per-request record threaded through the middleware stack and
/// the wire layer.
pub struct Datum {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: Option<Query>,
    pub method: Method,
    pub headers: Headers,
    pub body: Body,
    pub request_block: Option<ChunkSource>,
    pub response_block: Option<ChunkSink>,
    pub chunk_size: usize,
    pub expects: Vec<u16>,
    pub idempotent: bool,
    pub retry_limit: u32,
    pub retries_remaining: u32,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub proxy: Option<Proxy>,
    pub mock: bool,
    pub captures: Option<HashMap<String, String>>,
    pub pipeline: bool,
    /// Populated by the wire reader, or earlier by a short-circuiting
    /// middleware.
    pub response: Option<Response>,
    pub(crate) family: Option<AddrFamily>,
    pub(crate) nonblock: bool,
    pub(crate) ssl_ca_file: Option<PathBuf>,
    pub(crate) ssl_verify_peer: bool,
    pub(crate) instrumentor: Option<Arc<dyn Instrumentor>>,
    pub(crate) instrumentor_name: String,
    pub(crate) stack: Stack,
    /// Socket checked out of the thread-local cache for the exchange.
    pub(crate) transport: Option<Box<dyn Transport>>,
}

impl Default for Datum {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: String::new(),
            port: 80,
            path: "/".to_string(),
            query: None,
            method: Method::GET,
            headers: Headers::new(),
            body: Body::Empty,
            request_block: None,
            response_block: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            expects: Vec::new(),
            idempotent: false,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retries_remaining: DEFAULT_RETRY_LIMIT,
            connect_timeout: Some(DEFAULT_TIMEOUT),
            read_timeout: Some(DEFAULT_TIMEOUT),
            write_timeout: Some(DEFAULT_TIMEOUT),
            proxy: None,
            mock: false,
            captures: None,
            pipeline: false,
            response: None,
            family: None,
            nonblock: false,
            ssl_ca_file: None,
            ssl_verify_peer: true,
            instrumentor: None,
            instrumentor_name: "wraith".to_string(),
            stack: Stack::default(),
            transport: None,
        }
    }
}

impl fmt::Debug for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datum")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("chunk_size", &self.chunk_size)
            .field("expects", &self.expects)
            .field("idempotent", &self.idempotent)
            .field("retry_limit", &self.retry_limit)
            .field("retries_remaining", &self.retries_remaining)
            .field("proxy", &self.proxy)
            .field("mock", &self.mock)
            .field("pipeline", &self.pipeline)
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}
