//! # Wraith
//!
//! Blocking HTTP/1.1 client engine with persistent connections, pipelining,
//! idempotent retries, and a middleware stack.
//!
//! A [`Connection`] is bound to one destination and drives the wire protocol
//! over a per-thread cached socket:
//!
//! ```rust,no_run
//! use wraith::{Connection, Options, RequestOptions};
//!
//! # fn main() -> wraith::Result<()> {
//! let conn = Connection::new("http://example.com", Options::default())?;
//! let response = conn.get(RequestOptions::new().path("/status"))?;
//! assert!(response.is_success());
//!
//! // Streamed upload (chunked) and download (sink):
//! let mut chunks = vec![bytes::Bytes::new(), bytes::Bytes::from_static(b"payload")];
//! conn.put(
//!     RequestOptions::new()
//!         .path("/upload")
//!         .request_block(move || chunks.pop().unwrap_or_default()),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! Middlewares wrap the request/response pair around the wire layer; the
//! built-in [`ExpectedStatuses`] and [`Mock`] layers are installed by
//! default. Idempotent requests retry transparently on transport-class
//! failures, resetting the cached socket between attempts.

mod auth;
mod cache;
mod connection;
pub mod error;
pub mod headers;
pub mod instrument;
pub mod middleware;
pub mod options;
pub mod proxy;
pub mod query;
pub mod response;
pub mod transport;
mod wire;

pub use auth::{basic_auth, parse_basic_auth};
pub use connection::Connection;
pub use error::{Error, Result};
pub use headers::Headers;
pub use instrument::{Instrumentor, LogInstrumentor};
pub use middleware::{
    clear_stubs, stub, unstub, ExpectedStatuses, Middleware, Mock, StubReply, StubRequest,
    StubResponse,
};
pub use options::{
    AddrFamily, Body, ChunkSink, ChunkSource, Datum, Options, RequestOptions, DEFAULT_CHUNK_SIZE,
    DEFAULT_RETRY_LIMIT, DEFAULT_TIMEOUT,
};
pub use proxy::{Proxy, ProxySetting};
pub use query::{Query, QueryValue};
pub use response::Response;
pub use transport::{TcpTransport, TlsTransport, Transport};
