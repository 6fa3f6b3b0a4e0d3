//! Stubbed responses for tests.
//!
//! Stubs live in a process-wide registry. A connection (or request) with
//! `mock` enabled is matched against the registry instead of touching the
//! wire; newest stubs win. A request with no matching stub raises
//! [`Error::StubNotFound`].

use std::sync::{Mutex, OnceLock, PoisonError};

use bytes::Bytes;
use http::Method;

use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::middleware::Middleware;
use crate::options::{Body, Datum};
use crate::response::Response;

/// Criteria a stub matches against; `None` (or empty headers) match any
/// request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StubRequest {
    pub method: Option<Method>,
    pub host: Option<String>,
    pub path: Option<String>,
    pub body: Option<Bytes>,
    /// Each pair must appear on the request; names compare case-insensitively.
    pub headers: Vec<(String, String)>,
}

impl StubRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn matches(&self, datum: &Datum) -> bool {
        if let Some(method) = &self.method {
            if datum.method != *method {
                return false;
            }
        }
        if let Some(host) = &self.host {
            if datum.host != *host {
                return false;
            }
        }
        if let Some(path) = &self.path {
            if datum.path != *path {
                return false;
            }
        }
        if let Some(body) = &self.body {
            match &datum.body {
                Body::Bytes(actual) if actual == body => {}
                _ => return false,
            }
        }
        self.headers
            .iter()
            .all(|(name, value)| datum.headers.get(name) == Some(value.as_str()))
    }
}

/// Canned response served by a matched stub.
#[derive(Clone, Debug, Default)]
pub struct StubResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl StubResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// What a matched stub produces: a canned response or a preset error.
pub enum StubReply {
    Response(StubResponse),
    Error(Box<dyn Fn() -> Error + Send + Sync>),
}

impl StubReply {
    /// A stub that raises the produced error on every match.
    pub fn error(make: impl Fn() -> Error + Send + Sync + 'static) -> Self {
        Self::Error(Box::new(make))
    }
}

impl From<StubResponse> for StubReply {
    fn from(response: StubResponse) -> Self {
        Self::Response(response)
    }
}

fn registry() -> &'static Mutex<Vec<(StubRequest, StubReply)>> {
    static STUBS: OnceLock<Mutex<Vec<(StubRequest, StubReply)>>> = OnceLock::new();
    STUBS.get_or_init(|| Mutex::new(Vec::new()))
}

/// Register a stub. Newer stubs take precedence over older ones.
pub fn stub(request: StubRequest, reply: impl Into<StubReply>) {
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push((request, reply.into()));
}

/// Remove the newest stub whose criteria equal `request`. Returns whether
/// one was removed.
pub fn unstub(request: &StubRequest) -> bool {
    let mut stubs = registry().lock().unwrap_or_else(PoisonError::into_inner);
    match stubs.iter().rposition(|(criteria, _)| criteria == request) {
        Some(index) => {
            stubs.remove(index);
            true
        }
        None => false,
    }
}

/// Drop every registered stub.
pub fn clear_stubs() {
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

/// Serves canned responses from the stub registry when `mock` is enabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mock;

impl Middleware for Mock {
    fn request_call(&self, datum: &mut Datum) -> Result<()> {
        if !datum.mock {
            return Ok(());
        }
        let stubs = registry().lock().unwrap_or_else(PoisonError::into_inner);
        for (criteria, reply) in stubs.iter().rev() {
            if criteria.matches(datum) {
                match reply {
                    StubReply::Response(canned) => {
                        let mut headers = Headers::new();
                        for (name, value) in &canned.headers {
                            headers.add(name.clone(), value.clone());
                        }
                        datum.response =
                            Some(Response::new(canned.status, headers, canned.body.clone(), None));
                        return Ok(());
                    }
                    StubReply::Error(make) => return Err(make()),
                }
            }
        }
        Err(Error::StubNotFound(format!(
            "{} {}://{}:{}{}",
            datum.method, datum.scheme, datum.host, datum.port, datum.path
        )))
    }
}
