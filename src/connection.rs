//! Connection: the request orchestrator bound to one destination.
//!
//! A `Connection` merges its defaults with per-call overrides into a
//! [`Datum`], runs the middleware stack around the wire writer, reads the
//! response, and handles keep-alive bookkeeping, pipelining, and idempotent
//! retries.

use std::fmt;
use std::sync::Arc;

use http::Method;
use url::Url;

use crate::auth;
use crate::cache;
use crate::error::{Error, Result};
use crate::instrument::{self, Instrumentor, LogInstrumentor};
use crate::middleware::Stack;
use crate::options::{Body, Datum, Options, RequestOptions};
use crate::proxy::{self, Proxy, ProxySetting};
use crate::query::Query;
use crate::response::Response;
use crate::transport::{self, Transport};
use crate::wire;

/// A client bound to one destination (scheme, host, port).
///
/// Sockets are cached per thread and reused across requests until the server
/// closes them or an error occurs. Using one `Connection` from several
/// threads is safe in the sense that every thread drives its own socket.
pub struct Connection {
    defaults: Options,
    scheme: String,
    host: String,
    port: u16,
    path: String,
    query: Option<Query>,
    user: Option<String>,
    password: Option<String>,
    proxy: Option<Proxy>,
    instrumentor: Option<Arc<dyn Instrumentor>>,
    socket_key: String,
}

impl Connection {
    /// Bind a connection to `url`, merged with `options`. Explicit option
    /// fields win over URL components; URL userinfo becomes Basic auth
    /// credentials. Option values are validated here, before any socket
    /// activity.
    pub fn new(url: &str, options: Options) -> Result<Self> {
        let parsed = Url::parse(url)?;

        let scheme = options
            .scheme
            .clone()
            .unwrap_or_else(|| parsed.scheme().to_string());
        if scheme != "http" && scheme != "https" {
            return Err(Error::argument(format!("unsupported scheme {scheme:?}")));
        }
        let host = options
            .host
            .clone()
            .or_else(|| parsed.host_str().map(str::to_string))
            .ok_or_else(|| Error::argument(format!("no host in {url:?}")))?;
        let default_port = if scheme == "https" { 443 } else { 80 };
        let port = options.port.or_else(|| parsed.port()).unwrap_or(default_port);
        let path = options
            .path
            .clone()
            .unwrap_or_else(|| parsed.path().to_string());
        let query = options
            .query
            .clone()
            .or_else(|| parsed.query().map(|raw| Query::Raw(raw.to_string())));

        let mut user = options.user.clone();
        let mut password = options.password.clone();
        if user.is_none() && !parsed.username().is_empty() {
            user = Some(proxy::percent_decode(parsed.username()));
            password = parsed.password().map(proxy::percent_decode);
        }

        validate(&options)?;

        let resolved_proxy = match &options.proxy {
            ProxySetting::Disabled => None,
            ProxySetting::Record(record) => Some(record.clone()),
            ProxySetting::Url(raw) => Some(Proxy::parse(raw)?),
            ProxySetting::FromEnv => match proxy::env_url(&scheme) {
                Some(raw) => Some(Proxy::parse(&raw)?),
                None => None,
            },
        };

        let instrumentor = options.instrumentor.clone().or_else(|| {
            instrument::forced_by_env().then(|| Arc::new(LogInstrumentor) as Arc<dyn Instrumentor>)
        });

        let socket_key = match &resolved_proxy {
            Some(proxy) => format!("{scheme}://{host}:{port} via {}:{}", proxy.host, proxy.port),
            None => format!("{scheme}://{host}:{port}"),
        };

        Ok(Self {
            defaults: options,
            scheme,
            host,
            port,
            path,
            query,
            user,
            password,
            proxy: resolved_proxy,
            instrumentor,
            socket_key,
        })
    }

    /// Issue one request, retrying transparently on retryable errors while
    /// the request is idempotent and budget remains.
    pub fn request(&self, options: RequestOptions) -> Result<Response> {
        let mut datum = self.build_datum(options)?;
        loop {
            match self.perform(&mut datum) {
                Ok(response) => return Ok(response),
                Err(error) => {
                    self.abandon(&mut datum);
                    if datum.idempotent && error.is_retryable() && datum.retries_remaining > 1 {
                        datum.retries_remaining -= 1;
                        datum.response = None;
                        tracing::debug!(
                            target: "wraith",
                            key = %self.socket_key,
                            retries_remaining = datum.retries_remaining,
                            error = %error,
                            "retrying idempotent request",
                        );
                        self.instrument("retry", &datum, Some(&error));
                        continue;
                    }
                    self.instrument("error", &datum, Some(&error));
                    return Err(error);
                }
            }
        }
    }

    /// Pipeline a batch: write every request before reading any response,
    /// then drain responses in FIFO order on the same socket.
    pub fn requests(&self, batch: Vec<RequestOptions>) -> Result<Vec<Response>> {
        let mut datums = Vec::with_capacity(batch.len());
        let mut carried: Option<Box<dyn Transport>> = None;
        for options in batch {
            let mut datum = self.build_datum(options)?;
            datum.pipeline = true;
            datum.transport = carried.take();
            self.instrument("request", &datum, None);
            let stack = datum.stack.clone();
            if let Err(error) = stack.request_call(self, &mut datum) {
                self.abandon(&mut datum);
                self.instrument("error", &datum, Some(&error));
                return Err(error);
            }
            carried = datum.transport.take();
            datums.push(datum);
        }

        let mut responses = Vec::with_capacity(datums.len());
        let mut close_after = false;
        for mut datum in datums {
            datum.transport = carried.take();
            match self.drain(&mut datum) {
                Ok(response) => {
                    close_after = response.connection_close();
                    carried = datum.transport.take();
                    responses.push(response);
                }
                Err(error) => {
                    self.abandon(&mut datum);
                    self.instrument("error", &datum, Some(&error));
                    return Err(error);
                }
            }
        }

        match carried {
            Some(transport) if !close_after => cache::checkin(&self.socket_key, transport),
            Some(mut transport) => transport.close(),
            None => {}
        }
        Ok(responses)
    }

    /// Evict and close this destination's cached socket. Idempotent.
    pub fn reset(&self) {
        cache::evict(&self.socket_key);
    }

    /// The key under which this destination's socket is cached.
    pub fn socket_key(&self) -> &str {
        &self.socket_key
    }

    pub fn connect(&self, options: RequestOptions) -> Result<Response> {
        self.request(options.method(Method::CONNECT))
    }

    pub fn delete(&self, options: RequestOptions) -> Result<Response> {
        self.request(options.method(Method::DELETE))
    }

    pub fn get(&self, options: RequestOptions) -> Result<Response> {
        self.request(options.method(Method::GET))
    }

    pub fn head(&self, options: RequestOptions) -> Result<Response> {
        self.request(options.method(Method::HEAD))
    }

    pub fn options(&self, options: RequestOptions) -> Result<Response> {
        self.request(options.method(Method::OPTIONS))
    }

    pub fn patch(&self, options: RequestOptions) -> Result<Response> {
        self.request(options.method(Method::PATCH))
    }

    pub fn post(&self, options: RequestOptions) -> Result<Response> {
        self.request(options.method(Method::POST))
    }

    pub fn put(&self, options: RequestOptions) -> Result<Response> {
        self.request(options.method(Method::PUT))
    }

    pub fn trace(&self, options: RequestOptions) -> Result<Response> {
        self.request(options.method(Method::TRACE))
    }

    /// Terminal handler of the middleware stack: attach a socket (cached or
    /// freshly opened) and emit the request, unless a middleware already
    /// short-circuited with a response.
    pub(crate) fn write_request(&self, datum: &mut Datum) -> Result<()> {
        if datum.response.is_some() {
            return Ok(());
        }
        if datum.transport.is_none() {
            let transport = match cache::checkout(&self.socket_key) {
                Some(cached) => {
                    tracing::debug!(target: "wraith", key = %self.socket_key, "reusing cached socket");
                    cached
                }
                None => {
                    tracing::debug!(target: "wraith", key = %self.socket_key, "opening socket");
                    transport::connect(datum)?
                }
            };
            datum.transport = Some(transport);
        }
        wire::write_request(datum)
    }

    fn perform(&self, datum: &mut Datum) -> Result<Response> {
        self.instrument("request", datum, None);
        let stack = datum.stack.clone();
        stack.request_call(self, datum)?;
        let response = self.drain(datum)?;
        if response.connection_close() {
            self.abandon(datum);
        } else if let Some(transport) = datum.transport.take() {
            cache::checkin(&self.socket_key, transport);
        }
        Ok(response)
    }

    /// Read the response (unless short-circuited), run the response half of
    /// the stack, and hand the response out.
    fn drain(&self, datum: &mut Datum) -> Result<Response> {
        wire::read_response(datum)?;
        let stack = datum.stack.clone();
        stack.response_call(datum)?;
        self.instrument("response", datum, None);
        datum
            .response
            .take()
            .ok_or_else(|| Error::protocol("stack completed without a response"))
    }

    /// Drop the in-flight socket and evict the cached one.
    fn abandon(&self, datum: &mut Datum) {
        if let Some(mut transport) = datum.transport.take() {
            transport.close();
        }
        cache::evict(&self.socket_key);
    }

    fn instrument(&self, suffix: &str, datum: &Datum, error: Option<&Error>) {
        if let Some(instrumentor) = &datum.instrumentor {
            let name = format!("{}.{}", datum.instrumentor_name, suffix);
            instrumentor.instrument(&name, datum, error);
        }
    }

    /// Merge defaults with per-request overrides and normalize: leading `/`
    /// on the path, `Host` and auth headers, proxy headers, retry budget.
    fn build_datum(&self, options: RequestOptions) -> Result<Datum> {
        let RequestOptions {
            method,
            method_name,
            path,
            query,
            headers,
            body,
            request_block,
            response_block,
            expects,
            idempotent,
            retry_limit,
            retries_remaining,
            chunk_size,
            connect_timeout,
            read_timeout,
            write_timeout,
            mock,
            captures,
        } = options;

        let method = match (method, method_name) {
            (Some(method), _) => method,
            (None, Some(name)) => Method::from_bytes(name.to_ascii_uppercase().as_bytes())
                .map_err(|_| Error::argument(format!("invalid method {name:?}")))?,
            (None, None) => Method::GET,
        };

        let mut path = path.unwrap_or_else(|| self.path.clone());
        if path.is_empty() {
            path.push('/');
        }
        if !path.starts_with('/') {
            path.insert(0, '/');
        }

        let mut merged_headers = self.defaults.headers.merge_over(&headers);
        if !merged_headers.contains("Host") {
            merged_headers.set("Host", format!("{}:{}", self.host, self.port));
        }
        if !merged_headers.contains("Authorization") {
            if let Some(user) = &self.user {
                merged_headers.set(
                    "Authorization",
                    auth::basic_auth(user, self.password.as_deref().unwrap_or("")),
                );
            }
        }
        if let Some(proxy) = &self.proxy {
            if !merged_headers.contains("Proxy-Connection") {
                merged_headers.set("Proxy-Connection", "Keep-Alive");
            }
            // https proxy credentials belong to the CONNECT tunnel, not here
            if self.scheme == "http" && !merged_headers.contains("Proxy-Authorization") {
                if let Some(authorization) = proxy.authorization() {
                    merged_headers.set("Proxy-Authorization", authorization);
                }
            }
        }

        let retry_limit = retry_limit.unwrap_or(self.defaults.retry_limit);
        let chunk_size = chunk_size.unwrap_or(self.defaults.chunk_size);
        if retry_limit == 0 {
            return Err(Error::argument("retry_limit must be at least 1"));
        }
        if chunk_size == 0 {
            return Err(Error::argument("chunk_size must be at least 1"));
        }
        let expects = expects.unwrap_or_else(|| self.defaults.expects.clone());
        if let Some(status) = expects.iter().find(|status| !(100..=599).contains(*status)) {
            return Err(Error::argument(format!("invalid expected status {status}")));
        }

        Ok(Datum {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            port: self.port,
            path,
            query: query.or_else(|| self.query.clone()),
            method,
            headers: merged_headers,
            body: body.unwrap_or(Body::Empty),
            request_block,
            response_block,
            chunk_size,
            expects,
            idempotent: idempotent.unwrap_or(self.defaults.idempotent),
            retry_limit,
            retries_remaining: retries_remaining.unwrap_or(retry_limit),
            connect_timeout: connect_timeout.or(self.defaults.connect_timeout),
            read_timeout: read_timeout.or(self.defaults.read_timeout),
            write_timeout: write_timeout.or(self.defaults.write_timeout),
            proxy: self.proxy.clone(),
            mock: mock.unwrap_or(self.defaults.mock),
            captures,
            pipeline: false,
            response: None,
            family: self.defaults.family,
            nonblock: self.defaults.nonblock,
            ssl_ca_file: self.defaults.ssl_ca_file.clone(),
            ssl_verify_peer: self.defaults.ssl_verify_peer,
            instrumentor: self.instrumentor.clone(),
            instrumentor_name: self.defaults.instrumentor_name.clone(),
            stack: Stack::new(self.defaults.middlewares.clone()),
            transport: None,
        })
    }
}

fn validate(options: &Options) -> Result<()> {
    if options.retry_limit == 0 {
        return Err(Error::argument("retry_limit must be at least 1"));
    }
    if options.chunk_size == 0 {
        return Err(Error::argument("chunk_size must be at least 1"));
    }
    if let Some(status) = options
        .expects
        .iter()
        .find(|status| !(100..=599).contains(*status))
    {
        return Err(Error::argument(format!("invalid expected status {status}")));
    }
    Ok(())
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &self.defaults.headers)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "REDACTED"))
            .field("proxy", &self.proxy)
            .field("socket_key", &self.socket_key)
            .finish_non_exhaustive()
    }
}
