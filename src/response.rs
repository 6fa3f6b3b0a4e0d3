//! HTTP response record.

use bytes::Bytes;

use crate::headers::Headers;

/// A parsed HTTP response.
///
/// When the request carried a streaming sink and the status matched the
/// accepted set, `body` stays empty and the chunks were dispatched to the
/// sink instead.
#[derive(Clone, Debug, Default)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
    /// Peer address the response was read from, when known.
    pub remote_ip: Option<String>,
}

impl Response {
    pub fn new(status: u16, headers: Headers, body: Bytes, remote_ip: Option<String>) -> Self {
        Self {
            status,
            headers,
            body,
            remote_ip,
        }
    }

    /// First value of `name`, case-insensitive.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body interpreted as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Whether the server asked for the connection to be torn down.
    pub(crate) fn connection_close(&self) -> bool {
        self.headers
            .get("Connection")
            .map(|value| value.trim().eq_ignore_ascii_case("close"))
            .unwrap_or(false)
    }
}
