//! Transport layer: the byte-level socket interface the engine drives.

pub(crate) mod tcp;
pub(crate) mod tls;

pub use tcp::TcpTransport;
pub use tls::TlsTransport;

use std::io;

use crate::error::{Error, Result};
use crate::options::Datum;

/// Blocking byte transport consumed by the wire layer.
pub trait Transport: Send {
    /// Read up to `buf.len()` bytes; returns 0 at EOF.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write the entire buffer.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Read through the next `\n` inclusive, appending to `line`. Bytes
    /// buffered past the newline are consumed by subsequent reads first.
    fn read_line(&mut self, line: &mut Vec<u8>) -> Result<()>;

    /// Peer address, when known.
    fn remote_ip(&self) -> Option<String>;

    /// Shut the connection down; dropping the transport has the same effect.
    fn close(&mut self);
}

/// Open a transport for the datum's destination, honoring proxy and TLS
/// configuration.
pub(crate) fn connect(datum: &Datum) -> Result<Box<dyn Transport>> {
    if datum.nonblock {
        tracing::debug!(target: "wraith", "nonblock hint has no effect on the blocking transports");
    }
    match datum.scheme.as_str() {
        "http" => Ok(Box::new(TcpTransport::connect_http(datum)?)),
        "https" => Ok(Box::new(TlsTransport::connect_https(datum)?)),
        other => Err(Error::argument(format!("unsupported scheme {other:?}"))),
    }
}

/// Line-oriented read buffering shared by the concrete transports.
#[derive(Default)]
pub(crate) struct LineBuf {
    buf: Vec<u8>,
    pos: usize,
}

impl LineBuf {
    /// Drain buffered bytes before reading from `inner`.
    pub(crate) fn read<S: io::Read>(&mut self, inner: &mut S, out: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.buf.len() {
            let n = out.len().min(self.buf.len() - self.pos);
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            if self.pos == self.buf.len() {
                self.buf.clear();
                self.pos = 0;
            }
            return Ok(n);
        }
        inner.read(out)
    }

    /// Append bytes through the next `\n` onto `line`, pulling from `inner`
    /// as needed. EOF mid-line is an error.
    pub(crate) fn read_line<S: io::Read>(
        &mut self,
        inner: &mut S,
        line: &mut Vec<u8>,
    ) -> io::Result<()> {
        loop {
            if let Some(offset) = self.buf[self.pos..].iter().position(|&b| b == b'\n') {
                let end = self.pos + offset + 1;
                line.extend_from_slice(&self.buf[self.pos..end]);
                self.pos = end;
                if self.pos == self.buf.len() {
                    self.buf.clear();
                    self.pos = 0;
                }
                return Ok(());
            }
            let mut chunk = [0u8; 4096];
            let n = inner.read(&mut chunk)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-line",
                ));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}
