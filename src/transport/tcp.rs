//! Blocking TCP transport with per-phase deadlines.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::options::{AddrFamily, Datum};
use crate::transport::{LineBuf, Transport};

/// A plain TCP connection.
pub struct TcpTransport {
    stream: TcpStream,
    peer: Option<SocketAddr>,
    lines: LineBuf,
}

impl TcpTransport {
    /// Open a transport for a plain-http datum. A configured proxy redirects
    /// the connection to the proxy endpoint; the request line carries the
    /// absolute target in that case.
    pub(crate) fn connect_http(datum: &Datum) -> Result<Self> {
        let (host, port) = match &datum.proxy {
            Some(proxy) => (proxy.host.as_str(), proxy.port),
            None => (datum.host.as_str(), datum.port),
        };
        Self::open(
            host,
            port,
            datum.connect_timeout,
            datum.read_timeout,
            datum.write_timeout,
            datum.family,
        )
    }

    pub(crate) fn open(
        host: &str,
        port: u16,
        connect_timeout: Option<Duration>,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
        family: Option<AddrFamily>,
    ) -> Result<Self> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|err| Error::from_io(err, "connect"))?
            .filter(|addr| match family {
                None => true,
                Some(AddrFamily::V4) => addr.is_ipv4(),
                Some(AddrFamily::V6) => addr.is_ipv6(),
            })
            .collect();
        if addrs.is_empty() {
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no usable addresses for {host}:{port}"),
            )));
        }

        let mut last_err = None;
        let mut connected = None;
        for addr in &addrs {
            let attempt = match connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    connected = Some(stream);
                    break;
                }
                Err(err) => last_err = Some(err),
            }
        }
        let stream = match connected {
            Some(stream) => stream,
            None => {
                let err = last_err.unwrap_or_else(|| io::Error::other("connect failed"));
                return Err(Error::from_io(err, "connect"));
            }
        };

        stream
            .set_nodelay(true)
            .and_then(|()| stream.set_read_timeout(read_timeout))
            .and_then(|()| stream.set_write_timeout(write_timeout))
            .map_err(|err| Error::from_io(err, "connect"))?;
        let peer = stream.peer_addr().ok();
        Ok(Self {
            stream,
            peer,
            lines: LineBuf::default(),
        })
    }

    /// Hand the raw stream over, e.g. for a TLS handshake after tunneling.
    /// Any buffered bytes are discarded; callers must only read line-wise
    /// before taking the stream.
    pub(crate) fn into_parts(self) -> (TcpStream, Option<SocketAddr>) {
        (self.stream, self.peer)
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.lines
            .read(&mut self.stream, buf)
            .map_err(|err| Error::from_io(err, "read"))
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.stream
            .write_all(buf)
            .map_err(|err| Error::from_io(err, "write"))
    }

    fn read_line(&mut self, line: &mut Vec<u8>) -> Result<()> {
        self.lines
            .read_line(&mut self.stream, line)
            .map_err(|err| Error::from_io(err, "read"))
    }

    fn remote_ip(&self) -> Option<String> {
        self.peer.map(|addr| addr.ip().to_string())
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
