//! TLS transport: rustls over blocking TCP, including CONNECT tunneling
//! through an http proxy.

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme,
    StreamOwned,
};

use crate::error::{Error, Result};
use crate::options::Datum;
use crate::transport::tcp::TcpTransport;
use crate::transport::{LineBuf, Transport};

/// A TLS session over a blocking TCP stream.
pub struct TlsTransport {
    stream: StreamOwned<ClientConnection, TcpStream>,
    peer: Option<SocketAddr>,
    lines: LineBuf,
}

impl TlsTransport {
    /// Open a transport for an https datum. With a proxy configured, the TCP
    /// leg goes to the proxy and a CONNECT tunnel (carrying proxy credentials
    /// when present) is established before the handshake.
    pub(crate) fn connect_https(datum: &Datum) -> Result<Self> {
        let tcp = match &datum.proxy {
            Some(proxy) => {
                let mut tcp = TcpTransport::open(
                    proxy.host.as_str(),
                    proxy.port,
                    datum.connect_timeout,
                    datum.read_timeout,
                    datum.write_timeout,
                    datum.family,
                )?;
                establish_tunnel(&mut tcp, datum)?;
                tcp
            }
            None => TcpTransport::open(
                datum.host.as_str(),
                datum.port,
                datum.connect_timeout,
                datum.read_timeout,
                datum.write_timeout,
                datum.family,
            )?,
        };
        let (stream, peer) = tcp.into_parts();

        let config = client_config(datum)?;
        let server_name = ServerName::try_from(datum.host.clone())
            .map_err(|_| Error::argument(format!("invalid TLS server name {:?}", datum.host)))?;
        let conn = ClientConnection::new(Arc::new(config), server_name)
            .map_err(|err| Error::Transport(io::Error::other(err)))?;

        Ok(Self {
            stream: StreamOwned::new(conn, stream),
            peer,
            lines: LineBuf::default(),
        })
    }
}

/// Issue `CONNECT host:port` and consume the proxy's response head. The
/// server stays silent after a 2xx until our ClientHello, so line-wise reads
/// cannot swallow handshake bytes.
fn establish_tunnel(tcp: &mut TcpTransport, datum: &Datum) -> Result<()> {
    let target = format!("{}:{}", datum.host, datum.port);
    let mut connect = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some(authorization) = datum.proxy.as_ref().and_then(|proxy| proxy.authorization()) {
        connect.push_str("Proxy-Authorization: ");
        connect.push_str(&authorization);
        connect.push_str("\r\n");
    }
    connect.push_str("\r\n");
    tcp.write_all(connect.as_bytes())?;

    let mut line = Vec::new();
    tcp.read_line(&mut line)?;
    let accepted = line.starts_with(b"HTTP/") && line.get(9).copied() == Some(b'2');
    if !accepted {
        return Err(Error::protocol(format!(
            "proxy CONNECT failed: {}",
            String::from_utf8_lossy(&line).trim_end()
        )));
    }
    loop {
        line.clear();
        tcp.read_line(&mut line)?;
        if line == b"\r\n" || line == b"\n" {
            return Ok(());
        }
    }
}

fn client_config(datum: &Datum) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(ca_file) = &datum.ssl_ca_file {
        let file = File::open(ca_file)
            .map_err(|err| Error::argument(format!("ssl_ca_file {ca_file:?}: {err}")))?;
        let mut reader = BufReader::new(file);
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert =
                cert.map_err(|err| Error::argument(format!("ssl_ca_file {ca_file:?}: {err}")))?;
            roots
                .add(cert)
                .map_err(|err| Error::argument(format!("ssl_ca_file {ca_file:?}: {err}")))?;
        }
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    if !datum.ssl_verify_peer {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(InsecureVerifier::new()));
    }
    Ok(config)
}

/// Accepts any server certificate. Installed only for
/// `ssl_verify_peer = false`; signature checks still run so garbage
/// handshakes fail early.
#[derive(Debug)]
struct InsecureVerifier {
    provider: CryptoProvider,
}

impl InsecureVerifier {
    fn new() -> Self {
        Self {
            provider: rustls::crypto::ring::default_provider(),
        }
    }
}

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

impl Transport for TlsTransport {
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
        self.stream.conn.send_close_notify();
        let _ = self.stream.flush();
        let _ = self.stream.sock.shutdown(Shutdown::Both);
    }
}
