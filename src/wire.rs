//! HTTP/1.1 wire protocol: request emission and response ingestion.
//!
//! The writer assembles the request line, headers, and body, choosing
//! between chunked transfer encoding (when a pull source is present) and
//! Content-Length framing. The reader parses the status line and headers,
//! then drives one of three body framing modes: chunked, fixed content
//! length, or read-until-close.

use std::io::{Read, Seek, SeekFrom};

use bytes::Bytes;
use http::Method;

use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::options::{Body, ChunkSink, ChunkSource, Datum};
use crate::query;
use crate::response::Response;
use crate::transport::Transport;

const CRLF: &[u8] = b"\r\n";

/// Build and send the request line, headers, and body.
///
/// Assumes the datum's transport is attached. Transport failures surface
/// classified by the socket layer: deadlines as timeouts, everything else as
/// transport errors.
pub(crate) fn write_request(datum: &mut Datum) -> Result<()> {
    let head = build_head(datum);
    let Datum {
        transport,
        request_block,
        body,
        chunk_size,
        ..
    } = datum;
    let transport = transport
        .as_mut()
        .ok_or_else(|| Error::protocol("no transport attached to request"))?;

    transport.write_all(&head)?;

    if let Some(source) = request_block {
        write_chunks(&mut **transport, source)
    } else {
        match body {
            Body::Empty => Ok(()),
            Body::Bytes(bytes) => {
                if bytes.is_empty() {
                    Ok(())
                } else {
                    transport.write_all(bytes)
                }
            }
            Body::File(file) => {
                file.seek(SeekFrom::Start(0))
                    .map_err(|err| Error::from_io(err, "write"))?;
                copy_body(&mut **transport, file, *chunk_size)
            }
            Body::Reader { reader, .. } => copy_body(&mut **transport, reader.as_mut(), *chunk_size),
        }
    }
}

/// Request line and header block.
///
/// The target is absolute-form for proxied plain-http requests and
/// origin-form otherwise. Framing headers are appended after the caller's
/// headers unless already present.
fn build_head(datum: &Datum) -> Vec<u8> {
    let mut head = Vec::with_capacity(1024);

    head.extend_from_slice(datum.method.as_str().as_bytes());
    head.push(b' ');
    if datum.proxy.is_some() && datum.scheme == "http" {
        head.extend_from_slice(
            format!("{}://{}:{}", datum.scheme, datum.host, datum.port).as_bytes(),
        );
    }
    head.extend_from_slice(datum.path.as_bytes());
    if let Some(q) = &datum.query {
        query::append_query(&mut head, q);
    }
    head.extend_from_slice(b" HTTP/1.1\r\n");

    for (name, value) in datum.headers.iter() {
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(CRLF);
    }

    if datum.request_block.is_some() {
        if !datum.headers.contains("Transfer-Encoding") {
            head.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
        }
    } else if !(datum.method == Method::GET && datum.body.is_empty())
        && !datum.headers.contains("Content-Length")
    {
        head.extend_from_slice(format!("Content-Length: {}\r\n", datum.body.content_length()).as_bytes());
    }

    head.extend_from_slice(CRLF);
    head
}

/// Pull chunks from the source until it yields an empty chunk, emitting each
/// as `hex(len) CRLF chunk CRLF` and closing with `0 CRLF CRLF`.
fn write_chunks(transport: &mut dyn Transport, source: &mut ChunkSource) -> Result<()> {
    loop {
        let chunk = source();
        if chunk.is_empty() {
            return transport.write_all(b"0\r\n\r\n");
        }
        transport.write_all(format!("{:x}\r\n", chunk.len()).as_bytes())?;
        transport.write_all(&chunk)?;
        transport.write_all(CRLF)?;
    }
}

/// Copy a file-like body onto the wire in `chunk_size` slices.
fn copy_body(transport: &mut dyn Transport, reader: &mut dyn Read, chunk_size: usize) -> Result<()> {
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|err| Error::from_io(err, "write"))?;
        if n == 0 {
            return Ok(());
        }
        transport.write_all(&buf[..n])?;
    }
}

/// Read the status line and headers, then ingest the body under the framing
/// the headers declare. Skipped entirely when a middleware already populated
/// the response.
pub(crate) fn read_response(datum: &mut Datum) -> Result<()> {
    if datum.response.is_some() {
        return Ok(());
    }

    let Datum {
        transport,
        response_block,
        chunk_size,
        expects,
        method,
        response,
        ..
    } = datum;
    let transport: &mut dyn Transport = transport
        .as_mut()
        .ok_or_else(|| Error::protocol("no transport attached to response"))?
        .as_mut();
    let chunk_size = *chunk_size;

    let status = read_status_line(transport)?;
    let headers = read_headers(transport)?;
    let remote_ip = transport.remote_ip();

    let content_length = headers
        .get("Content-Length")
        .and_then(|value| value.trim().parse::<u64>().ok());
    let chunked = headers
        .get("Transfer-Encoding")
        .map(|value| {
            value
                .split(',')
                .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
        })
        .unwrap_or(false);

    let mut body = Vec::new();
    let no_entity = *method == Method::HEAD
        || *method == Method::CONNECT
        || (100..200).contains(&status)
        || status == 204
        || status == 304;
    if !no_entity {
        let expected = expects.is_empty() || expects.contains(&status);
        let mut deliver = match response_block {
            Some(sink) if expected => Deliver::Sink(sink),
            _ => Deliver::Buffer(&mut body),
        };
        if chunked {
            read_chunked(transport, &mut deliver)?;
        } else if let Some(total) = content_length {
            read_fixed(transport, &mut deliver, total, chunk_size)?;
        } else {
            read_to_close(transport, &mut deliver, chunk_size)?;
        }
    }

    *response = Some(Response::new(status, headers, Bytes::from(body), remote_ip));
    Ok(())
}

/// Where decoded body bytes go: the response buffer, or the caller's sink.
enum Deliver<'a> {
    Buffer(&'a mut Vec<u8>),
    Sink(&'a mut ChunkSink),
}

impl Deliver<'_> {
    fn push(&mut self, chunk: &[u8], remaining: Option<u64>, total: Option<u64>) {
        match self {
            Self::Buffer(buf) => buf.extend_from_slice(chunk),
            Self::Sink(sink) => (sink)(chunk, remaining, total),
        }
    }
}

/// Parse `HTTP/1.x NNN ...`: the three-digit code sits at offset 9; the rest
/// of the line is discarded.
fn read_status_line(transport: &mut dyn Transport) -> Result<u16> {
    let mut line = Vec::new();
    transport.read_line(&mut line)?;
    if line.len() < 12 || !line.starts_with(b"HTTP/") || line[8] != b' ' {
        return Err(Error::protocol(format!(
            "malformed status line: {:?}",
            String::from_utf8_lossy(&line).trim_end()
        )));
    }
    let code = &line[9..12];
    std::str::from_utf8(code)
        .ok()
        .and_then(|digits| digits.parse::<u16>().ok())
        .filter(|status| (100..=999).contains(status))
        .ok_or_else(|| {
            Error::protocol(format!(
                "malformed status code: {:?}",
                String::from_utf8_lossy(code)
            ))
        })
}

/// Read header lines until the blank line. Each line splits on the first
/// `:` with optional surrounding whitespace; duplicate names join with `, `
/// in insertion order.
fn read_headers(transport: &mut dyn Transport) -> Result<Headers> {
    let mut headers = Headers::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        transport.read_line(&mut line)?;
        let trimmed = trim_crlf(&line);
        if trimmed.is_empty() {
            return Ok(headers);
        }
        let text = String::from_utf8_lossy(trimmed);
        match text.split_once(':') {
            Some((name, value)) => headers.append_joined(name, value.trim()),
            None => {
                return Err(Error::protocol(format!("malformed header line: {text:?}")));
            }
        }
    }
}

/// Chunked framing: `hex-size CRLF data CRLF` repeated, a zero-size chunk,
/// then the trailer section through its closing blank line. Chunk data must
/// be CRLF-terminated; a mismatch fails rather than trusting the size line.
fn read_chunked(transport: &mut dyn Transport, deliver: &mut Deliver<'_>) -> Result<()> {
    let mut line = Vec::new();
    loop {
        line.clear();
        transport.read_line(&mut line)?;
        let text = String::from_utf8_lossy(trim_crlf(&line));
        let size_token = text.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_token, 16)
            .map_err(|_| Error::protocol(format!("invalid chunk size: {text:?}")))?;
        if size == 0 {
            break;
        }
        let mut chunk = vec![0u8; size + 2];
        read_full(transport, &mut chunk)?;
        if &chunk[size..] != CRLF {
            return Err(Error::protocol("chunk data not terminated by CRLF"));
        }
        deliver.push(&chunk[..size], None, None);
    }
    loop {
        line.clear();
        transport.read_line(&mut line)?;
        if trim_crlf(&line).is_empty() {
            return Ok(());
        }
    }
}

/// Content-length framing: read exactly `total` bytes in slices of at most
/// `chunk_size`. `remaining` never goes negative.
fn read_fixed(
    transport: &mut dyn Transport,
    deliver: &mut Deliver<'_>,
    total: u64,
    chunk_size: usize,
) -> Result<()> {
    let mut remaining = total;
    if remaining == 0 {
        return Ok(());
    }
    let cap = chunk_size.min(usize::try_from(total).unwrap_or(usize::MAX));
    let mut buf = vec![0u8; cap];
    while remaining > 0 {
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = transport.read(&mut buf[..want])?;
        if n == 0 {
            return Err(Error::protocol(format!(
                "connection closed with {remaining} of {total} body bytes unread"
            )));
        }
        remaining -= n as u64;
        deliver.push(&buf[..n], Some(remaining), Some(total));
    }
    Ok(())
}

/// Read-until-close framing: `chunk_size` slices until EOF. A reset from the
/// peer counts as end of body.
fn read_to_close(
    transport: &mut dyn Transport,
    deliver: &mut Deliver<'_>,
    chunk_size: usize,
) -> Result<()> {
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = match transport.read(&mut buf) {
            Ok(n) => n,
            Err(Error::Transport(err))
                if err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                0
            }
            Err(err) => return Err(err),
        };
        if n == 0 {
            return Ok(());
        }
        deliver.push(&buf[..n], Some(n as u64), None);
    }
}

fn read_full(transport: &mut dyn Transport, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = transport.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(Error::protocol("connection closed mid-chunk"));
        }
        filled += n;
    }
    Ok(())
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Body;
    use std::sync::{Arc, Mutex};

    /// In-memory transport: scripted input, captured output.
    struct MemTransport {
        input: Vec<u8>,
        pos: usize,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl MemTransport {
        fn new(input: &[u8]) -> (Self, Arc<Mutex<Vec<u8>>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    input: input.to_vec(),
                    pos: 0,
                    written: written.clone(),
                },
                written,
            )
        }
    }

    impl Transport for MemTransport {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = buf.len().min(self.input.len() - self.pos);
            buf[..n].copy_from_slice(&self.input[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn write_all(&mut self, buf: &[u8]) -> Result<()> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(())
        }

        fn read_line(&mut self, line: &mut Vec<u8>) -> Result<()> {
            match self.input[self.pos..].iter().position(|&b| b == b'\n') {
                Some(offset) => {
                    let end = self.pos + offset + 1;
                    line.extend_from_slice(&self.input[self.pos..end]);
                    self.pos = end;
                    Ok(())
                }
                None => Err(Error::protocol("connection closed mid-line")),
            }
        }

        fn remote_ip(&self) -> Option<String> {
            Some("127.0.0.1".to_string())
        }

        fn close(&mut self) {}
    }

    fn wired_datum(method: Method, input: &[u8]) -> (Datum, Arc<Mutex<Vec<u8>>>) {
        let (transport, written) = MemTransport::new(input);
        let mut headers = Headers::new();
        headers.set("Host", "h:80");
        let datum = Datum {
            host: "h".to_string(),
            path: "/p".to_string(),
            method,
            headers,
            transport: Some(Box::new(transport)),
            ..Datum::default()
        };
        (datum, written)
    }

    #[test]
    fn test_get_emits_minimal_request() {
        let (mut datum, written) = wired_datum(Method::GET, b"");
        write_request(&mut datum).unwrap();
        assert_eq!(
            written.lock().unwrap().as_slice(),
            b"GET /p HTTP/1.1\r\nHost: h:80\r\n\r\n"
        );
    }

    #[test]
    fn test_post_body_gets_content_length() {
        let (mut datum, written) = wired_datum(Method::POST, b"");
        datum.body = Body::from("ab");
        write_request(&mut datum).unwrap();
        assert_eq!(
            written.lock().unwrap().as_slice(),
            b"POST /p HTTP/1.1\r\nHost: h:80\r\nContent-Length: 2\r\n\r\nab"
        );
    }

    #[test]
    fn test_post_without_body_sends_zero_length() {
        let (mut datum, written) = wired_datum(Method::POST, b"");
        write_request(&mut datum).unwrap();
        let wire = written.lock().unwrap();
        assert!(std::str::from_utf8(&wire)
            .unwrap()
            .contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn test_chunked_upload() {
        let (mut datum, written) = wired_datum(Method::PUT, b"");
        let mut chunks = vec![Bytes::new(), Bytes::from_static(b"hi")];
        datum.request_block = Some(Box::new(move || chunks.pop().unwrap_or_default()));
        write_request(&mut datum).unwrap();

        let wire = written.lock().unwrap();
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n2\r\nhi\r\n0\r\n\r\n"));
    }

    #[test]
    fn test_proxied_http_uses_absolute_target() {
        let (mut datum, written) = wired_datum(Method::GET, b"");
        datum.proxy = Some(crate::proxy::Proxy::parse("http://px:3128").unwrap());
        write_request(&mut datum).unwrap();
        let wire = written.lock().unwrap();
        assert!(wire.starts_with(b"GET http://h:80/p HTTP/1.1\r\n"));
    }

    #[test]
    fn test_query_mapping_serialized_onto_target() {
        let (mut datum, written) = wired_datum(Method::GET, b"");
        datum.query = Some(
            crate::query::Query::params()
                .param("a", "1")
                .multi("b", ["2", "3"])
                .bare("c"),
        );
        write_request(&mut datum).unwrap();
        let wire = written.lock().unwrap();
        assert!(wire.starts_with(b"GET /p?a=1&b=2&b=3&c HTTP/1.1\r\n"));
    }

    #[test]
    fn test_file_like_body_streams_in_chunks() {
        let (mut datum, written) = wired_datum(Method::POST, b"");
        datum.body = Body::reader(std::io::Cursor::new(b"hello world".to_vec()), Some(11));
        datum.chunk_size = 4;
        write_request(&mut datum).unwrap();
        let wire = written.lock().unwrap();
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.ends_with("\r\n\r\nhello world"));
    }

    #[test]
    fn test_read_chunked_response() {
        let (mut datum, _) = wired_datum(
            Method::GET,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        );
        read_response(&mut datum).unwrap();
        let response = datum.response.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"hello");
        assert_eq!(response.remote_ip.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_read_chunked_with_extensions_and_trailers() {
        let (mut datum, _) = wired_datum(
            Method::GET,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5;ext=1\r\nhello\r\n0\r\nExpires: never\r\n\r\n",
        );
        read_response(&mut datum).unwrap();
        assert_eq!(&datum.response.unwrap().body[..], b"hello");
    }

    #[test]
    fn test_chunk_without_crlf_terminator_fails() {
        let (mut datum, _) = wired_datum(
            Method::GET,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhelloXX0\r\n\r\n",
        );
        let err = read_response(&mut datum).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_read_content_length_response() {
        let (mut datum, _) = wired_datum(
            Method::GET,
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nworldTRAILING",
        );
        read_response(&mut datum).unwrap();
        let response = datum.response.unwrap();
        // exactly Content-Length bytes consumed
        assert_eq!(&response.body[..], b"world");
    }

    #[test]
    fn test_read_to_close_response() {
        let (mut datum, _) = wired_datum(Method::GET, b"HTTP/1.1 200 OK\r\n\r\nall the rest");
        read_response(&mut datum).unwrap();
        assert_eq!(&datum.response.unwrap().body[..], b"all the rest");
    }

    #[test]
    fn test_head_skips_body() {
        let (mut datum, _) = wired_datum(Method::HEAD, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n");
        read_response(&mut datum).unwrap();
        assert!(datum.response.unwrap().body.is_empty());
    }

    #[test]
    fn test_no_entity_statuses_skip_body() {
        for head in [
            &b"HTTP/1.1 204 No Content\r\n\r\n"[..],
            &b"HTTP/1.1 304 Not Modified\r\n\r\n"[..],
        ] {
            let (mut datum, _) = wired_datum(Method::GET, head);
            read_response(&mut datum).unwrap();
            assert!(datum.response.unwrap().body.is_empty());
        }
    }

    #[test]
    fn test_duplicate_headers_join_in_order() {
        let (mut datum, _) = wired_datum(
            Method::GET,
            b"HTTP/1.1 200 OK\r\nVary: Accept\r\nContent-Length: 0\r\nVary: Cookie\r\n\r\n",
        );
        read_response(&mut datum).unwrap();
        let response = datum.response.unwrap();
        assert_eq!(response.get_header("Vary"), Some("Accept, Cookie"));
    }

    #[test]
    fn test_streaming_sink_content_length() {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink_log = collected.clone();
        let (mut datum, _) = wired_datum(
            Method::GET,
            b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n0123456789",
        );
        datum.chunk_size = 4;
        datum.response_block = Some(Box::new(move |chunk, remaining, total| {
            sink_log
                .lock()
                .unwrap()
                .push((chunk.to_vec(), remaining, total));
        }));
        read_response(&mut datum).unwrap();

        // body stays empty, chunks went to the sink
        assert!(datum.response.unwrap().body.is_empty());
        let calls = collected.lock().unwrap();
        let rejoined: Vec<u8> = calls.iter().flat_map(|(chunk, _, _)| chunk.clone()).collect();
        assert_eq!(rejoined, b"0123456789");
        assert!(calls.iter().all(|(_, _, total)| *total == Some(10)));
        assert_eq!(calls.last().unwrap().1, Some(0));
    }

    #[test]
    fn test_streaming_sink_skipped_for_unexpected_status() {
        let collected = Arc::new(Mutex::new(0usize));
        let sink_log = collected.clone();
        let (mut datum, _) = wired_datum(
            Method::GET,
            b"HTTP/1.1 500 Oops\r\nContent-Length: 4\r\n\r\nfail",
        );
        datum.expects = vec![200];
        datum.response_block = Some(Box::new(move |_, _, _| {
            *sink_log.lock().unwrap() += 1;
        }));
        read_response(&mut datum).unwrap();

        // unexpected status accumulates instead of streaming
        assert_eq!(*collected.lock().unwrap(), 0);
        assert_eq!(&datum.response.unwrap().body[..], b"fail");
    }

    #[test]
    fn test_streaming_sink_chunked_passes_no_totals() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink_log = calls.clone();
        let (mut datum, _) = wired_datum(
            Method::GET,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nhi\r\n0\r\n\r\n",
        );
        datum.response_block = Some(Box::new(move |chunk, remaining, total| {
            sink_log.lock().unwrap().push((chunk.to_vec(), remaining, total));
        }));
        read_response(&mut datum).unwrap();
        let calls = calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(b"hi".to_vec(), None, None)]);
    }

    #[test]
    fn test_short_circuited_response_skips_parsing() {
        let (mut datum, _) = wired_datum(Method::GET, b"not http at all");
        datum.response = Some(Response::new(200, Headers::new(), Bytes::new(), None));
        read_response(&mut datum).unwrap();
        assert_eq!(datum.response.unwrap().status, 200);
    }

    #[test]
    fn test_malformed_status_line() {
        let (mut datum, _) = wired_datum(Method::GET, b"ICY 200 OK\r\n\r\n");
        assert!(matches!(
            read_response(&mut datum).unwrap_err(),
            Error::Protocol(_)
        ));
    }

    #[test]
    fn test_truncated_content_length_body() {
        let (mut datum, _) = wired_datum(
            Method::GET,
            b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort",
        );
        assert!(matches!(
            read_response(&mut datum).unwrap_err(),
            Error::Protocol(_)
        ));
    }
}
