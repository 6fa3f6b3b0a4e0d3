#![allow(dead_code)]

//! In-process mock servers for integration tests: a real listener on an
//! ephemeral port, one thread accepting connections.

use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

pub struct MockServer {
    pub url: String,
    pub port: u16,
}

/// Spawn a server calling `handler` on its own thread per accepted
/// connection, so an idle keep-alive socket never blocks the next client.
pub fn spawn<F>(handler: F) -> MockServer
where
    F: Fn(TcpStream) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handler = Arc::new(handler);
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let handler = handler.clone();
                    thread::spawn(move || handler(stream));
                }
                Err(_) => break,
            }
        }
    });
    MockServer {
        url: format!("http://127.0.0.1:{port}"),
        port,
    }
}

/// Read one full HTTP request: the head, then the body per Content-Length or
/// through the chunked terminator. Returns the raw bytes; empty on a closed
/// connection.
pub fn read_http_request(stream: &mut TcpStream) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    while find_subsequence(&data, b"\r\n\r\n").is_none() {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return data,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    }
    let head_end = find_subsequence(&data, b"\r\n\r\n").unwrap() + 4;
    let head = String::from_utf8_lossy(&data[..head_end]).to_ascii_lowercase();

    if head.contains("transfer-encoding: chunked") {
        while find_subsequence(&data[head_end..], b"0\r\n\r\n").is_none() {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return data,
                Ok(n) => data.extend_from_slice(&buf[..n]),
            }
        }
    } else if let Some(length) = content_length(&head) {
        while data.len() < head_end + length {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return data,
                Ok(n) => data.extend_from_slice(&buf[..n]),
            }
        }
    }
    data
}

/// Read one full HTTP request off a persistent `leftover` buffer that
/// survives across calls on the same connection, so bytes from a pipelined
/// follow-up request that arrive in the same `read()` aren't discarded.
/// Returns the request bytes (head + body); empty on a closed connection.
pub fn read_buffered_request(stream: &mut TcpStream, leftover: &mut Vec<u8>) -> Vec<u8> {
    let mut buf = [0u8; 4096];
    while find_subsequence(leftover, b"\r\n\r\n").is_none() {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return std::mem::take(leftover),
            Ok(n) => leftover.extend_from_slice(&buf[..n]),
        }
    }
    let head_end = find_subsequence(leftover, b"\r\n\r\n").unwrap() + 4;
    let head = String::from_utf8_lossy(&leftover[..head_end]).to_ascii_lowercase();

    let body_end = if head.contains("transfer-encoding: chunked") {
        loop {
            if let Some(pos) = find_subsequence(&leftover[head_end..], b"0\r\n\r\n") {
                break head_end + pos + 5;
            }
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return std::mem::take(leftover),
                Ok(n) => leftover.extend_from_slice(&buf[..n]),
            }
        }
    } else if let Some(length) = content_length(&head) {
        while leftover.len() < head_end + length {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return std::mem::take(leftover),
                Ok(n) => leftover.extend_from_slice(&buf[..n]),
            }
        }
        head_end + length
    } else {
        head_end
    };

    leftover.drain(..body_end).collect()
}

/// Read until `count` request heads have arrived (pipelined requests with no
/// bodies land back to back).
pub fn read_request_heads(stream: &mut TcpStream, count: usize) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    while count_subsequences(&data, b"\r\n\r\n") < count {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return data,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    }
    data
}

fn content_length(head_lower: &str) -> Option<usize> {
    head_lower
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|rest| rest.trim().parse().ok())
}

pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

pub fn count_subsequences(haystack: &[u8], needle: &[u8]) -> usize {
    if haystack.len() < needle.len() {
        return 0;
    }
    haystack.windows(needle.len()).filter(|window| *window == needle).count()
}

/// A minimal success response with the given body.
pub fn ok_response(body: &str) -> String {
    format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{body}", body.len())
}
