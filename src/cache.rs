//! Thread-local socket cache: one live transport per destination key.
//!
//! The orchestrator checks a socket out for the duration of an exchange and
//! checks it back in when the server kept the connection alive. Because the
//! entry is removed while checked out, re-entrant requests to the same
//! destination (say, from a streaming sink) open a second socket instead of
//! fighting over one.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::transport::Transport;

thread_local! {
    static SOCKETS: RefCell<HashMap<String, Box<dyn Transport>>> =
        RefCell::new(HashMap::new());
}

/// Remove and return the cached transport for `key`.
pub(crate) fn checkout(key: &str) -> Option<Box<dyn Transport>> {
    SOCKETS.with(|cell| cell.borrow_mut().remove(key))
}

/// Store a reusable transport under `key`.
pub(crate) fn checkin(key: &str, transport: Box<dyn Transport>) {
    SOCKETS.with(|cell| {
        cell.borrow_mut().insert(key.to_string(), transport);
    });
}

/// Close and drop the cached transport for `key`. Idempotent.
pub(crate) fn evict(key: &str) {
    let entry = SOCKETS.with(|cell| cell.borrow_mut().remove(key));
    if let Some(mut transport) = entry {
        transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeTransport {
        closed: Arc<AtomicUsize>,
    }

    impl Transport for FakeTransport {
        fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
            Ok(0)
        }
        fn write_all(&mut self, _buf: &[u8]) -> Result<()> {
            Ok(())
        }
        fn read_line(&mut self, _line: &mut Vec<u8>) -> Result<()> {
            Ok(())
        }
        fn remote_ip(&self) -> Option<String> {
            None
        }
        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_checkout_empties_the_slot() {
        let closed = Arc::new(AtomicUsize::new(0));
        checkin(
            "test://checkout:80",
            Box::new(FakeTransport {
                closed: closed.clone(),
            }),
        );
        assert!(checkout("test://checkout:80").is_some());
        assert!(checkout("test://checkout:80").is_none());
    }

    #[test]
    fn test_evict_closes_and_is_idempotent() {
        let closed = Arc::new(AtomicUsize::new(0));
        checkin(
            "test://evict:80",
            Box::new(FakeTransport {
                closed: closed.clone(),
            }),
        );
        evict("test://evict:80");
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        evict("test://evict:80");
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_keys_are_isolated() {
        let closed = Arc::new(AtomicUsize::new(0));
        checkin(
            "test://a:80",
            Box::new(FakeTransport {
                closed: closed.clone(),
            }),
        );
        assert!(checkout("test://b:80").is_none());
        assert!(checkout("test://a:80").is_some());
    }
}
