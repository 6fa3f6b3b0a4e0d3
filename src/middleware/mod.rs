//! Middleware composition around the connection's wire handlers.
//!
//! A middleware wraps the downstream request/response pair: `request_call`
//! runs outermost-in on the way to the wire writer, `response_call` runs
//! innermost-out after the reader. A middleware short-circuits the descent by
//! populating `datum.response` in `request_call`; the response traversal
//! still covers the whole stack.

mod expects;
mod mock;

pub use expects::ExpectedStatuses;
pub use mock::{clear_stubs, stub, unstub, Mock, StubReply, StubRequest, StubResponse};

use std::sync::Arc;

use crate::connection::Connection;
use crate::error::Result;
use crate::options::Datum;

/// One layer of the request/response pipeline.
///
/// Implementations may mutate the datum freely but must not assume exclusive
/// ownership of it.
pub trait Middleware: Send + Sync {
    /// Called on the way down to the wire writer.
    fn request_call(&self, datum: &mut Datum) -> Result<()> {
        let _ = datum;
        Ok(())
    }

    /// Called on the way back up after the response is available.
    fn response_call(&self, datum: &mut Datum) -> Result<()> {
        let _ = datum;
        Ok(())
    }
}

/// An ordered middleware composition; the first layer is the outermost and
/// the connection's wire writer is the terminal handler.
#[derive(Clone, Default)]
pub(crate) struct Stack {
    layers: Vec<Arc<dyn Middleware>>,
}

impl Stack {
    pub(crate) fn new(layers: Vec<Arc<dyn Middleware>>) -> Self {
        Self { layers }
    }

    /// Descend through the layers, stopping early once a middleware has
    /// populated the response, and ending at the wire writer otherwise.
    pub(crate) fn request_call(&self, connection: &Connection, datum: &mut Datum) -> Result<()> {
        for layer in &self.layers {
            layer.request_call(datum)?;
            if datum.response.is_some() {
                return Ok(());
            }
        }
        connection.write_request(datum)
    }

    /// Ascend through the layers in reverse order.
    pub(crate) fn response_call(&self, datum: &mut Datum) -> Result<()> {
        for layer in self.layers.iter().rev() {
            layer.response_call(datum)?;
        }
        Ok(())
    }
}

/// The stack installed when no middleware list is configured.
pub(crate) fn default_middlewares() -> Vec<Arc<dyn Middleware>> {
    vec![Arc::new(ExpectedStatuses), Arc::new(Mock)]
}
