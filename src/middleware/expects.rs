//! Status expectation enforcement.

use crate::error::{Error, Result};
use crate::middleware::Middleware;
use crate::options::Datum;

/// Raises [`Error::HttpStatus`] when the response status falls outside the
/// datum's `expects` set. An empty set accepts every status.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExpectedStatuses;

impl Middleware for ExpectedStatuses {
    fn response_call(&self, datum: &mut Datum) -> Result<()> {
        if datum.expects.is_empty() {
            return Ok(());
        }
        if let Some(response) = &datum.response {
            if !datum.expects.contains(&response.status) {
                return Err(Error::http_status(
                    response.status,
                    format!("expected one of {:?}", datum.expects),
                ));
            }
        }
        Ok(())
    }
}
