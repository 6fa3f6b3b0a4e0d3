//! Query string serialization.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Bytes percent-encoded in query keys and values; RFC 3986 unreserved
/// characters pass through.
const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A request query: either a raw pre-encoded string or an ordered parameter
/// list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Query {
    /// Appended verbatim after `?`.
    Raw(String),
    /// Ordered key/value parameters. A `None` value emits the bare key; a
    /// multi-valued entry emits repeated `key=value` pairs.
    Params(Vec<(String, Option<QueryValue>)>),
}

/// One query parameter value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryValue {
    One(String),
    Many(Vec<String>),
}

impl Query {
    /// Raw query string, used verbatim.
    pub fn raw(query: impl Into<String>) -> Self {
        Self::Raw(query.into())
    }

    /// Empty parameter list to extend with [`Query::param`].
    pub fn params() -> Self {
        Self::Params(Vec::new())
    }

    /// Append a `key=value` parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key.into(), Some(QueryValue::One(value.into())));
        self
    }

    /// Append a bare key with no value.
    pub fn bare(mut self, key: impl Into<String>) -> Self {
        self.push(key.into(), None);
        self
    }

    /// Append a key emitted once per value.
    pub fn multi<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push(key.into(), Some(QueryValue::Many(values)));
        self
    }

    fn push(&mut self, key: String, value: Option<QueryValue>) {
        match self {
            Self::Params(params) => params.push((key, value)),
            Self::Raw(_) => *self = Self::Params(vec![(key, value)]),
        }
    }
}

impl From<&str> for Query {
    fn from(raw: &str) -> Self {
        Self::Raw(raw.to_string())
    }
}

impl From<String> for Query {
    fn from(raw: String) -> Self {
        Self::Raw(raw)
    }
}

/// Serialize `query` onto `target`, including the leading `?`.
///
/// An empty parameter list emits nothing; there is never a trailing `&`.
pub(crate) fn append_query(target: &mut Vec<u8>, query: &Query) {
    match query {
        Query::Raw(raw) => {
            target.push(b'?');
            target.extend_from_slice(raw.as_bytes());
        }
        Query::Params(params) => {
            if params.is_empty() {
                return;
            }
            target.push(b'?');
            let mut first = true;
            let mut pair = |target: &mut Vec<u8>, key: &str, value: Option<&str>| {
                if !first {
                    target.push(b'&');
                }
                first = false;
                target.extend(utf8_percent_encode(key, QUERY_ENCODE).flat_map(str::bytes));
                if let Some(value) = value {
                    target.push(b'=');
                    target.extend(utf8_percent_encode(value, QUERY_ENCODE).flat_map(str::bytes));
                }
            };
            for (key, value) in params {
                match value {
                    None => pair(target, key, None),
                    Some(QueryValue::One(value)) => pair(target, key, Some(value)),
                    Some(QueryValue::Many(values)) => {
                        for value in values {
                            pair(target, key, Some(value));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialize(query: &Query) -> String {
        let mut out = Vec::new();
        append_query(&mut out, query);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_params_serialization_law() {
        // {a: 1, b: [2, 3], c: nil} -> ?a=1&b=2&b=3&c
        let query = Query::params()
            .param("a", "1")
            .multi("b", ["2", "3"])
            .bare("c");
        assert_eq!(serialize(&query), "?a=1&b=2&b=3&c");
    }

    #[test]
    fn test_raw_is_verbatim() {
        let query = Query::raw("a=1&pre%20encoded");
        assert_eq!(serialize(&query), "?a=1&pre%20encoded");
    }

    #[test]
    fn test_values_are_percent_encoded() {
        let query = Query::params().param("q", "a b&c=d");
        assert_eq!(serialize(&query), "?q=a%20b%26c%3Dd");
    }

    #[test]
    fn test_empty_params_emit_nothing() {
        assert_eq!(serialize(&Query::params()), "");
    }

    #[test]
    fn test_order_preserved() {
        let query = Query::params().bare("z").param("a", "1");
        assert_eq!(serialize(&query), "?z&a=1");
    }
}
