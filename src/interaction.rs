//! Captured HTTP messages
//!
//! Snapshots keep every byte the wire carried: header names and values in
//! arrival order (duplicates included), raw bodies, and the status text.

use bytes::Bytes;

/// Ordered header list; repeated names are kept as separate entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Bytes)>,
}

impl Headers {
    /// Create an empty header list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any earlier values for the same name
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<Bytes>) {
        self.entries.push((name.into(), value.into()));
    }

    /// All values for `name` in arrival order (case-insensitive)
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Bytes> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// First value for `name`, if any
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Iterate entries in arrival order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of entries (duplicates counted separately)
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no headers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<Bytes>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// Inbound request as the proxy received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSnapshot {
    /// HTTP method
    pub method: String,
    /// Path and query, exactly as sent by the client
    pub target: String,
    /// Request headers
    pub headers: Headers,
    /// Raw request body
    pub body: Bytes,
}

impl RequestSnapshot {
    /// Create a snapshot with no headers and an empty body
    #[must_use]
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Path component of the target
    #[must_use]
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    /// Query component of the target, without the `?`
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }
}

/// Response as returned by the remote (or synthesized for an upstream failure)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
    /// HTTP status code
    pub status: u16,
    /// Status text
    pub reason: String,
    /// Response headers
    pub headers: Headers,
    /// Raw response body
    pub body: Bytes,
}

impl ResponseSnapshot {
    /// Create a snapshot with the canonical reason for `status`
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        let reason = hyper::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();

        Self {
            status,
            reason,
            headers: Headers::new(),
            body: body.into(),
        }
    }
}

/// One captured request/response pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    /// Position in the cassette, starting at 1
    pub sequence: u64,
    /// What the client sent
    pub request: RequestSnapshot,
    /// What the client got back
    pub response: ResponseSnapshot,
}
