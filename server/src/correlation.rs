//! Correlation identifiers for connection attempts and inbound events.
//!
//! Every connection attempt is assigned a [`CorrelationId`]. When the upgrade
//! request carries an `x-request-id` header with a usable value it is honored,
//! otherwise a fresh UUID is generated server-side. The id is stable for the
//! life of the connection and is echoed to the client in the upgrade response,
//! in the `connected` acknowledgement and in every error frame.
//!
//! Individual inbound events get an [`EventId`] derived from the connection's
//! correlation id and a per-connection sequence number, so a single event can
//! be located in the logs without losing the connection it belongs to.

use std::fmt;

use axum::http::HeaderMap;
use uuid::Uuid;

/// Header used to propagate correlation ids.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest inbound correlation id that is accepted verbatim.
const MAX_INBOUND_LEN: usize = 128;

/// Identifier threaded through one connection's logs and error frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a new random correlation id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Uses `candidate` when it is a well-formed id, otherwise generates one.
    ///
    /// Well-formed means non-empty, at most 128 characters and made only of
    /// visible ASCII, so the value is safe to log and to echo in a header.
    pub fn resolve(candidate: Option<&str>) -> Self {
        match candidate.map(str::trim) {
            Some(value) if is_well_formed(value) => Self(value.to_string()),
            _ => Self::generate(),
        }
    }

    /// Reads the correlation id from request headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::resolve(
            headers
                .get(REQUEST_ID_HEADER)
                .and_then(|value| value.to_str().ok()),
        )
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derives the id of the `seq`-th inbound event on this connection.
    pub fn event(&self, seq: u64) -> EventId {
        EventId(format!("{}.{}", self.0, seq))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a single inbound event: `<correlation id>.<sequence>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventId(String);

impl EventId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_well_formed(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_INBOUND_LEN
        && value.bytes().all(|b| b.is_ascii_graphic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn honors_inbound_header() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-42"));

        let id = CorrelationId::from_headers(&headers);
        assert_eq!(id.as_str(), "req-42");
    }

    #[test]
    fn generates_when_header_absent() {
        let id = CorrelationId::from_headers(&HeaderMap::new());
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn generates_when_header_malformed() {
        let id = CorrelationId::resolve(Some("has spaces inside"));
        assert!(Uuid::parse_str(id.as_str()).is_ok());

        let id = CorrelationId::resolve(Some(""));
        assert!(Uuid::parse_str(id.as_str()).is_ok());

        let too_long = "a".repeat(MAX_INBOUND_LEN + 1);
        let id = CorrelationId::resolve(Some(&too_long));
        assert_ne!(id.as_str(), too_long);
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let id = CorrelationId::resolve(Some("  abc-123 "));
        assert_eq!(id.as_str(), "abc-123");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(CorrelationId::generate(), CorrelationId::generate());
    }

    #[test]
    fn event_ids_extend_the_correlation_id() {
        let id = CorrelationId::resolve(Some("conn-7"));
        assert_eq!(id.event(1).as_str(), "conn-7.1");
        assert_eq!(id.event(12).to_string(), "conn-7.12");
    }
}
