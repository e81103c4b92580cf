//! Cursor-based pagination utilities.
//!
//! Result sets paginate statelessly: the caller asks for a page with
//! [`PaginationParameters`], and the follow-up page travels as an opaque
//! base64 cursor. Each cursor carries a fingerprint of the request it was
//! minted for, so a cursor replayed against a different request is rejected
//! instead of silently paging through the wrong results.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::{GranaryError, Result};
use crate::request::DataRequest;

/// A one-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationParameters {
    page: u64,
    per_page: u64,
}

impl PaginationParameters {
    pub fn new(page: u64, per_page: u64) -> Result<Self> {
        if page == 0 {
            return Err(GranaryError::Binding(
                "page numbering starts at 1".to_string(),
            ));
        }
        if per_page == 0 {
            return Err(GranaryError::Binding(
                "perPage must be positive".to_string(),
            ));
        }
        Ok(PaginationParameters { page, per_page })
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn per_page(&self) -> u64 {
        self.per_page
    }

    /// Rows to skip before this page starts.
    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.per_page)
    }

    pub fn next(&self) -> PaginationParameters {
        PaginationParameters {
            page: self.page.saturating_add(1),
            per_page: self.per_page,
        }
    }
}

/// Continuation token for the next page of a result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    page: u64,
    per_page: u64,
    /// Fingerprint of the request this cursor belongs to.
    query_hash: u64,
}

impl Cursor {
    pub fn new(pagination: PaginationParameters, query_hash: u64) -> Self {
        Cursor {
            page: pagination.page(),
            per_page: pagination.per_page(),
            query_hash,
        }
    }

    /// The page selection this cursor points at.
    pub fn pagination(&self) -> Result<PaginationParameters> {
        PaginationParameters::new(self.page, self.per_page)
    }

    pub fn query_hash(&self) -> u64 {
        self.query_hash
    }

    /// Encode cursor to a URL-safe base64 string.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_string(self)
            .map_err(|e| GranaryError::Execution(format!("failed to serialize cursor: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(json.as_bytes()))
    }

    /// Decode cursor from a base64 string.
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| GranaryError::Binding(format!("invalid cursor encoding: {e}")))?;
        let json = String::from_utf8(bytes)
            .map_err(|e| GranaryError::Binding(format!("invalid cursor UTF-8: {e}")))?;
        serde_json::from_str(&json)
            .map_err(|e| GranaryError::Binding(format!("invalid cursor format: {e}")))
    }

    /// Validate that this cursor matches the given query hash.
    pub fn validate_query_hash(&self, expected_hash: u64) -> Result<()> {
        if self.query_hash != expected_hash {
            return Err(GranaryError::Binding(
                "cursor does not match current query - the query parameters may have changed"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Compute a fingerprint of a bound request for cursor validation.
///
/// Everything that shapes the result set participates; pagination controls
/// do not, since they only select a window into it.
pub fn compute_query_hash(request: &DataRequest) -> u64 {
    let mut hasher = DefaultHasher::new();

    request.table().name().hash(&mut hasher);
    request.granularity().to_string().hash(&mut hasher);
    request.time_zone().name().hash(&mut hasher);
    for dimension in request.dimensions() {
        dimension.api_name().hash(&mut hasher);
    }
    for metric in request.metric_names() {
        metric.hash(&mut hasher);
    }
    for interval in request.intervals() {
        interval.to_string().hash(&mut hasher);
    }

    if let Ok(filters_json) = serde_json::to_string(request.filters()) {
        filters_json.hash(&mut hasher);
    }
    if let Ok(havings_json) = serde_json::to_string(request.havings()) {
        havings_json.hash(&mut hasher);
    }
    if let Ok(sorts_json) = serde_json::to_string(request.sorts()) {
        sorts_json.hash(&mut hasher);
    }

    request.count().hash(&mut hasher);
    request.top_n().hash(&mut hasher);

    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_page_and_page_size() {
        assert!(PaginationParameters::new(0, 10).is_err());
        assert!(PaginationParameters::new(1, 0).is_err());
        assert!(PaginationParameters::new(1, 10).is_ok());
    }

    #[test]
    fn test_offset_skips_whole_pages() {
        let third = PaginationParameters::new(3, 25).unwrap();
        assert_eq!(third.offset(), 50);
        assert_eq!(third.next().page(), 4);
        assert_eq!(third.next().offset(), 75);
    }

    #[test]
    fn test_cursor_roundtrip() {
        let pagination = PaginationParameters::new(2, 25).unwrap();
        let cursor = Cursor::new(pagination, 12345678);
        let encoded = cursor.encode().unwrap();
        let decoded = Cursor::decode(&encoded).unwrap();

        assert_eq!(decoded.query_hash(), 12345678);
        assert_eq!(decoded.pagination().unwrap(), pagination);
    }

    #[test]
    fn test_invalid_cursor_rejected() {
        let result = Cursor::decode("not-valid-base64!!!");
        assert!(result.is_err());

        let result = Cursor::decode(&URL_SAFE_NO_PAD.encode(b"not json"));
        assert!(result.is_err());
    }

    #[test]
    fn test_query_hash_validation() {
        let pagination = PaginationParameters::new(1, 10).unwrap();
        let cursor = Cursor::new(pagination, 12345);

        assert!(cursor.validate_query_hash(12345).is_ok());
        assert!(cursor.validate_query_hash(99999).is_err());
    }
}
