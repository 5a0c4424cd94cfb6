//! Byte-range resolution for partial-content responses.
//!
//! Given a resource length and the inbound `Range` header, computes the
//! serving window and status code. Only the `bytes=<start>-<end>` form is
//! recognized (either bound optional); suffix-range semantics are not
//! applied, so `bytes=-500` pins the end of the window rather than taking
//! the last 500 bytes.
//!
//! Unsatisfiable or malformed ranges deliberately degrade to a full 200
//! response instead of a 416. This diverges from RFC 7233's expected
//! response and is kept as a compatibility decision.

use std::sync::OnceLock;

use hyper::StatusCode;
use regex::Regex;

/// The resolved serving window for a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedRange {
    /// 200 for the full resource, 206 when a range bound was accepted.
    pub status: StatusCode,
    /// First byte to serve. `None` only for zero-length resources.
    pub start: Option<u64>,
    /// Last byte to serve (inclusive). `None` only for zero-length resources.
    pub end: Option<u64>,
    /// Number of bytes served: `end - start + 1`, or 0 for an empty resource.
    pub length: u64,
}

impl ServedRange {
    /// `Content-Range` header value for a 206 response.
    pub fn content_range(&self, total: u64) -> Option<String> {
        if self.status != StatusCode::PARTIAL_CONTENT {
            return None;
        }
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(format!("bytes {start}-{end}/{total}")),
            _ => None,
        }
    }
}

fn range_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^bytes=([0-9]*)-([0-9]*)$").unwrap())
}

/// Compute the serving window for a resource of `length` bytes.
///
/// A present start bound is accepted as-is; a present end bound is accepted
/// only when it fits inside the resource. Accepting either bound switches
/// the status to 206. If the accepted bounds cross (`start > end`), the
/// whole range is rejected silently and the full resource is served.
pub fn compute_range(length: u64, range_header: Option<&str>) -> ServedRange {
    if length == 0 {
        return ServedRange {
            status: StatusCode::OK,
            start: None,
            end: None,
            length: 0,
        };
    }

    let mut start = 0u64;
    let mut end = length - 1;
    let mut status = StatusCode::OK;

    if let Some(captures) = range_header.and_then(|h| range_pattern().captures(h)) {
        if let Some(value) = parse_bound(captures.get(1).map(|m| m.as_str())) {
            start = value;
            status = StatusCode::PARTIAL_CONTENT;
        }
        if let Some(value) = parse_bound(captures.get(2).map(|m| m.as_str())) {
            if value <= length - 1 {
                end = value;
                status = StatusCode::PARTIAL_CONTENT;
            }
        }
    }

    if start > end {
        start = 0;
        end = length - 1;
        status = StatusCode::OK;
    }

    ServedRange {
        status,
        start: Some(start),
        end: Some(end),
        length: end - start + 1,
    }
}

fn parse_bound(bound: Option<&str>) -> Option<u64> {
    bound.filter(|s| !s.is_empty()).and_then(|s| s.parse().ok())
}
