// =============================================================================
// Rate-Limit Tracker — request-weight accounting for Binance futures
// =============================================================================
//
// Binance USD-M futures allow 2400 request weight per minute per IP.  We
// hard-cap ourselves well below that since other tools may share the key.
//
// The tracker reads the `X-MBX-USED-WEIGHT-1M` response header after every
// request; the exchange's number always supersedes our own estimate.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};

/// Requests that would push the minute's weight past this are refused.
const WEIGHT_HARD_LIMIT: u32 = 1000;
/// Crossing this logs a warning once.
const WEIGHT_WARN_THRESHOLD: u32 = 800;

pub const USED_WEIGHT_HEADER: &str = "X-MBX-USED-WEIGHT-1M";

/// Thread-safe request-weight tracker backed by an atomic counter.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
        }
    }

    /// Update the counter from the response headers returned by Binance.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let Some(w) = headers
            .get(USED_WEIGHT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            return;
        };

        let prev = self.used_weight_1m.swap(w, Ordering::Relaxed);
        if w >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
            warn!(
                used_weight = w,
                hard_limit = WEIGHT_HARD_LIMIT,
                "rate-limit weight crossed warning threshold"
            );
        }
        debug!(used_weight_1m = w, "rate-limit weight updated from header");
    }

    /// Whether a request costing `weight` still fits under the cap.
    pub fn can_send_request(&self, weight: u32) -> bool {
        let current = self.used_weight_1m.load(Ordering::Relaxed);
        let allowed = current.saturating_add(weight) <= WEIGHT_HARD_LIMIT;
        if !allowed {
            warn!(
                current_weight = current,
                requested_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request blocked, would exceed rate limit"
            );
        }
        allowed
    }

    pub fn used_weight(&self) -> u32 {
        self.used_weight_1m.load(Ordering::Relaxed)
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.used_weight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn headers(weight: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(USED_WEIGHT_HEADER, HeaderValue::from_str(weight).unwrap());
        h
    }

    #[test]
    fn header_replaces_counter() {
        let t = RateLimitTracker::new();
        t.update_from_headers(&headers("120"));
        assert_eq!(t.used_weight(), 120);
        t.update_from_headers(&headers("15"));
        assert_eq!(t.used_weight(), 15);
    }

    #[test]
    fn garbage_header_is_ignored() {
        let t = RateLimitTracker::new();
        t.update_from_headers(&headers("42"));
        t.update_from_headers(&headers("lots"));
        assert_eq!(t.used_weight(), 42);
    }

    #[test]
    fn blocks_near_hard_limit() {
        let t = RateLimitTracker::new();
        assert!(t.can_send_request(5));
        t.update_from_headers(&headers("996"));
        assert!(t.can_send_request(4));
        assert!(!t.can_send_request(5));
    }
}
