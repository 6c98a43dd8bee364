//! Rate limit header parsing.
//!
//! Turns the rate-limit headers of an API response into the snapshot a
//! lease is committed with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Authoritative bucket state reported by a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    /// Bucket capacity per window
    pub maximum: u32,

    /// Tokens left after this request
    pub remaining: u32,

    /// When the window resets
    pub reset: DateTime<Utc>,

    /// Server-assigned bucket hash
    pub hash: String,
}

impl RateLimitSnapshot {
    /// Create a snapshot from explicit values
    pub fn new(maximum: u32, remaining: u32, reset: DateTime<Utc>, hash: impl Into<String>) -> Self {
        Self {
            maximum,
            remaining,
            reset,
            hash: hash.into(),
        }
    }

    /// Build a snapshot from response headers.
    ///
    /// Returns `None` when the response carries no complete set of bucket
    /// headers, which is the case for routes the platform does not limit.
    pub fn from_headers(headers: &HashMap<String, String>) -> Option<Self> {
        Self::from_headers_at(headers, Utc::now())
    }

    /// Same as [`RateLimitSnapshot::from_headers`] with an explicit clock
    pub fn from_headers_at(headers: &HashMap<String, String>, now: DateTime<Utc>) -> Option<Self> {
        let parsed = RateLimitHeaders::parse(headers);
        let reset = parsed.reset_at(now)?;

        Some(Self {
            maximum: parsed.limit?,
            remaining: parsed.remaining?,
            reset,
            hash: parsed.bucket?,
        })
    }
}

/// Which quota a 429 response was charged against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitScope {
    /// Per-user (bot) quota
    User,
    /// Global quota across all routes
    Global,
    /// Per-resource quota shared by all users
    Shared,
}

impl RateLimitScope {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(RateLimitScope::User),
            "global" => Some(RateLimitScope::Global),
            "shared" => Some(RateLimitScope::Shared),
            _ => None,
        }
    }
}

/// Parsed rate limit headers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// `x-ratelimit-limit`
    pub limit: Option<u32>,

    /// `x-ratelimit-remaining`
    pub remaining: Option<u32>,

    /// `x-ratelimit-reset`, epoch seconds with fractional milliseconds
    pub reset: Option<f64>,

    /// `x-ratelimit-reset-after`, seconds
    pub reset_after: Option<f64>,

    /// `x-ratelimit-bucket`
    pub bucket: Option<String>,

    /// `x-ratelimit-global`
    pub global: bool,

    /// `x-ratelimit-scope`
    pub scope: Option<RateLimitScope>,

    /// `retry-after` on 429 responses
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    /// Parse headers from a header map. Header names match case-insensitively.
    pub fn parse(headers: &HashMap<String, String>) -> Self {
        Self {
            limit: parse_header(headers, "x-ratelimit-limit"),
            remaining: parse_header(headers, "x-ratelimit-remaining"),
            reset: parse_header(headers, "x-ratelimit-reset"),
            reset_after: parse_header(headers, "x-ratelimit-reset-after"),
            bucket: header(headers, "x-ratelimit-bucket")
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            global: header(headers, "x-ratelimit-global")
                .map(|value| value.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            scope: header(headers, "x-ratelimit-scope").and_then(RateLimitScope::parse),
            retry_after: parse_header::<f64>(headers, "retry-after")
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
        }
    }

    /// Absolute reset time.
    ///
    /// `reset-after` is preferred because it does not depend on the local
    /// clock agreeing with the server's.
    pub fn reset_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let Some(after) = self.reset_after.filter(|secs| secs.is_finite() && *secs >= 0.0) {
            let millis = (after * 1000.0).round() as i64;
            return chrono::Duration::try_milliseconds(millis)
                .and_then(|delta| now.checked_add_signed(delta));
        }

        self.reset
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0).round() as i64))
    }
}

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn parse_header<T: std::str::FromStr>(headers: &HashMap<String, String>, name: &str) -> Option<T> {
    header(headers, name).and_then(|value| value.trim().parse().ok())
}
