use std::io;

use super::storage::KeyValueStore;

const REQUEST_COUNT_KEY: &str = "requestCount";
const LAST_REQUEST_TIME_KEY: &str = "lastRequestTime";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub request_count: u32,
    /// Epoch millis of the last accepted request.
    pub window_start_timestamp: i64,
}

impl RateLimitState {
    /// Missing or unparseable entries read as zero.
    pub fn load(store: &(impl KeyValueStore + ?Sized)) -> Self {
        let request_count = store.get(REQUEST_COUNT_KEY).and_then(|v| v.parse().ok()).unwrap_or(0);
        let window_start_timestamp =
            store.get(LAST_REQUEST_TIME_KEY).and_then(|v| v.parse().ok()).unwrap_or(0);

        Self { request_count, window_start_timestamp }
    }

    pub fn save(self, store: &mut (impl KeyValueStore + ?Sized)) -> io::Result<()> {
        store.set(REQUEST_COUNT_KEY, self.request_count.to_string())?;
        store.set(LAST_REQUEST_TIME_KEY, self.window_start_timestamp.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitExceeded {
    pub retry_after_ms: i64,
}

/// The window start moves to `now` on every accepted call, not only when the
/// window resets. A window start ahead of `now` counts as an expired window.
pub const fn check_and_record(
    state: RateLimitState,
    now: i64,
    max_requests: u32,
    window_duration_ms: i64,
) -> Result<RateLimitState, RateLimitExceeded> {
    let elapsed = now.saturating_sub(state.window_start_timestamp);
    let expired = elapsed < 0 || elapsed > window_duration_ms;

    if state.request_count >= max_requests && !expired {
        return Err(RateLimitExceeded { retry_after_ms: window_duration_ms - elapsed });
    }

    let request_count = if expired { 1 } else { state.request_count.saturating_add(1) };

    Ok(RateLimitState { request_count, window_start_timestamp: now })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimiter {
    limit: u32,
    duration_ms: i64,
}

impl RateLimiter {
    pub const fn new(limit: u32, duration_ms: i64) -> Self {
        Self { limit, duration_ms }
    }

    pub const fn limit(self) -> u32 {
        self.limit
    }

    pub const fn check_and_record(
        self,
        state: RateLimitState,
        now: i64,
    ) -> Result<RateLimitState, RateLimitExceeded> {
        check_and_record(state, now, self.limit, self.duration_ms)
    }
}

pub fn now_millis() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(nanos).unwrap_or(i64::MAX)
}
