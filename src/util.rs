use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static ERROR_ITEM_COUNTER: AtomicU64 = AtomicU64::new(1);

#[inline]
pub(crate) fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Current time as an RFC 3339 timestamp with millisecond precision.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Temporary id of a response placeholder until the vendor assigns one.
pub(crate) fn temp_response_id() -> String {
    format!("temp_id_{}", unix_now_millis())
}

/// Fresh output item id for an error note.
///
/// The sequence suffix keeps ids unique when several notes land within
/// the same millisecond.
pub(crate) fn next_error_item_id() -> String {
    let seq = ERROR_ITEM_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("error_{}_{seq}", unix_now_millis())
}
