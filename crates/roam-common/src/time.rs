//! Timestamp helpers shared by every pack writer.

use chrono::{DateTime, Utc};

/// Current UTC time formatted as RFC3339, the timestamp format every
/// cache table stores in `created_at`/`updated_at` columns.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Parse an RFC3339 timestamp, tolerating a bare `Z` suffix.
pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// True if `created_at` is older than `ttl_secs` relative to `now`.
pub fn is_expired(created_at: &str, ttl_secs: i64, now: DateTime<Utc>) -> bool {
    match parse_iso(created_at) {
        Some(t) => (now - t).num_seconds() > ttl_secs,
        None => true,
    }
}

/// True if an event's end timestamp (`end_at`/`effective_until`/`end_time`)
/// has already passed relative to `now`. An unset or unparseable end
/// timestamp never expires an event.
pub fn event_ended(end_at: Option<&str>, now: DateTime<Utc>) -> bool {
    match end_at.and_then(parse_iso) {
        Some(t) => t < now,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_iso_round_trips_through_parse_iso() {
        let s = now_iso();
        assert!(parse_iso(&s).is_some());
    }

    #[test]
    fn expiry_respects_ttl_window() {
        let now = Utc::now();
        let created = (now - chrono::Duration::seconds(100)).to_rfc3339();
        assert!(is_expired(&created, 50, now));
        assert!(!is_expired(&created, 200, now));
    }

    #[test]
    fn unparseable_timestamp_is_treated_as_expired() {
        assert!(is_expired("not-a-time", 1000, Utc::now()));
    }

    #[test]
    fn event_ended_prunes_past_end_timestamps() {
        let now = Utc::now();
        let past = (now - chrono::Duration::hours(1)).to_rfc3339();
        let future = (now + chrono::Duration::hours(1)).to_rfc3339();
        assert!(event_ended(Some(&past), now));
        assert!(!event_ended(Some(&future), now));
    }

    #[test]
    fn event_ended_treats_missing_end_as_ongoing() {
        assert!(!event_ended(None, Utc::now()));
    }
}
