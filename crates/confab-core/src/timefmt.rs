//! Human-readable timestamp buckets.
//!
//! One derivation shared by last-seen rendering and per-message send times,
//! so both surfaces always agree on the same text for the same age.

use chrono::{DateTime, Utc};

/// Render the age of a timestamp in fixed buckets.
///
/// Boundaries: under 60s "just now", under 120s "1 minute ago", under an
/// hour "N minutes ago", under a day "N hours ago", exactly one day prior
/// "yesterday", under a week "N days ago", anything older the absolute
/// date ("August 06, 2026").
#[must_use]
pub fn sent_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(then);
    let days = diff.num_days();

    if days <= 0 {
        let secs = diff.num_seconds().max(0);
        if secs < 60 {
            "just now".to_string()
        } else if secs < 120 {
            "1 minute ago".to_string()
        } else if secs < 3600 {
            format!("{} minutes ago", secs / 60)
        } else {
            format!("{} hours ago", secs / 3600)
        }
    } else if days == 1 {
        "yesterday".to_string()
    } else if days < 7 {
        format!("{days} days ago")
    } else {
        then.format("%B %d, %Y").to_string()
    }
}

/// Render a last-online timestamp; `None` means the user was never seen.
#[must_use]
pub fn last_seen_text(last_online: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match last_online {
        Some(then) => sent_time(then, now),
        None => "never".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs_ago: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        (now - Duration::seconds(secs_ago), now)
    }

    #[test]
    fn test_seconds_buckets() {
        let (then, now) = at(30);
        assert_eq!(sent_time(then, now), "just now");

        let (then, now) = at(90);
        assert_eq!(sent_time(then, now), "1 minute ago");

        let (then, now) = at(200);
        assert_eq!(sent_time(then, now), "3 minutes ago");

        let (then, now) = at(2 * 3600 + 15);
        assert_eq!(sent_time(then, now), "2 hours ago");
    }

    #[test]
    fn test_day_buckets() {
        let (then, now) = at(86_400 + 3600);
        assert_eq!(sent_time(then, now), "yesterday");

        let (then, now) = at(2 * 86_400);
        assert_eq!(sent_time(then, now), "2 days ago");
    }

    #[test]
    fn test_old_timestamps_render_absolute_date() {
        let (then, now) = at(10 * 86_400);
        assert_eq!(sent_time(then, now), "March 05, 2024");
    }

    #[test]
    fn test_last_seen_never() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        assert_eq!(last_seen_text(None, now), "never");
        assert_eq!(
            last_seen_text(Some(now - Duration::seconds(30)), now),
            "just now"
        );
    }
}
