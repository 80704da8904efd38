use chrono::{DateTime, Utc};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Whole days elapsed since `since`, rounded up. A start in the future counts
/// as zero elapsed days.
pub fn elapsed_days(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let elapsed = now.signed_duration_since(since).num_milliseconds();
    if elapsed <= 0 {
        return 0;
    }
    (elapsed + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn partial_days_round_up() {
        let now = Utc::now();
        assert_eq!(elapsed_days(now, now), 0);
        assert_eq!(elapsed_days(now - Duration::milliseconds(1), now), 1);
        assert_eq!(elapsed_days(now - Duration::hours(23), now), 1);
        assert_eq!(elapsed_days(now - Duration::days(7), now), 7);
        assert_eq!(
            elapsed_days(now - Duration::days(7) - Duration::seconds(1), now),
            8
        );
    }

    #[test]
    fn future_start_is_zero_days() {
        let now = Utc::now();
        assert_eq!(elapsed_days(now + Duration::days(30), now), 0);
    }
}
