use time::{Duration, OffsetDateTime};

/// Seconds left in an attempt, recomputed from the authoritative start time.
///
/// Elapsed time is floored to whole seconds. A start time in the future (clock
/// skew between client and server) counts as zero elapsed.
pub fn compute_remaining(start_time: OffsetDateTime, duration_seconds: u64, now: OffsetDateTime) -> u64 {
    let elapsed = (now - start_time).whole_seconds().max(0) as u64;
    duration_seconds.saturating_sub(elapsed)
}

pub fn deadline(start_time: OffsetDateTime, duration_seconds: u64) -> OffsetDateTime {
    start_time + Duration::seconds(i64::try_from(duration_seconds).unwrap_or(i64::MAX / 2))
}

/// Whether a tick landing on `remaining` should checkpoint progress.
pub fn is_checkpoint_second(remaining: u64, period_seconds: u64) -> bool {
    period_seconds > 0 && remaining > 0 && remaining % period_seconds == 0
}

pub fn format_remaining(remaining: u64) -> String {
    let hours = remaining / 3600;
    let minutes = (remaining % 3600) / 60;
    let seconds = remaining % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}
