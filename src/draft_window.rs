//! Draft edit window.
//!
//! Rosters may be edited from Saturday 00:00 UTC until Monday 00:00 UTC.
//! Monday through Friday the week's round is running and rosters are
//! locked. Pure functions of the supplied time.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use serde::Serialize;

/// Whether the week's round is in progress, i.e. roster edits are locked.
pub fn is_round_in_progress(now: DateTime<Utc>) -> bool {
    !matches!(now.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Snapshot of the edit window for display and API responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowInfo {
    pub in_progress: bool,
    pub editable: bool,
    pub weekday: String,
    /// When the window next flips (opens or closes).
    pub next_change: DateTime<Utc>,
    pub message: String,
}

pub fn window_info(now: DateTime<Utc>) -> WindowInfo {
    let in_progress = is_round_in_progress(now);
    let weekday = now.weekday();

    let (target, message) = if in_progress {
        (
            Weekday::Sat,
            format!("Round in progress, rosters locked until Saturday 00:00 UTC (today is {weekday} UTC)"),
        )
    } else {
        (
            Weekday::Mon,
            format!("Draft open, rosters editable until Monday 00:00 UTC (today is {weekday} UTC)"),
        )
    };

    WindowInfo {
        in_progress,
        editable: !in_progress,
        weekday: weekday.to_string(),
        next_change: next_midnight_on(now, target),
        message,
    }
}

/// The first midnight strictly after `now` that falls on `day`.
fn next_midnight_on(now: DateTime<Utc>, day: Weekday) -> DateTime<Utc> {
    let from = now.weekday().num_days_from_monday() as i64;
    let to = day.num_days_from_monday() as i64;
    let mut ahead = (to - from).rem_euclid(7);
    if ahead == 0 {
        ahead = 7;
    }
    (now.date_naive() + Duration::days(ahead))
        .and_time(NaiveTime::MIN)
        .and_utc()
}
