use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use std::path::Path;
use thiserror::Error;

use crate::profile::{self, Tracking};

pub const FIVE_HOUR_WINDOW_HOURS: i64 = 5;
pub const WEEKLY_WINDOW_DAYS: i64 = 7;

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Error)]
#[error("cannot update usage tracking: {0:#}")]
pub struct TrackingError(#[from] anyhow::Error);

pub fn format_utc(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts RFC 3339, or a date/time without an offset taken as UTC.
fn parse_utc(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Roll a window forward: keep `start` while the window is still open,
/// otherwise restart it at `now`.
fn roll_window(start: Option<&str>, length: Duration, now: DateTime<Utc>) -> Option<String> {
    match parse_utc(start) {
        Some(start_at) if start_at + length > now => start.map(str::to_string),
        _ => Some(format_utc(now)),
    }
}

pub fn advance(tracking: &mut Tracking, now: DateTime<Utc>) {
    tracking.last_launch_utc = Some(format_utc(now));
    tracking.five_hour_window_start_utc = roll_window(
        tracking.five_hour_window_start_utc.as_deref(),
        Duration::hours(FIVE_HOUR_WINDOW_HOURS),
        now,
    );
    tracking.weekly_window_start_utc = roll_window(
        tracking.weekly_window_start_utc.as_deref(),
        Duration::days(WEEKLY_WINDOW_DAYS),
        now,
    );
}

/// Record a launch in the account's `account.json`.
pub fn touch_tracking(account_home: &Path, now: DateTime<Utc>) -> Result<(), TrackingError> {
    let mut meta = profile::read_meta(account_home);
    let mut tracking = meta.tracking.take().unwrap_or_default();
    advance(&mut tracking, now);
    meta.tracking = Some(tracking);
    profile::save_meta(account_home, &meta)?;
    Ok(())
}
