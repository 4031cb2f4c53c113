//! Clock & Timezone Service.
//!
//! Every sliding-window query and the Reset Scheduler derive "now" from this
//! module so that a single operation always sees one consistent instant,
//! and so IANA timezone names from configuration are resolved in one place.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Errors resolving timezones or parsing configured time strings.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// The configured timezone is not a recognized IANA zone name.
    #[error("invalid IANA timezone '{0}'")]
    InvalidTimezone(String),
    /// `HH:MM` could not be parsed.
    #[error("invalid HH:MM time '{0}'")]
    InvalidTime(String),
    /// `YYYY-MM-DD HH:MM` could not be parsed.
    #[error("invalid reset datetime '{0}', expected 'YYYY-MM-DD HH:MM'")]
    InvalidDatetime(String),
}

/// Current Unix timestamp in whole seconds.
///
/// The sole source of "now" for ledger sliding-window queries.
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Current instant as a UTC `DateTime`, for the Reset Scheduler.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Resolve an IANA timezone name (e.g. `"America/New_York"`).
///
/// # Errors
///
/// Returns [`ClockError::InvalidTimezone`] if `name` is not a recognized zone.
pub fn resolve_timezone(name: &str) -> Result<Tz, ClockError> {
    name.parse::<Tz>()
        .map_err(|_| ClockError::InvalidTimezone(name.to_owned()))
}

/// Parse a `"HH:MM"` string into `(hour, minute)`.
///
/// # Errors
///
/// Returns [`ClockError::InvalidTime`] if the string is malformed or out of range.
pub fn parse_hhmm(s: &str) -> Result<(u32, u32), ClockError> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| ClockError::InvalidTime(s.to_owned()))?;
    let hour: u32 = h.parse().map_err(|_| ClockError::InvalidTime(s.to_owned()))?;
    let minute: u32 = m.parse().map_err(|_| ClockError::InvalidTime(s.to_owned()))?;
    if hour > 23 || minute > 59 {
        return Err(ClockError::InvalidTime(s.to_owned()));
    }
    Ok((hour, minute))
}

/// Format `(hour, minute)` back into `"HH:MM"`.
pub fn format_hhmm(hour: u32, minute: u32) -> String {
    format!("{hour:02}:{minute:02}")
}

/// Parse a `"YYYY-MM-DD HH:MM"` string as a UTC instant.
///
/// # Errors
///
/// Returns [`ClockError::InvalidDatetime`] if the string does not match the format.
pub fn parse_reset_datetime(s: &str) -> Result<DateTime<Utc>, ClockError> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .map_err(|_| ClockError::InvalidDatetime(s.to_owned()))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Format a UTC instant back into `"YYYY-MM-DD HH:MM"`.
pub fn format_reset_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M").to_string()
}

/// Compute the next local reset instant at `hour:minute` in `tz`.
///
/// Takes today's local date (relative to `now`) at `hour:minute`; if that
/// instant is not strictly after `now`, rolls forward one day.
pub fn next_reset_after(now: DateTime<Utc>, hour: u32, minute: u32, tz: Tz) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let today = local_now.date_naive();
    let candidate_naive = today
        .and_hms_opt(hour, minute, 0)
        .or_else(|| today.and_hms_opt(0, 0, 0))
        .expect("midnight is always a valid time");

    let candidate_local = match tz.from_local_datetime(&candidate_naive).single() {
        Some(dt) => dt,
        // DST gap/ambiguity: fall back to treating the naive time as if it were UTC-offset-zero
        // for this zone, which keeps the scheduler live instead of panicking.
        None => tz
            .from_local_datetime(&candidate_naive)
            .earliest()
            .unwrap_or_else(|| Utc.from_utc_datetime(&candidate_naive).with_timezone(&tz)),
    };
    let candidate_utc = candidate_local.with_timezone(&Utc);

    if candidate_utc <= now {
        candidate_utc
            .checked_add_signed(chrono::Duration::days(1))
            .unwrap_or(candidate_utc)
    } else {
        candidate_utc
    }
}
