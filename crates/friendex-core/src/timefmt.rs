//! Conversion between user-entered timestamps, the canonical storage form, and display text.
//!
//! Accepted input formats, tried in order:
//! 1. `YYYY-MM-DD hh:mm:ss AM/PM`
//! 2. `YYYY-MM-DD HH:MM:SS.ffffff`
//! 3. `YYYY-MM-DD HH:MM:SS`
//!
//! Month, day and hour may be written with a single digit.
//!
//! Storage always writes form 2 with six fractional digits; display always uses form 1.

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

use crate::FriendexError;

const SECONDS_PER_DAY: i64 = 86_400;

const DISPLAY_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour repr:12]:[minute]:[second] [period]");

const STORAGE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]");

const ACCEPTED_FORMATS: [&[BorrowedFormatItem<'static>]; 3] = [
    format_description!("[year]-[month padding:none]-[day padding:none] [hour repr:12 padding:none]:[minute]:[second] [period case_sensitive:false]"),
    format_description!("[year]-[month padding:none]-[day padding:none] [hour padding:none]:[minute]:[second].[subsecond]"),
    format_description!(
        "[year]-[month padding:none]-[day padding:none] [hour padding:none]:[minute]:[second]"
    ),
];

/// Parse a timestamp against the accepted formats, returning the first match.
///
/// # Errors
/// Returns [`FriendexError::InvalidTime`] when no accepted format matches.
pub fn parse_timestamp(input: &str) -> Result<PrimitiveDateTime, FriendexError> {
    let trimmed = input.trim();
    ACCEPTED_FORMATS
        .iter()
        .find_map(|format| PrimitiveDateTime::parse(trimmed, format).ok())
        .ok_or_else(|| FriendexError::InvalidTime(trimmed.to_string()))
}

/// Resolve user input that may be the literal `now` (any case) into a timestamp.
///
/// # Errors
/// Returns [`FriendexError::InvalidTime`] when the input is neither `now` nor a valid timestamp.
pub fn resolve_timestamp(
    input: &str,
    now: PrimitiveDateTime,
) -> Result<PrimitiveDateTime, FriendexError> {
    if input.trim().eq_ignore_ascii_case("now") {
        return Ok(truncate_to_micros(now));
    }
    parse_timestamp(input).map(truncate_to_micros)
}

/// Render a timestamp in the 12-hour display form.
#[must_use]
pub fn format_display(value: PrimitiveDateTime) -> String {
    // Formatting a date-time with every component present cannot fail.
    value.format(DISPLAY_FORMAT).unwrap_or_default()
}

/// Render a timestamp in the canonical microsecond storage form.
#[must_use]
pub fn format_storage(value: PrimitiveDateTime) -> String {
    value.format(STORAGE_FORMAT).unwrap_or_default()
}

/// Current local wall-clock time, falling back to UTC when the local offset is unknown.
#[must_use]
pub fn local_now() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    truncate_to_micros(PrimitiveDateTime::new(now.date(), now.time()))
}

/// Whole days elapsed from `then` to `now`, floored (a future `then` yields a negative count).
#[must_use]
pub fn days_since(then: PrimitiveDateTime, now: PrimitiveDateTime) -> i64 {
    (now - then).whole_seconds().div_euclid(SECONDS_PER_DAY)
}

fn truncate_to_micros(value: PrimitiveDateTime) -> PrimitiveDateTime {
    value - Duration::nanoseconds(i64::from(value.nanosecond() % 1_000))
}
