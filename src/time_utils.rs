use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use tracing::trace;

use crate::AppResult;
use crate::serde_helpers::offset_datetime::INPUT_FORMAT as DB_FORMAT;

/// Format a timestamp the way the database stores it: `YYYY-mm-dd HH:MM:SS`.
#[tracing::instrument(level = "trace")]
pub fn format_db(dt: &OffsetDateTime) -> AppResult<String> {
    let formatted = dt.format(DB_FORMAT)?;
    trace!("Formatted datetime {} as {}", dt, formatted);
    Ok(formatted)
}

/// Parse a database-format timestamp back into an `OffsetDateTime` (assumed UTC).
#[tracing::instrument(level = "trace")]
pub fn parse_db(raw: &str) -> AppResult<OffsetDateTime> {
    Ok(PrimitiveDateTime::parse(raw, DB_FORMAT)?.assume_utc())
}

/// Convert a WhatsApp export header timestamp into an `OffsetDateTime`.
///
/// WhatsApp writes `M/D/YY` dates with a 12-hour clock, e.g. `08/23/25 07:21 PM`.
/// Two-digit years are anchored to 2000.
#[tracing::instrument(level = "trace")]
pub fn whatsapp_datetime(
    month: u8,
    day: u8,
    year2: u8,
    hour12: u8,
    minute: u8,
    pm: bool,
) -> AppResult<OffsetDateTime> {
    let hour = match (hour12, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };
    let date = Date::from_calendar_date(2000 + year2 as i32, Month::try_from(month)?, day)?;
    let time = Time::from_hms(hour, minute, 0)?;
    Ok(PrimitiveDateTime::new(date, time).assume_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_afternoon_to_24_hour() {
        let dt = whatsapp_datetime(8, 23, 25, 7, 21, true).unwrap();
        assert_eq!(format_db(&dt).unwrap(), "2025-08-23 19:21:00");
    }

    #[test]
    fn midnight_and_noon_edge_cases() {
        let midnight = whatsapp_datetime(1, 2, 24, 12, 5, false).unwrap();
        assert_eq!(format_db(&midnight).unwrap(), "2024-01-02 00:05:00");

        let noon = whatsapp_datetime(1, 2, 24, 12, 5, true).unwrap();
        assert_eq!(format_db(&noon).unwrap(), "2024-01-02 12:05:00");
    }

    #[test]
    fn db_format_roundtrips() {
        let dt = whatsapp_datetime(12, 31, 25, 11, 59, true).unwrap();
        let raw = format_db(&dt).unwrap();
        assert_eq!(parse_db(&raw).unwrap(), dt);
    }

    #[test]
    fn rejects_nonsense_dates() {
        assert!(whatsapp_datetime(13, 1, 25, 1, 0, false).is_err());
        assert!(whatsapp_datetime(2, 30, 25, 1, 0, false).is_err());
    }
}
