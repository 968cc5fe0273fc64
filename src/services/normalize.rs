//! Check-in normalization
//!
//! Converts raw wire records (naive local timestamp string, millisecond
//! duration) into canonical [`CheckIn`] values (UTC instant, minutes).
//!
//! The upstream reports check-in times in the gym's wall-clock time with no
//! offset. The correction for daylight saving is evaluated once per batch
//! from the local system clock and applied uniformly to every record in it.

use crate::domain::api::RawCheckIn;
use crate::domain::types::CheckIn;
use chrono::{DateTime, Datelike, Duration, Local, NaiveDateTime, Offset, TimeZone, Utc};

const MS_PER_MINUTE: f64 = 60_000.0;

/// An unparseable check-in timestamp.
///
/// Fatal for the refresh cycle: skipping the record instead would leave a
/// hole behind the `last_check_in_seen` boundary and corrupt the aggregates.
#[derive(Debug, thiserror::Error)]
#[error("unparseable check-in timestamp {raw:?}: {source}")]
pub struct NormalizeError {
    pub raw: String,
    #[source]
    pub source: chrono::ParseError,
}

/// Current daylight-saving correction of the local timezone.
///
/// Difference between the current local UTC offset and the offset in effect
/// at mid-winter (standard time in the northern hemisphere). Zero outside
/// DST; a negative value in timezones whose January offset is the DST one.
pub fn current_dst_correction() -> Duration {
    let now = Local::now();
    let now_offset = now.offset().fix().local_minus_utc();
    let jan_offset = Local
        .with_ymd_and_hms(now.year(), 1, 1, 12, 0, 0)
        .single()
        .map(|dt| dt.offset().fix().local_minus_utc())
        .unwrap_or(now_offset);
    Duration::seconds(i64::from(now_offset - jan_offset))
}

/// Normalize one raw record.
///
/// The naive wall-clock timestamp minus the DST correction is interpreted
/// as a UTC instant; the millisecond duration becomes fractional minutes.
pub fn normalize(raw: &RawCheckIn, dst: Duration) -> Result<CheckIn, NormalizeError> {
    let naive: NaiveDateTime = raw
        .check_in_date
        .parse()
        .map_err(|source| NormalizeError { raw: raw.check_in_date.clone(), source })?;

    let checked_in_at: DateTime<Utc> = (naive - dst).and_utc();

    Ok(CheckIn {
        location_name: raw.gym_location_name.clone(),
        checked_in_at,
        duration_minutes: raw.duration as f64 / MS_PER_MINUTE,
    })
}

/// Normalize a whole poll batch with one shared DST correction.
pub fn normalize_batch(raws: &[RawCheckIn], dst: Duration) -> Result<Vec<CheckIn>, NormalizeError> {
    raws.iter().map(|raw| normalize(raw, dst)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(date: &str, duration_ms: u64) -> RawCheckIn {
        RawCheckIn {
            gym_location_name: "London Leyton".to_string(),
            gym_location_address: Some("Marshall Road".to_string()),
            check_in_date: date.to_string(),
            timezone: Some("Europe/London".to_string()),
            duration: duration_ms,
        }
    }

    #[test]
    fn test_normalize_closed_record() {
        let rec = normalize(&raw("2025-04-03T07:00:00", 4_500_000), Duration::zero()).unwrap();
        assert_eq!(rec.checked_in_at, Utc.with_ymd_and_hms(2025, 4, 3, 7, 0, 0).unwrap());
        assert_eq!(rec.duration_minutes, 75.0);
        assert!(!rec.is_open());
    }

    #[test]
    fn test_normalize_open_record() {
        let rec = normalize(&raw("2025-04-03T07:00:00", 0), Duration::zero()).unwrap();
        assert!(rec.is_open());
        assert_eq!(rec.duration_minutes, 0.0);
    }

    #[test]
    fn test_normalize_applies_dst_correction() {
        // Wall-clock 07:00 during a one-hour DST offset is 06:00 UTC
        let rec = normalize(&raw("2025-04-03T07:00:00", 0), Duration::hours(1)).unwrap();
        assert_eq!(rec.checked_in_at, Utc.with_ymd_and_hms(2025, 4, 3, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_normalize_fractional_minutes() {
        let rec = normalize(&raw("2025-04-03T07:00:00", 90_000), Duration::zero()).unwrap();
        assert_eq!(rec.duration_minutes, 1.5);
    }

    #[test]
    fn test_normalize_rejects_garbage_timestamp() {
        let err = normalize(&raw("yesterday-ish", 0), Duration::zero()).unwrap_err();
        assert!(err.to_string().contains("yesterday-ish"));
    }

    #[test]
    fn test_normalize_batch_fails_on_first_bad_record() {
        let raws = vec![raw("2025-04-03T07:00:00", 0), raw("not-a-date", 0)];
        assert!(normalize_batch(&raws, Duration::zero()).is_err());
    }
}
