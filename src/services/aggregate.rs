//! Period bucket accumulation
//!
//! Folds closed check-ins into the weekly/monthly/yearly buckets of a
//! [`PeriodTotals`]. Buckets are only ever incremented; nothing here (or
//! anywhere else) recomputes them from scratch or evicts old keys.

use crate::domain::types::{CheckIn, MonthKey, PeriodTotals, WeekKey, YearKey};

/// Fold one closed check-in into the buckets.
///
/// Caller guarantees the record is closed and newly observed; calling this
/// twice for the same visit double-counts it.
pub fn fold_visit(totals: &mut PeriodTotals, rec: &CheckIn) {
    debug_assert!(!rec.is_open(), "open check-ins are provisional and never aggregated");

    let date = rec.checked_in_at.date_naive();
    let week = WeekKey::of(date);
    let month = MonthKey::of(date);
    let year = YearKey::of(date);

    *totals.weekly_total.entry(week).or_insert(0.0) += rec.duration_minutes;
    *totals.monthly_total.entry(month).or_insert(0.0) += rec.duration_minutes;
    *totals.yearly_total.entry(year).or_insert(0.0) += rec.duration_minutes;
    *totals.monthly_visit_count.entry(month).or_insert(0) += 1;
    *totals.yearly_visit_count.entry(year).or_insert(0) += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn closed(y: i32, m: u32, d: u32, minutes: f64) -> CheckIn {
        CheckIn {
            location_name: "London Leyton".to_string(),
            checked_in_at: Utc.with_ymd_and_hms(y, m, d, 7, 0, 0).unwrap(),
            duration_minutes: minutes,
        }
    }

    #[test]
    fn test_fold_single_visit() {
        let mut totals = PeriodTotals::default();
        fold_visit(&mut totals, &closed(2025, 4, 3, 75.0));

        assert_eq!(totals.weekly_total[&WeekKey { iso_year: 2025, week: 14 }], 75.0);
        assert_eq!(totals.monthly_total[&MonthKey { year: 2025, month: 4 }], 75.0);
        assert_eq!(totals.yearly_total[&YearKey(2025)], 75.0);
        assert_eq!(totals.monthly_visit_count[&MonthKey { year: 2025, month: 4 }], 1);
        assert_eq!(totals.yearly_visit_count[&YearKey(2025)], 1);
    }

    #[test]
    fn test_fold_accumulates_within_period() {
        let mut totals = PeriodTotals::default();
        fold_visit(&mut totals, &closed(2025, 4, 3, 75.0));
        fold_visit(&mut totals, &closed(2025, 4, 4, 45.0));

        assert_eq!(totals.weekly_total[&WeekKey { iso_year: 2025, week: 14 }], 120.0);
        assert_eq!(totals.monthly_visit_count[&MonthKey { year: 2025, month: 4 }], 2);
        assert_eq!(totals.yearly_visit_count[&YearKey(2025)], 2);
    }

    #[test]
    fn test_fold_splits_across_weeks_keeps_month() {
        let mut totals = PeriodTotals::default();
        // Sunday of ISO week 14 and Monday of week 15, same month
        fold_visit(&mut totals, &closed(2025, 4, 6, 30.0));
        fold_visit(&mut totals, &closed(2025, 4, 7, 60.0));

        assert_eq!(totals.weekly_total[&WeekKey { iso_year: 2025, week: 14 }], 30.0);
        assert_eq!(totals.weekly_total[&WeekKey { iso_year: 2025, week: 15 }], 60.0);
        assert_eq!(totals.monthly_total[&MonthKey { year: 2025, month: 4 }], 90.0);
    }

    #[test]
    fn test_fold_year_boundary_iso_week() {
        let mut totals = PeriodTotals::default();
        // 2024-12-30 is ISO week 1 of 2025, but month/year keys stay 2024
        fold_visit(&mut totals, &closed(2024, 12, 30, 50.0));

        assert_eq!(totals.weekly_total[&WeekKey { iso_year: 2025, week: 1 }], 50.0);
        assert_eq!(totals.monthly_total[&MonthKey { year: 2024, month: 12 }], 50.0);
        assert_eq!(totals.yearly_total[&YearKey(2024)], 50.0);
    }

    #[test]
    fn test_old_keys_are_retained() {
        let mut totals = PeriodTotals::default();
        fold_visit(&mut totals, &closed(2025, 3, 10, 40.0));
        fold_visit(&mut totals, &closed(2025, 4, 3, 75.0));

        // March buckets stop being touched but stay readable
        assert_eq!(totals.monthly_total[&MonthKey { year: 2025, month: 3 }], 40.0);
        assert_eq!(totals.monthly_total[&MonthKey { year: 2025, month: 4 }], 75.0);
        assert_eq!(totals.yearly_total[&YearKey(2025)], 115.0);
    }
}
