//! Core types for the gym visit aggregation engine

use crate::domain::api::OccupancyPayload;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rustc_hash::FxHashMap;
use serde::Serialize;

/// Whether the member is currently inside the gym, derived from the
/// open/closed state of the latest check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GymPresence {
    On,
    Off,
}

impl GymPresence {
    pub fn as_str(&self) -> &'static str {
        match self {
            GymPresence::On => "on",
            GymPresence::Off => "off",
        }
    }
}

/// One gym visit record in canonical form.
///
/// `duration_minutes == 0` marks an open visit (the member is still inside);
/// a positive duration marks a closed, finalized visit. Full-record value
/// equality is the dedup identity: a record that closes between polls no
/// longer equals its earlier open form and is processed again, exactly once,
/// in closed form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckIn {
    pub location_name: String,
    pub checked_in_at: DateTime<Utc>,
    pub duration_minutes: f64,
}

impl CheckIn {
    /// True while the visit is still in progress.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.duration_minutes == 0.0
    }
}

/// ISO-week bucket key (ISO year, ISO week number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeekKey {
    pub iso_year: i32,
    pub week: u32,
}

impl WeekKey {
    pub fn of(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        Self { iso_year: iso.year(), week: iso.week() }
    }
}

impl std::fmt::Display for WeekKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-W{:02}", self.iso_year, self.week)
    }
}

/// Calendar-month bucket key (year, month)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn of(date: NaiveDate) -> Self {
        Self { year: date.year(), month: date.month() }
    }
}

impl std::fmt::Display for MonthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// Calendar-year bucket key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct YearKey(pub i32);

impl YearKey {
    pub fn of(date: NaiveDate) -> Self {
        Self(date.year())
    }
}

impl std::fmt::Display for YearKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accumulated per-period usage buckets.
///
/// Grows for the life of the process and is never purged; period cardinality
/// stays small (at most a few hundred keys per year of operation). Old keys
/// simply stop being touched once their calendar period has passed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodTotals {
    /// Minutes per ISO week
    pub weekly_total: FxHashMap<WeekKey, f64>,
    /// Minutes per calendar month
    pub monthly_total: FxHashMap<MonthKey, f64>,
    /// Minutes per calendar year
    pub yearly_total: FxHashMap<YearKey, f64>,
    /// Visits per calendar month
    pub monthly_visit_count: FxHashMap<MonthKey, u32>,
    /// Visits per calendar year
    pub yearly_visit_count: FxHashMap<YearKey, u32>,
}

/// Immutable aggregated result of one refresh cycle, exposed downstream.
///
/// `check_ins` holds the current calendar day only (chronological, oldest
/// first) and is append-only across polls until the day boundary; the
/// `totals` buckets persist across days.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub gym_presence: GymPresence,
    pub check_ins: Vec<CheckIn>,
    pub totals: PeriodTotals,
    /// Gym-status fields copied verbatim from the occupancy poll.
    /// None until the first successful refresh.
    pub occupancy: Option<OccupancyPayload>,
}

impl Snapshot {
    /// Sentinel snapshot used before the first refresh.
    pub fn empty() -> Self {
        Self {
            gym_presence: GymPresence::Off,
            check_ins: Vec::new(),
            totals: PeriodTotals::default(),
            occupancy: None,
        }
    }
}
