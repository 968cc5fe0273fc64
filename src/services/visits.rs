//! Dedup and ordering of polled check-ins, plus presence classification
//!
//! Each poll returns the full check-in history for "today", overlapping
//! whatever previous polls already delivered, in no guaranteed order, and
//! always echoing the in-progress check-in. This module turns that into the
//! ordered set of records not seen before.
//!
//! Identity is full-record value equality against the accumulated list. An
//! open record that later closes no longer compares equal to its earlier
//! form, so the closed form is accepted (and aggregated) exactly once.
//! A timestamp-keyed identity would survive upstream edits to closed
//! records, but would also change the reference behavior; see DESIGN.md.

use crate::domain::types::{CheckIn, GymPresence};
use chrono::{DateTime, Utc};

/// Filter a normalized poll batch down to the unseen records.
///
/// Drops records at or before `today_start` (yesterday's trailing entries
/// the API still returns), sorts the remainder chronologically, and keeps
/// each record only if it is absent from `existing` (and not a duplicate
/// within the batch itself). Returned records are in ascending
/// `checked_in_at` order.
pub fn select_new(
    batch: Vec<CheckIn>,
    existing: &[CheckIn],
    today_start: DateTime<Utc>,
) -> Vec<CheckIn> {
    let mut kept: Vec<CheckIn> =
        batch.into_iter().filter(|c| c.checked_in_at > today_start).collect();
    kept.sort_by_key(|c| c.checked_in_at);

    let mut accepted: Vec<CheckIn> = Vec::new();
    for rec in kept {
        if !existing.contains(&rec) && !accepted.contains(&rec) {
            accepted.push(rec);
        }
    }
    accepted
}

/// Presence verdict from a run of newly accepted records.
///
/// The records are processed in chronological order, so the last one wins:
/// an open record means the member is inside, a closed one means they left.
/// `None` when nothing new was accepted - the caller carries the previous
/// presence over unchanged.
pub fn classify(accepted: &[CheckIn]) -> Option<GymPresence> {
    accepted.last().map(|rec| {
        if rec.is_open() {
            GymPresence::On
        } else {
            GymPresence::Off
        }
    })
}
