//! Domain models - canonical data types for the aggregation engine
//!
//! This module contains the canonical data types used throughout the system:
//! - `CheckIn` - one gym visit, open or closed
//! - `Snapshot` - the aggregated state published after each refresh
//! - `PeriodTotals` - weekly/monthly/yearly usage buckets
//! - `api` - wire payloads of the Netpulse backend

pub mod api;
pub mod types;
