//! Services - the visit aggregation engine
//!
//! This module contains the core business logic services:
//! - `normalize` - Raw wire records to canonical check-ins
//! - `visits` - Dedup/ordering filter and presence classification
//! - `aggregate` - Weekly/monthly/yearly bucket accumulation
//! - `coordinator` - The pure refresh function and the poll-loop actor
//! - `rollover` - Daily display-reset notifier

pub mod aggregate;
pub mod coordinator;
pub mod normalize;
pub mod rollover;
pub mod visits;

// Re-export commonly used types
pub use coordinator::{refresh, CoordinatorState, Refresher};
