//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to hand snapshots to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::api::OccupancyPayload;
use crate::domain::types::Snapshot;
use crate::infra::metrics::MetricsSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// New snapshot state after a successful refresh
    State(StatePayload),
    /// Bridge availability transition (offline after backoff exhaustion)
    Availability { online: bool },
    /// Day boundary crossed: drop the displayed check-in list from view.
    /// Never touches the period accumulators.
    DayRollover,
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Sensor-facing JSON rendition of one snapshot.
///
/// Pure field lookup over [`Snapshot`]: period keys are rendered to strings
/// ("2025-W14", "2025-04", "2025") in sorted maps, instants to RFC 3339.
/// No aggregation logic lives here.
#[derive(Debug, Clone, Serialize)]
pub struct StatePayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// "on" while the member is inside the gym
    pub gym_presence: &'static str,
    /// Today's visits, chronological
    pub check_ins: Vec<CheckInPayload>,
    /// Duration of the most recent visit today (minutes), if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_workout_minutes: Option<f64>,
    /// Minutes per ISO week, e.g. {"2025-W14": 75.0}
    pub weekly_total: BTreeMap<String, f64>,
    /// Minutes per month, e.g. {"2025-04": 75.0}
    pub monthly_total: BTreeMap<String, f64>,
    /// Minutes per year
    pub yearly_total: BTreeMap<String, f64>,
    /// Visits per month
    pub monthly_visit_count: BTreeMap<String, u32>,
    /// Visits per year
    pub yearly_visit_count: BTreeMap<String, u32>,
    /// Occupancy fields passed through from the gym-busyness poll
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupancy: Option<OccupancyPayload>,
    /// Instant of the refresh that produced this payload
    pub last_sync: DateTime<Utc>,
    /// Instant of the last refresh that accepted a new check-in
    pub last_updated: DateTime<Utc>,
}

/// One displayed check-in
#[derive(Debug, Clone, Serialize)]
pub struct CheckInPayload {
    pub location: String,
    pub checked_in_at: DateTime<Utc>,
    pub duration_minutes: f64,
}

impl StatePayload {
    pub fn from_snapshot(
        snapshot: &Snapshot,
        last_sync: DateTime<Utc>,
        last_updated: DateTime<Utc>,
    ) -> Self {
        let check_ins: Vec<CheckInPayload> = snapshot
            .check_ins
            .iter()
            .map(|c| CheckInPayload {
                location: c.location_name.clone(),
                checked_in_at: c.checked_in_at,
                duration_minutes: c.duration_minutes,
            })
            .collect();

        let totals = &snapshot.totals;
        Self {
            site: None,
            gym_presence: snapshot.gym_presence.as_str(),
            last_workout_minutes: check_ins.last().map(|c| c.duration_minutes),
            check_ins,
            weekly_total: render_map(&totals.weekly_total),
            monthly_total: render_map(&totals.monthly_total),
            yearly_total: render_map(&totals.yearly_total),
            monthly_visit_count: render_map(&totals.monthly_visit_count),
            yearly_visit_count: render_map(&totals.yearly_visit_count),
            occupancy: snapshot.occupancy.clone(),
            last_sync,
            last_updated,
        }
    }
}

/// Render a typed period map to sorted display keys for JSON
fn render_map<K: std::fmt::Display, V: Clone>(
    map: &rustc_hash::FxHashMap<K, V>,
) -> BTreeMap<String, V> {
    map.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// Payload for periodic metrics snapshots
#[derive(Debug, Clone, Serialize)]
pub struct MetricsPayload {
    /// Site identifier
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: i64,
    #[serde(flatten)]
    pub summary: MetricsSummary,
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Send a snapshot state for publishing
    /// Injects site_id into the payload
    pub fn send_state(&self, mut payload: StatePayload) {
        payload.site = Some(self.site_id.clone());
        // Use try_send to avoid blocking - drop if channel full
        let _ = self.tx.try_send(EgressMessage::State(payload));
    }

    /// Send an availability transition
    pub fn send_availability(&self, online: bool) {
        let _ = self.tx.try_send(EgressMessage::Availability { online });
    }

    /// Send the daily display-reset notification
    pub fn send_day_rollover(&self) {
        let _ = self.tx.try_send(EgressMessage::DayRollover);
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload = MetricsPayload {
            site: self.site_id.clone(),
            ts: Utc::now().timestamp_millis(),
            summary,
        };
        let _ = self.tx.try_send(EgressMessage::Metrics(payload));
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// Buffer size determines how many messages can be queued.
/// site_id is stamped into payloads for downstream consumers.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}
