//! Refresh orchestration
//!
//! [`refresh`] is the pure core: one poll result folded against the prior
//! state, no clock reads beyond its explicit `now` input. [`Refresher`] is
//! the actor around it - interval ticks, concurrent fan-out of the two
//! fetches, bounded backoff, availability transitions, egress publishing.
//!
//! State is committed only after both fetches and the aggregation step
//! succeed: an abandoned or failed cycle leaves [`CoordinatorState`] exactly
//! as the previous successful cycle left it.

use crate::domain::api::{OccupancyPayload, Profile, VisitHistoryPayload};
use crate::domain::types::Snapshot;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::{EgressSender, StatePayload};
use crate::io::netpulse::{ApiError, GymApi};
use crate::services::normalize::{self, NormalizeError};
use crate::services::{aggregate, visits};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Process-lifetime state owned exclusively by the refresh loop.
///
/// Starts from epoch sentinels and empty buckets; everything here lives in
/// memory only, so a restart re-seeds the aggregates from the first
/// unbounded history fetch.
#[derive(Debug, Clone)]
pub struct CoordinatorState {
    /// Instant of the last successful refresh (lower bound for "today")
    pub last_sync: DateTime<Utc>,
    /// Instant of the last refresh that accepted at least one record
    pub last_updated: DateTime<Utc>,
    /// Latest check-in already folded into aggregates; monotonic
    pub last_check_in_seen: DateTime<Utc>,
    pub snapshot: Snapshot,
}

impl CoordinatorState {
    pub fn new() -> Self {
        Self {
            last_sync: DateTime::UNIX_EPOCH,
            last_updated: DateTime::UNIX_EPOCH,
            last_check_in_seen: DateTime::UNIX_EPOCH,
            snapshot: Snapshot::empty(),
        }
    }
}

impl Default for CoordinatorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Midnight of the day containing `t`
fn day_start(t: DateTime<Utc>) -> DateTime<Utc> {
    t.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// One refresh: fold a complete poll result into the prior state.
///
/// Returns the next state (whose `snapshot` is the published value) and the
/// number of newly accepted records. Pure given its inputs: `now` and the
/// batch-wide DST correction are explicit parameters.
pub fn refresh(
    prior: &CoordinatorState,
    occupancy: OccupancyPayload,
    visits_payload: VisitHistoryPayload,
    now: DateTime<Utc>,
    dst: Duration,
) -> Result<(CoordinatorState, usize), NormalizeError> {
    let today_start = day_start(prior.last_sync);

    let batch = normalize::normalize_batch(&visits_payload.check_ins, dst)?;
    let accepted = visits::select_new(batch, &prior.snapshot.check_ins, today_start);

    let gym_presence = visits::classify(&accepted).unwrap_or(prior.snapshot.gym_presence);

    let mut totals = prior.snapshot.totals.clone();
    let mut last_check_in_seen = prior.last_check_in_seen;
    for rec in accepted.iter().filter(|r| !r.is_open()) {
        aggregate::fold_visit(&mut totals, rec);
        last_check_in_seen = last_check_in_seen.max(today_start).max(rec.checked_in_at);
    }

    // Today's displayed list: prior entries still inside the day window,
    // then the accepted records (already chronological).
    let mut check_ins: Vec<_> = prior
        .snapshot
        .check_ins
        .iter()
        .filter(|c| c.checked_in_at > today_start)
        .cloned()
        .collect();
    check_ins.extend(accepted.iter().cloned());

    let last_updated = if accepted.is_empty() { prior.last_updated } else { now };

    let next = CoordinatorState {
        last_sync: now,
        last_updated,
        last_check_in_seen,
        snapshot: Snapshot {
            gym_presence,
            check_ins,
            totals,
            occupancy: Some(occupancy),
        },
    };
    Ok((next, accepted.len()))
}

/// Outcome of one scheduled poll cycle
enum CycleOutcome {
    /// Refresh succeeded and was published
    Ok,
    /// Transient failures exhausted the retry budget; state untouched
    Degraded,
    /// Malformed payload or record; cycle dropped, state untouched
    Dropped,
    /// Credentials rejected; the session cannot continue
    Fatal,
}

enum CycleError {
    Api(ApiError),
    Normalize(NormalizeError),
}

/// The poll-loop actor driving [`refresh`] on a fixed interval.
pub struct Refresher<A: GymApi> {
    api: Arc<A>,
    config: Config,
    metrics: Arc<Metrics>,
    egress: Option<EgressSender>,
    profile: Profile,
    state: CoordinatorState,
    online: bool,
}

impl<A: GymApi> Refresher<A> {
    pub fn new(
        api: Arc<A>,
        config: Config,
        metrics: Arc<Metrics>,
        egress: Option<EgressSender>,
        profile: Profile,
    ) -> Self {
        Self {
            api,
            config,
            metrics,
            egress,
            profile,
            state: CoordinatorState::new(),
            online: false,
        }
    }

    /// Run refresh cycles until shutdown (or until credentials are revoked).
    ///
    /// Cycles are strictly serialized: one runs to completion before the
    /// next tick is serviced.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.poll_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("refresher_shutdown");
                        return;
                    }
                }
                _ = tick.tick() => {
                    if let CycleOutcome::Fatal = self.poll_cycle().await {
                        error!("refresher_stopped_credentials_rejected");
                        return;
                    }
                }
            }
        }
    }

    /// One scheduled cycle, including the bounded retry budget.
    async fn poll_cycle(&mut self) -> CycleOutcome {
        let max_retries = self.config.backoff_max_retries();
        let mut attempt = 0u32;

        loop {
            match self.try_cycle().await {
                Ok(accepted) => {
                    debug!(accepted, "refresh_cycle_complete");
                    return CycleOutcome::Ok;
                }
                Err(CycleError::Api(ApiError::Auth(msg))) => {
                    self.metrics.record_auth_failure();
                    error!(error = %msg, "refresh_auth_rejected");
                    self.go_offline();
                    return CycleOutcome::Fatal;
                }
                Err(CycleError::Api(e @ ApiError::Transport { .. })) => {
                    self.metrics.record_transport_failure();
                    if attempt >= max_retries {
                        warn!(attempts = attempt + 1, error = %e, "refresh_retries_exhausted");
                        self.go_offline();
                        return CycleOutcome::Degraded;
                    }
                    let delay = self.config.backoff_base() * 2u32.pow(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e,
                        "refresh_transient_failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(CycleError::Api(e @ ApiError::MalformedResponse { .. })) => {
                    self.metrics.record_malformed_failure();
                    error!(error = %e, "refresh_malformed_response");
                    return CycleOutcome::Dropped;
                }
                Err(CycleError::Normalize(e)) => {
                    self.metrics.record_malformed_failure();
                    error!(error = %e, "refresh_unparseable_record");
                    return CycleOutcome::Dropped;
                }
            }
        }
    }

    /// One fetch-and-aggregate attempt. State is mutated only on success.
    async fn try_cycle(&mut self) -> Result<usize, CycleError> {
        let started = Instant::now();
        let now = Utc::now();

        // First call carries no lower bound so the whole history seeds the
        // aggregates; afterwards only records since the last sync are fetched.
        let start = (self.state.last_sync > DateTime::UNIX_EPOCH).then_some(self.state.last_sync);

        let (occupancy, visits_payload) = tokio::join!(
            self.api.fetch_occupancy(self.profile.uuid, self.profile.home_club_uuid),
            self.api.fetch_visit_history(self.profile.uuid, start, now),
        );
        let occupancy = occupancy.map_err(CycleError::Api)?;
        let visits_payload = visits_payload.map_err(CycleError::Api)?;

        let dst = normalize::current_dst_correction();
        let (next, accepted) = refresh(&self.state, occupancy, visits_payload, now, dst)
            .map_err(CycleError::Normalize)?;

        let latency_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_refresh(latency_ms, accepted as u64);
        info!(
            accepted,
            presence = next.snapshot.gym_presence.as_str(),
            latency_ms,
            "refresh_ok"
        );

        if let Some(egress) = &self.egress {
            if !self.online {
                egress.send_availability(true);
            }
            egress.send_state(StatePayload::from_snapshot(
                &next.snapshot,
                next.last_sync,
                next.last_updated,
            ));
        }
        self.online = true;
        self.state = next;
        Ok(accepted)
    }

    fn go_offline(&mut self) {
        if self.online {
            if let Some(egress) = &self.egress {
                egress.send_availability(false);
            }
        }
        self.online = false;
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &CoordinatorState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api::{HourlyOccupancy, RawCheckIn};
    use crate::domain::types::{GymPresence, WeekKey};
    use crate::io::egress_channel::{create_egress_channel, EgressMessage};
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    fn gym_data() -> OccupancyPayload {
        OccupancyPayload {
            gym_location_id: "ee578789-b83a-489f-8044-187e67a11dfc".parse().unwrap(),
            gym_location_name: "London Leyton".to_string(),
            current_capacity: 105,
            current_percentage: 44,
            historical: vec![
                HourlyOccupancy { hour: "12AM".to_string(), percentage: 27 },
                HourlyOccupancy { hour: "2AM".to_string(), percentage: 4 },
            ],
            status: "open".to_string(),
        }
    }

    fn raw_check_in(duration_ms: u64) -> RawCheckIn {
        RawCheckIn {
            gym_location_name: "London Leyton".to_string(),
            gym_location_address: Some("Marshall Road".to_string()),
            check_in_date: "2025-04-03T07:00:00".to_string(),
            timezone: Some("Europe/London".to_string()),
            duration: duration_ms,
        }
    }

    fn visits(records: Vec<RawCheckIn>) -> VisitHistoryPayload {
        VisitHistoryPayload { check_ins: records }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 3, h, m, 0).unwrap()
    }

    fn run_refresh(
        prior: &CoordinatorState,
        payload: VisitHistoryPayload,
        now: DateTime<Utc>,
    ) -> (CoordinatorState, usize) {
        refresh(prior, gym_data(), payload, now, Duration::zero()).unwrap()
    }

    #[test]
    fn test_single_visit_poll_sequence() {
        let state = CoordinatorState::new();
        let week = WeekKey { iso_year: 2025, week: 14 };

        // No visits yet today
        let (state, accepted) = run_refresh(&state, visits(vec![]), at(7, 5));
        assert_eq!(accepted, 0);
        assert_eq!(state.snapshot.gym_presence, GymPresence::Off);
        assert!(state.snapshot.check_ins.is_empty());
        assert!(state.snapshot.totals.weekly_total.is_empty());
        assert_eq!(state.last_sync, at(7, 5));
        assert_eq!(state.last_updated, DateTime::UNIX_EPOCH);

        // Open check-in appears: at the gym
        let (state, accepted) = run_refresh(&state, visits(vec![raw_check_in(0)]), at(7, 15));
        assert_eq!(accepted, 1);
        assert_eq!(state.snapshot.gym_presence, GymPresence::On);
        assert_eq!(state.last_updated, at(7, 15));
        assert_eq!(state.snapshot.check_ins.last().unwrap().duration_minutes, 0.0);
        assert!(state.snapshot.totals.weekly_total.is_empty());

        // Same open check-in re-polled: nothing changes
        let (state, accepted) = run_refresh(&state, visits(vec![raw_check_in(0)]), at(7, 25));
        assert_eq!(accepted, 0);
        assert_eq!(state.snapshot.gym_presence, GymPresence::On);
        assert_eq!(state.last_updated, at(7, 15));
        assert!(state.snapshot.totals.weekly_total.is_empty());

        // The visit closes at 75 minutes: aggregated exactly once
        let (state, accepted) =
            run_refresh(&state, visits(vec![raw_check_in(4_500_000)]), at(7, 35));
        assert_eq!(accepted, 1);
        assert_eq!(state.snapshot.gym_presence, GymPresence::Off);
        assert_eq!(state.last_updated, at(7, 35));
        assert_eq!(state.snapshot.check_ins.last().unwrap().duration_minutes, 75.0);
        assert_eq!(state.snapshot.totals.weekly_total[&week], 75.0);
        assert_eq!(state.last_check_in_seen, at(7, 0));

        // Later poll with the same closed record: still 75, not 150
        let (state, accepted) =
            run_refresh(&state, visits(vec![raw_check_in(4_500_000)]), at(7, 45));
        assert_eq!(accepted, 0);
        assert_eq!(state.snapshot.gym_presence, GymPresence::Off);
        assert_eq!(state.last_updated, at(7, 35));
        assert_eq!(state.snapshot.totals.weekly_total[&week], 75.0);
    }

    #[test]
    fn test_refresh_counts_visits() {
        let state = CoordinatorState::new();
        let (state, _) =
            run_refresh(&state, visits(vec![raw_check_in(4_500_000)]), at(7, 35));

        let month = crate::domain::types::MonthKey { year: 2025, month: 4 };
        let year = crate::domain::types::YearKey(2025);
        assert_eq!(state.snapshot.totals.monthly_visit_count[&month], 1);
        assert_eq!(state.snapshot.totals.yearly_visit_count[&year], 1);
        assert_eq!(state.snapshot.totals.monthly_total[&month], 75.0);
        assert_eq!(state.snapshot.totals.yearly_total[&year], 75.0);
    }

    #[test]
    fn test_occupancy_passthrough() {
        let state = CoordinatorState::new();
        let (state, _) = run_refresh(&state, visits(vec![]), at(7, 5));

        let occ = state.snapshot.occupancy.as_ref().unwrap();
        assert_eq!(occ.current_capacity, 105);
        assert_eq!(occ.status, "open");
        assert_eq!(occ.historical.len(), 2);
    }

    #[test]
    fn test_last_check_in_seen_monotonic() {
        let state = CoordinatorState::new();
        let (state, _) =
            run_refresh(&state, visits(vec![raw_check_in(4_500_000)]), at(7, 35));
        let seen_after_close = state.last_check_in_seen;

        // Re-polling the same closed record never moves the boundary back
        let (state, _) =
            run_refresh(&state, visits(vec![raw_check_in(4_500_000)]), at(7, 45));
        assert_eq!(state.last_check_in_seen, seen_after_close);

        let (state, _) = run_refresh(&state, visits(vec![]), at(7, 55));
        assert!(state.last_check_in_seen >= seen_after_close);
    }

    #[test]
    fn test_day_boundary_drops_displayed_entries_keeps_totals() {
        let state = CoordinatorState::new();
        let week = WeekKey { iso_year: 2025, week: 14 };

        let (state, _) =
            run_refresh(&state, visits(vec![raw_check_in(4_500_000)]), at(7, 35));
        assert!(!state.snapshot.check_ins.is_empty());

        // First refresh on the next day still uses yesterday's window, the
        // one after drops yesterday's entries from display
        let next_morning = Utc.with_ymd_and_hms(2025, 4, 4, 6, 0, 0).unwrap();
        let (state, _) = run_refresh(&state, visits(vec![]), next_morning);
        let (state, _) =
            run_refresh(&state, visits(vec![]), Utc.with_ymd_and_hms(2025, 4, 4, 6, 15, 0).unwrap());

        assert!(state.snapshot.check_ins.is_empty());
        assert_eq!(state.snapshot.totals.weekly_total[&week], 75.0);
    }

    #[test]
    fn test_unparseable_record_fails_cycle() {
        let state = CoordinatorState::new();
        let bad = RawCheckIn { check_in_date: "garbage".to_string(), ..raw_check_in(0) };
        assert!(refresh(&state, gym_data(), visits(vec![bad]), at(7, 5), Duration::zero())
            .is_err());
    }

    // --- Refresher actor against a scripted mock API ---

    struct MockApi {
        occupancy: Mutex<VecDeque<Result<OccupancyPayload, ApiError>>>,
        visits: Mutex<VecDeque<Result<VisitHistoryPayload, ApiError>>>,
        logins: AtomicU32,
    }

    impl MockApi {
        fn new() -> Self {
            Self {
                occupancy: Mutex::new(VecDeque::new()),
                visits: Mutex::new(VecDeque::new()),
                logins: AtomicU32::new(0),
            }
        }

        fn push_ok(&self, occ: OccupancyPayload, vis: VisitHistoryPayload) {
            self.occupancy.lock().unwrap().push_back(Ok(occ));
            self.visits.lock().unwrap().push_back(Ok(vis));
        }

        fn push_transport_failure(&self) {
            self.occupancy.lock().unwrap().push_back(Err(ApiError::Transport {
                endpoint: "gym-busyness",
                reason: "connection refused".to_string(),
            }));
            self.visits.lock().unwrap().push_back(Ok(VisitHistoryPayload::default()));
        }
    }

    #[async_trait::async_trait]
    impl GymApi for MockApi {
        async fn login(&self) -> Result<Profile, ApiError> {
            self.logins.fetch_add(1, Ordering::Relaxed);
            Ok(test_profile())
        }

        async fn fetch_occupancy(
            &self,
            _user_id: Uuid,
            _gym_id: Uuid,
        ) -> Result<OccupancyPayload, ApiError> {
            self.occupancy.lock().unwrap().pop_front().unwrap_or_else(|| Ok(gym_data()))
        }

        async fn fetch_visit_history(
            &self,
            _user_id: Uuid,
            _start: Option<DateTime<Utc>>,
            _end: DateTime<Utc>,
        ) -> Result<VisitHistoryPayload, ApiError> {
            self.visits
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(VisitHistoryPayload::default()))
        }
    }

    fn test_profile() -> Profile {
        Profile {
            uuid: "11111111-2222-3333-4444-555555555555".parse().unwrap(),
            home_club_uuid: "ee578789-b83a-489f-8044-187e67a11dfc".parse().unwrap(),
            chain_name: None,
            home_club_name: None,
            membership_type: None,
            custom_info: None,
        }
    }

    fn test_refresher(api: Arc<MockApi>, egress: Option<EgressSender>) -> Refresher<MockApi> {
        let config = Config::default().with_backoff(1, 1);
        Refresher::new(api, config, Arc::new(Metrics::new()), egress, test_profile())
    }

    #[tokio::test]
    async fn test_cycle_success_publishes_state_and_availability() {
        let api = Arc::new(MockApi::new());
        api.push_ok(gym_data(), visits(vec![raw_check_in(0)]));

        let (sender, mut rx) = create_egress_channel(8, "test".to_string());
        let mut refresher = test_refresher(api, Some(sender));

        assert!(matches!(refresher.poll_cycle().await, CycleOutcome::Ok));
        assert_eq!(refresher.state().snapshot.gym_presence, GymPresence::On);

        match rx.recv().await {
            Some(EgressMessage::Availability { online }) => assert!(online),
            other => panic!("expected availability, got {:?}", other),
        }
        match rx.recv().await {
            Some(EgressMessage::State(p)) => assert_eq!(p.gym_presence, "on"),
            other => panic!("expected state, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_failures_leave_state_untouched_and_go_offline() {
        let api = Arc::new(MockApi::new());
        api.push_ok(gym_data(), visits(vec![raw_check_in(0)]));
        // Exhaust the retry budget (1 attempt + 1 retry)
        api.push_transport_failure();
        api.push_transport_failure();

        let (sender, mut rx) = create_egress_channel(8, "test".to_string());
        let mut refresher = test_refresher(api, Some(sender));

        assert!(matches!(refresher.poll_cycle().await, CycleOutcome::Ok));
        let before = refresher.state().clone();
        let _ = rx.recv().await; // availability
        let _ = rx.recv().await; // state

        assert!(matches!(refresher.poll_cycle().await, CycleOutcome::Degraded));
        // Frozen at the last good snapshot, presence did not flip
        assert_eq!(refresher.state().snapshot, before.snapshot);
        assert_eq!(refresher.state().last_sync, before.last_sync);

        match rx.recv().await {
            Some(EgressMessage::Availability { online }) => assert!(!online),
            other => panic!("expected offline availability, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_failure_then_recovery_within_cycle() {
        let api = Arc::new(MockApi::new());
        api.push_transport_failure();
        api.push_ok(gym_data(), visits(vec![raw_check_in(0)]));

        let mut refresher = test_refresher(api, None);
        assert!(matches!(refresher.poll_cycle().await, CycleOutcome::Ok));
        assert_eq!(refresher.state().snapshot.gym_presence, GymPresence::On);
    }
}
