//! Daily display-reset notifier
//!
//! Fires once per local midnight and sends a one-way `DayRollover` message
//! to the egress channel. The publisher drops the displayed check-in list;
//! the weekly/monthly/yearly accumulators are never touched by this signal.

use crate::io::egress_channel::EgressSender;
use chrono::{Duration, Local, NaiveTime};
use tokio::sync::watch;
use tracing::{debug, info};

/// Seconds until the next local midnight, never less than one.
fn until_next_midnight() -> std::time::Duration {
    let now = Local::now();
    let next = (now.date_naive() + Duration::days(1)).and_time(NaiveTime::MIN);
    let secs = (next - now.naive_local()).num_seconds().max(1) as u64;
    std::time::Duration::from_secs(secs)
}

/// Run the rollover loop until shutdown.
pub async fn run(egress: EgressSender, mut shutdown: watch::Receiver<bool>) {
    loop {
        let sleep_for = until_next_midnight();
        debug!(sleep_secs = sleep_for.as_secs(), "rollover_armed");

        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("rollover_shutdown");
                    return;
                }
            }
            _ = tokio::time::sleep(sleep_for) => {
                info!("rollover_midnight");
                egress.send_day_rollover();
            }
        }
    }
}
