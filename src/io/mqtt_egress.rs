//! MQTT publisher for egress events
//!
//! Publishes bridge state to MQTT topics for the host automation platform:
//! - gymbridge/state - Snapshot JSONs (QoS 1)
//! - gymbridge/availability - "online"/"offline" (QoS 1)
//! - gymbridge/metrics - Periodic metrics snapshots (QoS 0)
//!
//! The publisher caches the last state payload. On the daily rollover
//! notification it republishes that payload with the displayed check-in
//! list cleared; the period totals in the payload are left untouched.

use crate::infra::config::Config;
use crate::io::egress_channel::{EgressMessage, StatePayload};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    state_topic: String,
    availability_topic: String,
    metrics_topic: String,
    /// Last published state, kept for the day-rollover republish
    last_state: Option<StatePayload>,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("gymbridge-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        // Set credentials if configured
        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        // Spawn the eventloop handler
        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        // QoS 1 acknowledgement received
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            state_topic: config.mqtt_egress_state_topic().to_string(),
            availability_topic: config.mqtt_egress_availability_topic().to_string(),
            metrics_topic: config.mqtt_egress_metrics_topic().to_string(),
            last_state: None,
        }
    }

    /// Run the publisher loop
    ///
    /// Processes messages from the channel and publishes to MQTT.
    /// Runs until shutdown signal is received.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            state = %self.state_topic,
            availability = %self.availability_topic,
            metrics = %self.metrics_topic,
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                // Check for shutdown
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        // Drain remaining messages
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                // Process messages
                Some(msg) = self.rx.recv() => {
                    self.publish_message(msg).await;
                }
            }
        }
    }

    async fn publish_message(&mut self, msg: EgressMessage) {
        match msg {
            EgressMessage::State(payload) => {
                self.publish_state(&payload).await;
                self.last_state = Some(payload);
            }
            EgressMessage::Availability { online } => {
                let body = if online { "online" } else { "offline" };
                if let Err(e) = self
                    .client
                    .publish(&self.availability_topic, QoS::AtLeastOnce, false, body.as_bytes())
                    .await
                {
                    error!(error = %e, "mqtt_egress_availability_failed");
                }
            }
            EgressMessage::DayRollover => {
                // Display-only reset: clear today's list, keep every
                // accumulated total exactly as published.
                if let Some(mut payload) = self.last_state.clone() {
                    payload.check_ins.clear();
                    payload.last_workout_minutes = None;
                    info!("egress_day_rollover");
                    self.publish_state(&payload).await;
                    self.last_state = Some(payload);
                }
            }
            EgressMessage::Metrics(payload) => {
                // Use QoS 0 for metrics (fire-and-forget)
                if let Ok(json) = serde_json::to_string(&payload) {
                    if let Err(e) = self
                        .client
                        .publish(&self.metrics_topic, QoS::AtMostOnce, false, json.as_bytes())
                        .await
                    {
                        debug!(error = %e, "mqtt_egress_metrics_failed");
                    }
                }
            }
        }
    }

    async fn publish_state(&self, payload: &StatePayload) {
        // Use QoS 1 for state (at-least-once delivery)
        if let Ok(json) = serde_json::to_string(payload) {
            if let Err(e) = self
                .client
                .publish(&self.state_topic, QoS::AtLeastOnce, false, json.as_bytes())
                .await
            {
                error!(error = %e, "mqtt_egress_state_failed");
            }
        }
    }
}
