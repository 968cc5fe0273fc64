//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `netpulse` - Authenticated HTTP client for the Netpulse mobile backend
//! - `mqtt_egress` - MQTT publisher for snapshot/availability/metrics
//! - `egress_channel` - Typed channel for MQTT egress messages

pub mod egress_channel;
pub mod mqtt_egress;
pub mod netpulse;

// Re-export commonly used types
pub use egress_channel::{create_egress_channel, EgressSender, StatePayload};
pub use mqtt_egress::MqttPublisher;
pub use netpulse::{ApiError, GymApi, NetpulseClient};
