use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message kind (spec §3's `msg_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Event,
    Flush,
}

/// A single breadcrumb in a message's `action_timing` trail (spec §3, §4.A).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTiming {
    pub action_name: String,
    pub timestamp: DateTime<Utc>,
}

/// The domain-level workflow message that travels between agents.
///
/// Distinct from [`crate::envelope::Envelope`], which is the wire framing
/// used to carry this struct (serialized) across the broker. `id` and
/// `service_name` are immutable after construction; `action_timing` is
/// append-only and its timestamps are monotonically non-decreasing
/// (spec §8, invariant 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: i64,
    service_name: String,
    msg_type: MessageKind,
    origin_data: HashMap<String, Value>,
    action_timing: Vec<ActionTiming>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(id: i64, service_name: impl Into<String>, msg_type: MessageKind) -> Self {
        Self {
            id,
            service_name: service_name.into(),
            msg_type,
            origin_data: HashMap::new(),
            action_timing: Vec::new(),
            start_time: None,
            end_time: None,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn msg_type(&self) -> MessageKind {
        self.msg_type
    }

    pub fn set_origin_data(&mut self, data: HashMap<String, Value>) {
        self.origin_data = data;
    }

    pub fn origin_data(&self) -> &HashMap<String, Value> {
        &self.origin_data
    }

    /// Appends a breadcrumb stamped with the current time. Timestamps are
    /// always non-decreasing since `Utc::now()` only moves forward.
    pub fn add_action_timing(&mut self, action_name: impl Into<String>) {
        self.action_timing.push(ActionTiming {
            action_name: action_name.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn action_timing(&self) -> &[ActionTiming] {
        &self.action_timing
    }

    pub fn set_start_time(&mut self) {
        self.start_time = Some(Utc::now());
    }

    pub fn set_end_time(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// Wall-clock duration between start and end, if both are set.
    /// Invariant: `end_time >= start_time` (spec §3).
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_timing_is_monotonic() {
        let mut msg = Message::new(1, "svc", MessageKind::Request);
        msg.add_action_timing("start_run");
        std::thread::sleep(std::time::Duration::from_millis(1));
        msg.add_action_timing("end_run");

        let timings = msg.action_timing();
        assert_eq!(timings.len(), 2);
        assert!(timings[1].timestamp >= timings[0].timestamp);
    }

    #[test]
    fn identity_fields_are_readable_not_mutable() {
        let msg = Message::new(42, "writer", MessageKind::Event);
        assert_eq!(msg.id(), 42);
        assert_eq!(msg.service_name(), "writer");
    }

    #[test]
    fn duration_requires_both_timestamps() {
        let mut msg = Message::new(1, "svc", MessageKind::Request);
        assert!(msg.duration_seconds().is_none());
        msg.set_start_time();
        assert!(msg.duration_seconds().is_none());
        msg.set_end_time();
        assert!(msg.duration_seconds().unwrap() >= 0.0);
    }
}
