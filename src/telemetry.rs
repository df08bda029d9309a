//! Events and status documents published to the rest of the system.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::axis::state_info::AxisStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisEventKind {
    PositionReached,
    Stalled,
    Reversed,
    TimerFault,
}

/// Something the supervisor observed on an axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisEvent {
    pub axis: String,
    pub kind: AxisEventKind,
    pub pos_act: i32,
    pub at: DateTime<Utc>,
}

impl AxisEvent {
    pub fn new(axis: impl Into<String>, kind: AxisEventKind, pos_act: i32) -> Self {
        Self {
            axis: axis.into(),
            kind,
            pos_act,
            at: Utc::now(),
        }
    }
}

/// Per-axis telemetry entry.
pub fn status_json(status: &AxisStatus) -> Value {
    json!({
        "posCmd": status.pos_cmd,
        "posAct": status.pos_act,
        "stalled": status.stalled,
        "offset": status.offset,
        "mode": status.mode,
        "alreadyThere": status.already_there,
    })
}

/// Telemetry document keyed by axis name.
pub fn telemetry_json(statuses: &[AxisStatus]) -> Value {
    let axes: Map<String, Value> = statuses
        .iter()
        .map(|status| (status.name.clone(), status_json(status)))
        .collect();
    Value::Object(axes)
}
