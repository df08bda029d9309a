use serde::Serialize;

use super::state::{AxisMode, Direction};

/// Point-in-time copy of an axis, safe to hand to other tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisStatus {
    pub name: String,
    pub mode: AxisMode,
    pub direction: Direction,
    pub pos_cmd: i32,
    pub pos_act: i32,
    pub stalled: bool,
    pub already_there: bool,
    pub offset: i32,
    pub current_freq: u32,
    pub half_steps_completed: u32,
    pub half_steps_requested: u32,
    pub dropped_notifications: u32,
}

impl AxisStatus {
    pub fn is_moving(&self) -> bool {
        self.mode.is_moving()
    }

    pub fn is_faulted(&self) -> bool {
        self.stalled
    }

    pub fn is_ready(&self) -> bool {
        !self.is_moving() && !self.stalled
    }
}
