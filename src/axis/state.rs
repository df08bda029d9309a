use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisMode {
    Stopped,
    FreeRunning,
    ClosedLoop,
    Steps,
}

impl AxisMode {
    pub fn is_moving(&self) -> bool {
        !matches!(self, AxisMode::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Clockwise,
    CounterClockwise,
}

impl Direction {
    /// Direction that reduces a closed-loop position error.
    pub fn for_error(error: i32) -> Self {
        if error < 0 {
            Direction::Clockwise
        } else {
            Direction::CounterClockwise
        }
    }

    /// Level of the direction line.
    pub fn pin_level(&self) -> bool {
        matches!(self, Direction::Clockwise)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Clockwise => "CW",
            Direction::CounterClockwise => "CCW",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
