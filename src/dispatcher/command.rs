use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::axis::state::Direction;
use crate::error::MotionError;

/// A motion request for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    #[serde(rename = "free_run")]
    FreeRun {
        direction: Direction,
        speed_level: u32,
    },
    #[serde(rename = "closed_loop")]
    ClosedLoop { setpoint: i32 },
    #[serde(rename = "steps")]
    Steps {
        direction: Direction,
        speed_level: u32,
        step_count: u32,
        tick_period_ms: u32,
        amplitude_divisor: u32,
    },
    #[serde(rename = "stop")]
    Stop,
}

impl Command {
    /// Direction the command asks for, when it names one.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Command::FreeRun { direction, .. } | Command::Steps { direction, .. } => {
                Some(*direction)
            }
            Command::ClosedLoop { .. } | Command::Stop => None,
        }
    }

    pub fn speed_level(&self) -> Option<u32> {
        match self {
            Command::FreeRun { speed_level, .. } | Command::Steps { speed_level, .. } => {
                Some(*speed_level)
            }
            Command::ClosedLoop { .. } | Command::Stop => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Started { frequency: u32 },
    AlreadyThere,
    Stopped,
    AlreadyStopped,
}

pub type CommandResult = Result<CommandOutcome, MotionError>;

/// What travels on an axis' command queue.
#[derive(Debug)]
pub struct Envelope {
    pub command: Command,
    pub resp: Option<oneshot::Sender<CommandResult>>,
}

impl Envelope {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            resp: None,
        }
    }

    pub fn with_response(command: Command, resp: oneshot::Sender<CommandResult>) -> Self {
        Self {
            command,
            resp: Some(resp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_steps_command() {
        let json = r#"{"type": "steps", "direction": "Clockwise", "speed_level": 8,
                       "step_count": 1000, "tick_period_ms": 50, "amplitude_divisor": 50}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();

        match cmd {
            Command::Steps {
                direction,
                step_count,
                ..
            } => {
                assert_eq!(direction, Direction::Clockwise);
                assert_eq!(step_count, 1000);
            }
            _ => panic!("Expected Steps command"),
        }
        assert_eq!(cmd.speed_level(), Some(8));
    }

    #[test]
    fn test_serialize_outcome() {
        let json = serde_json::to_string(&CommandOutcome::Started { frequency: 2500 }).unwrap();
        assert!(json.contains("started"));
        assert!(json.contains("2500"));
    }
}
