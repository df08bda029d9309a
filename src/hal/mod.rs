//! Narrow interfaces to the board drivers the motion engine does not own.
//!
//! Every method reachable from the tick handler must be callable from an
//! interrupt: no blocking, no allocation.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    FrequencyOutOfRange(u32),
}

impl std::fmt::Display for TimerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerError::FrequencyOutOfRange(hz) => {
                write!(f, "timer frequency out of range: {} Hz", hz)
            }
        }
    }
}

impl std::error::Error for TimerError {}

/// Hardware timer bound to one axis.
///
/// `hz` is the full-step rate; the driver matches at twice that rate so every
/// match is one half-step.
pub trait StepTimer: Send {
    fn init(&mut self);
    fn set_frequency(&mut self, hz: u32) -> Result<(), TimerError>;
    fn start(&mut self);
    fn stop(&mut self);
    /// Confirms this timer raised the interrupt and acknowledges the match.
    fn match_pending(&mut self) -> bool;
    fn is_running(&self) -> bool;
}

pub trait OutputPin: Send {
    fn set_level(&mut self, high: bool);
    fn toggle(&mut self);
}

/// Main motor power relay, shared by every axis on the board.
pub trait PowerRelay: Send + Sync {
    fn set_main_power(&self, on: bool);
}

/// Encoder or resolver feedback, polled once per tick.
pub trait PositionSource: Send {
    fn read_position(&mut self) -> i32;
}

/// Hardware exclusively owned by one axis for its whole lifetime.
pub struct AxisHardware {
    pub direction: Box<dyn OutputPin>,
    pub step: Box<dyn OutputPin>,
    pub timer: Box<dyn StepTimer>,
    pub position: Box<dyn PositionSource>,
}

impl std::fmt::Debug for AxisHardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxisHardware")
            .field("timer_running", &self.timer.is_running())
            .finish_non_exhaustive()
    }
}
