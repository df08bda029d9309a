//! Software stand-ins for the board drivers.
//!
//! A [`SimBoard`] couples a timer, two output pins and an encoder so that
//! step pulses move the simulated shaft. Used by the tests and the demo, and
//! handy for running the engine on a desktop.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::hal::{AxisHardware, OutputPin, PositionSource, PowerRelay, StepTimer, TimerError};
use crate::registry::{AxisHandle, AxisRegistry};

#[derive(Debug, Default)]
struct BoardState {
    position: AtomicI32,
    frozen: AtomicBool,
    dir_level: AtomicBool,
    step_level: AtomicBool,
    toggles: AtomicU64,
    timer_running: AtomicBool,
    timer_freq: AtomicU32,
    timer_max_freq: AtomicU32,
    timer_starts: AtomicU32,
    timer_stops: AtomicU32,
    timer_sets: AtomicU32,
    freq_history: Mutex<Vec<u32>>,
}

/// One simulated axis worth of hardware.
///
/// Each rising edge on the step line moves the encoder one count: down while
/// the direction line is high, up while it is low.
#[derive(Debug, Clone)]
pub struct SimBoard {
    state: Arc<BoardState>,
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBoard {
    pub fn new() -> Self {
        let state = BoardState::default();
        state.timer_max_freq.store(u32::MAX, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn hardware(&self) -> AxisHardware {
        AxisHardware {
            direction: Box::new(SimPin {
                board: self.clone(),
                line: PinLine::Direction,
            }),
            step: Box::new(SimPin {
                board: self.clone(),
                line: PinLine::Step,
            }),
            timer: Box::new(SimTimer {
                board: self.clone(),
            }),
            position: Box::new(SimEncoder {
                board: self.clone(),
            }),
        }
    }

    pub fn position(&self) -> i32 {
        self.state.position.load(Ordering::SeqCst)
    }

    pub fn set_position(&self, position: i32) {
        self.state.position.store(position, Ordering::SeqCst);
    }

    /// A frozen shaft ignores step pulses, as a stalled motor would.
    pub fn freeze(&self, frozen: bool) {
        self.state.frozen.store(frozen, Ordering::SeqCst);
    }

    pub fn dir_level(&self) -> bool {
        self.state.dir_level.load(Ordering::SeqCst)
    }

    pub fn toggles(&self) -> u64 {
        self.state.toggles.load(Ordering::SeqCst)
    }

    pub fn timer_running(&self) -> bool {
        self.state.timer_running.load(Ordering::SeqCst)
    }

    pub fn timer_freq(&self) -> u32 {
        self.state.timer_freq.load(Ordering::SeqCst)
    }

    /// Frequencies above `hz` are refused by the timer.
    pub fn set_max_freq(&self, hz: u32) {
        self.state.timer_max_freq.store(hz, Ordering::SeqCst);
    }

    pub fn timer_starts(&self) -> u32 {
        self.state.timer_starts.load(Ordering::SeqCst)
    }

    pub fn timer_stops(&self) -> u32 {
        self.state.timer_stops.load(Ordering::SeqCst)
    }

    /// Start, stop and frequency writes seen by the timer.
    pub fn timer_calls(&self) -> u32 {
        self.timer_starts() + self.timer_stops() + self.state.timer_sets.load(Ordering::SeqCst)
    }

    /// Every frequency accepted by the timer, in order.
    pub fn freq_history(&self) -> Vec<u32> {
        self.state
            .freq_history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy)]
enum PinLine {
    Direction,
    Step,
}

struct SimPin {
    board: SimBoard,
    line: PinLine,
}

impl SimPin {
    fn write(&mut self, high: bool) {
        let state = &self.board.state;
        match self.line {
            PinLine::Direction => state.dir_level.store(high, Ordering::SeqCst),
            PinLine::Step => {
                let was_high = state.step_level.swap(high, Ordering::SeqCst);
                if high && !was_high && !state.frozen.load(Ordering::SeqCst) {
                    let delta = if state.dir_level.load(Ordering::SeqCst) {
                        -1
                    } else {
                        1
                    };
                    state.position.fetch_add(delta, Ordering::SeqCst);
                }
            }
        }
    }
}

impl OutputPin for SimPin {
    fn set_level(&mut self, high: bool) {
        self.write(high);
    }

    fn toggle(&mut self) {
        let level = match self.line {
            PinLine::Direction => self.board.state.dir_level.load(Ordering::SeqCst),
            PinLine::Step => {
                self.board.state.toggles.fetch_add(1, Ordering::SeqCst);
                self.board.state.step_level.load(Ordering::SeqCst)
            }
        };
        self.write(!level);
    }
}

struct SimTimer {
    board: SimBoard,
}

impl StepTimer for SimTimer {
    fn init(&mut self) {
        self.board.state.timer_running.store(false, Ordering::SeqCst);
    }

    fn set_frequency(&mut self, hz: u32) -> Result<(), TimerError> {
        let state = &self.board.state;
        state.timer_sets.fetch_add(1, Ordering::SeqCst);
        if hz == 0 || hz > state.timer_max_freq.load(Ordering::SeqCst) {
            return Err(TimerError::FrequencyOutOfRange(hz));
        }
        state.timer_freq.store(hz, Ordering::SeqCst);
        if let Ok(mut history) = state.freq_history.lock() {
            history.push(hz);
        }
        Ok(())
    }

    fn start(&mut self) {
        self.board.state.timer_starts.fetch_add(1, Ordering::SeqCst);
        self.board.state.timer_running.store(true, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.board.state.timer_stops.fetch_add(1, Ordering::SeqCst);
        self.board.state.timer_running.store(false, Ordering::SeqCst);
    }

    fn match_pending(&mut self) -> bool {
        self.is_running()
    }

    fn is_running(&self) -> bool {
        self.board.state.timer_running.load(Ordering::SeqCst)
    }
}

struct SimEncoder {
    board: SimBoard,
}

impl PositionSource for SimEncoder {
    fn read_position(&mut self) -> i32 {
        self.board.position()
    }
}

/// Main power relay that only remembers its state.
#[derive(Debug, Clone)]
pub struct SimRelay {
    on: Arc<AtomicBool>,
}

impl SimRelay {
    pub fn new(on: bool) -> Self {
        Self {
            on: Arc::new(AtomicBool::new(on)),
        }
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

impl PowerRelay for SimRelay {
    fn set_main_power(&self, on: bool) {
        debug!("main power {}", if on { "on" } else { "off" });
        self.on.store(on, Ordering::SeqCst);
    }
}

/// Raises timer matches for one axis at the rate its timer is armed with.
///
/// Runs on a 1 ms tokio interval and catches up in bursts, two matches per
/// full step.
pub fn spawn_tick_driver(
    registry: Arc<AxisRegistry>,
    handle: AxisHandle,
    board: SimBoard,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut acc: u64 = 0;

        loop {
            interval.tick().await;
            if !board.timer_running() {
                acc = 0;
                continue;
            }

            acc += 2 * board.timer_freq() as u64;
            let matches = acc / 1000;
            acc %= 1000;

            for _ in 0..matches {
                if !registry.on_timer_match(handle) {
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rising_edges_move_encoder() {
        let board = SimBoard::new();
        let mut hw = board.hardware();

        hw.direction.set_level(false);
        for _ in 0..10 {
            hw.step.toggle();
        }
        assert_eq!(board.position(), 5);
        assert_eq!(board.toggles(), 10);

        hw.direction.set_level(true);
        for _ in 0..4 {
            hw.step.toggle();
        }
        assert_eq!(board.position(), 3);
    }

    #[test]
    fn test_frozen_shaft_ignores_pulses() {
        let board = SimBoard::new();
        let mut hw = board.hardware();
        board.freeze(true);
        for _ in 0..10 {
            hw.step.toggle();
        }
        assert_eq!(board.position(), 0);
        assert_eq!(board.toggles(), 10);
    }

    #[test]
    fn test_timer_refuses_out_of_range() {
        let board = SimBoard::new();
        let mut hw = board.hardware();
        board.set_max_freq(1000);

        assert!(hw.timer.set_frequency(500).is_ok());
        assert_eq!(
            hw.timer.set_frequency(2000),
            Err(TimerError::FrequencyOutOfRange(2000))
        );
        assert_eq!(board.freq_history(), vec![500]);
        assert_eq!(board.timer_freq(), 500);
    }
}
