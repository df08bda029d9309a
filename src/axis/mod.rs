pub mod ramp;
pub mod state;
pub mod state_info;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{AxisConfig, MotionConfig};
use crate::dispatcher::command::{Command, CommandOutcome, CommandResult};
use crate::error::MotionError;
use crate::hal::AxisHardware;
use crate::kp::Kp;
use crate::registry::AxisHandle;
use crate::supervisor::notification::{Notification, NotificationKind};
use ramp::{Ramp, RampProgress};
use state::{AxisMode, Direction};
use state_info::AxisStatus;

/// Largest step count whose half-steps fit in a `u32`.
pub const MAX_STEP_COUNT: u32 = u32::MAX / 2;

/// One stepper motor and everything needed to move it.
///
/// Configured by the dispatcher while the timer is stopped, then advanced by
/// [`Axis::tick`] on every timer match. The supervisor only touches the fault
/// fields.
pub struct Axis {
    handle: AxisHandle,
    name: String,
    hw: AxisHardware,
    config: Arc<MotionConfig>,

    pub(crate) mode: AxisMode,
    dir: Direction,
    last_dir: Direction,

    pos_cmd: i32,
    pub(crate) pos_act: i32,
    pos_cmd_middle: i32,
    pos_start: i32,

    ramp: Ramp,

    half_steps_requested: u32,
    half_steps_completed: u32,
    half_steps_to_middle: u32,
    // counts half-steps since the last supervisor notification
    half_pulses: u32,

    pub(crate) stalled: bool,
    pub(crate) stalled_counter: u32,
    pub(crate) last_pos: i32,
    already_there: bool,

    offset: i32,
    kp: Option<Kp>,

    pub(crate) epoch: u32,
    // epoch in which the timer was stopped for a direction change
    quiesced_epoch: Option<u32>,
    // terminal notification the supervisor queue had no room for
    parked: Option<Notification>,
    dropped_notifications: u32,
}

impl Axis {
    pub fn new(
        handle: AxisHandle,
        axis_config: &AxisConfig,
        mut hw: AxisHardware,
        config: Arc<MotionConfig>,
    ) -> Self {
        hw.timer.init();
        hw.step.set_level(false);
        hw.direction.set_level(Direction::Clockwise.pin_level());
        let pos_act = hw.position.read_position();

        Self {
            handle,
            name: axis_config.name.clone(),
            hw,
            config,
            mode: AxisMode::Stopped,
            dir: Direction::Clockwise,
            last_dir: Direction::Clockwise,
            pos_cmd: pos_act,
            pos_act,
            pos_cmd_middle: pos_act,
            pos_start: pos_act,
            ramp: Ramp::flat(0, 0),
            half_steps_requested: 0,
            half_steps_completed: 0,
            half_steps_to_middle: 0,
            half_pulses: 0,
            stalled: false,
            stalled_counter: 0,
            last_pos: pos_act,
            already_there: false,
            offset: axis_config.offset,
            kp: axis_config.kp.map(Kp::from),
            epoch: 0,
            quiesced_epoch: None,
            parked: None,
            dropped_notifications: 0,
        }
    }

    pub fn handle(&self) -> AxisHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> AxisMode {
        self.mode
    }

    pub fn direction(&self) -> Direction {
        self.dir
    }

    pub fn already_there(&self) -> bool {
        self.already_there
    }

    pub fn stalled(&self) -> bool {
        self.stalled
    }

    pub fn ramp(&self) -> &Ramp {
        &self.ramp
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: i32) {
        self.offset = offset;
    }

    pub fn is_timer_running(&self) -> bool {
        self.hw.timer.is_running()
    }

    pub fn status(&mut self) -> AxisStatus {
        self.pos_act = self.hw.position.read_position();
        AxisStatus {
            name: self.name.clone(),
            mode: self.mode,
            direction: self.dir,
            pos_cmd: self.pos_cmd,
            pos_act: self.pos_act,
            stalled: self.stalled,
            already_there: self.already_there,
            offset: self.offset,
            current_freq: self.ramp.current_freq,
            half_steps_completed: self.half_steps_completed,
            half_steps_requested: self.half_steps_requested,
            dropped_notifications: self.dropped_notifications,
        }
    }

    /// Checks a command without touching any state.
    pub fn validate(&self, cmd: &Command) -> Result<(), MotionError> {
        if let Some(speed_level) = cmd.speed_level() {
            if self.config.free_run_freq(speed_level).is_none() {
                return Err(MotionError::SpeedOutOfRange {
                    axis: self.name.clone(),
                    speed_level,
                });
            }
        }
        if let Command::Steps {
            step_count,
            amplitude_divisor,
            ..
        } = *cmd
        {
            if amplitude_divisor == 0 {
                return Err(MotionError::ZeroAmplitudeDivisor {
                    axis: self.name.clone(),
                });
            }
            // two half-steps per step must fit the half-step counters
            if step_count > MAX_STEP_COUNT {
                return Err(MotionError::StepCountOutOfRange {
                    axis: self.name.clone(),
                    step_count,
                });
            }
        }
        Ok(())
    }

    pub fn clear_faults(&mut self) {
        self.stalled = false;
        self.stalled_counter = 0;
        self.already_there = false;
    }

    /// Stops the timer if `cmd` reverses a moving axis. Returns whether the
    /// caller has to wait out the direction change delay before applying it.
    ///
    /// Once the axis has quiesced and nothing reconfigured it since, the
    /// reversal may go ahead and this returns `false`.
    pub fn begin_direction_change(&mut self, cmd: &Command) -> bool {
        if !self.mode.is_moving() {
            return false;
        }

        let requested = match cmd {
            Command::ClosedLoop { setpoint } => {
                self.pos_act = self.hw.position.read_position();
                let error = setpoint.saturating_sub(self.pos_act);
                if error.saturating_abs() < self.config.pos_threshold {
                    return false;
                }
                Direction::for_error(error)
            }
            _ => match cmd.direction() {
                Some(direction) => direction,
                None => return false,
            },
        };

        if requested == self.dir {
            return false;
        }
        if self.quiesced_epoch == Some(self.epoch) && !self.is_timer_running() {
            return false;
        }

        self.hw.timer.stop();
        self.epoch = self.epoch.wrapping_add(1);
        self.quiesced_epoch = Some(self.epoch);
        debug!(
            "{}: direction change {} -> {}, waiting {} ms",
            self.name, self.dir, requested, self.config.direction_change_delay_ms
        );
        true
    }

    /// Configures the axis for `cmd` and arms the timer.
    pub fn apply(&mut self, cmd: Command, now_ms: u64) -> CommandResult {
        self.validate(&cmd)?;

        match cmd {
            Command::FreeRun {
                direction,
                speed_level,
            } => {
                let freq = self.speed_freq(speed_level)?;
                self.mode = AxisMode::FreeRunning;
                self.set_direction(direction);
                self.reset_progress(0);
                self.ramp = Ramp::flat(freq, now_ms);
                self.epoch = self.epoch.wrapping_add(1);
                self.arm(freq)?;

                info!(
                    "{}: FREE RUN, speed: {}, direction: {}",
                    self.name, freq, self.dir
                );
                Ok(CommandOutcome::Started { frequency: freq })
            }
            Command::Steps {
                direction,
                speed_level,
                step_count,
                tick_period_ms,
                amplitude_divisor,
            } => {
                let freq = self.speed_freq(speed_level)?;
                self.mode = AxisMode::Steps;
                self.set_direction(direction);
                self.reset_progress(step_count * 2);
                self.half_steps_to_middle = self.half_steps_requested / 2;
                self.ramp = Ramp::trapezoid(
                    freq,
                    amplitude_divisor,
                    self.config.slope_ratio,
                    tick_period_ms,
                    self.config.min_freq,
                    now_ms,
                );
                self.epoch = self.epoch.wrapping_add(1);
                let start_freq = self.ramp.current_freq;
                self.arm(start_freq)?;

                info!(
                    "{}: STEPS RUN, steps: {}, speed: {}, direction: {}",
                    self.name, step_count, freq, self.dir
                );
                Ok(CommandOutcome::Started {
                    frequency: start_freq,
                })
            }
            Command::ClosedLoop { setpoint } => {
                self.pos_cmd = setpoint;
                self.pos_act = self.hw.position.read_position();
                info!(
                    "{}: CLOSED_LOOP posCmd: {} posAct: {}",
                    self.name, self.pos_cmd, self.pos_act
                );

                if self.within_threshold() {
                    self.finish_in_place();
                    info!("{}: already there", self.name);
                    return Ok(CommandOutcome::AlreadyThere);
                }
                self.start_closed_loop(now_ms)
            }
            Command::Stop => Ok(self.stop()),
        }
    }

    /// Idempotent: a stopped axis is left untouched.
    pub fn stop(&mut self) -> CommandOutcome {
        if !self.mode.is_moving() {
            return CommandOutcome::AlreadyStopped;
        }
        self.mode = AxisMode::Stopped;
        self.hw.timer.stop();
        self.epoch = self.epoch.wrapping_add(1);
        info!("{}: STOP", self.name);
        CommandOutcome::Stopped
    }

    /// Restarts a closed-loop move after an overshoot, once the direction
    /// change delay has passed. `None` when the move was replaced or stopped
    /// in the meantime.
    pub fn resume_closed_loop(&mut self, epoch: u32, now_ms: u64) -> Option<CommandResult> {
        if epoch != self.epoch || self.mode != AxisMode::ClosedLoop || self.is_timer_running() {
            return None;
        }

        self.pos_act = self.hw.position.read_position();
        if self.within_threshold() {
            self.finish_in_place();
            return Some(Ok(CommandOutcome::AlreadyThere));
        }
        Some(self.start_closed_loop(now_ms))
    }

    /// Fail-stop after a stall. The caller cuts motor power.
    pub fn trip_stall(&mut self) {
        self.hw.timer.stop();
        self.stalled = true;
        self.mode = AxisMode::Stopped;
    }

    pub(crate) fn record_dropped_notification(&mut self) {
        self.dropped_notifications = self.dropped_notifications.saturating_add(1);
    }

    /// Keeps a terminal notification until the supervisor collects it. The
    /// timer is already stopped, so at most one is outstanding per move.
    pub(crate) fn park(&mut self, note: Notification) {
        self.parked = Some(note);
    }

    pub(crate) fn take_parked(&mut self) -> Option<Notification> {
        self.parked.take()
    }

    /// Confirms the timer raised the match this call is serving.
    pub(crate) fn match_pending(&mut self) -> bool {
        self.hw.timer.match_pending()
    }

    /// Serves one timer match: one half-step.
    ///
    /// Runs in interrupt context: never blocks, never allocates, never logs.
    pub fn tick(&mut self, now_ms: u64) -> Option<Notification> {
        if !self.mode.is_moving() {
            return None;
        }

        self.pos_act = self.hw.position.read_position();

        if self.dir != self.last_dir {
            self.half_pulses = 0;
            self.last_dir = self.dir;
        }

        self.already_there = match self.mode {
            AxisMode::Steps => self.half_steps_completed >= self.half_steps_requested,
            AxisMode::ClosedLoop => self.within_threshold(),
            AxisMode::FreeRunning | AxisMode::Stopped => false,
        };

        if self.already_there {
            self.hw.timer.stop();
            self.mode = AxisMode::Stopped;
            return Some(self.notification(NotificationKind::Completed));
        }

        if self.mode == AxisMode::ClosedLoop
            && Direction::for_error(self.position_error()) != self.dir
        {
            self.hw.timer.stop();
            return Some(self.notification(NotificationKind::Overshoot));
        }

        if self.ramp.due(now_ms) {
            let mut progress = self.ramp_progress();
            if self.mode == AxisMode::ClosedLoop
                && self.position_error().saturating_abs() < self.config.approach_threshold
            {
                self.ramp.cap(self.config.approach_freq, progress.travelled);
                progress = self.ramp_progress();
            }

            let freq = self.ramp.update(progress, now_ms);
            if self.hw.timer.set_frequency(freq).is_err() {
                self.hw.timer.stop();
                self.mode = AxisMode::Stopped;
                return Some(self.notification(NotificationKind::TimerFault));
            }
        }

        self.hw.step.toggle();
        self.half_steps_completed = self.half_steps_completed.saturating_add(1);
        self.half_pulses += 1;

        if self.half_pulses >= self.config.supervisor_rate {
            self.half_pulses = 0;
            return Some(self.notification(NotificationKind::Progress));
        }
        None
    }

    fn start_closed_loop(&mut self, now_ms: u64) -> CommandResult {
        let error = self.position_error();

        self.mode = AxisMode::ClosedLoop;
        self.set_direction(Direction::for_error(error));
        self.reset_progress(0);
        self.pos_start = self.pos_act;
        self.pos_cmd_middle = ((self.pos_act as i64 + self.pos_cmd as i64) / 2) as i32;
        self.ramp = Ramp::trapezoid(
            self.config.closed_loop_max_freq,
            self.config.closed_loop_amplitude_divisor,
            self.config.slope_ratio,
            self.config.closed_loop_tick_period_ms,
            self.config.min_freq,
            now_ms,
        );

        if let Some(kp) = self.kp.as_mut() {
            kp.restart(self.pos_act);
            let out = kp.run(self.pos_cmd, self.pos_act);
            self.ramp
                .seed(out.unsigned_abs().saturating_mul(self.config.closed_loop_freq_multiplier));
        }

        self.epoch = self.epoch.wrapping_add(1);
        let start_freq = self.ramp.current_freq;
        self.arm(start_freq)?;

        info!(
            "{}: CLOSED_LOOP start, freq: {}, direction: {}",
            self.name, start_freq, self.dir
        );
        Ok(CommandOutcome::Started {
            frequency: start_freq,
        })
    }

    fn finish_in_place(&mut self) {
        self.already_there = true;
        if self.mode.is_moving() {
            self.hw.timer.stop();
            self.mode = AxisMode::Stopped;
        }
        self.epoch = self.epoch.wrapping_add(1);
    }

    fn speed_freq(&self, speed_level: u32) -> Result<u32, MotionError> {
        self.config
            .free_run_freq(speed_level)
            .ok_or_else(|| MotionError::SpeedOutOfRange {
                axis: self.name.clone(),
                speed_level,
            })
    }

    fn set_direction(&mut self, direction: Direction) {
        self.dir = direction;
        self.hw.direction.set_level(direction.pin_level());
    }

    fn reset_progress(&mut self, half_steps_requested: u32) {
        self.pos_act = self.hw.position.read_position();
        self.half_steps_requested = half_steps_requested;
        self.half_steps_completed = 0;
        self.half_steps_to_middle = 0;
        self.half_pulses = 0;
        self.last_pos = self.pos_act;
    }

    /// Mode must already be set: the tick may run as soon as this returns.
    fn arm(&mut self, freq: u32) -> Result<(), MotionError> {
        self.hw.timer.stop();

        let limit = match self.mode {
            AxisMode::ClosedLoop => self.config.compumotor_max_freq,
            _ => self.config.max_freq,
        };
        let armed = if freq < self.config.min_freq || freq > limit {
            Err(MotionError::Invariant {
                axis: self.name.clone(),
                detail: format!(
                    "frequency {} Hz outside [{}, {}]",
                    freq, self.config.min_freq, limit
                ),
            })
        } else {
            self.hw
                .timer
                .set_frequency(freq)
                .map_err(|err| MotionError::timer(&self.name, err))
        };

        match armed {
            Ok(()) => {
                self.hw.timer.start();
                Ok(())
            }
            Err(err) => {
                self.mode = AxisMode::Stopped;
                warn!("{}", err);
                Err(err)
            }
        }
    }

    fn position_error(&self) -> i32 {
        self.pos_cmd.saturating_sub(self.pos_act)
    }

    fn within_threshold(&self) -> bool {
        self.position_error().saturating_abs() < self.config.pos_threshold
    }

    fn ramp_progress(&self) -> RampProgress {
        match self.mode {
            AxisMode::ClosedLoop => RampProgress {
                travelled: distance(self.pos_act, self.pos_start),
                remaining: distance(self.pos_cmd, self.pos_act),
                first_half_passed: match self.dir {
                    Direction::Clockwise => self.pos_act < self.pos_cmd_middle,
                    Direction::CounterClockwise => self.pos_act > self.pos_cmd_middle,
                },
            },
            _ => RampProgress {
                travelled: self.half_steps_completed,
                remaining: self
                    .half_steps_requested
                    .saturating_sub(self.half_steps_completed),
                first_half_passed: self.half_steps_completed > self.half_steps_to_middle,
            },
        }
    }

    fn notification(&self, kind: NotificationKind) -> Notification {
        Notification {
            handle: self.handle,
            epoch: self.epoch,
            pos_act: self.pos_act,
            kind,
        }
    }
}

impl std::fmt::Debug for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Axis")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("dir", &self.dir)
            .field("pos_cmd", &self.pos_cmd)
            .field("pos_act", &self.pos_act)
            .field("ramp", &self.ramp)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

fn distance(a: i32, b: i32) -> u32 {
    (a as i64 - b as i64).unsigned_abs().min(u32::MAX as u64) as u32
}
