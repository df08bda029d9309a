//! Error-proportional ("kp") controller for closed-loop frequency output.
//!
//! Does not allocate and keeps no history beyond the previous call, so it can
//! run inside the tick context.

use serde::{Deserialize, Serialize};

/// Number of calls over which the output ramps up from standstill.
const STARTUP_CALLS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerDirection {
    /// +error gives +output
    Direct,
    /// +error gives -output
    Reverse,
}

#[derive(Debug, Clone)]
pub struct Kp {
    /// Proportional gain as configured
    kp: i32,
    /// Time-scaled gain, negated for a reverse acting process
    zp: f32,
    direction: ControllerDirection,
    sample_period_ms: u32,

    out_min: i32,
    out_max: i32,
    /// Smallest non-zero output magnitude
    out_abs_min: i32,

    prev_input: i32,
    prev_error: i32,
    prev_setpoint: i32,
    prev_output: i32,

    num_times_ran: u32,
}

impl Kp {
    pub fn new(
        kp: i32,
        direction: ControllerDirection,
        sample_period_ms: u32,
        out_min: i32,
        out_max: i32,
        out_abs_min: i32,
    ) -> Self {
        let mut this = Self {
            kp: 0,
            zp: 0.0,
            direction,
            sample_period_ms,
            out_min,
            out_max,
            out_abs_min,
            prev_input: 0,
            prev_error: 0,
            prev_setpoint: 0,
            prev_output: 0,
            num_times_ran: 0,
        };
        this.set_tunings(kp);
        this
    }

    /// Forget the previous run so the next call starts the attenuation ramp
    /// again. Tunings are kept.
    pub fn restart(&mut self, input: i32) {
        self.prev_input = input;
        self.prev_error = 0;
        self.prev_setpoint = input;
        self.num_times_ran = 0;
    }

    /// Compute the control output for one sample.
    ///
    /// The clamped proportional term is attenuated by `n * 0.1` during the
    /// first calls, then raised to `out_abs_min` if it became too small to
    /// move the motor. A zero output is raised too.
    pub fn run(&mut self, setpoint: i32, input: i32) -> i32 {
        let error = setpoint.saturating_sub(input);

        let p_term = self.zp * error as f32;
        let output = (p_term as i32).clamp(self.out_min, self.out_max);

        self.prev_input = input;
        self.prev_output = output;
        self.prev_error = error;
        self.prev_setpoint = setpoint;

        self.num_times_ran = self.num_times_ran.saturating_add(1);

        let attenuation = if self.num_times_ran < STARTUP_CALLS {
            self.num_times_ran as f32 * 0.1
        } else {
            1.0
        };
        let out = (output as f32 * attenuation) as i32;

        if output < 0 {
            out.min(-self.out_abs_min)
        } else {
            out.max(self.out_abs_min)
        }
    }

    /// Negative gains are ignored.
    pub fn set_tunings(&mut self, kp: i32) {
        if kp < 0 {
            return;
        }
        self.kp = kp;
        self.zp = match self.direction {
            ControllerDirection::Direct => kp as f32,
            ControllerDirection::Reverse => -(kp as f32),
        };
    }

    pub fn set_output_limits(&mut self, min: i32, max: i32, abs_min: i32) {
        self.out_min = min;
        self.out_max = max;
        self.out_abs_min = abs_min;
    }

    pub fn set_controller_direction(&mut self, direction: ControllerDirection) {
        if direction != self.direction {
            self.zp = -self.zp;
        }
        self.direction = direction;
    }

    pub fn set_sample_period(&mut self, sample_period_ms: u32) {
        if sample_period_ms > 0 {
            self.sample_period_ms = sample_period_ms;
        }
    }

    pub fn kp(&self) -> i32 {
        self.kp
    }

    pub fn zp(&self) -> f32 {
        self.zp
    }

    pub fn sample_period_ms(&self) -> u32 {
        self.sample_period_ms
    }

    pub fn num_times_ran(&self) -> u32 {
        self.num_times_ran
    }

    pub fn prev_output(&self) -> i32 {
        self.prev_output
    }
}

impl From<crate::config::KpConfig> for Kp {
    fn from(cfg: crate::config::KpConfig) -> Self {
        Kp::new(
            cfg.kp,
            cfg.direction,
            cfg.sample_period_ms,
            cfg.out_min,
            cfg.out_max,
            cfg.out_abs_min,
        )
    }
}
