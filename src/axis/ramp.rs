//! Trapezoidal step-frequency ramp.
//!
//! Acceleration is `slope_ratio` times steeper than deceleration, so the ramp
//! starts braking once the distance left is `slope_ratio` times the distance
//! it took to reach cruise speed.

/// Where the move stands when the ramp is updated. Units are half-steps for a
/// step move and position counts for a closed-loop move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampProgress {
    pub travelled: u32,
    pub remaining: u32,
    pub first_half_passed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ramp {
    pub requested_freq: u32,
    pub current_freq: u32,
    pub freq_delta: u32,
    pub freq_increment: u32,
    pub freq_decrement: u32,
    pub slope_ratio: u32,
    pub tick_period_ms: u32,
    pub ticks_last_time: u64,
    pub max_speed_reached: bool,
    pub max_speed_reached_distance: u32,
}

impl Ramp {
    /// Constant frequency, no ramp updates.
    pub fn flat(freq: u32, now_ms: u64) -> Self {
        Self {
            requested_freq: freq,
            current_freq: freq,
            freq_delta: 0,
            freq_increment: 0,
            freq_decrement: freq,
            slope_ratio: 1,
            tick_period_ms: 0,
            ticks_last_time: now_ms,
            max_speed_reached: true,
            max_speed_reached_distance: 0,
        }
    }

    /// Ramp from `requested_freq / amplitude_divisor` up to `requested_freq`.
    ///
    /// The delta is floored at `min_freq` so the timer is never armed below
    /// its minimum. `amplitude_divisor` must be non-zero.
    pub fn trapezoid(
        requested_freq: u32,
        amplitude_divisor: u32,
        slope_ratio: u32,
        tick_period_ms: u32,
        min_freq: u32,
        now_ms: u64,
    ) -> Self {
        let freq_delta = (requested_freq / amplitude_divisor.max(1))
            .max(min_freq)
            .min(requested_freq);
        Self {
            requested_freq,
            current_freq: freq_delta,
            freq_delta,
            freq_increment: freq_delta.saturating_mul(slope_ratio),
            freq_decrement: freq_delta,
            slope_ratio,
            tick_period_ms,
            ticks_last_time: now_ms,
            max_speed_reached: false,
            max_speed_reached_distance: 0,
        }
    }

    /// Start from `freq` instead of the delta, kept inside the ramp's bounds.
    pub fn seed(&mut self, freq: u32) {
        self.current_freq = freq.clamp(self.freq_decrement, self.requested_freq);
    }

    pub fn is_flat(&self) -> bool {
        self.freq_increment == 0
    }

    /// At most one update per `tick_period_ms`.
    pub fn due(&self, now_ms: u64) -> bool {
        !self.is_flat() && now_ms.saturating_sub(self.ticks_last_time) > self.tick_period_ms as u64
    }

    /// Lower the ceiling to `freq` and stop accelerating.
    pub fn cap(&mut self, freq: u32, travelled: u32) {
        if freq >= self.requested_freq {
            return;
        }
        self.requested_freq = freq.max(self.freq_decrement);
        if self.current_freq > self.requested_freq {
            self.current_freq = self.requested_freq;
        }
        if !self.max_speed_reached {
            self.max_speed_reached = true;
            self.max_speed_reached_distance = travelled;
        }
    }

    /// Advance the ramp one period and return the frequency to arm.
    pub fn update(&mut self, progress: RampProgress, now_ms: u64) -> u32 {
        self.ticks_last_time = now_ms;

        if !self.max_speed_reached && !progress.first_half_passed {
            self.current_freq = self.current_freq.saturating_add(self.freq_increment);
            if self.current_freq >= self.requested_freq {
                self.current_freq = self.requested_freq;
                self.max_speed_reached = true;
                self.max_speed_reached_distance = progress.travelled;
            }
        }

        let braking_distance = self
            .max_speed_reached_distance
            .saturating_mul(self.slope_ratio);
        let decelerate = if self.max_speed_reached {
            progress.remaining <= braking_distance
        } else {
            progress.first_half_passed
        };

        if decelerate {
            self.current_freq = self
                .current_freq
                .saturating_sub(self.freq_decrement)
                .max(self.freq_decrement);
        }

        self.current_freq
    }
}
