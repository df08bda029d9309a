use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::MotionError;
use crate::kp::ControllerDirection;

/// Engine-wide tunables. Defaults are the values the controller boards ship
/// with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub max_freq: u32,
    pub min_freq: u32,
    pub compumotor_max_freq: u32,
    pub max_speed_free_run: u32,
    /// Free-run frequency table in kHz, indexed by speed level.
    pub free_run_freqs_khz: Vec<u32>,
    pub direction_change_delay_ms: u64,
    /// Half-pulses between two supervisor notifications.
    pub supervisor_rate: u32,
    pub pos_threshold: i32,
    pub approach_threshold: i32,
    pub approach_freq: u32,
    pub stall_threshold: i32,
    pub stall_max_count: u32,
    pub stall_detection: bool,
    /// Acceleration to deceleration slope relation.
    pub slope_ratio: u32,
    pub closed_loop_max_freq: u32,
    /// Hz per percent of proportional controller output.
    pub closed_loop_freq_multiplier: u32,
    pub closed_loop_amplitude_divisor: u32,
    pub closed_loop_tick_period_ms: u32,
    pub command_queue_capacity: usize,
    pub notification_queue_capacity: usize,
    pub event_capacity: usize,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            max_freq: 125_000,
            min_freq: 100,
            compumotor_max_freq: 300_000,
            max_speed_free_run: 8,
            free_run_freqs_khz: vec![0, 5, 15, 25, 50, 75, 75, 100, 125],
            direction_change_delay_ms: 500,
            supervisor_rate: 2500,
            pos_threshold: 6,
            approach_threshold: 100,
            approach_freq: 125_000 / 4,
            stall_threshold: 3,
            stall_max_count: 40,
            stall_detection: true,
            slope_ratio: 3,
            closed_loop_max_freq: 125_000,
            closed_loop_freq_multiplier: 125_000 / 100,
            closed_loop_amplitude_divisor: 50,
            closed_loop_tick_period_ms: 50,
            command_queue_capacity: 5,
            notification_queue_capacity: 32,
            event_capacity: 64,
        }
    }
}

impl MotionConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: MotionConfig =
            serde_json::from_str(json).context("Failed to parse motion config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read motion config {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), MotionError> {
        let fail = |msg: String| Err(MotionError::Config(msg));

        if self.min_freq == 0 || self.min_freq > self.max_freq {
            return fail(format!(
                "min_freq {} must be in (0, max_freq {}]",
                self.min_freq, self.max_freq
            ));
        }
        if self.max_freq > self.compumotor_max_freq {
            return fail("max_freq exceeds compumotor_max_freq".to_string());
        }
        if self.closed_loop_max_freq < self.min_freq
            || self.closed_loop_max_freq > self.compumotor_max_freq
        {
            return fail("closed_loop_max_freq out of range".to_string());
        }
        if self.free_run_freqs_khz.len() != self.max_speed_free_run as usize + 1 {
            return fail(format!(
                "free_run_freqs_khz needs {} entries, got {}",
                self.max_speed_free_run + 1,
                self.free_run_freqs_khz.len()
            ));
        }
        if let Some(khz) = self.free_run_freqs_khz[1..]
            .iter()
            .find(|khz| **khz * 1000 < self.min_freq || **khz * 1000 > self.max_freq)
        {
            return fail(format!("free run frequency {} kHz out of range", khz));
        }
        if self.approach_freq < self.min_freq || self.approach_freq > self.closed_loop_max_freq {
            return fail("approach_freq out of range".to_string());
        }
        if self.slope_ratio == 0 || self.supervisor_rate == 0 {
            return fail("slope_ratio and supervisor_rate must be non-zero".to_string());
        }
        if self.closed_loop_amplitude_divisor == 0 {
            return fail("closed_loop_amplitude_divisor must be non-zero".to_string());
        }
        if self.command_queue_capacity == 0
            || self.notification_queue_capacity == 0
            || self.event_capacity == 0
        {
            return fail("queue capacities must be non-zero".to_string());
        }
        Ok(())
    }

    /// Step frequency in Hz for a free-run speed level, if the level exists.
    pub fn free_run_freq(&self, speed_level: u32) -> Option<u32> {
        if speed_level == 0 || speed_level > self.max_speed_free_run {
            return None;
        }
        self.free_run_freqs_khz
            .get(speed_level as usize)
            .map(|khz| khz * 1000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KpConfig {
    pub kp: i32,
    pub direction: ControllerDirection,
    pub sample_period_ms: u32,
    pub out_min: i32,
    pub out_max: i32,
    pub out_abs_min: i32,
}

impl Default for KpConfig {
    fn default() -> Self {
        Self {
            kp: 100,
            direction: ControllerDirection::Direct,
            sample_period_ms: 50,
            out_min: -100,
            out_max: 100,
            out_abs_min: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    pub name: String,
    #[serde(default)]
    pub offset: i32,
    #[serde(default)]
    pub kp: Option<KpConfig>,
}

impl AxisConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            offset: 0,
            kp: None,
        }
    }

    pub fn with_offset(mut self, offset: i32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_kp(mut self, kp: KpConfig) -> Self {
        self.kp = Some(kp);
        self
    }
}
