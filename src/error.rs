use crate::hal::TimerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotionError {
    SpeedOutOfRange { axis: String, speed_level: u32 },
    ZeroAmplitudeDivisor { axis: String },
    StepCountOutOfRange { axis: String, step_count: u32 },
    Invariant { axis: String, detail: String },
    UnknownAxis(String),
    QueueFull(String),
    DispatcherClosed(String),
    Config(String),
}

impl MotionError {
    pub(crate) fn timer(axis: &str, err: TimerError) -> Self {
        MotionError::Invariant {
            axis: axis.to_string(),
            detail: err.to_string(),
        }
    }

    /// Rejected at validation time, before any axis state was touched.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            MotionError::SpeedOutOfRange { .. }
                | MotionError::ZeroAmplitudeDivisor { .. }
                | MotionError::StepCountOutOfRange { .. }
        )
    }

    pub fn is_invariant(&self) -> bool {
        matches!(self, MotionError::Invariant { .. })
    }
}

impl std::fmt::Display for MotionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MotionError::SpeedOutOfRange { axis, speed_level } => {
                write!(f, "{}: chosen speed out of bounds {}", axis, speed_level)
            }
            MotionError::ZeroAmplitudeDivisor { axis } => {
                write!(f, "{}: amplitude divisor must be non-zero", axis)
            }
            MotionError::StepCountOutOfRange { axis, step_count } => {
                write!(f, "{}: step count out of range {}", axis, step_count)
            }
            MotionError::Invariant { axis, detail } => {
                write!(f, "{}: invariant violated: {}", axis, detail)
            }
            MotionError::UnknownAxis(axis) => write!(f, "Axis not found: {}", axis),
            MotionError::QueueFull(axis) => write!(f, "{}: command queue full", axis),
            MotionError::DispatcherClosed(axis) => {
                write!(f, "{}: command dispatcher is not running", axis)
            }
            MotionError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for MotionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = MotionError::SpeedOutOfRange {
            axis: "x_axis".to_string(),
            speed_level: 9,
        };
        assert!(err.is_invalid_input());
        assert!(!err.is_invariant());
        assert_eq!(err.to_string(), "x_axis: chosen speed out of bounds 9");

        let err = MotionError::StepCountOutOfRange {
            axis: "z_axis".to_string(),
            step_count: u32::MAX,
        };
        assert!(err.is_invalid_input());
        assert_eq!(err.to_string(), "z_axis: step count out of range 4294967295");

        let err = MotionError::timer("y_axis", TimerError::FrequencyOutOfRange(400_000));
        assert!(err.is_invariant());
        assert!(err.to_string().contains("400000"));
    }
}
