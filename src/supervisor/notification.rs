use crate::registry::AxisHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// `SUPERVISOR_RATE` half-pulses went out since the last one.
    Progress,
    /// The move reached its target; the timer is already stopped.
    Completed,
    /// Closed loop passed the setpoint; the timer is stopped awaiting reversal.
    Overshoot,
    /// The timer refused a ramp frequency; the axis was stopped.
    TimerFault,
}

impl NotificationKind {
    /// Ends the move: the timer is stopped and nothing else will follow.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NotificationKind::Progress)
    }
}

/// Immutable snapshot handed from the tick context to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub handle: AxisHandle,
    pub epoch: u32,
    pub pos_act: i32,
    pub kind: NotificationKind,
}
