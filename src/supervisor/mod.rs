pub mod notification;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::axis::state::AxisMode;
use crate::axis::Axis;
use crate::config::MotionConfig;
use crate::dispatcher::command::CommandOutcome;
use crate::hal::PowerRelay;
use crate::registry::AxisRegistry;
use crate::telemetry::{AxisEvent, AxisEventKind};
use notification::{Notification, NotificationKind};

/// What a notification turned out to mean once checked against the axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Produced under a move that has since been replaced or stopped.
    Stale,
    Quiet,
    Stalled,
    Reached,
    Overshoot,
    TimerFault,
}

/// Consumes tick notifications for every axis: stall detection, completion
/// events and closed-loop reversal.
pub struct Supervisor {
    registry: Arc<AxisRegistry>,
    config: Arc<MotionConfig>,
    relay: Arc<dyn PowerRelay>,
    events: broadcast::Sender<AxisEvent>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<AxisRegistry>,
        config: Arc<MotionConfig>,
        relay: Arc<dyn PowerRelay>,
        events: broadcast::Sender<AxisEvent>,
    ) -> Self {
        Self {
            registry,
            config,
            relay,
            events,
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<Notification>) {
        info!("Supervisor started");
        let parked = self.registry.parked_signal();
        loop {
            tokio::select! {
                note = rx.recv() => match note {
                    Some(note) => self.handle(note).await,
                    None => break,
                },
                _ = parked.notified() => self.drain_parked().await,
            }
        }
        info!("Supervisor stopped");
    }

    /// Collects terminal notifications that found the queue full.
    pub async fn drain_parked(&self) {
        let handles: Vec<_> = self.registry.handles().collect();
        for handle in handles {
            if let Ok(Some(note)) = self.registry.with_axis(handle, |axis| axis.take_parked()) {
                self.handle(note).await;
            }
        }
    }

    pub async fn handle(&self, note: Notification) {
        let checked = self.registry.with_axis(note.handle, |axis| {
            let verdict = inspect(axis, &note, &self.config, self.relay.as_ref());
            (axis.name().to_string(), verdict)
        });
        let (name, verdict) = match checked {
            Ok(checked) => checked,
            Err(err) => {
                warn!("Notification dropped: {}", err);
                return;
            }
        };

        match verdict {
            Verdict::Stale => debug!("{}: stale {:?} ignored", name, note.kind),
            Verdict::Quiet => {}
            Verdict::Stalled => {
                warn!("{}: stalled at {}, main power off", name, note.pos_act);
                self.emit(&name, AxisEventKind::Stalled, note.pos_act);
            }
            Verdict::Reached => {
                info!("{}: position reached {}", name, note.pos_act);
                self.emit(&name, AxisEventKind::PositionReached, note.pos_act);
            }
            Verdict::TimerFault => {
                error!("{}: timer refused ramp frequency, axis stopped", name);
                self.emit(&name, AxisEventKind::TimerFault, note.pos_act);
            }
            Verdict::Overshoot => {
                debug!("{}: overshoot at {}, reversing", name, note.pos_act);
                tokio::spawn(reverse_after_delay(
                    self.registry.clone(),
                    self.events.clone(),
                    Duration::from_millis(self.config.direction_change_delay_ms),
                    note,
                ));
            }
        }
    }

    fn emit(&self, axis: &str, kind: AxisEventKind, pos_act: i32) {
        // nobody listening is fine
        let _ = self.events.send(AxisEvent::new(axis, kind, pos_act));
    }
}

/// Supervisor decision for one notification, taken inside the axis' critical
/// section. A stall trip stops the axis and cuts main power before returning.
pub fn inspect(
    axis: &mut Axis,
    note: &Notification,
    config: &MotionConfig,
    relay: &dyn PowerRelay,
) -> Verdict {
    if note.epoch != axis.epoch {
        return Verdict::Stale;
    }

    let verdict = match note.kind {
        NotificationKind::Progress if config.stall_detection && axis.mode != AxisMode::Stopped => {
            let moved = note.pos_act.saturating_sub(axis.last_pos).saturating_abs();
            if moved < config.stall_threshold {
                axis.stalled_counter = axis.stalled_counter.saturating_add(1);
            } else {
                axis.stalled_counter = 0;
            }

            if axis.stalled_counter >= config.stall_max_count {
                axis.trip_stall();
                relay.set_main_power(false);
                Verdict::Stalled
            } else {
                Verdict::Quiet
            }
        }
        NotificationKind::Progress => Verdict::Quiet,
        NotificationKind::Completed => Verdict::Reached,
        NotificationKind::Overshoot => Verdict::Overshoot,
        NotificationKind::TimerFault => Verdict::TimerFault,
    };

    axis.last_pos = note.pos_act;
    verdict
}

async fn reverse_after_delay(
    registry: Arc<AxisRegistry>,
    events: broadcast::Sender<AxisEvent>,
    delay: Duration,
    note: Notification,
) {
    tokio::time::sleep(delay).await;

    let now_ms = registry.now_ms();
    let resumed = registry.with_axis(note.handle, |axis| {
        let resumed = axis.resume_closed_loop(note.epoch, now_ms);
        (axis.name().to_string(), resumed)
    });
    let Ok((name, resumed)) = resumed else {
        return;
    };

    let kind = match resumed {
        None => {
            debug!("{}: move replaced before reversal", name);
            return;
        }
        Some(Err(err)) => {
            error!("{}: reversal failed: {}", name, err);
            return;
        }
        Some(Ok(CommandOutcome::AlreadyThere)) => AxisEventKind::PositionReached,
        Some(Ok(outcome)) => {
            info!("{}: reversed, {:?}", name, outcome);
            AxisEventKind::Reversed
        }
    };
    let _ = events.send(AxisEvent::new(name, kind, note.pos_act));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::state::Direction;
    use crate::config::AxisConfig;
    use crate::dispatcher::command::Command;
    use crate::sim::{SimBoard, SimRelay};

    fn moving_axis(config: &Arc<MotionConfig>) -> (Axis, SimBoard) {
        let board = SimBoard::new();
        let mut axis = Axis::new(
            crate::registry::AxisHandle::new(0),
            &AxisConfig::new("x_axis"),
            board.hardware(),
            config.clone(),
        );
        axis.apply(
            Command::Steps {
                direction: Direction::Clockwise,
                speed_level: 3,
                step_count: 1_000_000,
                tick_period_ms: 50,
                amplitude_divisor: 10,
            },
            0,
        )
        .unwrap();
        (axis, board)
    }

    fn progress(axis: &Axis, pos_act: i32) -> Notification {
        Notification {
            handle: axis.handle(),
            epoch: axis.epoch,
            pos_act,
            kind: NotificationKind::Progress,
        }
    }

    #[test]
    fn test_stall_trips_after_max_count() {
        let config = Arc::new(MotionConfig::default());
        let (mut axis, board) = moving_axis(&config);
        let relay = SimRelay::new(true);

        for _ in 0..39 {
            let note = progress(&axis, 0);
            assert_eq!(inspect(&mut axis, &note, &config, &relay), Verdict::Quiet);
        }
        assert!(relay.is_on());
        assert!(board.timer_running());

        let note = progress(&axis, 0);
        assert_eq!(inspect(&mut axis, &note, &config, &relay), Verdict::Stalled);
        assert!(axis.stalled());
        assert_eq!(axis.mode(), AxisMode::Stopped);
        assert!(!board.timer_running());
        assert!(!relay.is_on());
    }

    #[test]
    fn test_movement_resets_stall_counter() {
        let config = Arc::new(MotionConfig::default());
        let (mut axis, _board) = moving_axis(&config);
        let relay = SimRelay::new(true);

        for _ in 0..39 {
            let note = progress(&axis, 0);
            inspect(&mut axis, &note, &config, &relay);
        }
        let note = progress(&axis, 10);
        inspect(&mut axis, &note, &config, &relay);
        assert_eq!(axis.stalled_counter, 0);

        for _ in 0..39 {
            let note = progress(&axis, 10);
            assert_eq!(inspect(&mut axis, &note, &config, &relay), Verdict::Quiet);
        }
        assert!(!axis.stalled());
        assert!(relay.is_on());
    }

    #[test]
    fn test_stale_notification_ignored() {
        let config = Arc::new(MotionConfig::default());
        let (mut axis, _board) = moving_axis(&config);
        let relay = SimRelay::new(true);

        let mut note = progress(&axis, 500);
        note.epoch = note.epoch.wrapping_sub(1);
        note.kind = NotificationKind::Completed;

        assert_eq!(inspect(&mut axis, &note, &config, &relay), Verdict::Stale);
        assert_eq!(axis.last_pos, 0);
        assert_eq!(axis.mode(), AxisMode::Steps);
    }

    #[test]
    fn test_detection_disabled() {
        let config = Arc::new(MotionConfig {
            stall_detection: false,
            ..MotionConfig::default()
        });
        let (mut axis, board) = moving_axis(&config);
        let relay = SimRelay::new(true);

        for _ in 0..100 {
            let note = progress(&axis, 0);
            assert_eq!(inspect(&mut axis, &note, &config, &relay), Verdict::Quiet);
        }
        assert!(board.timer_running());
        assert!(relay.is_on());
    }

    fn supervisor_with_axis(
        config: MotionConfig,
    ) -> (
        Supervisor,
        Arc<AxisRegistry>,
        SimBoard,
        broadcast::Receiver<AxisEvent>,
    ) {
        let config = Arc::new(config);
        let board = SimBoard::new();
        let (tx, _rx) = mpsc::channel(8);
        let registry = Arc::new(
            AxisRegistry::new(
                config.clone(),
                vec![(AxisConfig::new("x_axis"), board.hardware())],
                tx,
            )
            .unwrap(),
        );
        let (events, events_rx) = broadcast::channel(8);
        let supervisor = Supervisor::new(
            registry.clone(),
            config,
            Arc::new(SimRelay::new(true)),
            events,
        );
        (supervisor, registry, board, events_rx)
    }

    #[tokio::test]
    async fn test_completion_publishes_event() {
        let (supervisor, registry, _board, mut events) =
            supervisor_with_axis(MotionConfig::default());
        let x = registry.handle("x_axis").unwrap();

        let note = registry.with_axis(x, |axis| {
            axis.apply(
                Command::Steps {
                    direction: Direction::Clockwise,
                    speed_level: 3,
                    step_count: 0,
                    tick_period_ms: 50,
                    amplitude_divisor: 10,
                },
                0,
            )
            .unwrap();
            axis.tick(0).unwrap()
        })
        .unwrap();
        supervisor.handle(note).await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, AxisEventKind::PositionReached);
        assert_eq!(event.axis, "x_axis");
    }

    #[tokio::test(start_paused = true)]
    async fn test_overshoot_reverses_after_delay() {
        let (supervisor, registry, board, mut events) =
            supervisor_with_axis(MotionConfig::default());
        let x = registry.handle("x_axis").unwrap();

        let note = registry.with_axis(x, |axis| {
            axis.apply(Command::ClosedLoop { setpoint: 1000 }, 0).unwrap();
            board.set_position(1200);
            axis.tick(0).unwrap()
        })
        .unwrap();
        assert_eq!(note.kind, NotificationKind::Overshoot);

        supervisor.handle(note).await;
        assert!(!board.timer_running());
        assert!(!board.dir_level());

        tokio::time::sleep(Duration::from_millis(600)).await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, AxisEventKind::Reversed);
        assert!(board.timer_running());
        assert!(board.dir_level());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overshoot_survives_full_queue() {
        let config = Arc::new(MotionConfig::default());
        let board = SimBoard::new();
        let (tx, rx) = mpsc::channel(1);
        let registry = Arc::new(
            AxisRegistry::new(
                config.clone(),
                vec![(AxisConfig::new("x_axis"), board.hardware())],
                tx.clone(),
            )
            .unwrap(),
        );
        let x = registry.handle("x_axis").unwrap();
        let (events, mut events_rx) = broadcast::channel(8);
        let supervisor = Supervisor::new(
            registry.clone(),
            config,
            Arc::new(SimRelay::new(true)),
            events,
        );

        registry
            .with_axis(x, |axis| axis.apply(Command::ClosedLoop { setpoint: 1000 }, 0))
            .unwrap()
            .unwrap();
        // leftover report from an older move occupies the only slot
        tx.try_send(Notification {
            handle: x,
            epoch: u32::MAX,
            pos_act: 0,
            kind: NotificationKind::Progress,
        })
        .unwrap();

        board.set_position(1200);
        assert!(registry.on_timer_match(x));
        assert!(!board.timer_running());

        tokio::spawn(supervisor.run(rx));
        tokio::time::sleep(Duration::from_millis(600)).await;

        let event = events_rx.recv().await.unwrap();
        assert_eq!(event.kind, AxisEventKind::Reversed);
        assert!(board.timer_running());
        assert!(board.dir_level());
        let mode = registry.with_axis(x, |axis| axis.mode()).unwrap();
        assert_eq!(mode, AxisMode::ClosedLoop);
    }
}
