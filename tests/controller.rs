use std::sync::Arc;
use std::time::Duration;

use motpap::axis::state::{AxisMode, Direction};
use motpap::config::{AxisConfig, MotionConfig};
use motpap::dispatcher::command::{Command, CommandOutcome};
use motpap::sim::{spawn_tick_driver, SimBoard, SimRelay};
use motpap::telemetry::{AxisEvent, AxisEventKind};
use motpap::{MotionController, MotionError};
use tokio::sync::broadcast;

struct Rig {
    controller: MotionController,
    boards: Vec<SimBoard>,
    relay: SimRelay,
}

fn rig(config: MotionConfig, names: &[&str], drive: bool) -> Rig {
    let boards: Vec<SimBoard> = names.iter().map(|_| SimBoard::new()).collect();
    let axes = names
        .iter()
        .zip(&boards)
        .map(|(name, board)| (AxisConfig::new(*name), board.hardware()))
        .collect();
    let relay = SimRelay::new(true);
    let controller = MotionController::start(config, axes, Arc::new(relay.clone())).unwrap();

    if drive {
        let registry = controller.registry();
        for (name, board) in names.iter().zip(&boards) {
            let handle = registry.handle(name).unwrap();
            spawn_tick_driver(registry.clone(), handle, board.clone());
        }
    }

    Rig {
        controller,
        boards,
        relay,
    }
}

async fn next_event(events: &mut broadcast::Receiver<AxisEvent>) -> AxisEvent {
    tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("no event in time")
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_steps_move_completes() {
    let rig = rig(MotionConfig::default(), &["x_axis"], true);
    let mut events = rig.controller.subscribe();

    let outcome = rig
        .controller
        .execute(
            "x_axis",
            Command::Steps {
                direction: Direction::CounterClockwise,
                speed_level: 8,
                step_count: 1000,
                tick_period_ms: 50,
                amplitude_divisor: 50,
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Started { frequency: 2500 });

    let event = next_event(&mut events).await;
    assert_eq!(event.kind, AxisEventKind::PositionReached);
    assert_eq!(event.axis, "x_axis");

    assert_eq!(rig.boards[0].toggles(), 2000);
    assert_eq!(rig.boards[0].position(), 1000);
    let status = rig.controller.status("x_axis").unwrap();
    assert_eq!(status.mode, AxisMode::Stopped);
    assert!(status.already_there);

    rig.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_closed_loop_reaches_setpoint() {
    let rig = rig(MotionConfig::default(), &["x_axis", "y_axis"], true);
    let mut events = rig.controller.subscribe();
    rig.controller.set_offset("y_axis", 41230).unwrap();

    rig.controller
        .execute("y_axis", Command::ClosedLoop { setpoint: -1500 })
        .await
        .unwrap();

    let event = next_event(&mut events).await;
    assert_eq!(event.kind, AxisEventKind::PositionReached);
    assert_eq!(event.axis, "y_axis");

    let telemetry = rig.controller.telemetry_json();
    let pos_act = telemetry["y_axis"]["posAct"].as_i64().unwrap();
    assert!((pos_act + 1500).abs() < 6);
    assert_eq!(telemetry["y_axis"]["posCmd"], -1500);
    assert_eq!(telemetry["y_axis"]["offset"], 41230);
    assert_eq!(telemetry["x_axis"]["posAct"], 0);
    assert_eq!(rig.boards[0].toggles(), 0);

    rig.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stalled_axis_cuts_power() {
    let config = MotionConfig {
        supervisor_rate: 100,
        stall_max_count: 5,
        ..MotionConfig::default()
    };
    let rig = rig(config, &["z_axis"], true);
    let mut events = rig.controller.subscribe();
    rig.boards[0].freeze(true);

    rig.controller
        .execute(
            "z_axis",
            Command::FreeRun {
                direction: Direction::Clockwise,
                speed_level: 1,
            },
        )
        .await
        .unwrap();

    let event = next_event(&mut events).await;
    assert_eq!(event.kind, AxisEventKind::Stalled);
    assert!(!rig.relay.is_on());
    assert!(!rig.boards[0].timer_running());

    let status = rig.controller.status("z_axis").unwrap();
    assert!(status.stalled);
    assert!(status.is_faulted());
    assert_eq!(status.mode, AxisMode::Stopped);

    // a new move clears the fault, power is restored separately
    rig.boards[0].freeze(false);
    rig.controller.set_main_power(true);
    rig.controller
        .execute(
            "z_axis",
            Command::FreeRun {
                direction: Direction::Clockwise,
                speed_level: 1,
            },
        )
        .await
        .unwrap();
    assert!(!rig.controller.status("z_axis").unwrap().stalled);
    assert!(rig.relay.is_on());

    rig.controller.shutdown().await;
}

#[tokio::test]
async fn test_full_queue_rejects_submit() {
    let rig = rig(MotionConfig::default(), &["x_axis"], false);

    for _ in 0..5 {
        rig.controller.submit("x_axis", Command::Stop).unwrap();
    }
    assert_eq!(
        rig.controller.submit("x_axis", Command::Stop),
        Err(MotionError::QueueFull("x_axis".to_string()))
    );

    rig.controller.shutdown().await;
}

#[tokio::test]
async fn test_unknown_axis() {
    let rig = rig(MotionConfig::default(), &["x_axis"], false);

    assert_eq!(
        rig.controller.submit("w_axis", Command::Stop),
        Err(MotionError::UnknownAxis("w_axis".to_string()))
    );
    assert!(rig.controller.status("w_axis").is_err());
    assert!(rig.controller.set_offset("w_axis", 1).is_err());

    rig.controller.shutdown().await;
}

#[tokio::test]
async fn test_invalid_speed_reported_to_caller() {
    let rig = rig(MotionConfig::default(), &["x_axis"], false);

    let err = rig
        .controller
        .execute(
            "x_axis",
            Command::FreeRun {
                direction: Direction::Clockwise,
                speed_level: 9,
            },
        )
        .await
        .unwrap_err();

    assert_eq!(
        err,
        MotionError::SpeedOutOfRange {
            axis: "x_axis".to_string(),
            speed_level: 9
        }
    );
    assert!(rig.controller.status("x_axis").unwrap().is_ready());
    assert_eq!(rig.boards[0].timer_calls(), 0);

    rig.controller.shutdown().await;
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let config = MotionConfig {
        supervisor_rate: 0,
        ..MotionConfig::default()
    };
    let board = SimBoard::new();
    let result = MotionController::start(
        config,
        vec![(AxisConfig::new("x_axis"), board.hardware())],
        Arc::new(SimRelay::new(false)),
    );
    assert!(result.is_err());
}
