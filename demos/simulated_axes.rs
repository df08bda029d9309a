use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use motpap::{
    axis::state::Direction,
    config::{AxisConfig, KpConfig, MotionConfig},
    dispatcher::command::Command,
    sim::{spawn_tick_driver, SimBoard, SimRelay},
    MotionController,
};
use tracing::{error, info, warn};

const AXES: [&str; 3] = ["x_axis", "y_axis", "z_axis"];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting motpap with three simulated axes");

    let config = match std::env::args().nth(1) {
        Some(path) => MotionConfig::from_json_file(&path)?,
        None => MotionConfig {
            direction_change_delay_ms: 100,
            supervisor_rate: 500,
            ..MotionConfig::default()
        },
    };

    let boards: Vec<SimBoard> = AXES.iter().map(|_| SimBoard::new()).collect();
    let axes = AXES
        .iter()
        .zip(&boards)
        .map(|(name, board)| {
            let mut axis = AxisConfig::new(*name).with_offset(41230);
            if *name == "y_axis" {
                axis = axis.with_kp(KpConfig::default());
            }
            (axis, board.hardware())
        })
        .collect();

    let relay = SimRelay::new(false);
    let controller = MotionController::start(config, axes, Arc::new(relay.clone()))?;
    controller.set_main_power(true);

    let registry = controller.registry();
    for (name, board) in AXES.iter().zip(&boards) {
        let handle = registry
            .handle(name)
            .with_context(|| format!("axis {} not registered", name))?;
        spawn_tick_driver(registry.clone(), handle, board.clone());
    }

    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!("event: {:?} on {} at {}", event.kind, event.axis, event.pos_act);
        }
    });

    let moves = [
        (
            "x_axis",
            Command::Steps {
                direction: Direction::CounterClockwise,
                speed_level: 8,
                step_count: 4000,
                tick_period_ms: 50,
                amplitude_divisor: 50,
            },
        ),
        ("y_axis", Command::ClosedLoop { setpoint: -3000 }),
        (
            "z_axis",
            Command::FreeRun {
                direction: Direction::Clockwise,
                speed_level: 3,
            },
        ),
    ];

    for (axis, command) in moves {
        match controller.execute(axis, command).await {
            Ok(outcome) => info!("{} command result: {:?}", axis, outcome),
            Err(e) => error!("{} command failed: {}", axis, e),
        }
    }

    // out of range on purpose
    if let Err(e) = controller.submit(
        "x_axis",
        Command::FreeRun {
            direction: Direction::Clockwise,
            speed_level: 9,
        },
    ) {
        error!("x_axis submit failed: {}", e);
    }

    tokio::time::sleep(Duration::from_millis(500)).await;

    info!("Reversing z_axis");
    controller
        .execute(
            "z_axis",
            Command::FreeRun {
                direction: Direction::CounterClockwise,
                speed_level: 5,
            },
        )
        .await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    controller.execute("z_axis", Command::Stop).await?;

    warn!("Freezing x_axis encoder to provoke a stall");
    boards[0].freeze(true);
    controller
        .execute(
            "x_axis",
            Command::FreeRun {
                direction: Direction::Clockwise,
                speed_level: 2,
            },
        )
        .await?;
    tokio::time::sleep(Duration::from_secs(2)).await;
    info!("Main power after stall: {}", relay.is_on());

    info!(
        "Telemetry: {}",
        serde_json::to_string_pretty(&controller.telemetry_json())?
    );

    controller.shutdown().await;
    Ok(())
}
