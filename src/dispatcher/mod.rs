pub mod command;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::MotionError;
use crate::registry::{AxisHandle, AxisRegistry};
use command::{Command, CommandResult, Envelope};

/// Applies commands to one axis, one at a time, in arrival order.
pub struct Dispatcher {
    registry: Arc<AxisRegistry>,
    handle: AxisHandle,
    name: String,
    direction_change_delay: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<AxisRegistry>,
        handle: AxisHandle,
        direction_change_delay: Duration,
    ) -> Result<Self, MotionError> {
        let name = registry.with_axis(handle, |axis| axis.name().to_string())?;
        Ok(Self {
            registry,
            handle,
            name,
            direction_change_delay,
        })
    }

    pub async fn run(self, mut rx: mpsc::Receiver<Envelope>) {
        info!("{}: dispatcher started", self.name);
        while let Some(Envelope { command, resp }) = rx.recv().await {
            let result = self.process(command).await;
            if let Some(resp) = resp {
                let _ = resp.send(result);
            }
        }
        info!("{}: dispatcher stopped", self.name);
    }

    /// Validates, waits out a direction change if needed, then applies.
    pub async fn process(&self, command: Command) -> CommandResult {
        debug!("{}: processing {:?}", self.name, command);

        if command == Command::Stop {
            return self.registry.with_axis(self.handle, |axis| axis.stop());
        }

        let mut quiesce = self
            .registry
            .with_axis(self.handle, |axis| {
                axis.validate(&command)?;
                axis.clear_faults();
                Ok::<_, MotionError>(axis.begin_direction_change(&command))
            })
            .and_then(|checked| checked)
            .map_err(|err| {
                warn!("{}: command rejected: {}", self.name, err);
                err
            })?;

        // the axis may have been restarted while we slept, so the direction
        // is checked again in the same critical section as the apply
        loop {
            if quiesce {
                tokio::time::sleep(self.direction_change_delay).await;
            }

            let now_ms = self.registry.now_ms();
            let applied = self.registry.with_axis(self.handle, |axis| {
                if axis.begin_direction_change(&command) {
                    None
                } else {
                    Some(axis.apply(command, now_ms))
                }
            })?;
            match applied {
                Some(result) => return result,
                None => {
                    debug!("{}: reconfigured during direction change", self.name);
                    quiesce = true;
                }
            }
        }
    }
}
