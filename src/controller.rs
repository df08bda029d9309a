use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use crate::axis::state_info::AxisStatus;
use crate::config::{AxisConfig, MotionConfig};
use crate::dispatcher::command::{Command, CommandResult, Envelope};
use crate::dispatcher::Dispatcher;
use crate::error::MotionError;
use crate::hal::{AxisHardware, PowerRelay};
use crate::registry::{AxisHandle, AxisRegistry};
use crate::supervisor::Supervisor;
use crate::telemetry::{self, AxisEvent};

/// Front door of the engine: owns the axis registry, one dispatcher task per
/// axis and the supervisor task.
pub struct MotionController {
    registry: Arc<AxisRegistry>,
    config: Arc<MotionConfig>,
    relay: Arc<dyn PowerRelay>,
    senders: Vec<mpsc::Sender<Envelope>>,
    events: broadcast::Sender<AxisEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl MotionController {
    /// Must be called from inside a tokio runtime.
    pub fn start(
        config: MotionConfig,
        axes: Vec<(AxisConfig, AxisHardware)>,
        relay: Arc<dyn PowerRelay>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let (notify_tx, notify_rx) = mpsc::channel(config.notification_queue_capacity);
        let registry = Arc::new(AxisRegistry::new(config.clone(), axes, notify_tx)?);
        let (events, _) = broadcast::channel(config.event_capacity);

        let delay = Duration::from_millis(config.direction_change_delay_ms);
        let mut senders = Vec::with_capacity(registry.len());
        let mut tasks = Vec::with_capacity(registry.len() + 1);

        for handle in registry.handles() {
            let (tx, rx) = mpsc::channel(config.command_queue_capacity);
            let dispatcher = Dispatcher::new(registry.clone(), handle, delay)?;
            tasks.push(tokio::spawn(dispatcher.run(rx)));
            senders.push(tx);
        }

        let supervisor = Supervisor::new(
            registry.clone(),
            config.clone(),
            relay.clone(),
            events.clone(),
        );
        tasks.push(tokio::spawn(supervisor.run(notify_rx)));

        info!("Motion controller started with {} axes", registry.len());

        Ok(Self {
            registry,
            config,
            relay,
            senders,
            events,
            tasks,
        })
    }

    /// Queues a command without waiting for it to be applied.
    pub fn submit(&self, axis: &str, command: Command) -> Result<(), MotionError> {
        self.enqueue(axis, Envelope::new(command))
    }

    /// Queues a command and waits for the dispatcher's answer.
    pub async fn execute(&self, axis: &str, command: Command) -> CommandResult {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.enqueue(axis, Envelope::with_response(command, resp_tx))?;
        resp_rx
            .await
            .map_err(|_| MotionError::DispatcherClosed(axis.to_string()))?
    }

    pub fn status(&self, axis: &str) -> Result<AxisStatus, MotionError> {
        let handle = self.lookup(axis)?;
        self.registry.with_axis(handle, |axis| axis.status())
    }

    pub fn statuses(&self) -> Vec<AxisStatus> {
        self.registry
            .handles()
            .filter_map(|handle| self.registry.with_axis(handle, |axis| axis.status()).ok())
            .collect()
    }

    pub fn telemetry_json(&self) -> Value {
        telemetry::telemetry_json(&self.statuses())
    }

    pub fn set_offset(&self, axis: &str, offset: i32) -> Result<(), MotionError> {
        let handle = self.lookup(axis)?;
        self.registry
            .with_axis(handle, |axis| axis.set_offset(offset))
    }

    pub fn set_main_power(&self, on: bool) {
        info!("Main power {}", if on { "on" } else { "off" });
        self.relay.set_main_power(on);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AxisEvent> {
        self.events.subscribe()
    }

    /// Shared with whatever raises the timer matches.
    pub fn registry(&self) -> Arc<AxisRegistry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Stops every axis and ends the background tasks.
    pub async fn shutdown(self) {
        for handle in self.registry.handles() {
            let _ = self.registry.with_axis(handle, |axis| axis.stop());
        }
        drop(self.senders);

        for task in self.tasks {
            task.abort();
            let _ = task.await;
        }
        info!("Motion controller stopped");
    }

    fn lookup(&self, axis: &str) -> Result<AxisHandle, MotionError> {
        self.registry
            .handle(axis)
            .ok_or_else(|| MotionError::UnknownAxis(axis.to_string()))
    }

    fn enqueue(&self, axis: &str, envelope: Envelope) -> Result<(), MotionError> {
        let handle = self.lookup(axis)?;
        let sender = self
            .senders
            .get(handle.index())
            .ok_or_else(|| MotionError::UnknownAxis(axis.to_string()))?;

        sender.try_send(envelope).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => MotionError::QueueFull(axis.to_string()),
            mpsc::error::TrySendError::Closed(_) => {
                MotionError::DispatcherClosed(axis.to_string())
            }
        })
    }
}
