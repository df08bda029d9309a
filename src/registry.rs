use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::axis::Axis;
use crate::config::{AxisConfig, MotionConfig};
use crate::error::MotionError;
use crate::hal::AxisHardware;
use crate::supervisor::notification::Notification;

/// Index of an axis slot. Fixed for the lifetime of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AxisHandle(usize);

impl AxisHandle {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// Fixed set of axes shared by the dispatchers, the supervisor and the timer
/// interrupts.
///
/// Every axis sits behind its own lock. Task context holds it for a handful
/// of field writes. The tick entry point only ever tries it.
pub struct AxisRegistry {
    axes: Vec<Mutex<Axis>>,
    names: HashMap<String, AxisHandle>,
    notify_tx: mpsc::Sender<Notification>,
    parked_signal: Arc<Notify>,
    origin: Instant,
}

impl AxisRegistry {
    pub fn new(
        config: Arc<MotionConfig>,
        axes: Vec<(AxisConfig, AxisHardware)>,
        notify_tx: mpsc::Sender<Notification>,
    ) -> Result<Self, MotionError> {
        let mut names = HashMap::new();
        let mut slots = Vec::with_capacity(axes.len());

        for (index, (axis_config, hw)) in axes.into_iter().enumerate() {
            let handle = AxisHandle::new(index);
            if names.insert(axis_config.name.clone(), handle).is_some() {
                return Err(MotionError::Config(format!(
                    "duplicate axis name {}",
                    axis_config.name
                )));
            }
            slots.push(Mutex::new(Axis::new(handle, &axis_config, hw, config.clone())));
        }

        Ok(Self {
            axes: slots,
            names,
            notify_tx,
            parked_signal: Arc::new(Notify::new()),
            origin: Instant::now(),
        })
    }

    pub fn handle(&self, name: &str) -> Option<AxisHandle> {
        self.names.get(name).copied()
    }

    pub fn handles(&self) -> impl Iterator<Item = AxisHandle> + '_ {
        (0..self.axes.len()).map(AxisHandle::new)
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Milliseconds since the registry was created.
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Raised when a terminal notification was parked on an axis because
    /// the notification queue was full.
    pub fn parked_signal(&self) -> Arc<Notify> {
        self.parked_signal.clone()
    }

    /// Runs `f` inside the axis' critical section.
    pub fn with_axis<R>(
        &self,
        handle: AxisHandle,
        f: impl FnOnce(&mut Axis) -> R,
    ) -> Result<R, MotionError> {
        let mut axis = self.lock(handle)?;
        Ok(f(&mut axis))
    }

    /// Timer interrupt entry point for one axis.
    ///
    /// Returns whether a half-step was served. A match that lands while task
    /// context holds the axis is skipped; the timer raises the next one.
    pub fn on_timer_match(&self, handle: AxisHandle) -> bool {
        let Some(slot) = self.axes.get(handle.0) else {
            return false;
        };
        let mut axis = match slot.try_lock() {
            Ok(axis) => axis,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };

        if !axis.match_pending() {
            return false;
        }

        if let Some(note) = axis.tick(self.now_ms()) {
            if let Err(err) = self.notify_tx.try_send(note) {
                let note = err.into_inner();
                if note.kind.is_terminal() {
                    axis.park(note);
                    self.parked_signal.notify_one();
                } else {
                    axis.record_dropped_notification();
                }
            }
        }
        true
    }

    fn lock(&self, handle: AxisHandle) -> Result<MutexGuard<'_, Axis>, MotionError> {
        let slot = self
            .axes
            .get(handle.0)
            .ok_or_else(|| MotionError::UnknownAxis(format!("#{}", handle.0)))?;
        Ok(slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}
