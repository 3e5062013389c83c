use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::GpioError;
use crate::gpio::{
    Attribute, Direction, Edge, EdgeSource, GpioBackend, Interrupt, Level, Wakeup,
};

/// In-memory stand-in for the pseudo-file interface.
///
/// Exporting a channel creates it as an input at level 0 with no edge detection, like the
/// kernel does. [`MockGpioBackend::drive_input`] plays the part of an external signal.
#[derive(Default)]
pub struct MockGpioBackend {
    pins: RwLock<FxHashMap<u32, Arc<MockPin>>>, // keyed by channel
    rejected: Mutex<FxHashSet<u32>>,
    frozen: Mutex<FxHashSet<(u32, Attribute)>>,
    export_requests: AtomicUsize,
}

#[derive(Default)]
struct MockPin {
    state: Mutex<MockPinState>,
    changed: Condvar,
}

struct MockPinState {
    direction: Direction,
    value: Level,
    edge: Edge,
    notifications: u64,
    value_writes: usize,
    open_sources: usize,
}

impl Default for MockPinState {
    fn default() -> Self {
        Self {
            direction: Direction::In,
            value: Level::Low,
            edge: Edge::None,
            notifications: 0,
            value_writes: 0,
            open_sources: 0,
        }
    }
}

impl MockGpioBackend {
    /// Makes later export requests for `channel` silently do nothing.
    pub fn reject_export(&self, channel: u32) {
        self.rejected.lock().insert(channel);
    }

    /// Makes writes to `attr` of `channel` succeed without changing the stored value.
    pub fn freeze_attribute(&self, channel: u32, attr: Attribute) {
        self.frozen.lock().insert((channel, attr));
    }

    /// Sets the level seen on `channel` and raises a notification when the transition matches
    /// the channel's edge setting.
    pub fn drive_input(&self, channel: u32, level: Level) -> Result<(), GpioError> {
        let pin = self.pin(channel)?;
        let mut state = pin.state.lock();
        let previous = state.value;
        state.value = level;
        if state.edge.fires_on(previous, level) {
            state.notifications += 1;
            pin.changed.notify_all();
        }
        Ok(())
    }

    pub fn export_requests(&self) -> usize {
        self.export_requests.load(Ordering::SeqCst)
    }

    pub fn value_writes(&self, channel: u32) -> usize {
        self.pins
            .read()
            .get(&channel)
            .map(|pin| pin.state.lock().value_writes)
            .unwrap_or(0)
    }

    pub fn open_edge_sources(&self, channel: u32) -> usize {
        self.pins
            .read()
            .get(&channel)
            .map(|pin| pin.state.lock().open_sources)
            .unwrap_or(0)
    }

    fn pin(&self, channel: u32) -> Result<Arc<MockPin>, GpioError> {
        self.pins
            .read()
            .get(&channel)
            .cloned()
            .ok_or(GpioError::NotExported(channel))
    }
}

impl GpioBackend for MockGpioBackend {
    fn is_exported(&self, channel: u32) -> bool {
        self.pins.read().contains_key(&channel)
    }

    fn export(&self, channel: u32) -> Result<(), GpioError> {
        self.export_requests.fetch_add(1, Ordering::SeqCst);
        if self.rejected.lock().contains(&channel) {
            return Ok(());
        }
        self.pins.write().entry(channel).or_default();
        Ok(())
    }

    fn unexport(&self, channel: u32) -> Result<(), GpioError> {
        self.pins.write().remove(&channel);
        Ok(())
    }

    fn has_attribute(&self, channel: u32, _attr: Attribute) -> bool {
        self.is_exported(channel)
    }

    fn read_attribute(&self, channel: u32, attr: Attribute) -> Result<String, GpioError> {
        let pin = self.pin(channel)?;
        let state = pin.state.lock();
        let text = match attr {
            Attribute::Direction => state.direction.as_str(),
            Attribute::Value => state.value.as_str(),
            Attribute::Edge => state.edge.as_str(),
        };
        Ok(format!("{text}\n"))
    }

    fn write_attribute(
        &self,
        channel: u32,
        attr: Attribute,
        value: &str,
    ) -> Result<(), GpioError> {
        let pin = self.pin(channel)?;
        let frozen = self.frozen.lock().contains(&(channel, attr));
        let mut state = pin.state.lock();

        match attr {
            Attribute::Direction => {
                let direction = value.parse()?;
                if !frozen {
                    state.direction = direction;
                }
            }
            Attribute::Value => {
                let level = value.parse()?;
                state.value_writes += 1;
                if !frozen {
                    state.value = level;
                }
            }
            Attribute::Edge => {
                let edge = value.parse()?;
                if !frozen {
                    state.edge = edge;
                }
            }
        }
        Ok(())
    }

    fn open_edge_source(&self, channel: u32) -> Result<Box<dyn EdgeSource>, GpioError> {
        let pin = self.pin(channel)?;
        let seen = {
            let mut state = pin.state.lock();
            state.open_sources += 1;
            state.notifications
        };
        let interrupter = Arc::new(MockInterrupter {
            pin: pin.clone(),
            interrupted: AtomicBool::new(false),
        });

        Ok(Box::new(MockEdgeSource {
            pin,
            seen,
            interrupter,
        }))
    }
}

struct MockInterrupter {
    pin: Arc<MockPin>,
    interrupted: AtomicBool,
}

impl Interrupt for MockInterrupter {
    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        // take the lock so a waiter between its check and its sleep cannot miss the wakeup
        let _state = self.pin.state.lock();
        self.pin.changed.notify_all();
    }
}

struct MockEdgeSource {
    pin: Arc<MockPin>,
    seen: u64,
    interrupter: Arc<MockInterrupter>,
}

impl EdgeSource for MockEdgeSource {
    fn read_level(&mut self) -> Result<Level, GpioError> {
        Ok(self.pin.state.lock().value)
    }

    fn wait(&mut self, timeout: Duration) -> Result<Wakeup, GpioError> {
        let seen = self.seen;
        let interrupted = &self.interrupter.interrupted;
        let mut state = self.pin.state.lock();
        self.pin.changed.wait_while_for(
            &mut state,
            |s| s.notifications == seen && !interrupted.load(Ordering::SeqCst),
            timeout,
        );

        if interrupted.load(Ordering::SeqCst) {
            return Ok(Wakeup::Interrupted);
        }
        if state.notifications != seen {
            self.seen = state.notifications;
            return Ok(Wakeup::Edge);
        }
        Ok(Wakeup::Timeout)
    }

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        self.interrupter.clone()
    }
}

impl Drop for MockEdgeSource {
    fn drop(&mut self) {
        self.pin.state.lock().open_sources -= 1;
    }
}
