use log::debug;
use std::mem;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockUpgradableReadGuard};
use rustc_hash::FxHashMap;

use crate::channel::ChannelIo;
use crate::error::GpioError;
use crate::gpio::{Edge, EdgeCallback, EventDispatcher, Warnings};
use crate::watcher::{EventWatcher, WatcherContext, WatcherState};

#[derive(Default)]
enum SlotState {
    #[default]
    Idle,
    Active(EventWatcher),
    // removed from inside its own callback: cancelled but not yet joined
    Retiring(EventWatcher),
    // being joined by some thread with the slot unlocked
    Stopping(ThreadId),
}

#[derive(Default)]
struct WatcherSlot {
    state: Mutex<SlotState>,
    stopped: Condvar,
}

impl WatcherSlot {
    fn is_active(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Active(_))
    }
}

/// Active watchers keyed by canonical channel.
///
/// Each channel has its own slot, locked for a whole register or unregister sequence so two
/// sequences on one channel never interleave. The slot lock is released while a watcher thread
/// is joined, so callbacks can always query or modify the registry. Slots are never removed.
pub struct EventRegistry {
    io: ChannelIo,
    dispatcher: Arc<EventDispatcher>,
    warnings: Warnings,
    wait_timeout: Duration,
    slots: RwLock<FxHashMap<u32, Arc<WatcherSlot>>>,
}

impl EventRegistry {
    pub fn new(
        io: ChannelIo,
        dispatcher: Arc<EventDispatcher>,
        warnings: Warnings,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            io,
            dispatcher,
            warnings,
            wait_timeout,
            slots: RwLock::new(FxHashMap::default()),
        }
    }

    /// Starts watching `channel`, replacing any existing watcher after it has fully stopped.
    pub fn register(
        &self,
        channel: u32,
        edge: Edge,
        callback: Option<EdgeCallback>,
        debounce_ms: u64,
    ) -> Result<(), GpioError> {
        let Some(callback) = callback else {
            self.warnings.emit(format_args!(
                "no callback given for channel {channel}, ignoring event detection request"
            ));
            return Ok(());
        };

        let slot = self.slot(channel);
        let mut state = slot.state.lock();
        loop {
            match &*state {
                SlotState::Idle => break,
                SlotState::Stopping(id) if *id == thread::current().id() => {
                    return Err(GpioError::WatcherBusy(channel));
                }
                SlotState::Stopping(_) => slot.stopped.wait(&mut state),
                SlotState::Active(w) | SlotState::Retiring(w) if w.is_current_thread() => {
                    return Err(GpioError::WatcherBusy(channel));
                }
                SlotState::Active(_) => {
                    self.warnings.emit(format_args!(
                        "event detection already registered for channel {channel}, replacing it"
                    ));
                    retire(&slot, &mut state);
                    debug!("stopped previous watcher for channel {channel}");
                }
                SlotState::Retiring(_) => retire(&slot, &mut state),
            }
        }

        if edge == Edge::None {
            return Err(GpioError::InvalidEdge(format!(
                "{edge} cannot be used for event detection, use rising, falling or both"
            )));
        }
        self.io.set_edge(channel, edge)?;

        let source = self.io.open_edge_source(channel)?;
        let watcher = EventWatcher::start(
            WatcherContext {
                channel,
                edge,
                debounce: Duration::from_millis(debounce_ms),
                wait_timeout: self.wait_timeout,
                callback,
                dispatcher: self.dispatcher.clone(),
            },
            source,
        )?;
        *state = SlotState::Active(watcher);
        Ok(())
    }

    /// Stops the watcher on `channel`. Called from that watcher's own callback, the thread is
    /// cancelled and left to exit on its own.
    pub fn unregister(&self, channel: u32) -> Result<(), GpioError> {
        let slot = self
            .slots
            .read()
            .get(&channel)
            .cloned()
            .ok_or(GpioError::NoSuchWatcher(channel))?;

        let mut state = slot.state.lock();
        match &*state {
            SlotState::Active(w) if w.is_current_thread() => {
                w.cancel();
                if let SlotState::Active(w) = mem::take(&mut *state) {
                    *state = SlotState::Retiring(w);
                }
            }
            SlotState::Active(_) => retire(&slot, &mut state),
            _ => return Err(GpioError::NoSuchWatcher(channel)),
        }
        debug!("removed event detection for channel {channel}");
        Ok(())
    }

    pub fn is_registered(&self, channel: u32) -> bool {
        let slot = self.slots.read().get(&channel).cloned();
        slot.is_some_and(|slot| slot.is_active())
    }

    pub fn watcher_state(&self, channel: u32) -> Option<WatcherState> {
        let slot = self.slots.read().get(&channel).cloned()?;
        let state = slot.state.lock();
        match &*state {
            SlotState::Active(w) | SlotState::Retiring(w) => Some(w.state()),
            _ => None,
        }
    }

    pub fn active_channels(&self) -> Vec<u32> {
        let slots: Vec<(u32, Arc<WatcherSlot>)> = self
            .slots
            .read()
            .iter()
            .map(|(ch, slot)| (*ch, slot.clone()))
            .collect();
        let mut channels: Vec<u32> = slots
            .into_iter()
            .filter(|(_, slot)| slot.is_active())
            .map(|(ch, _)| ch)
            .collect();
        channels.sort_unstable();
        channels
    }

    pub fn clear(&self) {
        let slots: Vec<(u32, Arc<WatcherSlot>)> = self
            .slots
            .read()
            .iter()
            .map(|(ch, slot)| (*ch, slot.clone()))
            .collect();
        for (channel, slot) in slots {
            let mut state = slot.state.lock();
            loop {
                match &*state {
                    SlotState::Idle => break,
                    SlotState::Stopping(id) if *id == thread::current().id() => break,
                    SlotState::Stopping(_) => slot.stopped.wait(&mut state),
                    SlotState::Active(w) | SlotState::Retiring(w) if w.is_current_thread() => {
                        w.cancel();
                        if let SlotState::Active(w) | SlotState::Retiring(w) =
                            mem::take(&mut *state)
                        {
                            *state = SlotState::Retiring(w);
                        }
                        break;
                    }
                    SlotState::Active(_) | SlotState::Retiring(_) => {
                        retire(&slot, &mut state);
                        debug!("removed event detection for channel {channel}");
                    }
                }
            }
        }
    }

    fn slot(&self, channel: u32) -> Arc<WatcherSlot> {
        let slots = self.slots.upgradable_read();
        if let Some(slot) = slots.get(&channel) {
            return slot.clone();
        }
        let mut slots = RwLockUpgradableReadGuard::upgrade(slots);
        slots.entry(channel).or_default().clone()
    }
}

fn retire(slot: &WatcherSlot, state: &mut MutexGuard<'_, SlotState>) {
    let watcher = match mem::take(&mut **state) {
        SlotState::Active(w) | SlotState::Retiring(w) => w,
        other => {
            **state = other;
            return;
        }
    };
    **state = SlotState::Stopping(watcher.thread_id());
    MutexGuard::unlocked(state, || watcher.stop());
    **state = SlotState::Idle;
    slot.stopped.notify_all();
}

impl Drop for EventRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}
