use log::debug;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use tokio::sync::broadcast;

use crate::channel::ChannelIo;
use crate::config::GpioConfig;
use crate::error::GpioError;
use crate::gpio::{
    Direction, Edge, EdgeCallback, EdgeEvent, EventDispatcher, GpioBackend, Level, PullUpDown,
    Warnings,
};
use crate::pins::{BoardLayout, ChannelId, ChannelIds, NumberingMode};
use crate::registry::EventRegistry;

/// Entry point for applications: resolves identifiers under the active numbering mode and
/// drives the channel and event layers.
pub struct GpioController {
    layout: &'static BoardLayout,
    mode: RwLock<Option<NumberingMode>>,
    warnings: Warnings,
    io: ChannelIo,
    dispatcher: Arc<EventDispatcher>,
    registry: EventRegistry,
    exported: Mutex<FxHashSet<u32>>,
}

impl GpioController {
    pub fn new(config: Arc<GpioConfig>, backend: Arc<dyn GpioBackend>) -> Self {
        let layout = config.board.layout();
        let warnings = Warnings::new(config.warnings);
        let io = ChannelIo::new(backend, warnings.clone());
        let dispatcher = Arc::new(EventDispatcher::new(
            layout.valid_channels,
            config.broadcast_capacity,
            config.event_history_capacity,
        ));
        let registry = EventRegistry::new(
            io.clone(),
            dispatcher.clone(),
            warnings.clone(),
            Duration::from_millis(config.event_wait_timeout_ms),
        );
        debug!("gpio controller for {} ready", layout.name);

        Self {
            layout,
            mode: RwLock::new(config.mode),
            warnings,
            io,
            dispatcher,
            registry,
            exported: Mutex::new(FxHashSet::default()),
        }
    }

    pub fn board(&self) -> &'static BoardLayout {
        self.layout
    }

    pub fn set_numbering_mode(&self, mode: NumberingMode) -> Result<(), GpioError> {
        let mut current = self.mode.write();
        match *current {
            Some(active) if active != mode => Err(GpioError::ModeAlreadySet(active)),
            _ => {
                *current = Some(mode);
                Ok(())
            }
        }
    }

    pub fn numbering_mode(&self) -> Option<NumberingMode> {
        *self.mode.read()
    }

    pub fn set_warnings(&self, enabled: bool) {
        self.warnings.set(enabled);
    }

    pub fn resolve<I: Into<ChannelId>>(&self, id: I) -> Result<u32, GpioError> {
        self.resolve_id(&id.into())
    }

    /// Channels are processed in order and a failure leaves earlier ones configured.
    pub fn setup<I: Into<ChannelIds>>(
        &self,
        ids: I,
        direction: Direction,
        pull_up_down: PullUpDown,
        initial: Level,
    ) -> Result<(), GpioError> {
        let ids: ChannelIds = ids.into();
        for id in &ids {
            let channel = self.resolve_id(id)?;
            if self.io.export(channel)? {
                self.exported.lock().insert(channel);
            }
            self.io.set_direction(channel, direction)?;
            if pull_up_down != PullUpDown::Off {
                debug!("pull {pull_up_down:?} requested for channel {channel} is not applied");
            }
            if direction == Direction::Out {
                self.io.set_value(channel, initial)?;
            }
        }
        Ok(())
    }

    pub fn input<I: Into<ChannelId>>(&self, id: I) -> Result<Level, GpioError> {
        let channel = self.resolve_id(&id.into())?;
        self.io.value(channel)
    }

    pub fn output<I: Into<ChannelId>>(&self, id: I, level: Level) -> Result<(), GpioError> {
        let channel = self.resolve_id(&id.into())?;
        self.io.set_value(channel, level)
    }

    /// Watches each channel for `edge` transitions, calling `callback` from a background
    /// thread with the channel and its new level.
    pub fn add_event_detect<I: Into<ChannelIds>>(
        &self,
        ids: I,
        edge: Edge,
        callback: Option<EdgeCallback>,
        debounce_ms: u64,
    ) -> Result<(), GpioError> {
        if callback.is_none() {
            self.warnings.emit(format_args!(
                "no callback given, ignoring add_event_detect request"
            ));
            return Ok(());
        }
        let ids: ChannelIds = ids.into();
        for id in &ids {
            let channel = self.resolve_id(id)?;
            self.registry
                .register(channel, edge, callback.clone(), debounce_ms)?;
        }
        Ok(())
    }

    pub fn remove_event_detect<I: Into<ChannelIds>>(&self, ids: I) -> Result<(), GpioError> {
        let ids: ChannelIds = ids.into();
        for id in &ids {
            let channel = self.resolve_id(id)?;
            self.registry.unregister(channel)?;
        }
        Ok(())
    }

    pub fn active_channels(&self) -> Vec<u32> {
        self.registry.active_channels()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EdgeEvent> {
        self.dispatcher.subscribe()
    }

    pub fn events<I: Into<ChannelId>>(
        &self,
        id: I,
        limit: Option<usize>,
    ) -> Result<Vec<EdgeEvent>, GpioError> {
        let channel = self.resolve_id(&id.into())?;
        Ok(self.dispatcher.history(channel, limit))
    }

    pub fn last_event<I: Into<ChannelId>>(&self, id: I) -> Result<Option<EdgeEvent>, GpioError> {
        let channel = self.resolve_id(&id.into())?;
        Ok(self.dispatcher.last(channel))
    }

    /// Stops all watchers and unexports the channels this controller exported.
    pub fn cleanup(&self) -> Result<(), GpioError> {
        self.registry.clear();

        let channels: Vec<u32> = self.exported.lock().drain().collect();
        let mut first_err = None;
        for channel in channels {
            if let Err(e) = self.io.unexport(channel) {
                debug!("unexport channel {channel} failed: {e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn resolve_id(&self, id: &ChannelId) -> Result<u32, GpioError> {
        let mode = self.numbering_mode().ok_or(GpioError::ModeNotSet)?;
        self.layout.resolve(mode, id)
    }
}
