mod backend;
mod channel;
mod config;
mod controller;
mod error;
mod gpio;
mod pins;
mod registry;
mod watcher;

pub use channel::ChannelIo;
pub use config::{DEFAULT_EVENT_WAIT_TIMEOUT_MS, DEFAULT_SYSFS_ROOT, GpioConfig};
pub use controller::GpioController;
pub use error::{ErrorKind, GpioError};
pub use gpio::{
    Attribute, Direction, Edge, EdgeCallback, EdgeEvent, EdgeSource, EventDispatcher,
    GpioBackend, Interrupt, Level, PullUpDown, Wakeup, Warnings,
};
pub use pins::{Board, BoardLayout, ChannelId, ChannelIds, NumberingMode};
pub use registry::EventRegistry;
pub use watcher::{Debouncer, EventWatcher, WatcherContext, WatcherState};

pub use backend::MockGpioBackend;
#[cfg(feature = "hardware-gpio")]
pub use backend::SysfsBackend;
