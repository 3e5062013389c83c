use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::warn;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::GpioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = GpioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(GpioError::InvalidValue(format!("unknown direction {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low = 0,
    High = 1,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Low => "0",
            Level::High => "1",
        }
    }

    pub fn toggled(&self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = GpioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => Err(GpioError::InvalidValue(format!("unknown level {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

impl Edge {
    pub fn as_str(&self) -> &'static str {
        match self {
            Edge::None => "none",
            Edge::Rising => "rising",
            Edge::Falling => "falling",
            Edge::Both => "both",
        }
    }

    pub fn fires_on(&self, from: Level, to: Level) -> bool {
        match (self, from, to) {
            (Edge::Rising, Level::Low, Level::High) => true,
            (Edge::Falling, Level::High, Level::Low) => true,
            (Edge::Both, a, b) => a != b,
            _ => false,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Edge {
    type Err = GpioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" => Ok(Edge::None),
            "rising" => Ok(Edge::Rising),
            "falling" => Ok(Edge::Falling),
            "both" => Ok(Edge::Both),
            other => Err(GpioError::InvalidEdge(other.to_string())),
        }
    }
}

/// Accepted by `setup` but never applied. The pseudo-file interface has no bias control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PullUpDown {
    #[default]
    Off,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Direction,
    Value,
    Edge,
}

impl Attribute {
    pub fn file_name(&self) -> &'static str {
        match self {
            Attribute::Direction => "direction",
            Attribute::Value => "value",
            Attribute::Edge => "edge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    Edge,
    Timeout,
    Interrupted,
}

pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// An opened value interface with interest in level-change notifications registered.
pub trait EdgeSource: Send {
    /// Reads the level from the start of the value file, clearing any pending notification.
    fn read_level(&mut self) -> Result<Level, GpioError>;
    fn wait(&mut self, timeout: Duration) -> Result<Wakeup, GpioError>;
    fn interrupter(&self) -> Arc<dyn Interrupt>;
}

/// Raw access to the pseudo-file interface. Implementations perform no validation beyond what
/// the underlying files do themselves.
pub trait GpioBackend: Send + Sync {
    fn is_exported(&self, channel: u32) -> bool;
    fn export(&self, channel: u32) -> Result<(), GpioError>;
    fn unexport(&self, channel: u32) -> Result<(), GpioError>;
    fn has_attribute(&self, channel: u32, attr: Attribute) -> bool;
    fn read_attribute(&self, channel: u32, attr: Attribute) -> Result<String, GpioError>;
    fn write_attribute(&self, channel: u32, attr: Attribute, value: &str)
    -> Result<(), GpioError>;
    fn open_edge_source(&self, channel: u32) -> Result<Box<dyn EdgeSource>, GpioError>;
}

/// Process-wide switch for the warnings `set_warnings` controls.
#[derive(Debug, Clone, Default)]
pub struct Warnings(Arc<AtomicBool>);

impl Warnings {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }

    pub fn enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn emit(&self, msg: fmt::Arguments<'_>) {
        if self.enabled() {
            warn!("{msg}");
        }
    }
}

pub type EdgeCallback = Arc<dyn Fn(u32, Level) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeEvent {
    pub channel: u32,
    pub level: Level,
    pub timestamp_ms: u64,
}

impl EdgeEvent {
    pub fn now(channel: u32, level: Level) -> Self {
        Self {
            channel,
            level,
            timestamp_ms: epoch_millis(),
        }
    }
}

/// Publishes accepted transitions to subscribers and keeps a bounded history per channel.
pub struct EventDispatcher {
    event_tx: broadcast::Sender<EdgeEvent>,
    event_history: FxHashMap<u32, RwLock<VecDeque<EdgeEvent>>>,
    event_history_capacity: usize,
}

impl EventDispatcher {
    pub fn new(
        channels: &[u32],
        broadcast_capacity: usize,
        event_history_capacity: usize,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(broadcast_capacity.max(1));
        let event_history = channels
            .iter()
            .map(|ch| (*ch, RwLock::new(VecDeque::new())))
            .collect();

        Self {
            event_tx,
            event_history,
            event_history_capacity,
        }
    }

    pub fn dispatch(&self, event: EdgeEvent) {
        if let Some(history_lock) = self.event_history.get(&event.channel)
            && self.event_history_capacity > 0
        {
            let mut history = history_lock.write();
            while history.len() >= self.event_history_capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EdgeEvent> {
        self.event_tx.subscribe()
    }

    /// Most recent events for `channel`, oldest first, at most `limit` of them.
    pub fn history(&self, channel: u32, limit: Option<usize>) -> Vec<EdgeEvent> {
        self.event_history
            .get(&channel)
            .map(|d| {
                let history = d.read();
                let skip = limit
                    .map(|lim| history.len().saturating_sub(lim))
                    .unwrap_or(0);
                history.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn last(&self, channel: u32) -> Option<EdgeEvent> {
        self.event_history
            .get(&channel)
            .and_then(|d| d.read().back().cloned())
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
