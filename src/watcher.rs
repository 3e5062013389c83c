use log::{debug, error, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crate::error::GpioError;
use crate::gpio::{
    Edge, EdgeCallback, EdgeEvent, EdgeSource, EventDispatcher, Interrupt, Level, Wakeup,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WatcherState {
    Starting = 0,
    Monitoring = 1,
    Stopping = 2,
    Stopped = 3,
}

impl WatcherState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WatcherState::Starting,
            1 => WatcherState::Monitoring,
            2 => WatcherState::Stopping,
            _ => WatcherState::Stopped,
        }
    }
}

/// Decides which observed levels become callbacks.
///
/// A level is accepted when it differs from the reference level and at least `window` has
/// passed since the last accepted transition (or since the watcher started). Anything else is
/// dropped without touching the reference level or timestamp.
///
/// Single-edge watchers only ever see one side of a transition, so their reference level is
/// pinned to the level before that edge: low for rising, high for falling.
#[derive(Debug, Clone)]
pub struct Debouncer {
    edge: Edge,
    window: Duration,
    last_level: Level,
    last_accepted: Instant,
}

impl Debouncer {
    pub fn new(edge: Edge, window: Duration, baseline: Level, now: Instant) -> Self {
        Self {
            edge,
            window,
            last_level: reference_level(edge, baseline),
            last_accepted: now,
        }
    }

    pub fn observe(&mut self, level: Level, now: Instant) -> Option<Level> {
        if level == self.last_level {
            return None;
        }
        if now.saturating_duration_since(self.last_accepted) < self.window {
            return None;
        }
        self.last_accepted = now;
        self.last_level = reference_level(self.edge, level);
        Some(level)
    }
}

fn reference_level(edge: Edge, observed: Level) -> Level {
    match edge {
        Edge::Rising => Level::Low,
        Edge::Falling => Level::High,
        Edge::Both | Edge::None => observed,
    }
}

pub struct WatcherContext {
    pub channel: u32,
    pub edge: Edge,
    pub debounce: Duration,
    pub wait_timeout: Duration,
    pub callback: EdgeCallback,
    pub dispatcher: Arc<EventDispatcher>,
}

/// A background thread monitoring one channel. Dropping it cancels the thread and waits for it
/// to exit.
pub struct EventWatcher {
    channel: u32,
    thread: ThreadId,
    cancel: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    interrupter: Arc<dyn Interrupt>,
    handle: Option<JoinHandle<()>>,
}

impl EventWatcher {
    pub fn start(ctx: WatcherContext, mut source: Box<dyn EdgeSource>) -> Result<Self, GpioError> {
        let state = Arc::new(AtomicU8::new(WatcherState::Starting as u8));
        let baseline = source.read_level()?;
        let debouncer = Debouncer::new(ctx.edge, ctx.debounce, baseline, Instant::now());
        let interrupter = source.interrupter();
        let cancel = Arc::new(AtomicBool::new(false));
        let channel = ctx.channel;

        let monitor = Monitor {
            ctx,
            source,
            debouncer,
            cancel: cancel.clone(),
            state: state.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("gpio-watch-{channel}"))
            .spawn(move || monitor.run())
            .map_err(|e| GpioError::Gpio(format!("spawn watcher for channel {channel}: {e}")))?;

        Ok(Self {
            channel,
            thread: handle.thread().id(),
            cancel,
            state,
            interrupter,
            handle: Some(handle),
        })
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn state(&self) -> WatcherState {
        WatcherState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    pub fn is_current_thread(&self) -> bool {
        self.thread == thread::current().id()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
        self.interrupter.interrupt();
    }

    /// Cancels the thread and blocks until it has exited.
    pub fn stop(self) {
        drop(self);
    }

    fn shutdown(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if self.is_current_thread() {
                return;
            }
            if handle.join().is_err() {
                warn!("watcher for channel {} panicked", self.channel);
            }
        }
    }
}

impl Drop for EventWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Monitor {
    ctx: WatcherContext,
    source: Box<dyn EdgeSource>,
    debouncer: Debouncer,
    cancel: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

impl Monitor {
    fn run(self) {
        let Monitor {
            ctx,
            mut source,
            mut debouncer,
            cancel,
            state,
        } = self;
        let channel = ctx.channel;

        state.store(WatcherState::Monitoring as u8, Ordering::Release);
        debug!("watching channel {channel} for {} edges", ctx.edge);

        while !cancel.load(Ordering::Acquire) {
            match source.wait(ctx.wait_timeout) {
                Ok(Wakeup::Edge) => {}
                Ok(Wakeup::Timeout) | Ok(Wakeup::Interrupted) => continue,
                Err(e) => {
                    error!("edge wait failed on channel {channel}, stopping watcher: {e}");
                    break;
                }
            }
            if cancel.load(Ordering::Acquire) {
                break;
            }

            let level = match source.read_level() {
                Ok(level) => level,
                Err(e) => {
                    warn!("read level error for channel {channel}: {e}");
                    continue;
                }
            };
            if let Some(level) = debouncer.observe(level, Instant::now()) {
                let callback = &ctx.callback;
                if panic::catch_unwind(AssertUnwindSafe(|| callback(channel, level))).is_err() {
                    error!("callback for channel {channel} panicked");
                }
                ctx.dispatcher.dispatch(EdgeEvent::now(channel, level));
            }
        }

        state.store(WatcherState::Stopping as u8, Ordering::Release);
        drop(source);
        debug!("stopped watching channel {channel}");
        state.store(WatcherState::Stopped as u8, Ordering::Release);
    }
}
