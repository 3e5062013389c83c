use log::warn;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::config::DEFAULT_SYSFS_ROOT;
use crate::error::GpioError;
use crate::gpio::{Attribute, EdgeSource, GpioBackend, Interrupt, Level, Wakeup};

const SYSFS_VALUE_TOKEN: Token = Token(0);
const SYSFS_WAKE_TOKEN: Token = Token(1);
const SYSFS_EVENT_CAPACITY: usize = 4;

/// The legacy `/sys/class/gpio` interface.
pub struct SysfsBackend {
    root: PathBuf,
}

impl SysfsBackend {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn channel_dir(&self, channel: u32) -> PathBuf {
        self.root.join(format!("gpio{channel}"))
    }

    fn attribute_path(&self, channel: u32, attr: Attribute) -> PathBuf {
        self.channel_dir(channel).join(attr.file_name())
    }

    fn write_control(&self, file: &str, channel: u32) -> Result<(), GpioError> {
        let path = self.root.join(file);
        write_text(&path, &channel.to_string())
    }
}

impl Default for SysfsBackend {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl GpioBackend for SysfsBackend {
    fn is_exported(&self, channel: u32) -> bool {
        self.channel_dir(channel).exists()
    }

    fn export(&self, channel: u32) -> Result<(), GpioError> {
        self.write_control("export", channel)
    }

    fn unexport(&self, channel: u32) -> Result<(), GpioError> {
        self.write_control("unexport", channel)
    }

    fn has_attribute(&self, channel: u32, attr: Attribute) -> bool {
        self.attribute_path(channel, attr).exists()
    }

    fn read_attribute(&self, channel: u32, attr: Attribute) -> Result<String, GpioError> {
        let path = self.attribute_path(channel, attr);
        std::fs::read_to_string(&path)
            .map_err(|e| GpioError::Gpio(format!("read {}: {e}", path.display())))
    }

    fn write_attribute(
        &self,
        channel: u32,
        attr: Attribute,
        value: &str,
    ) -> Result<(), GpioError> {
        write_text(&self.attribute_path(channel, attr), value)
    }

    fn open_edge_source(&self, channel: u32) -> Result<Box<dyn EdgeSource>, GpioError> {
        let path = self.attribute_path(channel, Attribute::Value);
        Ok(Box::new(SysfsEdgeSource::open(channel, &path)?))
    }
}

fn write_text(path: &Path, value: &str) -> Result<(), GpioError> {
    // sysfs attributes exist already and must not be created or truncated
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| GpioError::Gpio(format!("open {}: {e}", path.display())))?;
    file.write_all(value.as_bytes())
        .map_err(|e| GpioError::Gpio(format!("write {}: {e}", path.display())))
}

struct WakerInterrupt {
    channel: u32,
    waker: Waker,
}

impl Interrupt for WakerInterrupt {
    fn interrupt(&self) {
        if let Err(e) = self.waker.wake() {
            warn!("wake watcher for channel {}: {e}", self.channel);
        }
    }
}

/// An open `value` file polled for `POLLPRI`, which sysfs raises whenever the configured edge
/// is seen.
struct SysfsEdgeSource {
    channel: u32,
    file: File,
    poll: Poll,
    events: Events,
    interrupter: Arc<WakerInterrupt>,
}

impl SysfsEdgeSource {
    fn open(channel: u32, path: &Path) -> Result<Self, GpioError> {
        let file = File::open(path)
            .map_err(|e| GpioError::Gpio(format!("open {}: {e}", path.display())))?;
        let mut source = Self::with_file(channel, file)?;
        // the first read acknowledges the notification pending since export
        source.read_level()?;
        Ok(source)
    }

    fn with_file(channel: u32, file: File) -> Result<Self, GpioError> {
        let poll = Poll::new()
            .map_err(|e| GpioError::Gpio(format!("create poll for channel {channel}: {e}")))?;
        poll.registry()
            .register(
                &mut SourceFd(&file.as_raw_fd()),
                SYSFS_VALUE_TOKEN,
                Interest::PRIORITY,
            )
            .map_err(|e| GpioError::Gpio(format!("register value of channel {channel}: {e}")))?;
        let waker = Waker::new(poll.registry(), SYSFS_WAKE_TOKEN)
            .map_err(|e| GpioError::Gpio(format!("create waker for channel {channel}: {e}")))?;

        Ok(Self {
            channel,
            file,
            poll,
            events: Events::with_capacity(SYSFS_EVENT_CAPACITY),
            interrupter: Arc::new(WakerInterrupt { channel, waker }),
        })
    }
}

impl EdgeSource for SysfsEdgeSource {
    fn read_level(&mut self) -> Result<Level, GpioError> {
        let mut text = String::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_string(&mut text))
            .map_err(|e| GpioError::Gpio(format!("read value of channel {}: {e}", self.channel)))?;
        text.parse()
    }

    fn wait(&mut self, timeout: Duration) -> Result<Wakeup, GpioError> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(Wakeup::Timeout),
            Err(e) => {
                return Err(GpioError::Gpio(format!(
                    "poll value of channel {}: {e}",
                    self.channel
                )));
            }
        }

        let mut wakeup = Wakeup::Timeout;
        for event in self.events.iter() {
            match event.token() {
                SYSFS_WAKE_TOKEN => return Ok(Wakeup::Interrupted),
                SYSFS_VALUE_TOKEN if event.is_priority() || event.is_error() => {
                    wakeup = Wakeup::Edge;
                }
                _ => {}
            }
        }
        Ok(wakeup)
    }

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        self.interrupter.clone()
    }
}
