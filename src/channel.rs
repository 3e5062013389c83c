use std::sync::Arc;

use log::debug;

use crate::error::GpioError;
use crate::gpio::{Attribute, Direction, Edge, EdgeSource, GpioBackend, Level, Warnings};

/// Checked attribute operations on canonical channels.
#[derive(Clone)]
pub struct ChannelIo {
    backend: Arc<dyn GpioBackend>,
    warnings: Warnings,
}

impl ChannelIo {
    pub fn new(backend: Arc<dyn GpioBackend>, warnings: Warnings) -> Self {
        Self { backend, warnings }
    }

    /// Exposes `channel` through the pseudo-file interface. Returns `true` when this call
    /// performed the export and `false` when the channel was already exported.
    pub fn export(&self, channel: u32) -> Result<bool, GpioError> {
        if self.backend.is_exported(channel) {
            self.warnings
                .emit(format_args!("channel {channel} already exported"));
            return Ok(false);
        }

        self.backend.export(channel)?;
        if !self.backend.is_exported(channel) {
            return Err(GpioError::ExportFailed(channel));
        }
        debug!("exported channel {channel}");
        Ok(true)
    }

    pub fn unexport(&self, channel: u32) -> Result<(), GpioError> {
        if !self.backend.is_exported(channel) {
            return Ok(());
        }
        self.backend.unexport(channel)?;
        debug!("unexported channel {channel}");
        Ok(())
    }

    pub fn direction(&self, channel: u32) -> Result<Direction, GpioError> {
        self.read(channel, Attribute::Direction)?.parse()
    }

    pub fn set_direction(&self, channel: u32, direction: Direction) -> Result<(), GpioError> {
        self.write(channel, Attribute::Direction, direction.as_str())?;

        let actual = self.direction(channel)?;
        if actual != direction {
            return Err(GpioError::DirectionMismatch {
                channel,
                expected: direction,
                actual,
            });
        }
        Ok(())
    }

    pub fn value(&self, channel: u32) -> Result<Level, GpioError> {
        self.read(channel, Attribute::Value)?.parse()
    }

    /// Writes `level` to an output channel. The write is not read back.
    pub fn set_value(&self, channel: u32, level: Level) -> Result<(), GpioError> {
        if self.direction(channel)? != Direction::Out {
            return Err(GpioError::WrongDirection(channel));
        }
        self.write(channel, Attribute::Value, level.as_str())
    }

    pub fn edge(&self, channel: u32) -> Result<Edge, GpioError> {
        self.read(channel, Attribute::Edge)?.parse()
    }

    pub fn set_edge(&self, channel: u32, edge: Edge) -> Result<(), GpioError> {
        self.write(channel, Attribute::Edge, edge.as_str())?;

        let actual = self.edge(channel)?;
        if actual != edge {
            return Err(GpioError::EdgeMismatch {
                channel,
                expected: edge,
                actual,
            });
        }
        Ok(())
    }

    pub fn open_edge_source(&self, channel: u32) -> Result<Box<dyn EdgeSource>, GpioError> {
        self.require(channel, Attribute::Value)?;
        self.backend.open_edge_source(channel)
    }

    fn require(&self, channel: u32, attr: Attribute) -> Result<(), GpioError> {
        if self.backend.has_attribute(channel, attr) {
            Ok(())
        } else {
            Err(GpioError::NotExported(channel))
        }
    }

    fn read(&self, channel: u32, attr: Attribute) -> Result<String, GpioError> {
        self.require(channel, attr)?;
        self.backend.read_attribute(channel, attr)
    }

    fn write(&self, channel: u32, attr: Attribute, value: &str) -> Result<(), GpioError> {
        self.require(channel, attr)?;
        self.backend.write_attribute(channel, attr, value)
    }
}
