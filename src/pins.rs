use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GpioError;

const NATIVE_PREFIX: &str = "GPIO";
const NATIVE_NAME_LEN: usize = 8;
const NATIVE_PADS: [u8; 4] = [b'A', b'B', b'C', b'D'];
const BANK_WIDTH: u32 = 32;
const PAD_WIDTH: u32 = 8;

/// How caller-supplied channel identifiers are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NumberingMode {
    Board,
    Bcm,
    Native,
}

impl fmt::Display for NumberingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NumberingMode::Board => "board",
            NumberingMode::Bcm => "bcm",
            NumberingMode::Native => "native",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Number(u32),
    Name(String),
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Number(n) => write!(f, "{n}"),
            ChannelId::Name(name) => f.write_str(name),
        }
    }
}

impl From<u32> for ChannelId {
    fn from(n: u32) -> Self {
        ChannelId::Number(n)
    }
}

impl From<&str> for ChannelId {
    fn from(name: &str) -> Self {
        ChannelId::Name(name.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(name: String) -> Self {
        ChannelId::Name(name)
    }
}

impl From<&ChannelId> for ChannelId {
    fn from(id: &ChannelId) -> Self {
        id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelIds(Vec<ChannelId>);

impl ChannelIds {
    pub fn iter(&self) -> std::slice::Iter<'_, ChannelId> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a ChannelIds {
    type Item = &'a ChannelId;
    type IntoIter = std::slice::Iter<'a, ChannelId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<ChannelId> for ChannelIds {
    fn from(id: ChannelId) -> Self {
        ChannelIds(vec![id])
    }
}

impl From<u32> for ChannelIds {
    fn from(n: u32) -> Self {
        ChannelIds(vec![n.into()])
    }
}

impl From<&str> for ChannelIds {
    fn from(name: &str) -> Self {
        ChannelIds(vec![name.into()])
    }
}

impl From<String> for ChannelIds {
    fn from(name: String) -> Self {
        ChannelIds(vec![name.into()])
    }
}

impl From<&ChannelId> for ChannelIds {
    fn from(id: &ChannelId) -> Self {
        ChannelIds(vec![id.clone()])
    }
}

impl From<Vec<ChannelId>> for ChannelIds {
    fn from(ids: Vec<ChannelId>) -> Self {
        ChannelIds(ids)
    }
}

impl From<Vec<u32>> for ChannelIds {
    fn from(ids: Vec<u32>) -> Self {
        ChannelIds(ids.into_iter().map(ChannelId::from).collect())
    }
}

impl From<Vec<&str>> for ChannelIds {
    fn from(ids: Vec<&str>) -> Self {
        ChannelIds(ids.into_iter().map(ChannelId::from).collect())
    }
}

impl From<&[u32]> for ChannelIds {
    fn from(ids: &[u32]) -> Self {
        ChannelIds(ids.iter().copied().map(ChannelId::from).collect())
    }
}

impl From<&[&str]> for ChannelIds {
    fn from(ids: &[&str]) -> Self {
        ChannelIds(ids.iter().copied().map(ChannelId::from).collect())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Board {
    #[default]
    Rock64,
}

impl Board {
    pub fn layout(&self) -> &'static BoardLayout {
        match self {
            Board::Rock64 => &ROCK64,
        }
    }
}

/// Static description of one board: which channels are wired and how the header and BCM
/// numbering schemes map onto native pin names.
#[derive(Debug)]
pub struct BoardLayout {
    pub name: &'static str,
    pub gpio_offset: u32,
    pub valid_channels: &'static [u32],
    pub header: &'static [Option<&'static str>],
    pub bcm: &'static [Option<&'static str>],
}

// http://files.pine64.org/doc/rock64/ROCK64_Pi-2%20_and_Pi_P5+_Bus.pdf
static ROCK64: BoardLayout = BoardLayout {
    name: "ROCK64",
    gpio_offset: 0,
    valid_channels: &[
        27, 32, 33, 34, 35, 36, 37, 38, 64, 65, 67, 68, 69, 76, 79, 80, 81, 82, 83, 84, 85, 86, 87,
        88, 89, 96, 97, 98, 100, 101, 102, 103, 104,
    ],
    header: &[
        None,
        None,
        Some("GPIO2_D1"),
        None,
        Some("GPIO2_D0"),
        None,
        None,
        Some("GPIO2_A0"),
        None,
        Some("GPIO2_A1"),
        None, // 10
        Some("GPIO2_A3"),
        None,
        None,
        Some("GPIO3_A4"),
        Some("GPIO3_A5"),
        None,
        Some("GPIO3_A6"),
        Some("GPIO3_A1"),
        None,
        Some("GPIO3_A2"), // 20
        Some("GPIO3_A7"),
        Some("GPIO3_A0"),
        Some("GPIO3_B0"),
        None,
        Some("GPIO2_B4"),
        Some("GPIO2_A4"),
        Some("GPIO2_A5"),
        None,
        None,
        None, // 30
        Some("GPIO1_A6"),
        Some("GPIO1_A0"),
        None,
        Some("GPIO1_A1"),
        Some("GPIO1_A5"),
        Some("GPIO1_A2"),
        Some("GPIO1_A4"),
        None,
        Some("GPIO1_A3"),
    ],
    // BCM 5, 6 and 17 are not connected; 12, 13, 16, 19, 20, 21 and 26 are shared with the
    // microSD card reader.
    bcm: &[
        None,
        None,
        Some("GPIO2_D1"),
        Some("GPIO2_D0"),
        Some("GPIO2_D4"),
        None,
        None,
        Some("GPIO2_B4"),
        Some("GPIO3_B0"),
        Some("GPIO3_A1"),
        Some("GPIO3_A2"), // 10
        None,
        Some("GPIO1_A6"),
        Some("GPIO1_A0"),
        Some("GPIO2_A0"),
        Some("GPIO2_A1"),
        Some("GPIO1_A5"),
        None,
        Some("GPIO2_A3"),
        Some("GPIO1_A1"),
        Some("GPIO1_A4"), // 20
        Some("GPIO1_A3"),
        Some("GPIO3_A4"),
        Some("GPIO3_A5"),
        Some("GPIO3_A6"),
        Some("GPIO3_A7"),
        Some("GPIO1_A2"),
        Some("GPIO0_A0"),
    ],
};

impl BoardLayout {
    pub fn is_valid_channel(&self, channel: u32) -> bool {
        self.valid_channels.contains(&channel)
    }

    /// Numbers are only accepted in board and BCM mode, names only in native mode.
    pub fn resolve(&self, mode: NumberingMode, id: &ChannelId) -> Result<u32, GpioError> {
        match (mode, id) {
            (NumberingMode::Board, ChannelId::Number(position)) => {
                self.encode_native(table_lookup(self.header, *position)?)
            }
            (NumberingMode::Bcm, ChannelId::Number(number)) => {
                self.encode_native(table_lookup(self.bcm, *number)?)
            }
            (NumberingMode::Native, ChannelId::Name(name)) => self.encode_native(name),
            (NumberingMode::Native, ChannelId::Number(n)) => Err(GpioError::InvalidIdentifier(
                format!("got number {n}, but {mode} mode expects a pin name"),
            )),
            (_, ChannelId::Name(name)) => Err(GpioError::InvalidIdentifier(format!(
                "got name {name:?}, but {mode} mode expects a pin number"
            ))),
        }
    }

    /// Encodes a `GPIO<bank>_<pad><index>` name as `offset + bank*32 + pad*8 + index`.
    pub fn encode_native(&self, name: &str) -> Result<u32, GpioError> {
        let malformed = || GpioError::MalformedName(name.to_string());

        let bytes = name.as_bytes();
        if bytes.len() != NATIVE_NAME_LEN || !name.starts_with(NATIVE_PREFIX) {
            return Err(malformed());
        }
        let bank = ascii_digit(bytes[4]).ok_or_else(malformed)?;
        if bytes[5] != b'_' {
            return Err(malformed());
        }
        let pad = NATIVE_PADS
            .iter()
            .position(|p| *p == bytes[6])
            .ok_or_else(malformed)? as u32;
        let index = ascii_digit(bytes[7]).ok_or_else(malformed)?;

        let channel = self.gpio_offset + bank * BANK_WIDTH + pad * PAD_WIDTH + index;
        if !self.is_valid_channel(channel) {
            return Err(GpioError::UnwiredChannel {
                name: name.to_string(),
                channel,
            });
        }
        Ok(channel)
    }

    /// Canonical native name of a wired channel.
    pub fn native_name(&self, channel: u32) -> Option<String> {
        if !self.is_valid_channel(channel) {
            return None;
        }
        let relative = channel.checked_sub(self.gpio_offset)?;
        let bank = relative / BANK_WIDTH;
        let pad = NATIVE_PADS[((relative % BANK_WIDTH) / PAD_WIDTH) as usize] as char;
        let index = relative % PAD_WIDTH;
        Some(format!("{NATIVE_PREFIX}{bank}_{pad}{index}"))
    }
}

fn table_lookup(
    table: &'static [Option<&'static str>],
    position: u32,
) -> Result<&'static str, GpioError> {
    let entry = table.get(position as usize).ok_or(GpioError::OutOfRange {
        position,
        len: table.len(),
    })?;
    entry.ok_or(GpioError::UnmappedPin(position))
}

fn ascii_digit(b: u8) -> Option<u32> {
    (b as char).to_digit(10)
}
