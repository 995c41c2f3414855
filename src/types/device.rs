//! Device ids and device classes

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{GseError, Result};

/// Serial baud rate used by imager boards.
pub const IMAGER_BAUD: u32 = 230_400;

/// Serial baud rate used by spectrometer boards.
pub const SPECTROMETER_BAUD: u32 = 38_400;

/// Number of imager boards on the payload (ids 0xC0..=0xC6).
pub const IMAGER_COUNT: u8 = 7;

/// Number of spectrometer boards on the payload (ids 0xD0..=0xD2).
pub const SPECTROMETER_COUNT: u8 = 3;

/// One-byte id of the instrument or subsystem a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DeviceId(pub u8);

/// Class of a device, derived from its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// Top nibble 0xC.
    Imager,
    /// Top nibble 0xD.
    Spectrometer,
    /// Flight computer subsystem.
    System(SystemKind),
    Unknown,
}

/// Flight computer subsystems that emit their own packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemKind {
    /// 0x60: PPS and GPS.
    PpsGps,
    /// 0xA0: housekeeping and statistics.
    Housekeeping,
    /// 0xB0: magnetometer.
    Magnetometer,
}

impl DeviceId {
    pub const PPS_GPS: DeviceId = DeviceId(0x60);
    pub const HOUSEKEEPING: DeviceId = DeviceId(0xA0);
    pub const MAGNETOMETER: DeviceId = DeviceId(0xB0);

    /// Imager id for board `n`.
    pub const fn imager(n: u8) -> Self {
        DeviceId(0xC0 | (n & 0x0F))
    }

    /// Spectrometer id for board `n`.
    pub const fn spectrometer(n: u8) -> Self {
        DeviceId(0xD0 | (n & 0x0F))
    }

    /// Raw id byte.
    pub fn value(self) -> u8 {
        self.0
    }

    /// Board number within the class (low nibble).
    pub fn board(self) -> u8 {
        self.0 & 0x0F
    }

    /// Classify by the top nibble, or by exact id for system packets.
    pub fn class(self) -> DeviceClass {
        match self.0 {
            0x60 => DeviceClass::System(SystemKind::PpsGps),
            0xA0 => DeviceClass::System(SystemKind::Housekeeping),
            0xB0 => DeviceClass::System(SystemKind::Magnetometer),
            id if id & 0xF0 == 0xC0 => DeviceClass::Imager,
            id if id & 0xF0 == 0xD0 => DeviceClass::Spectrometer,
            _ => DeviceClass::Unknown,
        }
    }

    /// Serial baud rate for relaying this device, if it is an instrument.
    pub fn baud_rate(self) -> Option<u32> {
        match self.class() {
            DeviceClass::Imager => Some(IMAGER_BAUD),
            DeviceClass::Spectrometer => Some(SPECTROMETER_BAUD),
            _ => None,
        }
    }

    /// Whether this id names one of the flown imager or spectrometer boards.
    pub fn is_loggable(self) -> bool {
        match self.class() {
            DeviceClass::Imager => self.board() < IMAGER_COUNT,
            DeviceClass::Spectrometer => self.board() < SPECTROMETER_COUNT,
            _ => false,
        }
    }

    /// Every imager and spectrometer id that can be logged, imagers first.
    pub fn loggable() -> impl Iterator<Item = DeviceId> {
        (0..IMAGER_COUNT)
            .map(DeviceId::imager)
            .chain((0..SPECTROMETER_COUNT).map(DeviceId::spectrometer))
    }

    /// Short stem used for per-device file and alias names, e.g. `imag_0`.
    pub fn file_stem(self) -> String {
        match self.class() {
            DeviceClass::Imager => format!("imag_{}", self.board()),
            DeviceClass::Spectrometer => format!("spec_{}", self.board()),
            _ => format!("dev_{:02x}", self.0),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

impl From<u8> for DeviceId {
    fn from(value: u8) -> Self {
        DeviceId(value)
    }
}

impl FromStr for DeviceId {
    type Err = GseError;

    /// Parse a decimal or `0x`-prefixed hexadecimal id in 0..=255.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let parsed = match trimmed.get(..2) {
            Some(prefix) if prefix.eq_ignore_ascii_case("0x") => {
                u8::from_str_radix(&trimmed[2..], 16)
            }
            _ => trimmed.parse::<u8>(),
        };
        parsed.map(DeviceId).map_err(|e| {
            GseError::parse_error("device id", format!("{s:?} is not a valid byte: {e}"))
        })
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => u8::try_from(n)
                .map(DeviceId)
                .map_err(|_| serde::de::Error::custom(format!("device id {n} exceeds 255"))),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
