//! Driver seam for the MCC DAQ HAT family.
//!
//! The acquisition code only ever talks to a [`HatDriver`]. The real vendor
//! library lives behind [`crate::libdaqhats::LibDaqHats`], a synthetic device
//! behind [`crate::sim::SimulatedHat`].

use std::fmt;
use std::time::Duration;

/// Board id reported by `hat_list` for an MCC 118.
pub const HAT_ID_MCC_118: u16 = 0x0142;
/// Default scan options.
pub const OPTS_DEFAULT: u32 = 0;
/// Highest analog input channel on an MCC 118.
pub const MAX_CHANNEL: u8 = 7;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{code}")]
    Driver { code: ResultCode },

    #[error("failed to load driver library {path}: {source}")]
    Load {
        path: String,
        source: libloading::Error,
    },

    #[error("driver library is missing symbol {symbol}: {source}")]
    MissingSymbol {
        symbol: &'static str,
        source: libloading::Error,
    },

    #[error("read buffer too small: {capacity} < {requested}")]
    BufferTooSmall { capacity: usize, requested: usize },
}

impl Error {
    pub fn code(code: ResultCode) -> Self {
        Error::Driver { code }
    }
}

/// Result codes returned by the vendor library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    BadParameter,
    Busy,
    Timeout,
    LockTimeout,
    InvalidDevice,
    ResourceUnavailable,
    CommsFailure,
    Undefined,
}

impl ResultCode {
    /// Maps a raw return value, `None` meaning `RESULT_SUCCESS`.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => None,
            -1 => Some(ResultCode::BadParameter),
            -2 => Some(ResultCode::Busy),
            -3 => Some(ResultCode::Timeout),
            -4 => Some(ResultCode::LockTimeout),
            -5 => Some(ResultCode::InvalidDevice),
            -6 => Some(ResultCode::ResourceUnavailable),
            -7 => Some(ResultCode::CommsFailure),
            _ => Some(ResultCode::Undefined),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            ResultCode::BadParameter => -1,
            ResultCode::Busy => -2,
            ResultCode::Timeout => -3,
            ResultCode::LockTimeout => -4,
            ResultCode::InvalidDevice => -5,
            ResultCode::ResourceUnavailable => -6,
            ResultCode::CommsFailure => -7,
            ResultCode::Undefined => -10,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ResultCode::BadParameter => "invalid parameter",
            ResultCode::Busy => "device is busy",
            ResultCode::Timeout => "timed out",
            ResultCode::LockTimeout => "timed out waiting for the resource lock",
            ResultCode::InvalidDevice => "invalid board type",
            ResultCode::ResourceUnavailable => "resource unavailable",
            ResultCode::CommsFailure => "could not communicate with the device",
            ResultCode::Undefined => "undefined error",
        };
        write!(f, "{} ({})", msg, self.raw())
    }
}

/// Status bitmask returned with every scan read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanStatus(pub u16);

impl ScanStatus {
    pub const HW_OVERRUN: u16 = 0x0001;
    pub const BUFFER_OVERRUN: u16 = 0x0002;
    pub const TRIGGERED: u16 = 0x0004;
    pub const RUNNING: u16 = 0x0008;

    pub fn hardware_overrun(self) -> bool {
        self.0 & Self::HW_OVERRUN != 0
    }

    pub fn buffer_overrun(self) -> bool {
        self.0 & Self::BUFFER_OVERRUN != 0
    }

    pub fn triggered(self) -> bool {
        self.0 & Self::TRIGGERED != 0
    }

    pub fn running(self) -> bool {
        self.0 & Self::RUNNING != 0
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::new();
        if self.hardware_overrun() {
            flags.push("hw-overrun");
        }
        if self.buffer_overrun() {
            flags.push("buffer-overrun");
        }
        if self.triggered() {
            flags.push("triggered");
        }
        if self.running() {
            flags.push("running");
        }
        if flags.is_empty() {
            write!(f, "idle")
        } else {
            write!(f, "{}", flags.join("|"))
        }
    }
}

/// Outcome of a single `scan_read` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRead {
    pub status: ScanStatus,
    /// Samples per channel written to the front of the caller's buffer.
    pub samples: usize,
}

/// A board as reported by `hat_list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HatInfo {
    pub address: u8,
    pub id: u16,
    pub version: u16,
    pub product_name: String,
}

/// The capability set consumed from the vendor driver.
pub trait HatDriver {
    fn list(&mut self, filter_id: u16) -> Result<Vec<HatInfo>, Error>;

    fn open(&mut self, address: u8) -> Result<(), Error>;

    fn close(&mut self, address: u8) -> Result<(), Error>;

    /// Rate the hardware clock will actually run at for `rate_hz`.
    fn actual_rate(&mut self, channel_count: u8, rate_hz: f64) -> Result<f64, Error>;

    fn scan_start(
        &mut self,
        address: u8,
        channel_mask: u8,
        samples_per_channel: u32,
        rate_hz: f64,
        options: u32,
    ) -> Result<(), Error>;

    /// Blocks until `samples_per_channel` samples are available or `timeout`
    /// expires, then copies what is available into `buffer`.
    fn scan_read(
        &mut self,
        address: u8,
        samples_per_channel: u32,
        timeout: Duration,
        buffer: &mut [f64],
    ) -> Result<ScanRead, Error>;

    fn scan_stop(&mut self, address: u8) -> Result<(), Error>;

    fn scan_cleanup(&mut self, address: u8) -> Result<(), Error>;
}

/// Channel mask with a single bit set for `channel`.
pub fn channel_mask(channel: u8) -> u8 {
    1 << channel
}

/// Human readable form of a channel mask, e.g. `"0, 4"`.
pub fn mask_to_string(mask: u8) -> String {
    (0..8)
        .filter(|bit| mask & (1 << bit) != 0)
        .map(|bit| bit.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn options_to_string(options: u32) -> String {
    if options == OPTS_DEFAULT {
        "OPTS_DEFAULT".to_string()
    } else {
        format!("{:#06x}", options)
    }
}
