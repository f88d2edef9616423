//! A simulated MCC 118 for `--simulate` runs and tests.
//!
//! Reads never block: every request is served immediately from a sine source.
//! Faults are injected at an absolute sample count so a run can be aborted at a
//! precise point, and every driver call is counted.

use std::f64::consts::PI;
use std::time::Duration;

use log::debug;

use crate::daqhats::{
    Error, HAT_ID_MCC_118, HatDriver, HatInfo, ResultCode, ScanRead, ScanStatus,
};

/// Timebase used to quantize requested rates.
pub const SIM_TIMEBASE_HZ: f64 = 16_000_000.0;
/// Aggregate rate limit of an MCC 118.
pub const SIM_MAX_RATE_HZ: f64 = 100_000.0;

/// A fault that fires once `at` samples have been delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    HardwareOverrun { at: u64 },
    BufferOverrun { at: u64 },
    ReadFailure { at: u64 },
    /// The scan stops by itself, short of its requested length.
    EndOfScan { at: u64 },
}

impl SimFault {
    fn at(self) -> u64 {
        match self {
            SimFault::HardwareOverrun { at }
            | SimFault::BufferOverrun { at }
            | SimFault::ReadFailure { at }
            | SimFault::EndOfScan { at } => at,
        }
    }
}

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOp {
    ActualRate,
    Open,
    ScanStart,
    ScanStop,
    ScanCleanup,
    Close,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub list: u32,
    pub open: u32,
    pub close: u32,
    pub actual_rate: u32,
    pub scan_start: u32,
    pub scan_read: u32,
    pub scan_stop: u32,
    pub scan_cleanup: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SineWave {
    pub amplitude: f64,
    pub frequency_hz: f64,
    pub offset: f64,
}

impl Default for SineWave {
    fn default() -> Self {
        Self {
            amplitude: 1.0,
            frequency_hz: 10.0,
            offset: 0.0,
        }
    }
}

impl SineWave {
    fn sample(&self, t: f64) -> f64 {
        self.offset + self.amplitude * (2.0 * PI * self.frequency_hz * t).sin()
    }
}

#[derive(Debug)]
struct SimScan {
    address: u8,
    target: u64,
    delivered: u64,
    rate_hz: f64,
    running: bool,
}

#[derive(Debug)]
pub struct SimulatedHat {
    devices: Vec<HatInfo>,
    rate_override: Option<f64>,
    fault: Option<SimFault>,
    failing: Vec<SimOp>,
    signal: SineWave,
    opened: Vec<u8>,
    scan: Option<SimScan>,
    calls: CallCounts,
}

impl Default for SimulatedHat {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHat {
    /// One MCC 118 at address 0.
    pub fn new() -> Self {
        Self {
            devices: vec![Self::mcc118(0)],
            rate_override: None,
            fault: None,
            failing: Vec::new(),
            signal: SineWave::default(),
            opened: Vec::new(),
            scan: None,
            calls: CallCounts::default(),
        }
    }

    pub fn mcc118(address: u8) -> HatInfo {
        HatInfo {
            address,
            id: HAT_ID_MCC_118,
            version: 1,
            product_name: "MCC 118 8-Channel Analog Input HAT (simulated)".to_string(),
        }
    }

    pub fn with_devices(mut self, devices: Vec<HatInfo>) -> Self {
        self.devices = devices;
        self
    }

    /// Reports `rate_hz` as the achievable rate regardless of the request.
    pub fn with_actual_rate(mut self, rate_hz: f64) -> Self {
        self.rate_override = Some(rate_hz);
        self
    }

    pub fn with_fault(mut self, fault: SimFault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn with_signal(mut self, signal: SineWave) -> Self {
        self.signal = signal;
        self
    }

    pub fn failing(mut self, op: SimOp) -> Self {
        self.failing.push(op);
        self
    }

    pub fn calls(&self) -> CallCounts {
        self.calls
    }

    pub fn is_open(&self, address: u8) -> bool {
        self.opened.contains(&address)
    }

    pub fn scan_active(&self) -> bool {
        self.scan.is_some()
    }

    /// Voltage the source produces for the 0-based sample `index`.
    pub fn expected_sample(&self, index: u64, rate_hz: f64) -> f64 {
        self.signal.sample(index as f64 / rate_hz)
    }

    fn injected(&self, op: SimOp) -> Result<(), Error> {
        if self.failing.contains(&op) {
            debug!("simulated failure of {:?}", op);
            Err(Error::code(ResultCode::CommsFailure))
        } else {
            Ok(())
        }
    }
}

impl HatDriver for SimulatedHat {
    fn list(&mut self, filter_id: u16) -> Result<Vec<HatInfo>, Error> {
        self.calls.list += 1;
        Ok(self
            .devices
            .iter()
            .filter(|info| filter_id == 0 || info.id == filter_id)
            .cloned()
            .collect())
    }

    fn open(&mut self, address: u8) -> Result<(), Error> {
        self.calls.open += 1;
        self.injected(SimOp::Open)?;
        if !self.devices.iter().any(|info| info.address == address) {
            return Err(Error::code(ResultCode::InvalidDevice));
        }
        if !self.opened.contains(&address) {
            self.opened.push(address);
        }
        Ok(())
    }

    fn close(&mut self, address: u8) -> Result<(), Error> {
        self.calls.close += 1;
        self.injected(SimOp::Close)?;
        self.opened.retain(|&a| a != address);
        Ok(())
    }

    fn actual_rate(&mut self, channel_count: u8, rate_hz: f64) -> Result<f64, Error> {
        self.calls.actual_rate += 1;
        self.injected(SimOp::ActualRate)?;
        if channel_count == 0 || !rate_hz.is_finite() || rate_hz <= 0.0 {
            return Err(Error::code(ResultCode::BadParameter));
        }
        if let Some(rate) = self.rate_override {
            return Ok(rate);
        }

        let channels = channel_count as f64;
        let aggregate = (rate_hz * channels).min(SIM_MAX_RATE_HZ);
        let divisor = (SIM_TIMEBASE_HZ / aggregate).round().max(1.0);
        Ok(SIM_TIMEBASE_HZ / divisor / channels)
    }

    fn scan_start(
        &mut self,
        address: u8,
        channel_mask: u8,
        samples_per_channel: u32,
        rate_hz: f64,
        _options: u32,
    ) -> Result<(), Error> {
        self.calls.scan_start += 1;
        self.injected(SimOp::ScanStart)?;
        if !self.opened.contains(&address) {
            return Err(Error::code(ResultCode::InvalidDevice));
        }
        if self.scan.is_some() {
            return Err(Error::code(ResultCode::Busy));
        }
        if channel_mask == 0 || samples_per_channel == 0 || rate_hz <= 0.0 {
            return Err(Error::code(ResultCode::BadParameter));
        }

        self.scan = Some(SimScan {
            address,
            target: samples_per_channel as u64,
            delivered: 0,
            rate_hz,
            running: true,
        });
        Ok(())
    }

    fn scan_read(
        &mut self,
        address: u8,
        samples_per_channel: u32,
        _timeout: Duration,
        buffer: &mut [f64],
    ) -> Result<ScanRead, Error> {
        self.calls.scan_read += 1;
        let fault = self.fault;
        let signal = self.signal;
        let scan = match self.scan.as_mut() {
            Some(scan) if scan.address == address => scan,
            _ => return Err(Error::code(ResultCode::ResourceUnavailable)),
        };

        let fault_at = fault.map(SimFault::at).unwrap_or(u64::MAX);
        let limit = scan.target.min(fault_at);

        if scan.delivered >= limit {
            let tripped = scan.delivered >= fault_at;
            scan.running = false;
            return match fault {
                Some(SimFault::HardwareOverrun { .. }) if tripped => Ok(ScanRead {
                    status: ScanStatus(ScanStatus::HW_OVERRUN),
                    samples: 0,
                }),
                Some(SimFault::BufferOverrun { .. }) if tripped => Ok(ScanRead {
                    status: ScanStatus(ScanStatus::BUFFER_OVERRUN),
                    samples: 0,
                }),
                Some(SimFault::ReadFailure { .. }) if tripped => {
                    Err(Error::code(ResultCode::Timeout))
                }
                _ => Ok(ScanRead {
                    status: ScanStatus::default(),
                    samples: 0,
                }),
            };
        }

        let requested = samples_per_channel as usize;
        if buffer.len() < requested {
            return Err(Error::BufferTooSmall {
                capacity: buffer.len(),
                requested,
            });
        }

        let n = (requested as u64).min(limit - scan.delivered) as usize;
        for (i, slot) in buffer[..n].iter_mut().enumerate() {
            let index = scan.delivered + i as u64;
            *slot = signal.sample(index as f64 / scan.rate_hz);
        }
        scan.delivered += n as u64;

        let ended = matches!(fault, Some(SimFault::EndOfScan { .. })) && scan.delivered >= fault_at;
        scan.running = scan.delivered < scan.target && !ended;

        Ok(ScanRead {
            status: if scan.running {
                ScanStatus(ScanStatus::RUNNING)
            } else {
                ScanStatus::default()
            },
            samples: n,
        })
    }

    fn scan_stop(&mut self, _address: u8) -> Result<(), Error> {
        self.calls.scan_stop += 1;
        self.injected(SimOp::ScanStop)?;
        if let Some(scan) = self.scan.as_mut() {
            scan.running = false;
        }
        Ok(())
    }

    fn scan_cleanup(&mut self, _address: u8) -> Result<(), Error> {
        self.calls.scan_cleanup += 1;
        self.injected(SimOp::ScanCleanup)?;
        self.scan = None;
        Ok(())
    }
}
