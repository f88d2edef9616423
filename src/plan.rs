use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::daqhats::{self, HatDriver, MAX_CHANNEL, OPTS_DEFAULT};
use crate::error::AcquisitionError;

pub const DEFAULT_CHANNEL: u8 = 4;
pub const DEFAULT_SCAN_RATE_HZ: f64 = 4000.0;
pub const DEFAULT_DURATION_S: f64 = 10.0;
pub const DEFAULT_CHUNK_SIZE: u32 = 10_000;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FILE_PREFIX: &str = "channel4_data";

/// Run parameters before anything is asked of the hardware.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionConfig {
    pub channel: u8,
    /// Board address; `None` picks the only board, or asks when there are several.
    pub address: Option<u8>,
    pub scan_rate_hz: f64,
    pub duration_s: f64,
    pub chunk_size: u32,
    pub read_timeout: Duration,
    pub output_dir: PathBuf,
    pub file_prefix: String,
    pub options: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL,
            address: None,
            scan_rate_hz: DEFAULT_SCAN_RATE_HZ,
            duration_s: DEFAULT_DURATION_S,
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            output_dir: PathBuf::from("."),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            options: OPTS_DEFAULT,
        }
    }
}

impl AcquisitionConfig {
    pub fn validate(&self) -> Result<(), AcquisitionError> {
        if self.channel > MAX_CHANNEL {
            return Err(AcquisitionError::InvalidConfig(format!(
                "channel {} out of range 0..={}",
                self.channel, MAX_CHANNEL
            )));
        }
        if !self.scan_rate_hz.is_finite() || self.scan_rate_hz <= 0.0 {
            return Err(AcquisitionError::InvalidConfig(format!(
                "scan rate must be positive, got {}",
                self.scan_rate_hz
            )));
        }
        if !self.duration_s.is_finite() || self.duration_s <= 0.0 {
            return Err(AcquisitionError::InvalidConfig(format!(
                "duration must be positive, got {}",
                self.duration_s
            )));
        }
        if self.chunk_size == 0 {
            return Err(AcquisitionError::InvalidConfig(
                "chunk size must be at least one sample".to_string(),
            ));
        }
        Ok(())
    }

    /// `round(rate * duration)`.
    pub fn target_samples(&self) -> Result<u32, AcquisitionError> {
        let target = (self.scan_rate_hz * self.duration_s).round();
        if target < 1.0 || target > u32::MAX as f64 {
            return Err(AcquisitionError::InvalidConfig(format!(
                "{} Hz for {} s gives {} samples",
                self.scan_rate_hz, self.duration_s, target
            )));
        }
        Ok(target as u32)
    }
}

/// Everything a run needs, fixed before the scan starts.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionPlan {
    pub channel: u8,
    pub channel_mask: u8,
    pub address: Option<u8>,
    pub requested_rate_hz: f64,
    /// Rate the hardware clock actually runs at. Timestamps use this one.
    pub actual_rate_hz: f64,
    pub duration_s: f64,
    pub target_samples: u32,
    pub chunk_size: u32,
    pub read_timeout: Duration,
    pub options: u32,
    pub output_path: PathBuf,
}

impl AcquisitionPlan {
    /// Validates `config`, asks the driver for the achievable rate and names the
    /// output file after `now`.
    pub fn resolve<D: HatDriver>(
        config: &AcquisitionConfig,
        driver: &mut D,
        now: DateTime<Local>,
    ) -> Result<Self, AcquisitionError> {
        config.validate()?;
        let target_samples = config.target_samples()?;

        let actual_rate_hz = driver
            .actual_rate(1, config.scan_rate_hz)
            .map_err(|e| AcquisitionError::InvalidConfig(format!("rate not achievable: {}", e)))?;
        if !actual_rate_hz.is_finite() || actual_rate_hz <= 0.0 {
            return Err(AcquisitionError::InvalidConfig(format!(
                "driver reported an unusable rate of {} Hz",
                actual_rate_hz
            )));
        }

        Ok(Self {
            channel: config.channel,
            channel_mask: daqhats::channel_mask(config.channel),
            address: config.address,
            requested_rate_hz: config.scan_rate_hz,
            actual_rate_hz,
            duration_s: config.duration_s,
            target_samples,
            chunk_size: config.chunk_size,
            read_timeout: config.read_timeout,
            options: config.options,
            output_path: output_path(&config.output_dir, &config.file_prefix, now),
        })
    }

    /// Elapsed time of the 0-based sample `index`.
    pub fn sample_time(&self, index: u64) -> f64 {
        index as f64 / self.actual_rate_hz
    }

    /// Size of the next read request given how many samples are in hand.
    pub fn next_request(&self, acquired: u64) -> u32 {
        let remaining = (self.target_samples as u64).saturating_sub(acquired);
        remaining.min(self.chunk_size as u64) as u32
    }
}

/// `<dir>/<prefix>_YYYYMMDD_HHMMSS.csv`
pub fn output_path(dir: &Path, prefix: &str, now: DateTime<Local>) -> PathBuf {
    dir.join(format!("{}_{}.csv", prefix, now.format("%Y%m%d_%H%M%S")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedHat;
    use chrono::TimeZone;

    fn at_noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 12, 4, 5).unwrap()
    }

    #[test]
    fn target_is_rounded_product() {
        let mut config = AcquisitionConfig::default();
        assert_eq!(config.target_samples().unwrap(), 40_000);

        config.scan_rate_hz = 1000.0;
        config.duration_s = 0.0125;
        assert_eq!(config.target_samples().unwrap(), 13);

        config.scan_rate_hz = 3.0;
        config.duration_s = 0.1;
        assert!(matches!(
            config.target_samples(),
            Err(AcquisitionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_bad_config() {
        let bad = [
            AcquisitionConfig {
                channel: 8,
                ..Default::default()
            },
            AcquisitionConfig {
                scan_rate_hz: -1.0,
                ..Default::default()
            },
            AcquisitionConfig {
                duration_s: f64::NAN,
                ..Default::default()
            },
            AcquisitionConfig {
                chunk_size: 0,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{:?}", config);
        }
    }

    #[test]
    fn plan_uses_driver_rate() {
        let mut hat = SimulatedHat::new().with_actual_rate(4004.8);
        let plan =
            AcquisitionPlan::resolve(&AcquisitionConfig::default(), &mut hat, at_noon()).unwrap();

        assert_eq!(plan.requested_rate_hz, 4000.0);
        assert_eq!(plan.actual_rate_hz, 4004.8);
        assert_eq!(plan.channel_mask, 0x10);
        assert_eq!(plan.target_samples, 40_000);
        assert_eq!(plan.sample_time(99), 99.0 / 4004.8);
        assert_eq!(
            plan.output_path,
            PathBuf::from("./channel4_data_20240309_120405.csv")
        );
    }

    #[test]
    fn requests_are_capped_to_remaining() {
        let mut hat = SimulatedHat::new();
        let config = AcquisitionConfig {
            scan_rate_hz: 1000.0,
            duration_s: 2.5,
            chunk_size: 1000,
            ..Default::default()
        };
        let plan = AcquisitionPlan::resolve(&config, &mut hat, at_noon()).unwrap();

        assert_eq!(plan.next_request(0), 1000);
        assert_eq!(plan.next_request(2000), 500);
        assert_eq!(plan.next_request(2500), 0);
    }
}
