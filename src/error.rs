use std::path::PathBuf;

use crate::daqhats;

/// Everything that can end an acquisition run.
///
/// Setup-phase kinds are returned as `Err` from [`crate::acquisition::run`].
/// Run-phase kinds end the scan loop early and are reported through
/// [`crate::acquisition::Outcome::Aborted`].
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no MCC 118 device found")]
    DeviceNotFound(#[source] Option<daqhats::Error>),

    #[error("failed to open device at address {address}: {source}")]
    OpenFailed {
        address: u8,
        source: daqhats::Error,
    },

    #[error("acquisition cancelled by operator: {0}")]
    Cancelled(std::io::Error),

    #[error("failed to allocate a buffer for {samples} samples")]
    AllocationFailed {
        samples: usize,
        source: std::collections::TryReserveError,
    },

    #[error("failed to create {}: {source}", .path.display())]
    FileCreateFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to start scan: {0}")]
    ScanStartFailed(daqhats::Error),

    #[error("scan read failed: {0}")]
    ReadFailed(daqhats::Error),

    #[error("hardware overrun")]
    HardwareOverrun,

    #[error("buffer overrun")]
    BufferOverrun,

    #[error("failed to write samples: {0}")]
    WriteFailed(std::io::Error),

    #[error("teardown step {step} failed: {source}")]
    TeardownFailed {
        step: TeardownStep,
        source: daqhats::Error,
    },
}

impl AcquisitionError {
    /// Setup-phase failures end the program with a non-zero exit code.
    pub fn is_setup_failure(&self) -> bool {
        !matches!(
            self,
            AcquisitionError::ReadFailed(_)
                | AcquisitionError::HardwareOverrun
                | AcquisitionError::BufferOverrun
                | AcquisitionError::WriteFailed(_)
                | AcquisitionError::TeardownFailed { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    ScanStop,
    ScanCleanup,
    Close,
}

impl std::fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TeardownStep::ScanStop => "scan stop",
            TeardownStep::ScanCleanup => "scan cleanup",
            TeardownStep::Close => "close",
        })
    }
}
