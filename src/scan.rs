//! State machine driving the read loop.
//!
//! Each poll of the driver yields a [`ScanStatus`]; the state only moves
//! forward and terminal states absorb every further event.

use crate::daqhats::ScanStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    ReadFailed,
    HardwareOverrun,
    BufferOverrun,
    WriteFailed,
}

/// Data-loss condition flagged by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overrun {
    Hardware,
    Buffer,
}

impl From<Overrun> for FaultKind {
    fn from(overrun: Overrun) -> Self {
        match overrun {
            Overrun::Hardware => FaultKind::HardwareOverrun,
            Overrun::Buffer => FaultKind::BufferOverrun,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Running,
    Completed,
    Faulted(FaultKind),
}

impl ScanState {
    pub fn is_running(self) -> bool {
        self == ScanState::Running
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ScanState::Completed | ScanState::Faulted(_))
    }

    pub fn start(self) -> Self {
        match self {
            ScanState::Idle => ScanState::Running,
            other => other,
        }
    }

    pub fn fault(self, kind: FaultKind) -> Self {
        match self {
            ScanState::Running => ScanState::Faulted(kind),
            other => other,
        }
    }

    /// Transition after a clean poll whose samples have been stored.
    pub fn advance(self, status: ScanStatus, acquired: u64, target: u64) -> Self {
        if !self.is_running() {
            return self;
        }
        if let Some(overrun) = classify(status) {
            return ScanState::Faulted(overrun.into());
        }
        if acquired >= target || !status.running() {
            ScanState::Completed
        } else {
            ScanState::Running
        }
    }
}

/// Overrun carried by a poll's status, hardware overrun first.
pub fn classify(status: ScanStatus) -> Option<Overrun> {
    if status.hardware_overrun() {
        Some(Overrun::Hardware)
    } else if status.buffer_overrun() {
        Some(Overrun::Buffer)
    } else {
        None
    }
}
