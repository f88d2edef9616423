//! Finite single-channel acquisition from an MCC 118 DAQ HAT into a CSV file,
//! plus the small tools that go with it.

pub mod acquisition;
#[cfg(unix)]
pub mod control;
pub mod daqhats;
pub mod error;
pub mod libdaqhats;
pub mod plan;
pub mod recorder;
pub mod scan;
pub mod sdat;
pub mod sim;

pub use acquisition::{Operator, Outcome, RunReport, run};
pub use error::AcquisitionError;
pub use plan::{AcquisitionConfig, AcquisitionPlan};
