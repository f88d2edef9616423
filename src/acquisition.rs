//! The acquisition run: select and open a board, stream one finite scan into
//! a CSV file, tear everything down again.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::daqhats::{HAT_ID_MCC_118, HatDriver, HatInfo};
use crate::error::{AcquisitionError, TeardownStep};
use crate::plan::AcquisitionPlan;
use crate::recorder::CsvRecorder;
use crate::scan::{self, FaultKind, Overrun, ScanState};

/// A progress marker is emitted each time this many samples have been written.
pub const PROGRESS_INTERVAL: u64 = 10_000;

/// The person at the console.
pub trait Operator {
    /// Picks a board when several are present and none was configured.
    fn choose_device(&mut self, devices: &[HatInfo]) -> io::Result<u8>;

    /// Blocks until the operator is ready. Nothing has been written and no
    /// scan has been started when this is called; an error cancels the run.
    fn confirm_start(&mut self, plan: &AcquisitionPlan, device: &HatInfo) -> io::Result<()>;

    /// Coarse progress marker.
    fn progress(&mut self, _acquired: u64, _target: u64) {}
}

/// Fixed-size sample storage, reused by every read of a run.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: Vec<f64>,
}

impl SampleBuffer {
    pub fn allocate(capacity: usize) -> Result<Self, AcquisitionError> {
        let mut samples = Vec::new();
        samples
            .try_reserve_exact(capacity)
            .map_err(|source| AcquisitionError::AllocationFailed {
                samples: capacity,
                source,
            })?;
        samples.resize(capacity, 0.0);
        Ok(Self { samples })
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.samples
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.samples
    }
}

/// An open board. Stop, cleanup and close run exactly once, either through
/// [`Session::close`] or on drop.
struct Session<'d, D: HatDriver> {
    driver: &'d mut D,
    address: u8,
    closed: bool,
}

impl<'d, D: HatDriver> Session<'d, D> {
    fn open(driver: &'d mut D, address: u8) -> Result<Self, AcquisitionError> {
        driver
            .open(address)
            .map_err(|source| AcquisitionError::OpenFailed { address, source })?;
        debug!("opened device at address {}", address);
        Ok(Self {
            driver,
            address,
            closed: false,
        })
    }

    fn driver(&mut self) -> &mut D {
        &mut *self.driver
    }

    fn close(mut self) -> Vec<AcquisitionError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Vec<AcquisitionError> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;

        let address = self.address;
        let steps = [
            (TeardownStep::ScanStop, self.driver.scan_stop(address)),
            (TeardownStep::ScanCleanup, self.driver.scan_cleanup(address)),
            (TeardownStep::Close, self.driver.close(address)),
        ];

        let mut failures = Vec::new();
        for (step, result) in steps {
            if let Err(source) = result {
                error!("{} failed on address {}: {}", step, address, source);
                failures.push(AcquisitionError::TeardownFailed { step, source });
            }
        }
        debug!("closed device at address {}", address);
        failures
    }
}

impl<D: HatDriver> Drop for Session<'_, D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// How the scan loop ended.
#[derive(Debug)]
pub enum Outcome {
    /// Every planned sample was written.
    Complete,
    /// The device stopped the scan before the planned count.
    EndedEarly { expected: u64, acquired: u64 },
    /// The operator pressed Ctrl+C.
    Interrupted { acquired: u64 },
    /// A read failure, overrun or write failure ended the loop.
    Aborted(AcquisitionError),
}

impl Outcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, Outcome::Complete)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Complete => write!(f, "acquisition completed"),
            Outcome::EndedEarly { expected, acquired } => write!(
                f,
                "scan ended early: {} of {} samples acquired",
                acquired, expected
            ),
            Outcome::Interrupted { acquired } => {
                write!(f, "interrupted after {} samples", acquired)
            }
            Outcome::Aborted(err) => write!(f, "acquisition aborted: {}", err),
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub device: HatInfo,
    pub output_path: PathBuf,
    pub requested_rate_hz: f64,
    pub actual_rate_hz: f64,
    pub target_samples: u64,
    pub buffer_capacity: usize,
    /// Data rows in the CSV file.
    pub samples_written: u64,
    pub outcome: Outcome,
    pub teardown_errors: Vec<AcquisitionError>,
}

fn select_device<D: HatDriver, O: Operator>(
    driver: &mut D,
    address: Option<u8>,
    operator: &mut O,
) -> Result<HatInfo, AcquisitionError> {
    let devices = driver
        .list(HAT_ID_MCC_118)
        .map_err(|e| AcquisitionError::DeviceNotFound(Some(e)))?;

    let chosen = match (address, devices.len()) {
        (_, 0) => return Err(AcquisitionError::DeviceNotFound(None)),
        (Some(address), _) => address,
        (None, 1) => devices[0].address,
        (None, _) => operator
            .choose_device(&devices)
            .map_err(AcquisitionError::Cancelled)?,
    };

    devices
        .into_iter()
        .find(|info| info.address == chosen)
        .ok_or(AcquisitionError::DeviceNotFound(None))
}

fn overrun_error(overrun: Overrun) -> AcquisitionError {
    match overrun {
        Overrun::Hardware => AcquisitionError::HardwareOverrun,
        Overrun::Buffer => AcquisitionError::BufferOverrun,
    }
}

/// Runs one finite acquisition as described by `plan`.
///
/// Setup failures (no device, open, allocation, file creation, scan start,
/// operator cancel) are returned as `Err`. Once the scan has started the run
/// always yields a [`RunReport`]; how the loop ended is in its `outcome`.
pub fn run<D: HatDriver, O: Operator>(
    driver: &mut D,
    plan: &AcquisitionPlan,
    operator: &mut O,
    stop: &AtomicBool,
) -> Result<RunReport, AcquisitionError> {
    let target = plan.target_samples as u64;
    let mut buffer = SampleBuffer::allocate(plan.target_samples as usize)?;
    let buffer_capacity = buffer.capacity();

    let device = select_device(driver, plan.address, operator)?;
    info!(
        "selected {} at address {}",
        device.product_name, device.address
    );

    let mut session = Session::open(driver, device.address)?;

    operator
        .confirm_start(plan, &device)
        .map_err(AcquisitionError::Cancelled)?;
    if stop.load(Ordering::Relaxed) {
        warn!("stop requested before the scan started");
        return Err(AcquisitionError::Cancelled(io::Error::new(
            io::ErrorKind::Interrupted,
            "stop requested before start",
        )));
    }

    let mut recorder = CsvRecorder::create(&plan.output_path).map_err(|source| {
        AcquisitionError::FileCreateFailed {
            path: plan.output_path.clone(),
            source,
        }
    })?;

    if let Err(e) = session.driver().scan_start(
        device.address,
        plan.channel_mask,
        plan.target_samples,
        plan.actual_rate_hz,
        plan.options,
    ) {
        drop(recorder);
        if let Err(rm) = std::fs::remove_file(&plan.output_path) {
            warn!("could not remove {}: {}", plan.output_path.display(), rm);
        }
        return Err(AcquisitionError::ScanStartFailed(e));
    }
    info!(
        "scan started: {} samples at {:.2} Hz",
        target, plan.actual_rate_hz
    );

    let mut state = ScanState::Idle.start();
    let mut abort = None;
    let mut interrupted = false;
    let mut acquired: u64 = 0;
    let start_time = Instant::now();

    while state.is_running() {
        if stop.load(Ordering::Relaxed) {
            warn!("stop requested after {} samples", acquired);
            interrupted = true;
            break;
        }

        let request = plan.next_request(acquired);
        let timer = Instant::now();
        let read = match session.driver().scan_read(
            device.address,
            request,
            plan.read_timeout,
            buffer.as_mut_slice(),
        ) {
            Ok(read) => read,
            Err(e) => {
                error!("scan read failed after {} samples: {}", acquired, e);
                state = state.fault(FaultKind::ReadFailed);
                abort = Some(AcquisitionError::ReadFailed(e));
                break;
            }
        };
        debug!(
            "read {}/{} samples ({}) in {}us",
            read.samples,
            request,
            read.status,
            timer.elapsed().as_micros()
        );

        if let Some(overrun) = scan::classify(read.status) {
            let err = overrun_error(overrun);
            error!("{} after {} samples", err, acquired);
            state = state.fault(overrun.into());
            abort = Some(err);
            break;
        }

        let delivered = read.samples.min(request as usize);
        let mut written = Ok(());
        for &voltage in &buffer.as_slice()[..delivered] {
            written = recorder.push(plan.sample_time(recorder.rows()), voltage);
            if written.is_err() {
                break;
            }
        }
        let written = written.and_then(|()| recorder.commit());

        let before = acquired;
        acquired = recorder.committed();
        if let Err(e) = written {
            error!("writing {} failed: {}", plan.output_path.display(), e);
            state = state.fault(FaultKind::WriteFailed);
            abort = Some(AcquisitionError::WriteFailed(e));
            break;
        }

        if before / PROGRESS_INTERVAL != acquired / PROGRESS_INTERVAL {
            info!(
                "{} samples acquired ({:.1}s)",
                acquired,
                start_time.elapsed().as_secs_f32()
            );
            operator.progress(acquired, target);
        }

        state = state.advance(read.status, acquired, target);
    }
    debug!("scan loop finished in state {:?}", state);

    if matches!(abort, Some(AcquisitionError::WriteFailed(_))) {
        if let Err(e) = recorder.rollback() {
            warn!(
                "could not cut {} back to {} rows: {}",
                plan.output_path.display(),
                acquired,
                e
            );
        }
    } else if let Err(e) = recorder.finish() {
        error!("closing {} failed: {}", plan.output_path.display(), e);
        abort.get_or_insert(AcquisitionError::WriteFailed(e));
    }

    let teardown_errors = session.close();
    drop(buffer);

    let outcome = match abort {
        Some(err) => Outcome::Aborted(err),
        None if interrupted => Outcome::Interrupted { acquired },
        None if acquired < target => {
            warn!("scan ended after {} of {} samples", acquired, target);
            Outcome::EndedEarly {
                expected: target,
                acquired,
            }
        }
        None => Outcome::Complete,
    };

    Ok(RunReport {
        device,
        output_path: plan.output_path.clone(),
        requested_rate_hz: plan.requested_rate_hz,
        actual_rate_hz: plan.actual_rate_hz,
        target_samples: target,
        buffer_capacity,
        samples_written: acquired,
        outcome,
        teardown_errors,
    })
}
