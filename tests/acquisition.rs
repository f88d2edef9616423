//! End-to-end runs of the orchestrator against the simulated HAT.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Local;
use hat_logger::daqhats::HatInfo;
use hat_logger::sim::{SimFault, SimOp, SimulatedHat};
use hat_logger::{
    AcquisitionConfig, AcquisitionError, AcquisitionPlan, Operator, Outcome, run,
};

#[derive(Default)]
struct Scripted {
    confirmed: u32,
    markers: Vec<u64>,
    refuse: bool,
    /// Raised while waiting at the prompt, like Ctrl+C before ENTER.
    stop_at_prompt: Option<Arc<AtomicBool>>,
}

impl Operator for Scripted {
    fn choose_device(&mut self, devices: &[HatInfo]) -> io::Result<u8> {
        Ok(devices[0].address)
    }

    fn confirm_start(&mut self, _plan: &AcquisitionPlan, _device: &HatInfo) -> io::Result<()> {
        self.confirmed += 1;
        if let Some(stop) = &self.stop_at_prompt {
            stop.store(true, Ordering::Relaxed);
        }
        if self.refuse {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"));
        }
        Ok(())
    }

    fn progress(&mut self, acquired: u64, _target: u64) {
        self.markers.push(acquired);
    }
}

fn plan(dir: &Path, rate: f64, duration: f64, hat: &mut SimulatedHat) -> AcquisitionPlan {
    let config = AcquisitionConfig {
        scan_rate_hz: rate,
        duration_s: duration,
        output_dir: dir.to_path_buf(),
        ..Default::default()
    };
    AcquisitionPlan::resolve(&config, hat, Local::now()).unwrap()
}

/// Data rows of a CSV file, after checking the header and the numbering.
fn rows(path: &Path) -> Vec<(u64, String, String)> {
    let text = fs::read_to_string(path).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("Sample_Number,Time_Seconds,Channel_Voltage")
    );

    let rows: Vec<(u64, String, String)> = lines
        .map(|line| {
            let fields: Vec<&str> = line.split(',').collect();
            assert_eq!(fields.len(), 3, "{}", line);
            (
                fields[0].parse().unwrap(),
                fields[1].to_string(),
                fields[2].to_string(),
            )
        })
        .collect();

    for (i, (n, _, _)) in rows.iter().enumerate() {
        assert_eq!(*n, i as u64 + 1);
    }
    rows
}

fn assert_torn_down(hat: &SimulatedHat) {
    let calls = hat.calls();
    assert_eq!(calls.open, 1);
    assert_eq!(calls.scan_stop, 1);
    assert_eq!(calls.scan_cleanup, 1);
    assert_eq!(calls.close, 1);
    assert!(!hat.is_open(0));
    assert!(!hat.scan_active());
}

#[test]
fn full_run_writes_every_sample() {
    let dir = tempfile::tempdir().unwrap();
    let mut hat = SimulatedHat::new();
    let plan = plan(dir.path(), 4000.0, 10.0, &mut hat);
    let mut operator = Scripted::default();

    let report = run(&mut hat, &plan, &mut operator, &AtomicBool::new(false)).unwrap();

    assert!(report.outcome.is_complete());
    assert_eq!(report.target_samples, 40_000);
    assert_eq!(report.buffer_capacity, 40_000);
    assert_eq!(report.samples_written, 40_000);
    assert!(report.teardown_errors.is_empty());

    let text = fs::read_to_string(&report.output_path).unwrap();
    assert_eq!(text.lines().count(), 40_001);
    assert_eq!(rows(&report.output_path).len(), 40_000);

    assert_eq!(operator.confirmed, 1);
    assert_eq!(operator.markers, vec![10_000, 20_000, 30_000, 40_000]);
    assert_eq!(hat.calls().scan_read, 4);
    assert_torn_down(&hat);
}

#[test]
fn samples_match_source() {
    let dir = tempfile::tempdir().unwrap();
    let mut hat = SimulatedHat::new();
    let plan = plan(dir.path(), 1000.0, 0.05, &mut hat);

    let report = run(&mut hat, &plan, &mut Scripted::default(), &AtomicBool::new(false)).unwrap();

    let rows = rows(&report.output_path);
    assert_eq!(rows.len(), 50);
    for (i, (_, time, voltage)) in rows.iter().enumerate() {
        assert_eq!(*time, format!("{:.6}", i as f64 / 1000.0));
        assert_eq!(
            *voltage,
            format!("{:.6}", hat.expected_sample(i as u64, 1000.0))
        );
    }
}

#[test]
fn hardware_overrun_keeps_written_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut hat = SimulatedHat::new().with_fault(SimFault::HardwareOverrun { at: 15_000 });
    let plan = plan(dir.path(), 4000.0, 10.0, &mut hat);

    let report = run(&mut hat, &plan, &mut Scripted::default(), &AtomicBool::new(false)).unwrap();

    assert!(matches!(
        report.outcome,
        Outcome::Aborted(AcquisitionError::HardwareOverrun)
    ));
    assert_eq!(report.samples_written, 15_000);
    assert_eq!(
        fs::read_to_string(&report.output_path).unwrap().lines().count(),
        15_001
    );
    assert_eq!(rows(&report.output_path).len(), 15_000);
    assert_torn_down(&hat);
}

#[test]
fn buffer_overrun_and_read_failure_abort() {
    let faults = [
        SimFault::BufferOverrun { at: 2_500 },
        SimFault::ReadFailure { at: 2_500 },
    ];
    for fault in faults {
        let dir = tempfile::tempdir().unwrap();
        let mut hat = SimulatedHat::new().with_fault(fault);
        let plan = plan(dir.path(), 1000.0, 5.0, &mut hat);

        let report =
            run(&mut hat, &plan, &mut Scripted::default(), &AtomicBool::new(false)).unwrap();

        match (fault, &report.outcome) {
            (SimFault::BufferOverrun { .. }, Outcome::Aborted(AcquisitionError::BufferOverrun)) => {}
            (SimFault::ReadFailure { .. }, Outcome::Aborted(AcquisitionError::ReadFailed(_))) => {}
            (fault, outcome) => panic!("{:?} ended with {:?}", fault, outcome),
        }
        assert_eq!(report.samples_written, 2_500);
        assert_eq!(rows(&report.output_path).len(), 2_500);
        assert_torn_down(&hat);
    }
}

#[test]
fn early_end_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut hat = SimulatedHat::new().with_fault(SimFault::EndOfScan { at: 1_234 });
    let plan = plan(dir.path(), 1000.0, 3.0, &mut hat);

    let report = run(&mut hat, &plan, &mut Scripted::default(), &AtomicBool::new(false)).unwrap();

    assert!(matches!(
        report.outcome,
        Outcome::EndedEarly {
            expected: 3_000,
            acquired: 1_234
        }
    ));
    assert_eq!(rows(&report.output_path).len(), 1_234);
    assert_torn_down(&hat);
}

#[test]
fn no_device_creates_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut hat = SimulatedHat::new().with_devices(Vec::new());
    let plan = plan(dir.path(), 4000.0, 10.0, &mut hat);
    let mut operator = Scripted::default();

    let err = run(&mut hat, &plan, &mut operator, &AtomicBool::new(false)).unwrap_err();

    assert!(matches!(err, AcquisitionError::DeviceNotFound(None)));
    assert!(err.is_setup_failure());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    assert_eq!(operator.confirmed, 0);
    assert_eq!(hat.calls().open, 0);
    assert_eq!(hat.calls().close, 0);
}

#[test]
fn timestamps_follow_actual_rate() {
    let dir = tempfile::tempdir().unwrap();
    let mut hat = SimulatedHat::new().with_actual_rate(4004.8);
    let plan = plan(dir.path(), 4000.0, 0.05, &mut hat);

    let report = run(&mut hat, &plan, &mut Scripted::default(), &AtomicBool::new(false)).unwrap();

    assert_eq!(report.requested_rate_hz, 4000.0);
    assert_eq!(report.actual_rate_hz, 4004.8);
    let rows = rows(&report.output_path);
    let (n, time, _) = &rows[99];
    assert_eq!(*n, 100);
    assert_eq!(*time, format!("{:.6}", 99.0 / 4004.8));
    assert_ne!(*time, format!("{:.6}", 99.0 / 4000.0));
}

#[test]
fn open_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut hat = SimulatedHat::new().failing(SimOp::Open);
    let plan = plan(dir.path(), 1000.0, 1.0, &mut hat);

    let err = run(&mut hat, &plan, &mut Scripted::default(), &AtomicBool::new(false)).unwrap_err();

    assert!(matches!(err, AcquisitionError::OpenFailed { address: 0, .. }));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    assert_eq!(hat.calls().scan_stop, 0);
}

#[test]
fn scan_start_failure_removes_file_and_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let mut hat = SimulatedHat::new().failing(SimOp::ScanStart);
    let plan = plan(dir.path(), 1000.0, 1.0, &mut hat);

    let err = run(&mut hat, &plan, &mut Scripted::default(), &AtomicBool::new(false)).unwrap_err();

    assert!(matches!(err, AcquisitionError::ScanStartFailed(_)));
    assert!(err.is_setup_failure());
    assert!(!plan.output_path.exists());
    assert_torn_down(&hat);
}

#[test]
fn unwritable_output_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut hat = SimulatedHat::new();
    let config = AcquisitionConfig {
        scan_rate_hz: 1000.0,
        duration_s: 1.0,
        output_dir: dir.path().join("missing"),
        ..Default::default()
    };
    let plan = AcquisitionPlan::resolve(&config, &mut hat, Local::now()).unwrap();

    let err = run(&mut hat, &plan, &mut Scripted::default(), &AtomicBool::new(false)).unwrap_err();

    assert!(matches!(err, AcquisitionError::FileCreateFailed { .. }));
    assert_eq!(hat.calls().scan_start, 0);
    assert_torn_down(&hat);
}

#[test]
fn operator_cancel_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let mut hat = SimulatedHat::new();
    let plan = plan(dir.path(), 1000.0, 1.0, &mut hat);
    let mut operator = Scripted {
        refuse: true,
        ..Default::default()
    };

    let err = run(&mut hat, &plan, &mut operator, &AtomicBool::new(false)).unwrap_err();

    assert!(matches!(err, AcquisitionError::Cancelled(_)));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    assert_torn_down(&hat);
}

#[test]
fn stop_flag_interrupts_with_header_only_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut hat = SimulatedHat::new();
    let plan = plan(dir.path(), 1000.0, 1.0, &mut hat);

    let report = run(&mut hat, &plan, &mut Scripted::default(), &AtomicBool::new(true)).unwrap();

    assert!(matches!(report.outcome, Outcome::Interrupted { acquired: 0 }));
    assert_eq!(
        fs::read_to_string(&report.output_path).unwrap().lines().count(),
        1
    );
    assert_eq!(hat.calls().scan_read, 0);
    assert_torn_down(&hat);
}

#[test]
fn stop_at_prompt_cancels_before_scan() {
    let dir = tempfile::tempdir().unwrap();
    let mut hat = SimulatedHat::new();
    let plan = plan(dir.path(), 1000.0, 1.0, &mut hat);
    let stop = Arc::new(AtomicBool::new(false));
    let mut operator = Scripted {
        stop_at_prompt: Some(stop.clone()),
        ..Default::default()
    };

    let err = run(&mut hat, &plan, &mut operator, &stop).unwrap_err();

    assert!(matches!(err, AcquisitionError::Cancelled(_)));
    assert!(err.is_setup_failure());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    assert_eq!(hat.calls().scan_start, 0);
    assert_torn_down(&hat);
}

#[cfg(target_os = "linux")]
#[test]
fn write_failure_aborts_with_committed_count() {
    let dir = tempfile::tempdir().unwrap();
    let mut hat = SimulatedHat::new();
    let mut plan = plan(dir.path(), 1000.0, 5.0, &mut hat);
    plan.output_path = "/dev/full".into();

    let report = run(&mut hat, &plan, &mut Scripted::default(), &AtomicBool::new(false)).unwrap();

    match &report.outcome {
        Outcome::Aborted(err @ AcquisitionError::WriteFailed(_)) => {
            assert!(!err.is_setup_failure())
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(report.samples_written, 0);
    assert_eq!(hat.calls().scan_read, 1);
    assert_torn_down(&hat);
}

#[test]
fn teardown_failures_do_not_fail_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut hat = SimulatedHat::new().failing(SimOp::ScanCleanup);
    let plan = plan(dir.path(), 1000.0, 1.0, &mut hat);

    let report = run(&mut hat, &plan, &mut Scripted::default(), &AtomicBool::new(false)).unwrap();

    assert!(report.outcome.is_complete());
    assert_eq!(report.teardown_errors.len(), 1);
    assert!(!report.teardown_errors[0].is_setup_failure());
    assert_eq!(hat.calls().close, 1);
    assert!(!hat.is_open(0));
}

#[test]
fn small_chunks_cover_the_target() {
    let dir = tempfile::tempdir().unwrap();
    let mut hat = SimulatedHat::new();
    let config = AcquisitionConfig {
        scan_rate_hz: 1000.0,
        duration_s: 1.0,
        chunk_size: 300,
        output_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let plan = AcquisitionPlan::resolve(&config, &mut hat, Local::now()).unwrap();

    let report = run(&mut hat, &plan, &mut Scripted::default(), &AtomicBool::new(false)).unwrap();

    assert!(report.outcome.is_complete());
    assert_eq!(rows(&report.output_path).len(), 1_000);
    assert_eq!(hat.calls().scan_read, 4);
}
