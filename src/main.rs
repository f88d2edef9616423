use chrono::Local;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use hat_logger::{
    AcquisitionConfig, AcquisitionError, AcquisitionPlan, Operator, Outcome, RunReport,
    daqhats::{self, HatDriver, HatInfo},
    libdaqhats::LibDaqHats,
    plan,
    sim::SimulatedHat,
};
use status_line::StatusLine;
use std::{
    error::Error,
    fmt::Display,
    io::{self, BufRead, Write},
    path::PathBuf,
    process::exit,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use thread_priority::{ThreadPriority, set_current_thread_priority};

fn cli() -> Command {
    Command::new("hat-logger")
        .about("Acquire one channel of an MCC 118 HAT into a timestamped CSV file")
        .arg(
            Arg::new("channel")
                .short('c')
                .long("channel")
                .value_parser(value_parser!(u8).range(0..=daqhats::MAX_CHANNEL as i64))
                .default_value("4")
                .help("Analog input channel"),
        )
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .value_parser(value_parser!(u8))
                .help("HAT address (default: the only MCC 118 present, or ask)"),
        )
        .arg(
            Arg::new("rate")
                .short('r')
                .long("rate")
                .value_parser(value_parser!(f64))
                .default_value("4000")
                .help("Scan rate in Hz"),
        )
        .arg(
            Arg::new("duration")
                .short('d')
                .long("duration")
                .value_parser(value_parser!(f64))
                .default_value("10")
                .help("Acquisition length in seconds"),
        )
        .arg(
            Arg::new("chunk")
                .long("chunk")
                .value_parser(value_parser!(u32))
                .default_value("10000")
                .help("Samples requested per read"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_parser(value_parser!(f64))
                .default_value("10")
                .help("Read timeout in seconds"),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_parser(value_parser!(PathBuf))
                .default_value(".")
                .help("Directory for the CSV file"),
        )
        .arg(
            Arg::new("prefix")
                .long("prefix")
                .default_value(plan::DEFAULT_FILE_PREFIX)
                .help("CSV file name prefix"),
        )
        .arg(
            Arg::new("simulate")
                .long("simulate")
                .action(ArgAction::SetTrue)
                .help("Use a simulated MCC 118 instead of libdaqhats"),
        )
}

fn config_from(matches: &ArgMatches) -> Result<AcquisitionConfig, AcquisitionError> {
    let defaults = AcquisitionConfig::default();
    let timeout = matches
        .get_one::<f64>("timeout")
        .copied()
        .unwrap_or(defaults.read_timeout.as_secs_f64());
    let read_timeout = Duration::try_from_secs_f64(timeout)
        .map_err(|e| AcquisitionError::InvalidConfig(format!("timeout {}: {}", timeout, e)))?;

    Ok(AcquisitionConfig {
        channel: matches
            .get_one::<u8>("channel")
            .copied()
            .unwrap_or(defaults.channel),
        address: matches.get_one::<u8>("address").copied(),
        scan_rate_hz: matches
            .get_one::<f64>("rate")
            .copied()
            .unwrap_or(defaults.scan_rate_hz),
        duration_s: matches
            .get_one::<f64>("duration")
            .copied()
            .unwrap_or(defaults.duration_s),
        chunk_size: matches
            .get_one::<u32>("chunk")
            .copied()
            .unwrap_or(defaults.chunk_size),
        read_timeout,
        output_dir: matches
            .get_one::<PathBuf>("output-dir")
            .cloned()
            .unwrap_or(defaults.output_dir),
        file_prefix: matches
            .get_one::<String>("prefix")
            .cloned()
            .unwrap_or(defaults.file_prefix),
        options: defaults.options,
    })
}

#[derive(Clone)]
struct Progress {
    acquired: Arc<AtomicU64>,
    target: u64,
    sample_rate: f64,
}

impl Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let acquired = self.acquired.load(Ordering::Relaxed);
        write!(
            f,
            "Acquired: {} / {} ({:.02}s)",
            acquired,
            self.target,
            acquired as f64 / self.sample_rate
        )
    }
}

/// Operator at the terminal. The status line is shown once the run is
/// confirmed and removed when the console is dropped.
struct Console {
    acquired: Arc<AtomicU64>,
    _status: Option<StatusLine<Progress>>,
}

fn read_line() -> io::Result<String> {
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"));
    }
    Ok(line)
}

impl Operator for Console {
    fn choose_device(&mut self, devices: &[HatInfo]) -> io::Result<u8> {
        eprintln!("\nFound {} MCC 118 devices:", devices.len());
        for info in devices {
            eprintln!("    address {}: {}", info.address, info.product_name);
        }
        eprint!("Select the address of the HAT device to use: ");
        io::stderr().flush()?;

        read_line()?
            .trim()
            .parse::<u8>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    fn confirm_start(&mut self, plan: &AcquisitionPlan, device: &HatInfo) -> io::Result<()> {
        eprintln!("\nSelected {} at address {}", device.product_name, device.address);
        eprintln!("\nMCC 118 channel {} data logger", plan.channel);
        eprintln!("    Channel: {}", daqhats::mask_to_string(plan.channel_mask));
        eprintln!(
            "    Scan rate: {:.2} Hz (requested: {:.2} Hz)",
            plan.actual_rate_hz, plan.requested_rate_hz
        );
        eprintln!("    Duration: {:.1} seconds", plan.duration_s);
        eprintln!("    Total samples: {}", plan.target_samples);
        eprintln!("    Output file: {}", plan.output_path.display());
        eprintln!("    Options: {}", daqhats::options_to_string(plan.options));
        eprintln!("\nPress ENTER to start acquisition...");
        read_line()?;

        eprintln!("\nStarting acquisition...");
        self._status = Some(StatusLine::new(Progress {
            acquired: self.acquired.clone(),
            target: plan.target_samples as u64,
            sample_rate: plan.actual_rate_hz,
        }));
        Ok(())
    }

    fn progress(&mut self, acquired: u64, _target: u64) {
        self.acquired.store(acquired, Ordering::Relaxed);
    }
}

fn acquire<D: HatDriver>(
    driver: &mut D,
    config: &AcquisitionConfig,
    stop: &AtomicBool,
) -> Result<RunReport, AcquisitionError> {
    let plan = AcquisitionPlan::resolve(config, driver, Local::now())?;

    if let Err(e) = set_current_thread_priority(ThreadPriority::Max) {
        log::warn!("could not raise thread priority: {:?}", e);
    }

    let mut console = Console {
        acquired: Arc::new(AtomicU64::new(0)),
        _status: None,
    };
    let report = hat_logger::run(driver, &plan, &mut console, stop);
    if let Ok(report) = &report {
        console.progress(report.samples_written, report.target_samples);
    }
    drop(console);
    report
}

fn summarize(report: &RunReport) {
    match &report.outcome {
        Outcome::Complete => eprintln!("\nAcquisition completed!"),
        Outcome::EndedEarly { .. } | Outcome::Interrupted { .. } => {
            eprintln!("\nWarning: {}", report.outcome)
        }
        Outcome::Aborted(err) => eprintln!("\n{}", err),
    }
    eprintln!("Total samples read: {}", report.samples_written);
    eprintln!("Data saved to: {}", report.output_path.display());
    for err in &report.teardown_errors {
        eprintln!("Error: {}", err);
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let matches = cli().get_matches();
    let config = match config_from(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(-1);
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = stop.clone();
    ctrlc::set_handler(move || {
        if stop_clone.load(Ordering::Relaxed) {
            eprintln!("Killing...");
            exit(-1);
        }
        stop_clone.store(true, Ordering::Relaxed);
    })?;

    let result = if matches.get_flag("simulate") {
        acquire(&mut SimulatedHat::new(), &config, &stop)
    } else {
        match LibDaqHats::load() {
            Ok(mut lib) => acquire(&mut lib, &config, &stop),
            Err(e) => Err(AcquisitionError::DeviceNotFound(Some(e))),
        }
    };

    match result {
        Ok(report) => {
            summarize(&report);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(source) = e.source() {
                log::debug!("caused by: {}", source);
            }
            exit(-1);
        }
    }
}
