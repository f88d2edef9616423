//! Reader for the sensor controller's `SDAT` capture files and their
//! conversion to the logger's CSV layout.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, info, warn};

use crate::recorder::CsvRecorder;

pub const MAGIC: &[u8; 4] = b"SDAT";

/// Bytes before the first sample.
pub const HEADER_LEN: u64 = 56;

/// Samples reserved up front; larger captures grow as they are read.
const PREALLOC_SAMPLES: u32 = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid file format (magic {0:02x?})")]
    BadMagic([u8; 4]),

    #[error("sample rate is zero")]
    ZeroSampleRate,

    #[error("header declares {declared} samples but the file holds {available}")]
    Truncated { declared: u32, available: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdatHeader {
    pub version: u16,
    pub device_id: u32,
    pub boot_id: u64,
    pub seq_start: u64,
    pub sample_rate: u32,
    pub record_size: u16,
    pub sample_count: u32,
    pub sensor_time_start: u64,
    pub sensor_time_end: u64,
    pub payload_crc32: u32,
}

impl SdatHeader {
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, Error> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::BadMagic(magic));
        }

        Ok(Self {
            version: r.read_u16::<LittleEndian>()?,
            device_id: r.read_u32::<LittleEndian>()?,
            boot_id: r.read_u64::<LittleEndian>()?,
            seq_start: r.read_u64::<LittleEndian>()?,
            sample_rate: r.read_u32::<LittleEndian>()?,
            record_size: r.read_u16::<LittleEndian>()?,
            sample_count: r.read_u32::<LittleEndian>()?,
            sensor_time_start: r.read_u64::<LittleEndian>()?,
            sensor_time_end: r.read_u64::<LittleEndian>()?,
            payload_crc32: r.read_u32::<LittleEndian>()?,
        })
    }

    pub fn duration_s(&self) -> f64 {
        self.sample_count as f64 / self.sample_rate as f64
    }
}

fn read_samples<R: Read>(r: &mut R, count: u32) -> Result<Vec<f64>, Error> {
    let mut samples = Vec::with_capacity(count.min(PREALLOC_SAMPLES) as usize);
    for _ in 0..count {
        samples.push(r.read_f64::<LittleEndian>()?);
    }
    Ok(samples)
}

/// A whole capture: header plus voltage samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub header: SdatHeader,
    pub samples: Vec<f64>,
}

impl Capture {
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, Error> {
        let header = SdatHeader::read_from(r)?;
        let samples = read_samples(r, header.sample_count)?;
        Ok(Self { header, samples })
    }

    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let header = SdatHeader::read_from(&mut reader)?;

        let available = len.saturating_sub(HEADER_LEN) / 8;
        if u64::from(header.sample_count) > available {
            return Err(Error::Truncated {
                declared: header.sample_count,
                available,
            });
        }

        let samples = read_samples(&mut reader, header.sample_count)?;
        Ok(Self { header, samples })
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), Error> {
        if self.header.sample_rate == 0 {
            return Err(Error::ZeroSampleRate);
        }
        let period = 1.0 / self.header.sample_rate as f64;
        let mut recorder = CsvRecorder::create(path)?;
        for (i, &voltage) in self.samples.iter().enumerate() {
            recorder.push(i as f64 * period, voltage)?;
        }
        recorder.finish()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    Converted { samples: u32, duration_s: f64 },
    /// The `.csv` already existed.
    Skipped,
}

pub fn csv_path(bin: &Path) -> PathBuf {
    bin.with_extension("csv")
}

/// Converts `bin` to a `.csv` next to it, leaving existing CSV files alone.
pub fn convert_file(bin: &Path) -> Result<Conversion, Error> {
    let csv = csv_path(bin);
    if csv.exists() {
        debug!("{} exists, skipping", csv.display());
        return Ok(Conversion::Skipped);
    }

    let capture = Capture::open(bin)?;
    if let Err(e) = capture.write_csv(&csv) {
        // Do not leave a partial file that would be skipped next time.
        match fs::remove_file(&csv) {
            Err(rm) if rm.kind() != io::ErrorKind::NotFound => {
                warn!("could not remove {}: {}", csv.display(), rm)
            }
            _ => {}
        }
        return Err(e);
    }
    info!("converted {} -> {}", bin.display(), csv.display());

    Ok(Conversion::Converted {
        samples: capture.header.sample_count,
        duration_s: capture.header.duration_s(),
    })
}

/// `*.bin` files in `dir`, sorted by name.
pub fn bin_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "bin") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
