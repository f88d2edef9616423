//! CSV output shared by the logger and the `.bin` converter.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub const CSV_HEADER: &str = "Sample_Number,Time_Seconds,Channel_Voltage";

/// Writes `Sample_Number,Time_Seconds,Channel_Voltage` rows with
/// 1-based sample numbers and six fractional digits.
///
/// Rows are buffered until [`CsvRecorder::commit`]. Only committed rows are
/// known to be in the output.
pub struct CsvRecorder<W: Write> {
    out: W,
    rows: u64,
    bytes: u64,
    committed_rows: u64,
    committed_bytes: u64,
}

impl CsvRecorder<BufWriter<File>> {
    /// Creates (truncating) `path` and writes the header.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file))
    }

    /// Drops everything written after the last commit and cuts the file back
    /// to the committed rows. Returns the number of rows left in the file.
    pub fn rollback(self) -> io::Result<u64> {
        let (file, _discarded) = self.out.into_parts();
        file.set_len(self.committed_bytes)?;
        Ok(self.committed_rows)
    }
}

impl<W: Write> CsvRecorder<W> {
    pub fn new(out: W) -> io::Result<Self> {
        let mut rec = Self {
            out,
            rows: 0,
            bytes: 0,
            committed_rows: 0,
            committed_bytes: 0,
        };
        rec.write_line(CSV_HEADER)?;
        Ok(rec)
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.bytes += line.len() as u64 + 1;
        Ok(())
    }

    /// Appends one row; `time_s` is the elapsed time of this sample.
    pub fn push(&mut self, time_s: f64, voltage: f64) -> io::Result<()> {
        let line = format!("{},{:.6},{:.6}", self.rows + 1, time_s, voltage);
        self.write_line(&line)?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes buffered rows and marks them as committed.
    pub fn commit(&mut self) -> io::Result<u64> {
        self.out.flush()?;
        self.committed_rows = self.rows;
        self.committed_bytes = self.bytes;
        Ok(self.committed_rows)
    }

    /// Data rows handed to the recorder so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Data rows that reached the output.
    pub fn committed(&self) -> u64 {
        self.committed_rows
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.commit()?;
        Ok(self.out)
    }
}
