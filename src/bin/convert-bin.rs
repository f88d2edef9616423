use clap::{Arg, Command, value_parser};
use hat_logger::sdat::{self, Conversion};
use std::{error::Error, path::PathBuf, process::exit};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let matches = Command::new("convert-bin")
        .about("Convert SDAT .bin captures to CSV")
        .arg(
            Arg::new("dir")
                .value_parser(value_parser!(PathBuf))
                .default_value("DAD_Files")
                .help("Directory holding the .bin files"),
        )
        .get_matches();

    let dir = matches
        .get_one::<PathBuf>("dir")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("DAD_Files"));

    if !dir.is_dir() {
        eprintln!("Error: Directory not found: {}", dir.display());
        exit(1);
    }

    let files = sdat::bin_files(&dir)?;
    if files.is_empty() {
        eprintln!("No .bin files found in {}", dir.display());
        exit(1);
    }

    eprintln!("Found {} .bin file(s) in {}", files.len(), dir.display());
    eprintln!("{}", "=".repeat(60));

    let (mut converted, mut skipped, mut failed) = (0, 0, 0);
    for bin in &files {
        let name = bin.file_name().unwrap_or_default().to_string_lossy();
        match sdat::convert_file(bin) {
            Ok(Conversion::Converted {
                samples,
                duration_s,
            }) => {
                eprintln!(
                    "[OK] Converted: {} -> {} ({} samples, {:.2}s)",
                    name,
                    sdat::csv_path(bin)
                        .file_name()
                        .unwrap_or_default()
                        .to_string_lossy(),
                    samples,
                    duration_s
                );
                converted += 1;
            }
            Ok(Conversion::Skipped) => skipped += 1,
            Err(e) => {
                eprintln!("[ERROR] Error converting {}: {}", bin.display(), e);
                failed += 1;
            }
        }
    }

    eprintln!("{}", "=".repeat(60));
    eprintln!("Conversion complete!");
    eprintln!("  Converted: {}", converted);
    eprintln!("  Skipped (already exists): {}", skipped);
    eprintln!("  Failed: {}", failed);
    eprintln!("  Total: {}", files.len());

    if failed > 0 {
        exit(1);
    }
    Ok(())
}
