use anyhow::{bail, Result};
use physio_fusion::config::DEFAULT_TIMEZONE;
use physio_fusion::data_loading::{read_recording, InputFormat};
use physio_fusion::labels::subject_id_from_filename;
use physio_fusion::timestamps::{format_zoned, TimestampNormalizer};
use physio_fusion::Modality;
use std::path::Path;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        println!("Usage: {} <recording> [signal_column]", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);
    let Some(format) = InputFormat::from_path(path) else {
        bail!("Unrecognised recording format: {}", path.display());
    };
    let signal_column = match args.get(2) {
        Some(column) => column.clone(),
        None if path.to_string_lossy().to_lowercase().contains("eda") => {
            Modality::Eda.default_signal_column().to_string()
        }
        None => Modality::Ppg.default_signal_column().to_string(),
    };

    let loaded = read_recording(path, format, &signal_column)?;
    let normalized = TimestampNormalizer::from_name(DEFAULT_TIMEZONE)?.normalize(&loaded.rows);

    println!("\nRecording: {}", path.display());
    println!(
        "Subject:   {}",
        subject_id_from_filename(path).unwrap_or_else(|| "?".to_string())
    );
    println!("Signal:    {}", signal_column);
    println!(
        "Rows:      {} kept, {} malformed, {} bad timestamps",
        normalized.samples.len(),
        loaded.malformed,
        normalized.dropped
    );
    if let (Some(first), Some(last)) = (normalized.samples.first(), normalized.samples.last()) {
        let span = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
        println!(
            "Range:     {} .. {} ({:.1} s)",
            format_zoned(&first.timestamp),
            format_zoned(&last.timestamp),
            span
        );
        if span > 0.0 {
            println!(
                "Rate:      {:.2} Hz",
                (normalized.samples.len() - 1) as f64 / span
            );
        }
    }

    Ok(())
}
