// src/compression.rs
use crate::error::{BackupError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Gzips `input_file` into `<input_file>.gz`, streaming so memory use stays flat.
pub async fn compress_file(input_file: &Path) -> Result<PathBuf> {
    let mut output_path = input_file.as_os_str().to_owned();
    output_path.push(".gz");
    let output_path = PathBuf::from(output_path);

    info!("Compressing file {}", input_file.display());
    let input = input_file.to_path_buf();
    let output = output_path.clone();
    tokio::task::spawn_blocking(move || gzip(&input, &output))
        .await
        .map_err(|e| BackupError::Compression(e.to_string()))?
        .map_err(|e| BackupError::Compression(format!("{}: {}", input_file.display(), e)))?;

    Ok(output_path)
}

fn gzip(input: &Path, output: &Path) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(input)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(output)?), Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()
}
