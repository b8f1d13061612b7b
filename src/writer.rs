//! Persisting captured frames as WAV files

use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::Path;

use crate::audio::StreamFormat;
use crate::config::BITS_PER_SAMPLE;
use crate::producer::RecorderError;

/// Writes `frames` in order as 16-bit PCM into a new file at `path`.
///
/// Fails with an `AlreadyExists` I/O error rather than overwriting.
pub fn write_record(path: &Path, format: StreamFormat, frames: &[Vec<i16>]) -> Result<(), RecorderError> {
    let spec = WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: SampleFormat::Int,
    };

    let file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let mut writer = WavWriter::new(BufWriter::new(file), spec)?;

    for &sample in frames.iter().flatten() {
        writer.write_sample(sample)?;
    }

    writer.finalize()?;
    Ok(())
}
