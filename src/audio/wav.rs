//! WAV import for the playback clip and export for captured recordings.

use super::recording::MultiChannelRecording;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WavError {
    #[error("failed to open '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("failed to decode '{}': {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("'{}' contains no audio frames", path.display())]
    Empty { path: PathBuf },

    #[error("unsupported WAV layout: {0}")]
    Unsupported(String),

    #[error("failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("failed to read size of '{}': {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Decoded audio, interleaved and normalized to [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub frame_count: usize,
    pub channels: usize,
    pub sample_rate: u32,
}

/// Decode a WAV file of any integer depth up to 32 bits, or 32-bit float.
pub fn read_wav(path: &Path) -> Result<AudioClip, WavError> {
    let mut reader = hound::WavReader::open(path).map_err(|source| WavError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels);
    if channels == 0 {
        return Err(WavError::Unsupported("zero channels".to_string()));
    }

    let decode_err = |source| WavError::Decode {
        path: path.to_path_buf(),
        source,
    };
    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(decode_err)?,
        (hound::SampleFormat::Int, bits @ 1..=32) => {
            let scale = (1u64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(decode_err)?
        }
        (format, bits) => {
            return Err(WavError::Unsupported(format!(
                "{format:?} samples at {bits} bits"
            )))
        }
    };

    let frame_count = samples.len() / channels;
    if frame_count == 0 {
        return Err(WavError::Empty {
            path: path.to_path_buf(),
        });
    }
    let mut samples = samples;
    samples.truncate(frame_count * channels);

    Ok(AudioClip {
        samples,
        frame_count,
        channels,
        sample_rate: spec.sample_rate,
    })
}

/// Write `recording` as a 32-bit float WAV and return the file size in bytes.
pub fn write_recording(
    recording: &MultiChannelRecording,
    sample_rate: u32,
    path: &Path,
) -> Result<u64, WavError> {
    let channels = u16::try_from(recording.channel_count()).map_err(|_| {
        WavError::Unsupported(format!("{} channels", recording.channel_count()))
    })?;
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let write_err = |source| WavError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(write_err)?;
    for &sample in recording.samples() {
        writer.write_sample(sample).map_err(write_err)?;
    }
    writer.finalize().map_err(write_err)?;

    std::fs::metadata(path)
        .map(|meta| meta.len())
        .map_err(|source| WavError::Metadata {
            path: path.to_path_buf(),
            source,
        })
}
