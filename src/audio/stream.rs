//! Duplex stream collaborator seen by the loopback engine.
//!
//! The engine only needs the negotiated formats and a start/stop lifecycle.
//! Callback scheduling belongs to the implementation: [`super::CpalDuplex`]
//! for real devices and [`OfflineDuplex`] when no hardware is involved.

use super::engine::DuplexLoopback;
use thiserror::Error;

/// Negotiated format of one direction of a duplex stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: usize,
}

impl StreamFormat {
    pub const fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Hz, {} ch", self.sample_rate, self.channels)
    }
}

/// Channel counts in effect for a single callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCounts {
    pub input: usize,
    pub output: usize,
}

/// What the callback asks of the stream after a buffer period. The loopback
/// never asks a stream to stop from the audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Continue,
}

/// Errors from opening, starting or stopping a duplex stream.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("no default {0} device available")]
    NoDefaultDevice(&'static str),

    #[error("audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate audio devices: {0}")]
    Enumerate(String),

    #[error("failed to get device config: {0}")]
    Config(String),

    #[error("failed to build audio stream: {0}")]
    Build(String),

    #[error("failed to start audio stream: {0}")]
    Play(String),

    #[error("failed to stop audio stream: {0}")]
    Pause(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("stream refused to start: {0}")]
    Refused(String),
}

/// Audio-engine side of the loopback: formats plus lifecycle.
pub trait DuplexStream {
    fn output_format(&self) -> StreamFormat;
    fn input_format(&self) -> StreamFormat;
    fn start(&mut self) -> Result<(), StreamError>;
    fn stop(&mut self) -> Result<(), StreamError>;
}

/// Device-free duplex stream driven by explicit [`OfflineDuplex::pump`] calls.
#[derive(Debug, Clone)]
pub struct OfflineDuplex {
    output: StreamFormat,
    input: StreamFormat,
    fail_next_start: Option<String>,
}

impl OfflineDuplex {
    pub fn new(output: StreamFormat, input: StreamFormat) -> Self {
        Self {
            output,
            input,
            fail_next_start: None,
        }
    }

    /// Make the next `start` fail with `reason`.
    pub fn fail_next_start(&mut self, reason: impl Into<String>) {
        self.fail_next_start = Some(reason.into());
    }

    /// Run one callback period: feed `input` (interleaved at the input
    /// format) and return `output_frames` frames of produced output.
    pub fn pump(
        &self,
        engine: &mut DuplexLoopback,
        input: &[f32],
        output_frames: usize,
    ) -> Vec<f32> {
        let channels = ChannelCounts {
            input: self.input.channels,
            output: self.output.channels,
        };
        let input_frames = input.len() / channels.input.max(1);
        let mut output = vec![0.0; output_frames * channels.output];
        engine.process(input, input_frames, &mut output, output_frames, channels);
        output
    }
}

impl DuplexStream for OfflineDuplex {
    fn output_format(&self) -> StreamFormat {
        self.output
    }

    fn input_format(&self) -> StreamFormat {
        self.input
    }

    fn start(&mut self) -> Result<(), StreamError> {
        if let Some(reason) = self.fail_next_start.take() {
            return Err(StreamError::Refused(reason));
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        Ok(())
    }
}
