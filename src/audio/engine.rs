//! Duplex loopback engine.
//!
//! Plays a loaded buffer to the output side of a duplex stream while the
//! input side is captured, metered and counted. Everything the control thread
//! may read while audio is running lives in [`LoopbackMonitor`] atomics; the
//! buffers themselves belong to whoever holds the engine.

use super::peak::{PeakDetector, PeakLevels, PeakSlots, DEFAULT_PEAK_DECAY};
use super::recording::MultiChannelRecording;
use super::stream::{CallbackResult, ChannelCounts, DuplexStream, StreamError, StreamFormat};
use crate::log_debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Longest capture kept per recording, in seconds.
pub const DEFAULT_MAX_RECORD_SECONDS: u32 = 300;

/// Returned by peak queries made before the first start.
pub const PEAK_NOT_STARTED: f64 = -1.0;

/// Returned by peak queries for a channel the input stream does not have.
pub const PEAK_INDEX_OUT_OF_RANGE: f64 = -2.0;

/// Status code for a successful load.
pub const LOAD_OK: i32 = 0;

/// Rejected playback load. The previous buffer is left in place.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("no sample data supplied")]
    MissingData,

    #[error("frame count must be positive")]
    ZeroFrames,

    #[error("channel count must be positive")]
    ZeroChannels,

    #[error("expected {expected} samples, got {actual}")]
    ShortData { expected: usize, actual: usize },

    #[error("{frames} frames of {channels} channels do not fit in memory")]
    TooLarge { frames: usize, channels: usize },
}

impl LoadError {
    /// Negative status code for callers that speak in integers.
    pub fn status_code(&self) -> i32 {
        -1
    }
}

/// Interleaved audio to loop out of the output stream.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    samples: Vec<f32>,
    frame_count: usize,
    channel_count: usize,
    sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[derive(Debug)]
struct LoopbackShared {
    loop_mode: AtomicBool,
    started: AtomicBool,
    running: AtomicBool,
    played_frames: AtomicU64,
    recorded_frames: AtomicU64,
    playback_position: AtomicU64,
    skipped_callbacks: AtomicU64,
    dropped_input_frames: AtomicU64,
    peaks: PeakLevels,
}

impl Default for LoopbackShared {
    fn default() -> Self {
        Self {
            loop_mode: AtomicBool::new(true),
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            played_frames: AtomicU64::new(0),
            recorded_frames: AtomicU64::new(0),
            playback_position: AtomicU64::new(0),
            skipped_callbacks: AtomicU64::new(0),
            dropped_input_frames: AtomicU64::new(0),
            peaks: PeakLevels::new(),
        }
    }
}

/// Cloneable, lock-free view of a running engine.
///
/// Reads are eventually consistent with the audio thread; callers are
/// expected to poll.
#[derive(Debug, Clone)]
pub struct LoopbackMonitor {
    shared: Arc<LoopbackShared>,
}

impl LoopbackMonitor {
    pub fn set_loop_mode(&self, enabled: bool) {
        self.shared.loop_mode.store(enabled, Ordering::Relaxed);
    }

    pub fn loop_mode(&self) -> bool {
        self.shared.loop_mode.load(Ordering::Relaxed)
    }

    pub fn has_started(&self) -> bool {
        self.shared.started.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    pub fn played_frame_count(&self) -> u64 {
        self.shared.played_frames.load(Ordering::Relaxed)
    }

    pub fn recorded_frame_count(&self) -> u64 {
        self.shared.recorded_frames.load(Ordering::Relaxed)
    }

    /// Playback cursor as of the last processed callback.
    pub fn playback_position(&self) -> u64 {
        self.shared.playback_position.load(Ordering::Relaxed)
    }

    pub fn skipped_callbacks(&self) -> u64 {
        self.shared.skipped_callbacks.load(Ordering::Relaxed)
    }

    pub fn dropped_input_frames(&self) -> u64 {
        self.shared.dropped_input_frames.load(Ordering::Relaxed)
    }

    /// Peak estimate for input channel `index`, or one of the negative
    /// sentinels when there is nothing to report.
    pub fn peak_level(&self, index: usize) -> f64 {
        if !self.has_started() {
            log_debug("peak_level() called before start()");
            return PEAK_NOT_STARTED;
        }
        match self.shared.peaks.get(index) {
            Some(level) => f64::from(level),
            None => {
                log_debug(&format!(
                    "peak_level(), index out of range, 0 <= {index} < {}",
                    self.shared.peaks.live_channels()
                ));
                PEAK_INDEX_OUT_OF_RANGE
            }
        }
    }

    pub fn peak_levels(&self) -> Vec<f32> {
        self.shared.peaks.snapshot()
    }

    pub(crate) fn note_skipped_callback(&self) {
        self.shared.skipped_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_dropped_input_frames(&self, frames: u64) {
        self.shared
            .dropped_input_frames
            .fetch_add(frames, Ordering::Relaxed);
    }
}

/// Tunables fixed for the life of an engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopbackOptions {
    pub max_record_seconds: u32,
    pub peak_decay: f32,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            max_record_seconds: DEFAULT_MAX_RECORD_SECONDS,
            peak_decay: DEFAULT_PEAK_DECAY,
        }
    }
}

/// Full-duplex playback/record engine.
pub struct DuplexLoopback {
    options: LoopbackOptions,
    playback: Option<PlaybackBuffer>,
    cursor: usize,
    played: Option<MultiChannelRecording>,
    recorded: Option<MultiChannelRecording>,
    detectors: Box<[PeakDetector]>,
    peak_slots: PeakSlots,
    output_format: Option<StreamFormat>,
    input_format: Option<StreamFormat>,
    shared: Arc<LoopbackShared>,
}

impl DuplexLoopback {
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            options,
            playback: None,
            cursor: 0,
            played: None,
            recorded: None,
            detectors: Box::default(),
            peak_slots: PeakSlots::empty(),
            output_format: None,
            input_format: None,
            shared: Arc::new(LoopbackShared::default()),
        }
    }

    pub fn options(&self) -> LoopbackOptions {
        self.options
    }

    pub fn monitor(&self) -> LoopbackMonitor {
        LoopbackMonitor {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Reset counters, size the recordings and detectors for the stream's
    /// negotiated formats, then start the stream.
    ///
    /// A stream start failure is returned as-is; the engine stays stopped.
    pub fn start<S>(&mut self, stream: &mut S) -> Result<(), StreamError>
    where
        S: DuplexStream + ?Sized,
    {
        let output = stream.output_format();
        let input = stream.input_format();

        self.cursor = 0;
        self.shared.played_frames.store(0, Ordering::Relaxed);
        self.shared.recorded_frames.store(0, Ordering::Relaxed);
        self.shared.playback_position.store(0, Ordering::Relaxed);
        self.shared.skipped_callbacks.store(0, Ordering::Relaxed);
        self.shared.dropped_input_frames.store(0, Ordering::Relaxed);

        let seconds = self.options.max_record_seconds;
        self.played = Some(MultiChannelRecording::new(
            output.channels,
            max_frames(seconds, output.sample_rate),
        ));
        self.recorded = Some(MultiChannelRecording::new(
            input.channels,
            max_frames(seconds, input.sample_rate),
        ));

        self.detectors = vec![PeakDetector::new(self.options.peak_decay); input.channels]
            .into_boxed_slice();
        self.peak_slots = self.shared.peaks.reset(input.channels);
        self.shared.started.store(true, Ordering::Relaxed);
        self.output_format = Some(output);
        self.input_format = Some(input);

        log_debug(&format!(
            "DuplexLoopback::start() - output: {output}; input: {input}"
        ));

        stream.start()?;
        self.shared.running.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Stop the stream. The engine is marked stopped even if the stream
    /// reports an error while pausing.
    pub fn stop<S>(&mut self, stream: &mut S) -> Result<(), StreamError>
    where
        S: DuplexStream + ?Sized,
    {
        let result = stream.stop();
        self.shared.running.store(false, Ordering::Relaxed);
        log_debug(&format!(
            "DuplexLoopback::stop() - played {} frames, recorded {} frames",
            self.played_frame_count(),
            self.recorded_frame_count()
        ));
        result
    }

    /// Replace the playback buffer with `frame_count` frames of
    /// `channel_count`-channel interleaved audio.
    pub fn load_audio_data(
        &mut self,
        samples: &[f32],
        frame_count: usize,
        channel_count: usize,
        sample_rate: u32,
    ) -> Result<(), LoadError> {
        if samples.is_empty() {
            return Err(LoadError::MissingData);
        }
        if frame_count == 0 {
            return Err(LoadError::ZeroFrames);
        }
        if channel_count == 0 {
            return Err(LoadError::ZeroChannels);
        }
        let total = frame_count
            .checked_mul(channel_count)
            .ok_or(LoadError::TooLarge {
                frames: frame_count,
                channels: channel_count,
            })?;
        if samples.len() < total {
            return Err(LoadError::ShortData {
                expected: total,
                actual: samples.len(),
            });
        }

        // Reuse the old allocation when it is large enough.
        let mut buffer = self
            .playback
            .take()
            .map(|old| old.samples)
            .unwrap_or_default();
        buffer.clear();
        buffer.extend_from_slice(&samples[..total]);

        self.playback = Some(PlaybackBuffer {
            samples: buffer,
            frame_count,
            channel_count,
            sample_rate,
        });
        self.cursor = 0;
        self.shared.playback_position.store(0, Ordering::Relaxed);

        log_debug(&format!(
            "DuplexLoopback::load_audio_data() - loaded {frame_count} frames, {channel_count} channels, {sample_rate} Hz"
        ));
        Ok(())
    }

    pub fn set_loop_mode(&self, enabled: bool) {
        self.shared.loop_mode.store(enabled, Ordering::Relaxed);
    }

    pub fn loop_mode(&self) -> bool {
        self.shared.loop_mode.load(Ordering::Relaxed)
    }

    pub fn peak_level(&self, index: usize) -> f64 {
        self.monitor().peak_level(index)
    }

    pub fn played_frame_count(&self) -> u64 {
        self.shared.played_frames.load(Ordering::Relaxed)
    }

    pub fn recorded_frame_count(&self) -> u64 {
        self.shared.recorded_frames.load(Ordering::Relaxed)
    }

    pub fn played_recording(&self) -> Option<&MultiChannelRecording> {
        self.played.as_ref()
    }

    pub fn recorded_recording(&self) -> Option<&MultiChannelRecording> {
        self.recorded.as_ref()
    }

    pub fn playback(&self) -> Option<&PlaybackBuffer> {
        self.playback.as_ref()
    }

    pub fn playback_position(&self) -> usize {
        self.cursor
    }

    pub fn output_format(&self) -> Option<StreamFormat> {
        self.output_format
    }

    pub fn input_format(&self) -> Option<StreamFormat> {
        self.input_format
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// One buffer period of duplex audio.
    ///
    /// Runs on the audio thread: no allocation, no locking, no logging, and
    /// never anything but `Continue`. Frame counts are clamped to what the
    /// slices can hold.
    pub fn process(
        &mut self,
        input: &[f32],
        num_input_frames: usize,
        output: &mut [f32],
        num_output_frames: usize,
        channels: ChannelCounts,
    ) -> CallbackResult {
        self.render_output(output, num_output_frames, channels.output);
        self.capture_input(input, num_input_frames, channels.input);
        CallbackResult::Continue
    }

    fn render_output(&mut self, output: &mut [f32], num_frames: usize, channels: usize) {
        if channels == 0 {
            return;
        }
        let frames = num_frames.min(output.len() / channels);
        let output = &mut output[..frames * channels];

        let Some(playback) = self.playback.as_ref() else {
            output.fill(0.0);
            return;
        };
        let source_channels = playback.channel_count;

        let mut produced = 0u64;
        let mut frame_index = 0;
        while frame_index < frames {
            if self.cursor >= playback.frame_count {
                if self.shared.loop_mode.load(Ordering::Relaxed) {
                    self.cursor = 0;
                } else {
                    output[frame_index * channels..].fill(0.0);
                    break;
                }
            }

            let frame = &mut output[frame_index * channels..(frame_index + 1) * channels];
            let source = &playback.samples[self.cursor * source_channels..];
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = source[ch % source_channels];
            }
            if let Some(recording) = self.played.as_mut() {
                recording.write_frame(frame);
            }

            self.cursor += 1;
            frame_index += 1;
            produced += 1;
        }

        self.shared
            .played_frames
            .fetch_add(produced, Ordering::Relaxed);
        self.shared
            .playback_position
            .store(self.cursor as u64, Ordering::Relaxed);
    }

    fn capture_input(&mut self, input: &[f32], num_frames: usize, channels: usize) {
        if channels == 0 {
            return;
        }
        let frames = num_frames.min(input.len() / channels);
        // A detector array sized for an older stream is tolerated, not trusted.
        let metered = channels.min(self.detectors.len());

        let input = &input[..frames * channels];
        if let Some(recording) = self.recorded.as_mut() {
            if recording.channel_count() == channels {
                recording.write(input, frames);
            } else {
                for frame in input.chunks_exact(channels) {
                    recording.write_frame(frame);
                }
            }
        }

        for frame in input.chunks_exact(channels) {
            for (detector, &sample) in self.detectors[..metered].iter_mut().zip(frame) {
                detector.process(sample);
            }
        }

        self.shared
            .recorded_frames
            .fetch_add(frames as u64, Ordering::Relaxed);
        if frames > 0 {
            self.peak_slots.publish(&self.detectors);
        }
    }
}

impl Default for DuplexLoopback {
    fn default() -> Self {
        Self::new(LoopbackOptions::default())
    }
}

fn max_frames(seconds: u32, sample_rate: u32) -> usize {
    (u64::from(seconds) * u64::from(sample_rate)) as usize
}
