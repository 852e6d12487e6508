use crate::audio::{
    peak_to_db, read_wav, write_recording, AudioClip, CpalDuplex, DuplexLoopback, DuplexStream,
    LoopbackMonitor, OfflineDuplex,
};
use crate::config::{AppConfig, OFFLINE_CALLBACK_MS, OFFLINE_INPUT_FORMAT, OFFLINE_OUTPUT_FORMAT};
use crate::{lock_or_recover, log_debug};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Level the simulated microphone hears the played signal at.
const OFFLINE_ECHO_GAIN: f32 = 0.5;

/// What is currently loaded for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipInfo {
    pub source: Option<PathBuf>,
    pub frame_count: usize,
    pub channels: usize,
    pub sample_rate: u32,
}

/// Point-in-time view of a session, for the status line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub started: bool,
    pub loop_mode: bool,
    pub played_frames: u64,
    pub recorded_frames: u64,
    pub playback_position: u64,
    pub clip_frames: Option<usize>,
    pub skipped_callbacks: u64,
    pub dropped_input_frames: u64,
    pub peaks: Vec<f32>,
}

impl StatusSnapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize status")
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.running { "Running" } else { "Stopped" };
        writeln!(f, "Status: {state}")?;
        writeln!(f, "Played frames: {}", self.played_frames)?;
        writeln!(f, "Recorded frames: {}", self.recorded_frames)?;
        match self.clip_frames {
            Some(total) => writeln!(f, "Cursor: {} / {total}", self.playback_position)?,
            None => writeln!(f, "Cursor: {}", self.playback_position)?,
        }
        if self.skipped_callbacks > 0 || self.dropped_input_frames > 0 {
            writeln!(
                f,
                "Skipped callbacks: {}, dropped input frames: {}",
                self.skipped_callbacks, self.dropped_input_frames
            )?;
        }
        if self.peaks.is_empty() {
            write!(f, "Peaks: -")
        } else {
            let peaks: Vec<String> = self
                .peaks
                .iter()
                .enumerate()
                .map(|(ch, level)| format!("ch{ch} {:.1} dBFS", peak_to_db(*level)))
                .collect();
            write!(f, "Peaks: {}", peaks.join(", "))
        }
    }
}

/// A WAV file written by an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedWav {
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordingKind {
    Played,
    Recorded,
}

impl RecordingKind {
    fn label(self) -> &'static str {
        match self {
            RecordingKind::Played => "played",
            RecordingKind::Recorded => "recorded",
        }
    }
}

/// Simulated link for `--offline`: callbacks run on the control thread and
/// the microphone hears the previous period's output.
struct OfflineDriver {
    link: OfflineDuplex,
    pending: Duration,
    last_output: Vec<f32>,
}

impl OfflineDriver {
    fn new(link: OfflineDuplex) -> Self {
        Self {
            link,
            pending: Duration::ZERO,
            last_output: Vec::new(),
        }
    }

    fn period() -> Duration {
        Duration::from_millis(OFFLINE_CALLBACK_MS)
    }

    fn frames_per_period(sample_rate: u32) -> usize {
        (u64::from(sample_rate) * OFFLINE_CALLBACK_MS / 1000) as usize
    }

    fn echo_input(&self) -> Vec<f32> {
        let input = self.link.input_format();
        let output = self.link.output_format();
        let in_frames = Self::frames_per_period(input.sample_rate);
        let out_frames = Self::frames_per_period(output.sample_rate);
        let mut samples = vec![0.0; in_frames * input.channels];
        if self.last_output.is_empty() || in_frames == 0 {
            return samples;
        }
        for (frame_index, frame) in samples.chunks_exact_mut(input.channels).enumerate() {
            let source_frame = frame_index * out_frames / in_frames;
            let value = self
                .last_output
                .get(source_frame * output.channels)
                .copied()
                .unwrap_or(0.0);
            frame.fill(value * OFFLINE_ECHO_GAIN);
        }
        samples
    }

    fn run(&mut self, engine: &mut DuplexLoopback, elapsed: Duration) -> usize {
        self.pending += elapsed;
        let out_frames = Self::frames_per_period(self.link.output_format().sample_rate);
        let mut callbacks = 0;
        while self.pending >= Self::period() {
            self.pending -= Self::period();
            let input = self.echo_input();
            self.last_output = self.link.pump(engine, &input, out_frames);
            callbacks += 1;
        }
        callbacks
    }

    fn reset(&mut self) {
        self.pending = Duration::ZERO;
        self.last_output.clear();
    }
}

/// Control-thread owner of a loopback run: load, start, poll, stop, export.
pub struct LoopbackSession {
    engine: Arc<Mutex<DuplexLoopback>>,
    monitor: LoopbackMonitor,
    stream: Box<dyn DuplexStream>,
    offline: Option<OfflineDriver>,
    clip: Option<ClipInfo>,
    log_timings: bool,
    started_at: Option<Instant>,
}

impl LoopbackSession {
    /// Session over the default (or named) CPAL devices.
    pub fn with_devices(config: &AppConfig) -> Result<Self> {
        let engine = Arc::new(Mutex::new(DuplexLoopback::new(config.loopback_options())));
        let duplex = CpalDuplex::open(
            Arc::clone(&engine),
            config.input_device.as_deref(),
            config.output_device.as_deref(),
        )
        .context("failed to open audio devices")?;
        log_debug(&format!(
            "LoopbackSession devices: input='{}' output='{}'",
            duplex.input_device_name(),
            duplex.output_device_name()
        ));
        Ok(Self::assemble(config, engine, Box::new(duplex), None))
    }

    /// Session over the simulated HFP link.
    pub fn offline(config: &AppConfig) -> Self {
        Self::offline_with_link(
            config,
            OfflineDuplex::new(OFFLINE_OUTPUT_FORMAT, OFFLINE_INPUT_FORMAT),
        )
    }

    /// Session over a caller-supplied simulated link.
    pub fn offline_with_link(config: &AppConfig, link: OfflineDuplex) -> Self {
        let engine = Arc::new(Mutex::new(DuplexLoopback::new(config.loopback_options())));
        let driver = OfflineDriver::new(link.clone());
        Self::assemble(config, engine, Box::new(link), Some(driver))
    }

    fn assemble(
        config: &AppConfig,
        engine: Arc<Mutex<DuplexLoopback>>,
        stream: Box<dyn DuplexStream>,
        offline: Option<OfflineDriver>,
    ) -> Self {
        let monitor = lock_or_recover(&engine, "LoopbackSession::assemble").monitor();
        monitor.set_loop_mode(config.loop_playback());
        Self {
            engine,
            monitor,
            stream,
            offline,
            clip: None,
            log_timings: config.log_timings,
            started_at: None,
        }
    }

    pub fn monitor(&self) -> LoopbackMonitor {
        self.monitor.clone()
    }

    pub fn clip(&self) -> Option<&ClipInfo> {
        self.clip.as_ref()
    }

    pub fn is_offline(&self) -> bool {
        self.offline.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.monitor.is_running()
    }

    /// Decode a WAV file and make it the playback buffer.
    pub fn load_file(&mut self, path: &Path) -> Result<&ClipInfo> {
        let load_start = Instant::now();
        let clip = read_wav(path).with_context(|| format!("failed to read '{}'", path.display()))?;
        if self.log_timings {
            log_debug(&format!(
                "timing|phase=wav_decode|frames={}|channels={}|elapsed_ms={:.2}",
                clip.frame_count,
                clip.channels,
                load_start.elapsed().as_secs_f64() * 1000.0
            ));
        }
        self.install_clip(&clip, Some(path.to_path_buf()))
    }

    /// Make an in-memory clip the playback buffer.
    pub fn load_clip(&mut self, clip: &AudioClip) -> Result<&ClipInfo> {
        self.install_clip(clip, None)
    }

    fn install_clip(&mut self, clip: &AudioClip, source: Option<PathBuf>) -> Result<&ClipInfo> {
        let output_rate = self.stream.output_format().sample_rate;
        lock_or_recover(&self.engine, "LoopbackSession::load")
            .load_audio_data(&clip.samples, clip.frame_count, clip.channels, clip.sample_rate)
            .context("failed to load audio data")?;
        if clip.sample_rate != output_rate {
            log_debug(&format!(
                "clip is {} Hz but output runs at {output_rate} Hz; playing without resampling",
                clip.sample_rate
            ));
        }
        tracing::info!(
            frames = clip.frame_count,
            channels = clip.channels,
            sample_rate = clip.sample_rate,
            "loopback_clip_loaded"
        );
        Ok(&*self.clip.insert(ClipInfo {
            source,
            frame_count: clip.frame_count,
            channels: clip.channels,
            sample_rate: clip.sample_rate,
        }))
    }

    pub fn set_loop_mode(&self, enabled: bool) {
        self.monitor.set_loop_mode(enabled);
    }

    pub fn loop_mode(&self) -> bool {
        self.monitor.loop_mode()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.clip.is_none() {
            bail!("no audio loaded; load a WAV file before starting");
        }
        if self.is_running() {
            bail!("loopback is already running");
        }
        let start = Instant::now();
        {
            let mut engine = lock_or_recover(&self.engine, "LoopbackSession::start");
            engine
                .start(&mut *self.stream)
                .context("failed to start duplex stream")?;
        }
        if let Some(driver) = self.offline.as_mut() {
            driver.reset();
        }
        self.started_at = Some(start);
        if self.log_timings {
            log_debug(&format!(
                "timing|phase=loopback_start|elapsed_ms={:.2}",
                start.elapsed().as_secs_f64() * 1000.0
            ));
        }
        tracing::info!(
            output = %self.stream.output_format(),
            input = %self.stream.input_format(),
            loop_mode = self.loop_mode(),
            "loopback_started"
        );
        Ok(())
    }

    /// Stop the stream. Stopping an idle session is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        let result = lock_or_recover(&self.engine, "LoopbackSession::stop").stop(&mut *self.stream);
        let run_ms = self
            .started_at
            .take()
            .map(|at| at.elapsed().as_millis())
            .unwrap_or_default();
        if self.log_timings {
            log_debug(&format!(
                "timing|phase=loopback_run|elapsed_ms={run_ms}|played={}|recorded={}|skipped={}|dropped={}",
                self.monitor.played_frame_count(),
                self.monitor.recorded_frame_count(),
                self.monitor.skipped_callbacks(),
                self.monitor.dropped_input_frames()
            ));
        }
        tracing::info!(
            played = self.monitor.played_frame_count(),
            recorded = self.monitor.recorded_frame_count(),
            run_ms = run_ms as u64,
            "loopback_stopped"
        );
        result.context("failed to stop duplex stream")
    }

    /// Advance the simulated link by `elapsed`, running one callback per
    /// whole period. Returns the number of callbacks run.
    pub fn pump_offline(&mut self, elapsed: Duration) -> usize {
        if !self.is_running() {
            return 0;
        }
        let Some(driver) = self.offline.as_mut() else {
            return 0;
        };
        let mut engine = lock_or_recover(&self.engine, "LoopbackSession::pump_offline");
        driver.run(&mut engine, elapsed)
    }

    pub fn status(&self) -> StatusSnapshot {
        let peaks = if self.monitor.has_started() {
            self.monitor.peak_levels()
        } else {
            Vec::new()
        };
        StatusSnapshot {
            running: self.monitor.is_running(),
            started: self.monitor.has_started(),
            loop_mode: self.monitor.loop_mode(),
            played_frames: self.monitor.played_frame_count(),
            recorded_frames: self.monitor.recorded_frame_count(),
            playback_position: self.monitor.playback_position(),
            clip_frames: self.clip.as_ref().map(|clip| clip.frame_count),
            skipped_callbacks: self.monitor.skipped_callbacks(),
            dropped_input_frames: self.monitor.dropped_input_frames(),
            peaks,
        }
    }

    /// Write what went out to the output device.
    pub fn export_played(&self, dir: &Path) -> Result<ExportedWav> {
        self.export(RecordingKind::Played, dir)
    }

    /// Write what came in from the input device.
    pub fn export_recorded(&self, dir: &Path) -> Result<ExportedWav> {
        self.export(RecordingKind::Recorded, dir)
    }

    fn export(&self, kind: RecordingKind, dir: &Path) -> Result<ExportedWav> {
        if self.is_running() {
            bail!("stop the loopback before exporting the {} audio", kind.label());
        }
        let engine = lock_or_recover(&self.engine, "LoopbackSession::export");
        let (recording, format) = match kind {
            RecordingKind::Played => (engine.played_recording(), engine.output_format()),
            RecordingKind::Recorded => (engine.recorded_recording(), engine.input_format()),
        };
        let (Some(recording), Some(format)) = (recording, format) else {
            bail!("nothing {} yet; start the loopback first", kind.label());
        };

        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create export dir '{}'", dir.display()))?;
        let path = dir.join(format!("hfp_{}_{}.wav", kind.label(), export_stamp()));
        let bytes = write_recording(recording, format.sample_rate, &path)
            .with_context(|| format!("failed to export {} audio", kind.label()))?;
        if recording.frames_dropped() > 0 {
            log_debug(&format!(
                "{} recording overflowed: kept {} frames, dropped {}",
                kind.label(),
                recording.frames_written(),
                recording.frames_dropped()
            ));
        }
        tracing::info!(
            kind = kind.label(),
            frames = recording.frames_written(),
            bytes,
            path = %path.display(),
            "loopback_exported"
        );
        Ok(ExportedWav { path, bytes })
    }
}

impl Drop for LoopbackSession {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log_debug(&format!("LoopbackSession drop: {err:#}"));
        }
    }
}

fn export_stamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}_{:03}", now.as_secs(), now.subsec_millis())
}
