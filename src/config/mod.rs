//! Command-line parsing and validation helpers.

mod defaults;
#[cfg(test)]
mod tests;
mod validation;

use crate::audio::LoopbackOptions;
use clap::Parser;
use std::path::PathBuf;

pub use defaults::{
    DEFAULT_DURATION_SECS, DEFAULT_EXPORT_DIR, DEFAULT_MAX_RECORD_SECONDS, DEFAULT_PEAK_DECAY,
    DEFAULT_STATUS_INTERVAL_MS, MAX_RECORD_SECONDS_LIMIT, MAX_STATUS_INTERVAL_MS,
    MIN_STATUS_INTERVAL_MS, OFFLINE_CALLBACK_MS, OFFLINE_INPUT_FORMAT, OFFLINE_OUTPUT_FORMAT,
};

/// CLI options for the HFP loopback tester.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "hfp-loopback",
    about = "HFP loopback: play a WAV clip out while recording the microphone",
    author,
    version
)]
pub struct AppConfig {
    /// WAV file to play out of the output device
    #[arg(long = "input-file", value_name = "WAV")]
    pub input_file: Option<PathBuf>,

    /// Preferred audio input (microphone) device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Preferred audio output device name
    #[arg(long)]
    pub output_device: Option<String>,

    /// Print detected audio devices and exit
    #[arg(long = "list-devices", default_value_t = false)]
    pub list_devices: bool,

    /// Play the clip once, then output silence
    #[arg(long = "no-loop", default_value_t = false)]
    pub no_loop: bool,

    /// How long to run the loopback (seconds)
    #[arg(long = "duration-secs", default_value_t = DEFAULT_DURATION_SECS)]
    pub duration_secs: u64,

    /// Capacity of each recording (seconds)
    #[arg(long = "max-record-seconds", default_value_t = DEFAULT_MAX_RECORD_SECONDS)]
    pub max_record_seconds: u32,

    /// Directory that receives the played/recorded WAV files
    #[arg(long = "export-dir", default_value = DEFAULT_EXPORT_DIR)]
    pub export_dir: PathBuf,

    /// Skip WAV export after the run
    #[arg(long = "no-export", default_value_t = false)]
    pub no_export: bool,

    /// Status refresh interval (milliseconds)
    #[arg(long = "status-interval-ms", default_value_t = DEFAULT_STATUS_INTERVAL_MS)]
    pub status_interval_ms: u64,

    /// Per-sample decay of the input peak meters (0 < decay < 1)
    #[arg(long = "peak-decay", default_value_t = DEFAULT_PEAK_DECAY)]
    pub peak_decay: f32,

    /// Print status lines as JSON
    #[arg(long = "json-status", default_value_t = false)]
    pub json_status: bool,

    /// Run against a simulated 16 kHz mono / 48 kHz stereo link instead of devices
    #[arg(long, default_value_t = false)]
    pub offline: bool,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "HFP_LOOPBACK_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "HFP_LOOPBACK_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Enable verbose timing logs
    #[arg(long)]
    pub log_timings: bool,
}

impl AppConfig {
    pub fn logging_enabled(&self) -> bool {
        (self.logs || self.log_timings) && !self.no_logs
    }

    pub fn loop_playback(&self) -> bool {
        !self.no_loop
    }

    pub fn loopback_options(&self) -> LoopbackOptions {
        LoopbackOptions {
            max_record_seconds: self.max_record_seconds,
            peak_decay: self.peak_decay,
        }
    }
}
