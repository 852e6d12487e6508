use crate::audio::StreamFormat;

pub use crate::audio::{DEFAULT_MAX_RECORD_SECONDS, DEFAULT_PEAK_DECAY};

pub const DEFAULT_DURATION_SECS: u64 = 10;
pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 500;
pub const DEFAULT_EXPORT_DIR: &str = ".";

pub const MAX_RECORD_SECONDS_LIMIT: u32 = 3_600;
pub const MIN_STATUS_INTERVAL_MS: u64 = 50;
pub const MAX_STATUS_INTERVAL_MS: u64 = 10_000;
pub(super) const MAX_DEVICE_NAME_BYTES: usize = 256;

/// Simulated HFP link used by `--offline`: wideband speech in, device rate out.
pub const OFFLINE_OUTPUT_FORMAT: StreamFormat = StreamFormat::new(48_000, 2);
pub const OFFLINE_INPUT_FORMAT: StreamFormat = StreamFormat::new(16_000, 1);
pub const OFFLINE_CALLBACK_MS: u64 = 10;
