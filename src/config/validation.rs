use super::defaults::MAX_DEVICE_NAME_BYTES;
use super::{AppConfig, MAX_RECORD_SECONDS_LIMIT, MAX_STATUS_INTERVAL_MS, MIN_STATUS_INTERVAL_MS};
use anyhow::{bail, Context, Result};
use clap::Parser;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize paths.
    pub fn validate(&mut self) -> Result<()> {
        if !(1..=MAX_RECORD_SECONDS_LIMIT).contains(&self.max_record_seconds) {
            bail!(
                "--max-record-seconds must be between 1 and {MAX_RECORD_SECONDS_LIMIT}, got {}",
                self.max_record_seconds
            );
        }
        if self.duration_secs == 0 || self.duration_secs > u64::from(self.max_record_seconds) {
            bail!(
                "--duration-secs must be between 1 and --max-record-seconds ({}), got {}",
                self.max_record_seconds,
                self.duration_secs
            );
        }
        if !(MIN_STATUS_INTERVAL_MS..=MAX_STATUS_INTERVAL_MS).contains(&self.status_interval_ms) {
            bail!(
                "--status-interval-ms must be between {MIN_STATUS_INTERVAL_MS} and {MAX_STATUS_INTERVAL_MS}, got {}",
                self.status_interval_ms
            );
        }
        if !self.peak_decay.is_finite() || self.peak_decay <= 0.0 || self.peak_decay >= 1.0 {
            bail!(
                "--peak-decay must be greater than 0.0 and less than 1.0, got {}",
                self.peak_decay
            );
        }

        validate_device_name(self.input_device.as_deref(), "--input-device")?;
        validate_device_name(self.output_device.as_deref(), "--output-device")?;
        if self.offline && (self.input_device.is_some() || self.output_device.is_some()) {
            bail!("--offline cannot be combined with --input-device or --output-device");
        }

        if self.list_devices {
            return Ok(());
        }

        let Some(input_file) = &mut self.input_file else {
            bail!("--input-file is required (a WAV clip to play)");
        };
        let canonical = input_file
            .canonicalize()
            .with_context(|| format!("input file '{}' does not exist", input_file.display()))?;
        if !canonical.is_file() {
            bail!("input file '{}' is not a file", canonical.display());
        }
        *input_file = canonical;

        if !self.no_export && self.export_dir.exists() && !self.export_dir.is_dir() {
            bail!(
                "--export-dir '{}' exists but is not a directory",
                self.export_dir.display()
            );
        }

        Ok(())
    }
}

/// Device names are matched verbatim; reject anything that cannot be one.
pub(super) fn validate_device_name(name: Option<&str>, flag: &str) -> Result<()> {
    let Some(name) = name else {
        return Ok(());
    };
    if name.trim().is_empty() {
        bail!("{flag} must not be empty");
    }
    if name.len() > MAX_DEVICE_NAME_BYTES || name.chars().any(char::is_control) {
        bail!("{flag} must be <={MAX_DEVICE_NAME_BYTES} bytes with no control characters");
    }
    Ok(())
}
