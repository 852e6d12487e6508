use super::validation::validate_device_name;
use super::{AppConfig, DEFAULT_MAX_RECORD_SECONDS, DEFAULT_PEAK_DECAY};
use clap::Parser;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn scratch_clip() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let path = env::temp_dir().join(format!(
        "hfp_loopback_config_{}_{nanos}.wav",
        std::process::id()
    ));
    fs::write(&path, b"RIFF").expect("write placeholder clip");
    path
}

fn parse_with_clip(extra: &[&str]) -> (AppConfig, PathBuf) {
    let clip = scratch_clip();
    let clip_arg = clip.to_string_lossy().to_string();
    let mut args = vec!["test-app", "--input-file", clip_arg.as_str()];
    args.extend_from_slice(extra);
    (AppConfig::parse_from(args), clip)
}

#[test]
fn defaults_match_constants() {
    let cfg = AppConfig::parse_from(["test-app"]);
    assert_eq!(cfg.max_record_seconds, DEFAULT_MAX_RECORD_SECONDS);
    assert_eq!(cfg.peak_decay, DEFAULT_PEAK_DECAY);
    assert!(cfg.loop_playback());
    assert!(!cfg.logging_enabled());
    assert_eq!(cfg.loopback_options().max_record_seconds, 300);
}

#[test]
fn accepts_defaults_with_input_file() {
    let (mut cfg, clip) = parse_with_clip(&[]);
    assert!(cfg.validate().is_ok());
    assert!(cfg.input_file.as_ref().is_some_and(|path| path.is_absolute()));
    let _ = fs::remove_file(clip);
}

#[test]
fn requires_input_file_unless_listing_devices() {
    let mut cfg = AppConfig::parse_from(["test-app"]);
    let err = cfg.validate().expect_err("missing input file");
    assert!(err.to_string().contains("--input-file"));

    let mut cfg = AppConfig::parse_from(["test-app", "--list-devices"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_missing_input_file() {
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--input-file",
        "/definitely/not/here/clip.wav",
    ]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_max_record_seconds_out_of_bounds() {
    let (mut cfg, clip) = parse_with_clip(&["--max-record-seconds", "0"]);
    assert!(cfg.validate().is_err());
    let (mut cfg, clip2) = parse_with_clip(&["--max-record-seconds", "3601"]);
    assert!(cfg.validate().is_err());
    let _ = fs::remove_file(clip);
    let _ = fs::remove_file(clip2);
}

#[test]
fn duration_must_fit_recording_capacity() {
    let (mut cfg, clip) = parse_with_clip(&["--max-record-seconds", "5", "--duration-secs", "6"]);
    assert!(cfg.validate().is_err());
    let (mut cfg, clip2) = parse_with_clip(&["--max-record-seconds", "5", "--duration-secs", "5"]);
    assert!(cfg.validate().is_ok());
    let (mut cfg, clip3) = parse_with_clip(&["--duration-secs", "0"]);
    assert!(cfg.validate().is_err());
    for path in [clip, clip2, clip3] {
        let _ = fs::remove_file(path);
    }
}

#[test]
fn rejects_status_interval_out_of_bounds() {
    let (mut cfg, clip) = parse_with_clip(&["--status-interval-ms", "49"]);
    assert!(cfg.validate().is_err());
    let (mut cfg, clip2) = parse_with_clip(&["--status-interval-ms", "10001"]);
    assert!(cfg.validate().is_err());
    let _ = fs::remove_file(clip);
    let _ = fs::remove_file(clip2);
}

#[test]
fn rejects_peak_decay_outside_open_unit_interval() {
    for decay in ["0", "1", "1.5", "NaN"] {
        let (mut cfg, clip) = parse_with_clip(&["--peak-decay", decay]);
        assert!(cfg.validate().is_err(), "decay {decay} should be rejected");
        let _ = fs::remove_file(clip);
    }
}

#[test]
fn offline_conflicts_with_device_selection() {
    let (mut cfg, clip) = parse_with_clip(&["--offline", "--input-device", "Headset"]);
    assert!(cfg.validate().is_err());
    let _ = fs::remove_file(clip);
}

#[test]
fn export_dir_must_not_be_a_file() {
    let (mut cfg, clip) = parse_with_clip(&[]);
    cfg.export_dir = clip.clone();
    assert!(cfg.validate().is_err());
    cfg.no_export = true;
    assert!(cfg.validate().is_ok());
    let _ = fs::remove_file(clip);
}

#[test]
fn device_names_reject_control_characters() {
    assert!(validate_device_name(None, "--input-device").is_ok());
    assert!(validate_device_name(Some("Pixel Buds (HFP)"), "--input-device").is_ok());
    assert!(validate_device_name(Some("   "), "--input-device").is_err());
    assert!(validate_device_name(Some("bad\nname"), "--input-device").is_err());
    let long = "x".repeat(257);
    assert!(validate_device_name(Some(&long), "--output-device").is_err());
}

#[test]
fn no_logs_overrides_logs() {
    let cfg = AppConfig::parse_from(["test-app", "--logs", "--no-logs"]);
    assert!(!cfg.logging_enabled());
    let cfg = AppConfig::parse_from(["test-app", "--log-timings"]);
    assert!(cfg.logging_enabled());
}
