use anyhow::{Context, Result};
use crossbeam_channel::{after, select, tick};
use hfp_loopback::audio::{list_input_devices, list_output_devices};
use hfp_loopback::config::AppConfig;
use hfp_loopback::{
    init_logging, log_debug, log_file_path, log_panic, LoopbackSession, StatusSnapshot,
};
use std::env;
use std::panic;
use std::time::{Duration, Instant};

/// Comma-separated device names that replace enumeration (tests, CI boxes).
const TEST_DEVICES_ENV: &str = "HFP_LOOPBACK_TEST_DEVICES";

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    if config.list_devices {
        print!("{}", device_listing());
        return Ok(());
    }

    init_logging(&config);
    install_panic_hook();
    log_debug("=== HFP Loopback Started ===");
    log_debug(&format!("Log file: {:?}", log_file_path()));

    let result = run(&config);

    log_debug("=== HFP Loopback Exiting ===");
    if let Err(ref e) = result {
        log_debug(&format!("Exit with error: {e:#}"));
    }
    result
}

fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        log_panic(info);
        previous(info);
    }));
}

fn run(config: &AppConfig) -> Result<()> {
    let mut session = if config.offline {
        LoopbackSession::offline(config)
    } else {
        LoopbackSession::with_devices(config)?
    };

    let input_file = config
        .input_file
        .as_deref()
        .context("--input-file is required")?;
    let clip = session.load_file(input_file)?;
    println!(
        "Loaded {} ({} frames, {} ch, {} Hz)",
        input_file.display(),
        clip.frame_count,
        clip.channels,
        clip.sample_rate
    );

    session.start()?;
    println!(
        "Loopback running for {}s{}{}",
        config.duration_secs,
        if session.loop_mode() { ", looping" } else { "" },
        if session.is_offline() { " (offline)" } else { "" }
    );

    let run_result = run_until_deadline(&mut session, config);
    session.stop()?;
    run_result?;

    print_status(&session.status(), config.json_status)?;

    if !config.no_export {
        let played = session.export_played(&config.export_dir)?;
        println!("Wrote {} ({} bytes)", played.path.display(), played.bytes);
        let recorded = session.export_recorded(&config.export_dir)?;
        println!("Wrote {} ({} bytes)", recorded.path.display(), recorded.bytes);
    }
    Ok(())
}

fn run_until_deadline(session: &mut LoopbackSession, config: &AppConfig) -> Result<()> {
    let ticker = tick(Duration::from_millis(config.status_interval_ms));
    let deadline = after(Duration::from_secs(config.duration_secs));
    let mut last_pump = Instant::now();

    loop {
        select! {
            recv(ticker) -> _ => {
                let now = Instant::now();
                session.pump_offline(now.duration_since(last_pump));
                last_pump = now;
                print_status(&session.status(), config.json_status)?;
            }
            recv(deadline) -> _ => {
                session.pump_offline(last_pump.elapsed());
                return Ok(());
            }
        }
    }
}

fn print_status(status: &StatusSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", status.to_json()?);
    } else {
        println!("{status}\n");
    }
    Ok(())
}

fn test_devices() -> Option<Vec<String>> {
    let raw = env::var(TEST_DEVICES_ENV).ok()?;
    Some(
        raw.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
    )
}

fn device_listing() -> String {
    let (inputs, outputs) = match test_devices() {
        Some(devices) => (devices.clone(), devices),
        None => (
            list_input_devices().unwrap_or_else(|err| {
                eprintln!("Failed to list audio input devices: {err}");
                Vec::new()
            }),
            list_output_devices().unwrap_or_else(|err| {
                eprintln!("Failed to list audio output devices: {err}");
                Vec::new()
            }),
        ),
    };

    let mut output = String::new();
    append_devices(&mut output, "input", &inputs);
    append_devices(&mut output, "output", &outputs);
    output
}

fn append_devices(output: &mut String, direction: &str, devices: &[String]) {
    if devices.is_empty() {
        output.push_str(&format!("No audio {direction} devices detected.\n"));
    } else {
        output.push_str(&format!("Available audio {direction} devices:\n"));
        for name in devices {
            output.push_str(&format!("  - {name}\n"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn with_test_devices(value: Option<&str>, action: impl FnOnce() -> String) -> String {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        let _guard = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = env::var(TEST_DEVICES_ENV).ok();
        match value {
            Some(value) => env::set_var(TEST_DEVICES_ENV, value),
            None => env::remove_var(TEST_DEVICES_ENV),
        }

        let output = action();

        match previous {
            Some(previous) => env::set_var(TEST_DEVICES_ENV, previous),
            None => env::remove_var(TEST_DEVICES_ENV),
        }
        output
    }

    #[test]
    fn device_listing_uses_test_devices() {
        let output = with_test_devices(Some("Headset Mic, Car Kit"), device_listing);
        assert!(output.contains("Available audio input devices:"));
        assert!(output.contains("Available audio output devices:"));
        assert!(output.contains("  - Headset Mic\n"));
        assert!(output.contains("  - Car Kit\n"));
    }

    #[test]
    fn device_listing_reports_empty_lists() {
        let output = with_test_devices(Some(" "), device_listing);
        assert!(output.contains("No audio input devices detected."));
        assert!(output.contains("No audio output devices detected."));
    }

    #[test]
    fn append_devices_indents_names() {
        let mut output = String::new();
        append_devices(&mut output, "input", &["Mic A".to_string()]);
        assert_eq!(output, "Available audio input devices:\n  - Mic A\n");
    }
}
