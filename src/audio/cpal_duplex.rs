//! Duplex stream over a pair of CPAL devices.
//!
//! CPAL opens input and output as separate streams. Captured frames cross to
//! the output callback through a lock-free ring, and the output callback is
//! what drives the engine, so one callback sees both directions.

use super::dispatch::{
    f32_to_i16, f32_to_u16, i16_to_f32, u16_to_f32, InputBridge, OutputPump,
};
use super::engine::{DuplexLoopback, LoopbackMonitor};
use super::stream::{ChannelCounts, DuplexStream, StreamError, StreamFormat};
use crate::{lock_or_recover, log_debug};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use rtrb::RingBuffer;
use std::sync::{Arc, Mutex};

/// Captured audio the ring can hold before input frames are dropped.
const RING_MILLIS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

/// List microphone names so the CLI can offer a selector.
pub fn list_input_devices() -> Result<Vec<String>, StreamError> {
    list_devices(Direction::Input)
}

/// List playback device names.
pub fn list_output_devices() -> Result<Vec<String>, StreamError> {
    list_devices(Direction::Output)
}

fn list_devices(direction: Direction) -> Result<Vec<String>, StreamError> {
    let host = cpal::default_host();
    let devices = match direction {
        Direction::Input => host.input_devices(),
        Direction::Output => host.output_devices(),
    }
    .map_err(|err| StreamError::Enumerate(err.to_string()))?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

fn find_device(
    host: &cpal::Host,
    direction: Direction,
    preferred: Option<&str>,
) -> Result<cpal::Device, StreamError> {
    match preferred {
        Some(name) => {
            let mut devices = match direction {
                Direction::Input => host.input_devices(),
                Direction::Output => host.output_devices(),
            }
            .map_err(|err| StreamError::Enumerate(err.to_string()))?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| StreamError::DeviceNotFound(name.to_string()))
        }
        None => match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        }
        .ok_or(StreamError::NoDefaultDevice(direction.label())),
    }
}

struct DeviceSide {
    device: cpal::Device,
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl DeviceSide {
    fn open(
        host: &cpal::Host,
        direction: Direction,
        preferred: Option<&str>,
    ) -> Result<Self, StreamError> {
        let device = find_device(host, direction, preferred)?;
        let supported = match direction {
            Direction::Input => device.default_input_config(),
            Direction::Output => device.default_output_config(),
        }
        .map_err(|err| StreamError::Config(err.to_string()))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();
        log_debug(&format!(
            "CpalDuplex {} '{}': format={sample_format:?} sample_rate={}Hz channels={}",
            direction.label(),
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate.0,
            config.channels
        ));
        Ok(Self {
            device,
            config,
            sample_format,
        })
    }

    fn format(&self) -> StreamFormat {
        StreamFormat::new(self.config.sample_rate.0, usize::from(self.config.channels.max(1)))
    }

    fn name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string())
    }
}

/// Input/output device pair driving a shared [`DuplexLoopback`].
pub struct CpalDuplex {
    engine: Arc<Mutex<DuplexLoopback>>,
    monitor: LoopbackMonitor,
    input: DeviceSide,
    output: DeviceSide,
    streams: Option<(Stream, Stream)>,
}

impl CpalDuplex {
    /// Resolve devices and their default configs. Nothing is opened until
    /// [`DuplexStream::start`].
    pub fn open(
        engine: Arc<Mutex<DuplexLoopback>>,
        input_device: Option<&str>,
        output_device: Option<&str>,
    ) -> Result<Self, StreamError> {
        let host = cpal::default_host();
        let input = DeviceSide::open(&host, Direction::Input, input_device)?;
        let output = DeviceSide::open(&host, Direction::Output, output_device)?;
        let monitor = lock_or_recover(&engine, "CpalDuplex::open").monitor();
        Ok(Self {
            engine,
            monitor,
            input,
            output,
            streams: None,
        })
    }

    pub fn input_device_name(&self) -> String {
        self.input.name()
    }

    pub fn output_device_name(&self) -> String {
        self.output.name()
    }

    fn build_streams(&self) -> Result<(Stream, Stream), StreamError> {
        let input_format = self.input.format();
        let output_format = self.output.format();
        let ring_frames = (input_format.sample_rate as usize * RING_MILLIS / 1000).max(1024);
        let (producer, consumer) = RingBuffer::<f32>::new(ring_frames * input_format.channels);

        let bridge = InputBridge::new(producer, input_format.channels, self.monitor.clone());
        let pump = OutputPump::new(
            Arc::clone(&self.engine),
            consumer,
            ChannelCounts {
                input: input_format.channels,
                output: output_format.channels,
            },
            self.monitor.clone(),
        );

        let input_stream = build_input_stream(&self.input, bridge)?;
        let output_stream = build_output_stream(&self.output, pump)?;
        Ok((input_stream, output_stream))
    }
}

impl DuplexStream for CpalDuplex {
    fn output_format(&self) -> StreamFormat {
        self.output.format()
    }

    fn input_format(&self) -> StreamFormat {
        self.input.format()
    }

    fn start(&mut self) -> Result<(), StreamError> {
        if self.streams.is_some() {
            return Ok(());
        }
        let (input_stream, output_stream) = self.build_streams()?;
        input_stream
            .play()
            .map_err(|err| StreamError::Play(format!("input: {err}")))?;
        output_stream
            .play()
            .map_err(|err| StreamError::Play(format!("output: {err}")))?;
        self.streams = Some((input_stream, output_stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        let Some((input_stream, output_stream)) = self.streams.take() else {
            return Ok(());
        };
        let output_result = output_stream
            .pause()
            .map_err(|err| StreamError::Pause(format!("output: {err}")));
        let input_result = input_stream
            .pause()
            .map_err(|err| StreamError::Pause(format!("input: {err}")));
        drop(output_stream);
        drop(input_stream);
        output_result.and(input_result)
    }
}

fn build_input_stream(side: &DeviceSide, mut bridge: InputBridge) -> Result<Stream, StreamError> {
    let err_fn = |err: cpal::StreamError| log_debug(&format!("audio_stream_error(input): {err}"));
    let stream = match side.sample_format {
        SampleFormat::F32 => side.device.build_input_stream(
            &side.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| bridge.push(data, |sample| sample),
            err_fn,
            None,
        ),
        SampleFormat::I16 => side.device.build_input_stream(
            &side.config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| bridge.push(data, i16_to_f32),
            err_fn,
            None,
        ),
        SampleFormat::U16 => side.device.build_input_stream(
            &side.config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| bridge.push(data, u16_to_f32),
            err_fn,
            None,
        ),
        other => return Err(StreamError::UnsupportedFormat(format!("{other:?}"))),
    };
    stream.map_err(|err| StreamError::Build(format!("input: {err}")))
}

fn build_output_stream(side: &DeviceSide, mut pump: OutputPump) -> Result<Stream, StreamError> {
    let err_fn = |err: cpal::StreamError| log_debug(&format!("audio_stream_error(output): {err}"));
    let stream = match side.sample_format {
        SampleFormat::F32 => side.device.build_output_stream(
            &side.config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                pump.render(data, |sample| sample)
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => side.device.build_output_stream(
            &side.config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| pump.render(data, f32_to_i16),
            err_fn,
            None,
        ),
        SampleFormat::U16 => side.device.build_output_stream(
            &side.config,
            move |data: &mut [u16], _: &cpal::OutputCallbackInfo| pump.render(data, f32_to_u16),
            err_fn,
            None,
        ),
        other => return Err(StreamError::UnsupportedFormat(format!("{other:?}"))),
    };
    stream.map_err(|err| StreamError::Build(format!("output: {err}")))
}
