use super::engine::{DuplexLoopback, LoopbackMonitor};
use super::stream::ChannelCounts;
use rtrb::{Consumer, Producer};
use std::sync::{Arc, Mutex, TryLockError};

/// Largest output chunk handed to the engine in one call.
pub(super) const MAX_CALLBACK_FRAMES: usize = 4096;

pub(super) fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32_768.0
}

pub(super) fn u16_to_f32(sample: u16) -> f32 {
    (sample as f32 - 32_768.0) / 32_768.0
}

pub(super) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32_767.0) as i16
}

pub(super) fn f32_to_u16(sample: f32) -> u16 {
    (sample.clamp(-1.0, 1.0) * 32_767.0 + 32_768.0) as u16
}

/// Input-callback half: moves whole captured frames into the ring.
pub(super) struct InputBridge {
    producer: Producer<f32>,
    channels: usize,
    monitor: LoopbackMonitor,
}

impl InputBridge {
    pub(super) fn new(producer: Producer<f32>, channels: usize, monitor: LoopbackMonitor) -> Self {
        Self {
            producer,
            channels: channels.max(1),
            monitor,
        }
    }

    pub(super) fn push<T, F>(&mut self, data: &[T], mut convert: F)
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        let mut dropped = 0u64;
        for frame in data.chunks_exact(self.channels) {
            // Partial frames would shear every later frame, so drop whole ones.
            if self.producer.slots() < self.channels {
                dropped += 1;
                continue;
            }
            for &sample in frame {
                let _ = self.producer.push(convert(sample));
            }
        }
        if dropped > 0 {
            self.monitor.note_dropped_input_frames(dropped);
        }
    }
}

/// Output-callback half: drains captured input and drives the engine.
pub(super) struct OutputPump {
    engine: Arc<Mutex<DuplexLoopback>>,
    consumer: Consumer<f32>,
    channels: ChannelCounts,
    input_scratch: Vec<f32>,
    output_scratch: Vec<f32>,
    monitor: LoopbackMonitor,
}

impl OutputPump {
    pub(super) fn new(
        engine: Arc<Mutex<DuplexLoopback>>,
        consumer: Consumer<f32>,
        channels: ChannelCounts,
        monitor: LoopbackMonitor,
    ) -> Self {
        let channels = ChannelCounts {
            input: channels.input.max(1),
            output: channels.output.max(1),
        };
        let input_capacity = consumer.buffer().capacity();
        Self {
            engine,
            consumer,
            channels,
            input_scratch: Vec::with_capacity(input_capacity),
            output_scratch: Vec::with_capacity(MAX_CALLBACK_FRAMES * channels.output),
            monitor,
        }
    }

    pub(super) fn render<T, F>(&mut self, data: &mut [T], mut convert: F)
    where
        T: Copy,
        F: FnMut(f32) -> T,
    {
        let in_channels = self.channels.input;
        let out_channels = self.channels.output;

        let guard = match self.engine.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        };
        // Captured input stays in the ring until a period that can record it.
        let Some(mut engine) = guard else {
            let silence = convert(0.0);
            data.fill(silence);
            self.monitor.note_skipped_callback();
            return;
        };

        self.input_scratch.clear();
        let available = self.consumer.slots().min(self.input_scratch.capacity());
        let whole = available - available % in_channels;
        for _ in 0..whole {
            match self.consumer.pop() {
                Ok(sample) => self.input_scratch.push(sample),
                Err(_) => break,
            }
        }

        let mut pending_input = &self.input_scratch[..];
        for chunk in data.chunks_mut(MAX_CALLBACK_FRAMES * out_channels) {
            let frames = chunk.len() / out_channels;
            let scratch = &mut self.output_scratch;
            scratch.clear();
            scratch.resize(frames * out_channels, 0.0);

            let input_frames = pending_input.len() / in_channels;
            engine.process(pending_input, input_frames, scratch, frames, self.channels);
            pending_input = &[];

            for (dst, &src) in chunk.iter_mut().zip(scratch.iter()) {
                *dst = convert(src);
            }
            for dst in chunk.iter_mut().skip(frames * out_channels) {
                *dst = convert(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::engine::LoopbackOptions;
    use crate::audio::stream::{OfflineDuplex, StreamFormat};
    use rtrb::RingBuffer;

    fn started_engine(output: StreamFormat, input: StreamFormat) -> Arc<Mutex<DuplexLoopback>> {
        let mut engine = DuplexLoopback::new(LoopbackOptions {
            max_record_seconds: 1,
            peak_decay: 1.0,
        });
        let mut stream = OfflineDuplex::new(output, input);
        engine.start(&mut stream).expect("offline start");
        Arc::new(Mutex::new(engine))
    }

    #[test]
    fn sample_conversions_cover_full_scale() {
        assert_eq!(i16_to_f32(i16::MIN), -1.0);
        assert_eq!(u16_to_f32(32_768), 0.0);
        assert_eq!(f32_to_i16(2.0), 32_767);
        assert_eq!(f32_to_u16(0.0), 32_768);
    }

    #[test]
    fn bridge_drops_whole_frames_when_ring_is_full() {
        let engine = DuplexLoopback::default();
        let monitor = engine.monitor();
        let (producer, mut consumer) = RingBuffer::<f32>::new(5);
        let mut bridge = InputBridge::new(producer, 2, monitor.clone());
        bridge.push(&[0.1f32, 0.2, 0.3, 0.4, 0.5, 0.6], |s| s);
        assert_eq!(consumer.slots(), 4);
        assert_eq!(monitor.dropped_input_frames(), 1);
        assert_eq!(consumer.pop().ok(), Some(0.1));
    }

    #[test]
    fn pump_feeds_input_and_converts_output() {
        let engine = started_engine(StreamFormat::new(48_000, 2), StreamFormat::new(16_000, 1));
        {
            let mut guard = engine.lock().unwrap();
            guard.load_audio_data(&[0.5, -0.5], 2, 1, 16_000).unwrap();
        }
        let monitor = engine.lock().unwrap().monitor();
        let (producer, consumer) = RingBuffer::<f32>::new(64);
        let mut bridge = InputBridge::new(producer, 1, monitor.clone());
        bridge.push(&[0.25f32, -0.75, 0.5], |s| s);

        let mut pump = OutputPump::new(
            engine.clone(),
            consumer,
            ChannelCounts { input: 1, output: 2 },
            monitor.clone(),
        );
        let mut data = [0i16; 6];
        pump.render(&mut data, f32_to_i16);

        assert_eq!(data[0], data[1]);
        assert_eq!(data[0], f32_to_i16(0.5));
        assert_eq!(data[2], f32_to_i16(-0.5));
        assert_eq!(monitor.played_frame_count(), 3);
        assert_eq!(monitor.recorded_frame_count(), 3);
        assert_eq!(monitor.peak_level(0), 0.75);
    }

    #[test]
    fn pump_outputs_silence_when_engine_is_busy() {
        let engine = started_engine(StreamFormat::new(48_000, 1), StreamFormat::new(48_000, 1));
        let monitor = engine.lock().unwrap().monitor();
        let (_producer, consumer) = RingBuffer::<f32>::new(8);
        let mut pump = OutputPump::new(
            engine.clone(),
            consumer,
            ChannelCounts { input: 1, output: 1 },
            monitor.clone(),
        );

        let _held = engine.lock().unwrap();
        let mut data = [1.0f32; 4];
        pump.render(&mut data, |s| s);
        assert_eq!(data, [0.0; 4]);
        assert_eq!(monitor.skipped_callbacks(), 1);
    }

    #[test]
    fn input_captured_while_engine_is_busy_is_recorded_later() {
        let engine = started_engine(StreamFormat::new(16_000, 1), StreamFormat::new(16_000, 1));
        let monitor = engine.lock().unwrap().monitor();
        let (producer, consumer) = RingBuffer::<f32>::new(16);
        let mut bridge = InputBridge::new(producer, 1, monitor.clone());
        let mut pump = OutputPump::new(
            engine.clone(),
            consumer,
            ChannelCounts { input: 1, output: 1 },
            monitor.clone(),
        );

        bridge.push(&[0.1f32, 0.2, 0.3, 0.4], |s| s);
        {
            let _held = engine.lock().unwrap();
            let mut data = [0.0f32; 4];
            pump.render(&mut data, |s| s);
        }
        assert_eq!(monitor.skipped_callbacks(), 1);
        assert_eq!(monitor.recorded_frame_count(), 0);

        let mut data = [0.0f32; 4];
        pump.render(&mut data, |s| s);
        assert_eq!(
            monitor.recorded_frame_count() + monitor.dropped_input_frames(),
            4
        );
        assert_eq!(monitor.recorded_frame_count(), 4);
        let guard = engine.lock().unwrap();
        assert_eq!(
            guard.recorded_recording().unwrap().samples(),
            &[0.1, 0.2, 0.3, 0.4]
        );
    }
}
