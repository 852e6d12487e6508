//! Fixed-capacity interleaved capture buffer.
//!
//! Storage is allocated up front so the audio thread only copies samples.
//! When the buffer is full, later frames are dropped and counted; what was
//! already captured is kept intact.

/// Interleaved `f32` capture with a hard frame limit.
#[derive(Debug, Clone)]
pub struct MultiChannelRecording {
    channel_count: usize,
    max_frames: usize,
    samples: Vec<f32>,
    frames_written: usize,
    frames_dropped: u64,
}

impl MultiChannelRecording {
    pub fn new(channel_count: usize, max_frames: usize) -> Self {
        let channel_count = channel_count.max(1);
        Self {
            channel_count,
            max_frames,
            samples: vec![0.0; channel_count * max_frames],
            frames_written: 0,
            frames_dropped: 0,
        }
    }

    /// Append up to `frame_count` interleaved frames from `frames`.
    ///
    /// `frames` is laid out at the recording's own channel count. Returns the
    /// number of frames stored; the rest count as overflow.
    pub fn write(&mut self, frames: &[f32], frame_count: usize) -> usize {
        let available = frames.len() / self.channel_count;
        let requested = frame_count.min(available);
        let room = self.max_frames - self.frames_written;
        let stored = requested.min(room);
        if stored > 0 {
            let start = self.frames_written * self.channel_count;
            let len = stored * self.channel_count;
            self.samples[start..start + len].copy_from_slice(&frames[..len]);
            self.frames_written += stored;
        }
        self.frames_dropped += (requested - stored) as u64;
        stored
    }

    /// Append one frame whose channel layout may differ from the recording's.
    ///
    /// Missing channels are written as silence and surplus channels ignored.
    pub fn write_frame(&mut self, frame: &[f32]) -> bool {
        if self.frames_written >= self.max_frames {
            self.frames_dropped += 1;
            return false;
        }
        let start = self.frames_written * self.channel_count;
        let dest = &mut self.samples[start..start + self.channel_count];
        let copied = frame.len().min(self.channel_count);
        dest[..copied].copy_from_slice(&frame[..copied]);
        dest[copied..].fill(0.0);
        self.frames_written += 1;
        true
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn is_full(&self) -> bool {
        self.frames_written >= self.max_frames
    }

    /// Captured samples, interleaved.
    pub fn samples(&self) -> &[f32] {
        &self.samples[..self.frames_written * self.channel_count]
    }
}
