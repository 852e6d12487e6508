//! Full-duplex loopback audio.
//!
//! A loaded clip is played out of the output device while the input device is
//! recorded. Both directions are captured for WAV export, and per-channel
//! input peaks plus frame counters are published for a status display.

mod cpal_duplex;
mod dispatch;
mod engine;
mod peak;
mod recording;
mod stream;
mod wav;

pub use cpal_duplex::{list_input_devices, list_output_devices, CpalDuplex};
pub use engine::{
    DuplexLoopback, LoadError, LoopbackMonitor, LoopbackOptions, PlaybackBuffer,
    DEFAULT_MAX_RECORD_SECONDS, LOAD_OK, PEAK_INDEX_OUT_OF_RANGE, PEAK_NOT_STARTED,
};
pub use peak::{peak_to_db, PeakDetector, PeakLevels, DEFAULT_PEAK_DECAY};
pub use recording::MultiChannelRecording;
pub use stream::{
    CallbackResult, ChannelCounts, DuplexStream, OfflineDuplex, StreamError, StreamFormat,
};
pub use wav::{read_wav, write_recording, AudioClip, WavError};
