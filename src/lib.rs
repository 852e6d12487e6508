pub mod app;
pub mod audio;
pub mod config;
mod lock;
mod telemetry;

pub(crate) use lock::lock_or_recover;
pub use app::{
    crash_log_path, init_logging, log_debug, log_file_path, log_panic, ClipInfo, ExportedWav,
    LoopbackSession, StatusSnapshot,
};
