//! Control-thread side of the loopback: logging and the session that owns
//! the engine and its duplex stream.

mod logging;
mod session;

#[cfg(test)]
pub(crate) use logging::set_logging_for_tests;
pub use logging::{crash_log_path, init_logging, log_debug, log_file_path, log_panic};
pub use session::{ClipInfo, ExportedWav, LoopbackSession, StatusSnapshot};
