//! Kernel Logging
//!
//! Backs the `log` crate facade with the platform console. Messages are
//! formatted into a fixed stack buffer: the logger allocates nothing and
//! takes no lock of its own, so it is usable from any kernel context the
//! console itself tolerates.

use core::fmt::Write;
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Formatting buffer size; longer messages are truncated.
const MESSAGE_CAPACITY: usize = 256;

/// Stack buffer for formatting one log line.
struct MessageBuffer {
    data: [u8; MESSAGE_CAPACITY],
    len: usize,
}

impl MessageBuffer {
    const fn new() -> Self {
        Self {
            data: [0u8; MESSAGE_CAPACITY],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.data[..self.len]).unwrap_or("<invalid>")
    }
}

impl Write for MessageBuffer {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = MESSAGE_CAPACITY - self.len;
        let to_copy = bytes.len().min(remaining);
        self.data[self.len..self.len + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.len += to_copy;
        Ok(())
    }
}

/// Kernel logger writing to the platform console.
struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let time_ms = astral_pal::timer::now_ms();

        let level_str = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => " WARN",
            Level::Info => " INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        let mut line = MessageBuffer::new();
        let _ = write!(
            line,
            "[{:>6}.{:03}] {} {}: {}",
            time_ms / 1000,
            time_ms % 1000,
            level_str,
            record.target(),
            record.args()
        );

        astral_pal::console::puts(line.as_str());
        astral_pal::console::puts("\n");
    }

    fn flush(&self) {}
}

/// Global logger instance
static LOGGER: KernelLogger = KernelLogger;

/// Route the `log` facade to the console.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Debug))
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_buffer_truncates() {
        let mut buf = MessageBuffer::new();
        for _ in 0..MESSAGE_CAPACITY {
            write!(buf, "ab").unwrap();
        }
        assert_eq!(buf.len, MESSAGE_CAPACITY);
        assert_eq!(buf.as_str().len(), MESSAGE_CAPACITY);
    }

    #[test]
    fn test_message_buffer_formats() {
        let mut buf = MessageBuffer::new();
        write!(buf, "counter: {}", 7).unwrap();
        assert_eq!(buf.as_str(), "counter: 7");
    }
}
