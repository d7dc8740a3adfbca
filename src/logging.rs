//! In-memory log sink for the lamp bridge.
//!
//! Every log line is teed to stderr and into a capped in-memory buffer the
//! debug view can render. Installs as the `log` crate's global logger; the
//! composition root falls back to `env_logger` if installation fails.

use std::sync::{Mutex, OnceLock};

use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

/// Maximum characters retained in the in-memory log.
const MAX_LOG_LENGTH: usize = 10_000;

static LOGGER: OnceLock<MemoryLogger> = OnceLock::new();

pub struct MemoryLogger {
    level: Level,
    buffer: Mutex<String>,
}

impl MemoryLogger {
    fn new(level: Level) -> Self {
        Self {
            level,
            buffer: Mutex::new(String::new()),
        }
    }

    /// Installs the logger as the global `log` sink and returns a handle
    /// for reading the buffer back.
    pub fn init(level: Level) -> Result<&'static MemoryLogger, SetLoggerError> {
        let logger = LOGGER.get_or_init(|| MemoryLogger::new(level));
        log::set_logger(logger).map(|()| log::set_max_level(level.to_level_filter()))?;
        Ok(logger)
    }

    /// The retained log text, newest line last.
    pub fn contents(&self) -> String {
        self.buffer.lock().unwrap().clone()
    }

    fn append(&self, line: &str) {
        let mut buffer = self.buffer.lock().unwrap();
        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(line);

        // Trim from the front once the cap is exceeded, on a char boundary.
        if buffer.len() > MAX_LOG_LENGTH {
            let excess = buffer.len() - MAX_LOG_LENGTH;
            let cut = (excess..buffer.len())
                .find(|&i| buffer.is_char_boundary(i))
                .unwrap_or(buffer.len());
            buffer.drain(..cut);
        }
    }
}

impl log::Log for MemoryLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{}] {}:\t{}",
            Local::now().format("%H:%M:%S"),
            record.level(),
            record.args()
        );
        eprintln!("{}", line);
        self.append(&line);
    }

    fn flush(&self) {}
}

/// Installs the in-memory logger, falling back to `env_logger` if another
/// logger got there first.
pub fn setup_logging(level: Level) -> Option<&'static MemoryLogger> {
    match MemoryLogger::init(level) {
        Ok(logger) => Some(logger),
        Err(_) => {
            let _ = env_logger::builder()
                .filter_level(LevelFilter::Info)
                .try_init();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_is_capped() {
        let logger = MemoryLogger::new(Level::Debug);
        for i in 0..1000 {
            logger.append(&format!("line number {} with some padding text", i));
        }
        let contents = logger.contents();
        assert!(contents.len() <= MAX_LOG_LENGTH);
        assert!(contents.contains("line number 999"));
        assert!(!contents.contains("line number 0 "));
    }
}
