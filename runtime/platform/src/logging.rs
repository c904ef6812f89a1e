//! Diagnostic log sink
//!
//! The core never depends on where text ends up. It logs through the `log`
//! facade; the board hands [`SinkLogger`] one function that accepts a line of
//! text (UART write, RTT channel, host stdout...). Lines are formatted into a
//! fixed stack buffer so logging does not allocate.

use core::fmt::{self, Write};
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Longest line handed to the sink; longer lines are truncated
pub const LINE_CAPACITY: usize = 192;

/// A platform text sink
pub type Sink = fn(&str);

/// `log::Log` implementation that forwards formatted lines to a [`Sink`]
pub struct SinkLogger {
    sink: Sink,
    level: LevelFilter,
}

impl SinkLogger {
    /// Create a logger forwarding records up to `level` to `sink`
    pub const fn new(sink: Sink, level: LevelFilter) -> Self {
        Self { sink, level }
    }

    /// Maximum level this logger forwards
    pub fn level(&self) -> LevelFilter {
        self.level
    }
}

impl Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut line = LineBuffer::new();
        // Truncation is reported through the buffer, never as an error
        let _ = write!(
            line,
            "[{:<5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
        (self.sink)(line.as_str());
    }

    fn flush(&self) {}
}

/// Register `logger` as the global `log` backend
///
/// # Errors
/// Returns an error if a logger was already installed
pub fn install(logger: &'static SinkLogger) -> Result<(), log::SetLoggerError> {
    log::set_logger(logger)?;
    log::set_max_level(logger.level);
    Ok(())
}

/// Check a per-instance verbosity limit
///
/// Kernel and adapters carry their own `LevelFilter` (off by default) so one
/// noisy bus can be traced without flooding the log with every other
/// instance. This is the gate their `trace_at!` macros use.
#[inline]
pub fn verbosity_allows(limit: LevelFilter, level: Level) -> bool {
    level <= limit
}

/// Fixed-capacity line buffer
struct LineBuffer {
    buf: [u8; LINE_CAPACITY],
    len: usize,
    truncated: bool,
}

impl LineBuffer {
    const fn new() -> Self {
        Self {
            buf: [0; LINE_CAPACITY],
            len: 0,
            truncated: false,
        }
    }

    fn as_str(&self) -> &str {
        // Only whole UTF-8 sequences are ever copied in
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.truncated {
            return Ok(());
        }

        let room = LINE_CAPACITY - self.len;
        let mut take = s.len().min(room);
        while take > 0 && !s.is_char_boundary(take) {
            take -= 1;
        }

        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take < s.len() {
            self.truncated = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::{String, ToString};
    use std::sync::Mutex;
    use std::vec::Vec;

    static CAPTURED: Mutex<Vec<String>> = Mutex::new(Vec::new());

    fn capture(line: &str) {
        CAPTURED.lock().unwrap().push(line.to_string());
    }

    fn emit(logger: &SinkLogger, level: Level, msg: &str) {
        logger.log(
            &Record::builder()
                .level(level)
                .target("ember::test")
                .args(format_args!("{}", msg))
                .build(),
        );
    }

    #[test]
    fn test_sink_receives_formatted_line_and_respects_level() {
        let logger = SinkLogger::new(capture, LevelFilter::Info);

        emit(&logger, Level::Warn, "bus 0 offline");
        emit(&logger, Level::Debug, "not forwarded");

        let lines = CAPTURED.lock().unwrap();
        assert!(lines.iter().any(|l| l == "[WARN ] ember::test: bus 0 offline"));
        assert!(!lines.iter().any(|l| l.contains("not forwarded")));
    }

    #[test]
    fn test_line_buffer_truncates_on_char_boundary() {
        let mut line = LineBuffer::new();
        let long: String = core::iter::repeat('é').take(LINE_CAPACITY).collect();
        write!(line, "{}", long).unwrap();

        assert!(line.truncated);
        assert!(line.as_str().len() <= LINE_CAPACITY);
        assert!(line.as_str().chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_verbosity_gate() {
        assert!(!verbosity_allows(LevelFilter::Off, Level::Error));
        assert!(verbosity_allows(LevelFilter::Warn, Level::Error));
        assert!(!verbosity_allows(LevelFilter::Warn, Level::Debug));
    }
}
