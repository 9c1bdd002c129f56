use core::fmt::{self, Write};
use log::{LevelFilter, Metadata, Record, SetLoggerError};

/// Maximum length of a single formatted log line. Longer lines are truncated.
pub const LINE_CAPACITY: usize = 256;

/// Receives every formatted log line. Must not block.
pub type LogSink = fn(&str);

/// Logger that formats records on the stack and forwards them to a sink.
///
/// Runs in root mode as well, so it must never allocate or wait on the sink.
pub struct KernelLogger {
    sink: LogSink,
}

impl KernelLogger {
    pub const fn new(sink: LogSink) -> Self {
        Self { sink }
    }
}

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let mut line = LineBuffer::new();

            // A truncated line is still better than no line.
            //
            let _ = write!(line, "[hv] {} - {}", record.level(), record.args());
            line.terminate();

            (self.sink)(line.as_str());
        }
    }

    fn flush(&self) {}
}

/// Installs the logger for the whole hypervisor.
pub fn init(logger: &'static KernelLogger, level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(logger).map(|()| log::set_max_level(level))
}

/// Fixed-size line buffer that silently truncates on overflow.
pub struct LineBuffer {
    bytes: [u8; LINE_CAPACITY],
    len: usize,
    truncated: bool,
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self {
            bytes: [0; LINE_CAPACITY],
            len: 0,
            truncated: false,
        }
    }

    pub fn as_str(&self) -> &str {
        // Only whole characters are ever copied in, see `write_str`.
        //
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or_default()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Appends the line feed. A full buffer gives up its last character for
    /// it.
    pub fn terminate(&mut self) {
        if self.len == LINE_CAPACITY {
            let mut end = self.len - 1;
            while end > 0 && self.bytes[end] & 0xC0 == 0x80 {
                end -= 1;
            }

            self.len = end;
            self.truncated = true;
        }

        self.bytes[self.len] = b'\n';
        self.len += 1;
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let remaining = LINE_CAPACITY - self.len;

        let mut count = s.len().min(remaining);
        while !s.is_char_boundary(count) {
            count -= 1;
        }

        self.bytes[self.len..self.len + count].copy_from_slice(&s.as_bytes()[..count]);
        self.len += count;

        if count < s.len() {
            self.truncated = true;
            return Err(fmt::Error);
        }

        Ok(())
    }
}
