//! Log ring for the monitor.
//!
//! ```text
//! poll cycle              LogStream            console transport
//! ──────────              ─────────            ─────────────────
//!
//! mon_info!() ─────────▶ [L0][L1][L2] ──────▶ drain_to(out)
//! non-blocking             lock-free            once per cycle
//! ```
//!
//! Producers push fixed-size entries and never block; the service loop
//! drains pending entries to the console transport once per cycle, which
//! also counts as cycle activity. Messages are dropped, and the drop
//! counted, when the ring is full.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

/// Maximum message length.
pub const MAX_MSG_LEN: usize = 120;

/// Log buffer size (number of entries).
pub const LOG_BUFFER_SIZE: usize = 64;

/// Log level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    /// Convert to string for output.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// Parse a console token (`debug` command).
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "error" => Some(LogLevel::Error),
            "warn" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            3 => LogLevel::Debug,
            4 => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// A single log entry.
#[derive(Clone, Copy)]
pub struct LogEntry {
    /// Timestamp in microseconds.
    pub timestamp_us: i64,
    /// Log level.
    pub level: LogLevel,
    /// Message length.
    pub len: u8,
    /// Message bytes (not null-terminated).
    pub msg: [u8; MAX_MSG_LEN],
}

const EMPTY_ENTRY: LogEntry = LogEntry {
    timestamp_us: 0,
    level: LogLevel::Info,
    len: 0,
    msg: [0; MAX_MSG_LEN],
};

/// Lock-free log ring with a runtime level filter.
///
/// Push coordinates through an atomic fetch_add so edge callbacks may log
/// from wherever the poll cycle finds them; drain is single-consumer (the
/// service loop).
pub struct LogStream<const N: usize = LOG_BUFFER_SIZE> {
    entries: UnsafeCell<[LogEntry; N]>,
    write_idx: AtomicU32,
    read_idx: AtomicU32,
    dropped: AtomicU32,
    /// Maximum level currently accepted.
    level: AtomicU8,
}

// SAFETY: producers are coordinated via atomic fetch_add on write_idx;
// the single consumer advances read_idx only after copying the entry out.
unsafe impl<const N: usize> Sync for LogStream<N> {}
unsafe impl<const N: usize> Send for LogStream<N> {}

impl<const N: usize> LogStream<N> {
    const MASK: usize = N - 1;

    /// Create a new empty log stream accepting up to `Info`.
    pub const fn new() -> Self {
        assert!(N.is_power_of_two(), "Log buffer size must be power of 2");

        Self {
            entries: UnsafeCell::new([EMPTY_ENTRY; N]),
            write_idx: AtomicU32::new(0),
            read_idx: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
            level: AtomicU8::new(LogLevel::Info as u8),
        }
    }

    /// Runtime verbosity ceiling.
    #[inline]
    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Set the verbosity ceiling (the `debug` console command).
    #[inline]
    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    /// True when `level` passes the current filter.
    #[inline]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level <= self.level()
    }

    /// Push a log entry (never blocks).
    ///
    /// Returns `true` if the message was queued, `false` if it was
    /// filtered out or dropped because the ring was full.
    #[inline]
    pub fn push(&self, timestamp_us: i64, level: LogLevel, msg: &[u8]) -> bool {
        if !self.enabled(level) {
            return false;
        }

        // Claim a slot only when the ring has room, so a dropped push
        // leaves the indices untouched.
        let mut write = self.write_idx.load(Ordering::Relaxed);
        loop {
            let read = self.read_idx.load(Ordering::Acquire);
            if write.wrapping_sub(read) >= N as u32 {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            match self.write_idx.compare_exchange_weak(
                write,
                write.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => write = current,
            }
        }

        let idx = (write as usize) & Self::MASK;

        // SAFETY: the CAS above hands each producer a unique slot index.
        unsafe {
            let entry = &mut (*self.entries.get())[idx];
            entry.timestamp_us = timestamp_us;
            entry.level = level;
            entry.len = msg.len().min(MAX_MSG_LEN) as u8;
            entry.msg[..entry.len as usize].copy_from_slice(&msg[..entry.len as usize]);
        }

        true
    }

    /// Drain the next log entry.
    ///
    /// Returns `None` if no entries are pending.
    #[inline]
    pub fn drain(&self) -> Option<LogEntry> {
        let read = self.read_idx.load(Ordering::Relaxed);
        let write = self.write_idx.load(Ordering::Acquire);

        if read == write {
            return None;
        }

        let idx = (read as usize) & Self::MASK;

        // SAFETY: single consumer, unique index
        let entry = unsafe { (*self.entries.get())[idx] };

        self.read_idx.store(read.wrapping_add(1), Ordering::Release);
        Some(entry)
    }

    /// Drain all pending entries, formatted, into a text sink.
    ///
    /// Returns the number of entries written; the service loop treats a
    /// non-zero return as cycle activity.
    pub fn drain_to(&self, out: &mut dyn core::fmt::Write) -> usize {
        use core::fmt::Write as _;

        let mut drained = 0;
        while let Some(entry) = self.drain() {
            let msg = core::str::from_utf8(&entry.msg[..entry.len as usize])
                .unwrap_or("<invalid utf8>");
            let _ = writeln!(
                out,
                "[{:10}] {}: {}",
                entry.timestamp_us,
                entry.level.as_str(),
                msg
            );
            drained += 1;
        }
        drained
    }

    /// Get count of dropped messages.
    #[inline]
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of entries waiting to be drained.
    #[inline]
    pub fn pending(&self) -> u32 {
        let read = self.read_idx.load(Ordering::Relaxed);
        let write = self.write_idx.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }
}

impl<const N: usize> Default for LogStream<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// The monitor's log stream.
///
/// One cooperative context means one stream; the service loop is the sole
/// consumer.
pub static LOG: LogStream = LogStream::new();

/// Coarse wall clock, refreshed by the scheduler at each cycle start.
///
/// Lets contexts with no platform handle (pin-edge callbacks) stamp their
/// entries with something better than zero.
static WALL_CLOCK_US: AtomicI64 = AtomicI64::new(0);

/// Publish the current cycle's start timestamp.
#[inline]
pub fn set_wall_clock_us(now_us: i64) {
    WALL_CLOCK_US.store(now_us, Ordering::Relaxed);
}

/// Timestamp of the current cycle's start.
#[inline]
pub fn wall_clock_us() -> i64 {
    WALL_CLOCK_US.load(Ordering::Relaxed)
}

/// Format a message into a buffer.
///
/// Returns the number of bytes written.
#[inline]
pub fn format_to_buffer(buf: &mut [u8], args: core::fmt::Arguments<'_>) -> usize {
    use core::fmt::Write;

    struct BufWriter<'a> {
        buf: &'a mut [u8],
        pos: usize,
    }

    impl<'a> Write for BufWriter<'a> {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            let bytes = s.as_bytes();
            let remaining = self.buf.len() - self.pos;
            let to_write = bytes.len().min(remaining);
            self.buf[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
            self.pos += to_write;
            Ok(())
        }
    }

    let mut writer = BufWriter { buf, pos: 0 };
    let _ = core::fmt::write(&mut writer, args);
    writer.pos
}

/// Push a formatted entry to a log stream.
///
/// # Example
///
/// ```ignore
/// mon_log!(LogLevel::Info, LOG, now_us, "chan {} fresh: {} mV", chan, mv);
/// ```
#[macro_export]
macro_rules! mon_log {
    ($level:expr, $stream:expr, $timestamp:expr, $($arg:tt)*) => {{
        if $stream.enabled($level) {
            let mut buf = [0u8; $crate::logging::MAX_MSG_LEN];
            let len = $crate::logging::format_to_buffer(&mut buf, format_args!($($arg)*));
            $stream.push($timestamp, $level, &buf[..len]);
        }
    }};
}

/// Error-level log.
#[macro_export]
macro_rules! mon_error {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::mon_log!($crate::logging::LogLevel::Error, $stream, $timestamp, $($arg)*)
    };
}

/// Warning-level log.
#[macro_export]
macro_rules! mon_warn {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::mon_log!($crate::logging::LogLevel::Warn, $stream, $timestamp, $($arg)*)
    };
}

/// Info-level log.
#[macro_export]
macro_rules! mon_info {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::mon_log!($crate::logging::LogLevel::Info, $stream, $timestamp, $($arg)*)
    };
}

/// Debug-level log.
#[macro_export]
macro_rules! mon_debug {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::mon_log!($crate::logging::LogLevel::Debug, $stream, $timestamp, $($arg)*)
    };
}

/// Trace-level log (maximum verbosity).
#[macro_export]
macro_rules! mon_trace {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::mon_log!($crate::logging::LogLevel::Trace, $stream, $timestamp, $($arg)*)
    };
}
