//! Central logger.
//!
//! Fans out every record to stderr, a fixed-size in-memory ring (exposed on
//! `/api/log`), and a broadcast channel feeding the `/api/log` SSE stream.
//! Mirrors the teacher's habit of reaching for `log::{debug,info,warn,error}`
//! everywhere, but supplies the `log::Log` implementation the ambient stack
//! needs instead of leaving it to a binary's `env_logger`/`stderrlog` setup.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use log::{Level, Log, Metadata, Record};
use tokio::sync::broadcast;

const RING_CAPACITY: usize = 25;

/// One formatted log line, as shown on `/api/log` and the log SSE channel.
#[derive(Clone, Debug, serde::Serialize)]
pub struct LogRecord {
    /// RFC3339 timestamp.
    pub time: String,
    /// Level name.
    pub level: String,
    /// Rendered message.
    pub message: String,
}

impl std::fmt::Display for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] {}", self.time, self.level, self.message)
    }
}

struct Inner {
    ring: Mutex<VecDeque<LogRecord>>,
    tx: broadcast::Sender<LogRecord>,
    min_level: Level,
}

/// The logger singleton. Install with [`Logger::install`].
pub struct Logger(Inner);

impl Logger {
    /// Create and install as the global logger. Must be called at most once.
    pub fn install(min_level: Level) -> &'static Logger {
        let (tx, _rx) = broadcast::channel(256);
        let logger = Box::leak(Box::new(Logger(Inner {
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            tx,
            min_level,
        })));
        log::set_logger(logger).expect("logger already installed");
        log::set_max_level(min_level.to_level_filter());
        logger
    }

    /// Subscribe to the live log feed, for SSE.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.0.tx.subscribe()
    }

    /// Snapshot of the last [`RING_CAPACITY`] records, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<LogRecord> {
        self.0.ring.lock().unwrap().iter().cloned().collect()
    }

    /// A standalone logger for tests that need an `AppState` but must not
    /// touch the process-global `log::set_logger` slot.
    #[cfg(test)]
    #[must_use]
    pub fn for_test() -> Logger {
        let (tx, _rx) = broadcast::channel(256);
        Logger(Inner {
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            tx,
            min_level: Level::Trace,
        })
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.0.min_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let rec = LogRecord {
            time: Utc::now().to_rfc3339(),
            level: record.level().to_string(),
            message: format!("{}", record.args()),
        };
        eprintln!("{rec}");
        {
            let mut ring = self.0.ring.lock().unwrap();
            if ring.len() == RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(rec.clone());
        }
        // Best-effort: no subscribers is not an error.
        let _ = self.0.tx.send(rec);
    }

    fn flush(&self) {}
}
