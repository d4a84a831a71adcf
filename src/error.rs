//! Central error types.
//!
//! Every subsystem re-uses these variants so that the top of the daemon can
//! make one decision (reconnect, drop-and-continue, or fatal shutdown) from
//! one enum, the way `rustradio::Error` gave every block a single error type
//! to propagate through `?`.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds, per the error-handling design: each recovers locally where
/// possible; only `Fatal` escalates to process shutdown.
#[derive(Error, Debug)]
pub enum Error {
    /// Socket closed or EOF on a persistent stream. Reconnection is
    /// scheduled by the caller; the message in flight is dropped.
    #[error("connection closed: {0}")]
    IoClosed(String),

    /// Transient: caller should treat as "0 bytes" and retry later.
    #[error("would block")]
    WouldBlock,

    /// Malformed framing: NMEA structure, MQTT return code, WebSocket
    /// handshake mismatch. Current message/frame is discarded.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// NMEA checksum or CRC16 mismatch.
    #[error("checksum mismatch: expected {expected:02X} found {found:02X}")]
    Checksum {
        /// Expected value.
        expected: u8,
        /// Computed value.
        found: u8,
    },

    /// Line buffer, WebSocket payload, or binary frame length exceeded.
    #[error("oversize: limit {limit} actual {actual}")]
    Oversize {
        /// Configured limit.
        limit: usize,
        /// Size that was rejected.
        actual: usize,
    },

    /// Out-of-range numeric or unknown enum value. Fatal at startup only.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Unrecoverable: OOM in a pipeline thread, fatal driver error.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Wrapped I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True if this error should trigger a reconnect-and-continue rather
    /// than tearing the whole process down.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Fatal(_) | Error::ConfigInvalid(_))
    }
}
