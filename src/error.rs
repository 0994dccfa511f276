//! Error types for the minute-bar store and accessor.
//!
//! Only genuine caller or environment faults surface as errors. "No data for
//! this minute" is never an error: it decodes to NaN / zero / `None` through
//! the sentinel paths in `store` and `bar_data`.

use crate::assets::Sid;
use thiserror::Error;

/// The primary error type for store and accessor operations.
#[derive(Error, Debug)]
pub enum BarDataError {
    /// A field name that is not one of
    /// open/high/low/close/volume/price/last_traded.
    #[error("unknown field '{0}'")]
    UnknownField(String),

    /// A sid that the asset directory cannot resolve.
    #[error("unknown asset sid {0}")]
    UnknownAsset(Sid),

    /// A minute outside the calendar's session range.
    #[error("minute {0} is outside the trading calendar")]
    MinuteOutOfRange(u64),

    /// A session index the calendar does not contain.
    #[error("calendar has no session at index {0}")]
    UnknownSession(usize),

    /// Calendar construction with unordered or empty sessions.
    #[error("invalid calendar: {0}")]
    InvalidCalendar(String),

    /// Session written out of order or re-written. The store is append-only
    /// per asset; this is a caller bug, not a recoverable condition.
    #[error("sid {sid}: session {session} violates append-only write order (next writable session is {next})")]
    WriteOrderViolation {
        sid: Sid,
        session: usize,
        next: usize,
    },

    /// A session's bar slice does not match the calendar slot count.
    #[error("session bar count {got} does not match calendar slot count {expected}")]
    SessionLength { got: usize, expected: usize },

    /// Segment metadata that does not match the store layout
    /// (minutes-per-session or price ratio drift between writer runs).
    #[error("sid {sid}: segment metadata mismatch: {reason}")]
    SegmentMismatch { sid: Sid, reason: String },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("segment metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("asset directory error: {0}")]
    Directory(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, BarDataError>;
