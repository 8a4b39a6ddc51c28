// src/error.rs
use thiserror::Error;

/// Per-message decode failures. Counted and dropped; never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated or invalid envelope header")]
    TruncatedHeader,
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("missing or invalid symbol")]
    MissingSymbol,
    #[error("malformed price level data")]
    MalformedLevel,
}

/// Per-message apply failures. `StaleSequence` is non-fatal by contract:
/// the shard drops the snapshot and bumps a counter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("stale sequence {incoming} behind applied {applied}")]
    StaleSequence { incoming: u64, applied: u64 },
    #[error("symbol mismatch: book={book} snapshot={snapshot}")]
    SymbolMismatch { book: String, snapshot: String },
    #[error("empty symbol")]
    EmptySymbol,
}

/// Output-sink failures. The rest of the message's artifacts continue to
/// publish after one of these.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("sink rejected publish to {topic}: {reason}")]
    Rejected { topic: String, reason: String },
    #[error("sink io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Loss of the input stream or output sink after exhausted retries.
/// Sets the shutdown flag.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("input stream lost: {0}")]
    InputLost(String),
    #[error("output sink lost: {0}")]
    SinkLost(String),
}
