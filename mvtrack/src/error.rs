//! # Error types

use thiserror::Error;

/// Result type alias for track operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way encoding a motion track can fail.
///
/// None of these are recoverable at the point of detection. The run either encodes every frame or
/// stops at the first error.
#[derive(Error, Debug)]
pub enum Error {
    /// The input could not be opened, or its stream information is unusable.
    #[error("Could not open input: {0}")]
    InputOpen(String),

    /// The input has no decodable video stream.
    #[error("Could not find video stream: {0}")]
    NoVideoStream(String),

    /// The decoding backend failed to send or receive a frame.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A frame presented a timestamp earlier than its predecessor.
    #[error("Out of order frame: {timestamp_ms} < {last_timestamp_ms}")]
    OutOfOrderTimestamp {
        timestamp_ms: f64,
        last_timestamp_ms: f64,
    },

    /// The frame index derived from the timestamp disagrees with the running frame counter.
    #[error("Invalid calculated frame number: {expected} != {actual}")]
    FrameIndexMismatch { expected: i64, actual: u32 },

    /// The output stream failed.
    #[error("Output write error: {0}")]
    OutputWrite(#[from] std::io::Error),

    /// The pipeline already failed and refuses further work.
    #[error("Pipeline was aborted by an earlier error")]
    Aborted,

    /// The pipeline was finalized and accepts no more frames.
    #[error("Track already finalized")]
    Finalized,

    /// A track being read back violates the container format.
    #[error("Invalid track: {0}")]
    InvalidTrack(String),
}
