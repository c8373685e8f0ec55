//! # Motion Vector Track Encoder
//!
//! This library folds the per-frame motion vectors exported by a video decoder into a compact,
//! fixed-layout binary track: one quantized block motion field per decoded frame. Consumers can
//! scrub or analyse the track without decoding the source video again.
//!
//! The work is split the following way:
//!
//! - [`grid`] accumulates raw motion vectors onto a fixed 16x16 pixel block grid.
//! - [`quantizer`] saturates the accumulated values into signed bytes.
//! - [`sequencer`] enforces timestamp monotonicity and frame index determinism.
//! - [`container`] owns the byte-exact track format.
//! - [`pipeline`] drives all of the above once per decoded frame.
//!
//! Actual video decoding is left to an implementation of [`decoder::Decoder`].
//!
//! The easiest way to use the library is to import its prelude:
//!
//! ```
//! use mvtrack::prelude::v1::*;
//! ```

pub mod container;
pub mod decoder;
pub mod error;
pub mod grid;
pub mod pipeline;
pub mod quantizer;
pub mod sequencer;

pub mod prelude {
    pub mod v1 {
        pub use crate::{
            container::{FrameHeader, FrameRecord, TrackEncoder, TrackHeader, TrackReader},
            decoder::{DecodedFrame, Decoder, MotionVector, PictureType, StreamMetadata, TimeBase},
            error::{Error, Result},
            grid::{BlockGrid, GridDims, BLOCK_SIZE},
            pipeline::{PipelineState, Progress, TrackPipeline},
            quantizer::QuantizedFrame,
            sequencer::FrameSequencer,
        };
    }
}
