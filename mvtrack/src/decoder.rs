//! # Decoded frame source
//!
//! Types exchanged with the video decoding backend, and the [`Decoder`] trait the backend
//! implements. The core never looks at the backend's own memory layout; a backend converts its
//! native motion vectors into [`MotionVector`] records before handing a frame over.

use crate::error::{Error, Result};
use crate::grid::GridDims;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Rational time base of a stream, in seconds per tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    pub fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Milliseconds per single tick.
    pub fn ms_per_tick(&self) -> f64 {
        self.num as f64 / self.den as f64 * 1000.0
    }

    /// Convert a tick count to milliseconds.
    pub fn to_ms(&self, ticks: i64) -> f64 {
        ticks as f64 * self.ms_per_tick()
    }
}

/// Stream properties captured once, before the first frame is encoded.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StreamMetadata {
    /// Time base of both the stream duration and per-frame timestamps.
    pub time_base: TimeBase,
    /// Stream duration in `time_base` ticks.
    pub duration: i64,
    /// Average frame rate in frames per second.
    pub frame_rate: f64,
    /// Declared number of frames. 0 when unknown.
    pub frame_count: i32,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl StreamMetadata {
    /// Stream duration in milliseconds, rounded.
    pub fn duration_ms(&self) -> i32 {
        self.time_base.to_ms(self.duration).round() as i32
    }

    /// Average frame rate in fixed point (`rate * 1000`, truncated).
    pub fn frame_rate_milli(&self) -> i32 {
        (self.frame_rate * 1000.0) as i32
    }

    /// Duration of a single frame in milliseconds.
    pub fn frame_duration_ms(&self) -> f64 {
        1000.0 / self.frame_rate
    }

    /// Block grid covering this stream's frames.
    pub fn grid_dims(&self) -> GridDims {
        GridDims::for_frame(self.width, self.height)
    }

    /// Check that the metadata can drive the pipeline.
    ///
    /// Timestamps can not be converted without a usable time base, and frame indices can not be
    /// derived without a positive frame rate.
    pub fn validate(&self) -> Result<()> {
        if self.time_base.den == 0 || self.time_base.num <= 0 {
            return Err(Error::InputOpen(format!(
                "invalid time base {}/{}",
                self.time_base.num, self.time_base.den
            )));
        }

        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(Error::InputOpen(format!(
                "invalid frame rate {}",
                self.frame_rate
            )));
        }

        Ok(())
    }
}

/// A single motion vector as reported by the decoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MotionVector {
    /// Destination x coordinate of the covered region, in pixels.
    pub dst_x: i32,
    /// Destination y coordinate of the covered region, in pixels.
    pub dst_y: i32,
    /// Width of the covered region.
    pub w: u32,
    /// Height of the covered region.
    pub h: u32,
    /// Horizontal displacement in decoder units.
    pub motion_x: i32,
    /// Vertical displacement in decoder units.
    pub motion_y: i32,
    /// Reference direction. Negative values point to a past reference and flip the vector.
    pub source: i32,
}

impl MotionVector {
    /// Whether the vector carries any displacement at all.
    pub fn has_motion(&self) -> bool {
        self.motion_x != 0 || self.motion_y != 0
    }
}

/// Codec level picture classification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PictureType {
    #[default]
    Unknown,
    Intra,
    Predicted,
    BiPredicted,
    SGmc,
    SwitchingIntra,
    SwitchingPredicted,
    Bi,
}

impl PictureType {
    /// Single character code of the picture type.
    pub fn to_char(self) -> u8 {
        match self {
            Self::Unknown => b'?',
            Self::Intra => b'I',
            Self::Predicted => b'P',
            Self::BiPredicted => b'B',
            Self::SGmc => b'S',
            Self::SwitchingIntra => b'i',
            Self::SwitchingPredicted => b'p',
            Self::Bi => b'b',
        }
    }

    /// Parse a single character code. Unrecognised codes map to `Unknown`.
    pub fn from_char(c: u8) -> Self {
        match c {
            b'I' => Self::Intra,
            b'P' => Self::Predicted,
            b'B' => Self::BiPredicted,
            b'S' => Self::SGmc,
            b'i' => Self::SwitchingIntra,
            b'p' => Self::SwitchingPredicted,
            b'b' => Self::Bi,
            _ => Self::Unknown,
        }
    }
}

/// One decoded frame, reduced to what the track needs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedFrame {
    /// Presentation timestamp in stream time base ticks.
    pub pts: i64,
    /// Frame duration in stream time base ticks.
    pub duration: i64,
    pub picture_type: PictureType,
    /// Motion vectors attached to the frame. Empty if the decoder exported none.
    pub motion_vectors: Vec<MotionVector>,
}

/// Source of decoded frames.
///
/// Implementations must hand out frames strictly in decode order, one at a time.
pub trait Decoder {
    /// Get the stream metadata.
    ///
    /// This must be valid before the first frame is returned. The pipeline captures it on the
    /// first frame and ignores any later changes.
    fn metadata(&self) -> StreamMetadata;

    /// Decode the next frame.
    ///
    /// Returns `Ok(None)` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>>;
}

impl<T: Decoder + ?Sized> Decoder for Box<T> {
    fn metadata(&self) -> StreamMetadata {
        (**self).metadata()
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        (**self).next_frame()
    }
}
