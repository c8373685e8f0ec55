//! # Track encoding pipeline
//!
//! Drives accumulation, validation, quantization and encoding once per decoded frame.

use crate::container::{FrameHeader, TrackEncoder, TrackHeader};
use crate::decoder::{DecodedFrame, Decoder, StreamMetadata};
use crate::error::{Error, Result};
use crate::grid::BlockGrid;
use crate::quantizer::QuantizedFrame;
use crate::sequencer::FrameSequencer;
use log::*;
use std::fmt;
use std::io::Write;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lifecycle of a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// No frame seen yet. Grid size and header are unknown.
    Uninitialized,
    /// Header written, frames are being appended.
    Streaming,
    /// Every frame was encoded and the output flushed.
    Finalized,
    /// A frame failed. Nothing more will be written.
    Aborted,
}

/// Summary of a single encoded frame.
///
/// Displays as the fixed `Progress,<frame>,<timestamp>,<length>,<sum>` line external tools parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Progress {
    pub frame_index: u32,
    pub timestamp_ms: i32,
    pub video_length_ms: i32,
    /// Sum of all quantized motion of the frame.
    pub motion_sum: i32,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Progress,{},{},{},{}",
            self.frame_index, self.timestamp_ms, self.video_length_ms, self.motion_sum
        )
    }
}

/// Per-stream state, created when the first frame arrives.
struct Session {
    metadata: StreamMetadata,
    header: TrackHeader,
    grid: BlockGrid,
    quantized: QuantizedFrame,
    sequencer: FrameSequencer,
}

impl Session {
    fn new(metadata: &StreamMetadata) -> Result<Self> {
        metadata.validate()?;

        let header = TrackHeader::from_metadata(metadata);
        let dims = header.dims();

        info!(
            "Video length: {}ms, frame rate: {}, frames: {}, {}x{} px, {}x{} blocks",
            header.duration_ms,
            metadata.frame_rate,
            header.frame_count,
            header.width,
            header.height,
            dims.blocks_x,
            dims.blocks_y
        );

        Ok(Self {
            metadata: metadata.clone(),
            header,
            grid: BlockGrid::new(dims),
            quantized: QuantizedFrame::new(dims),
            sequencer: FrameSequencer::new(metadata.frame_rate),
        })
    }
}

/// Single pass motion track encoder.
///
/// Frames must be pushed in decode order. The first frame fixes the stream metadata and the grid
/// size for the whole track. Any error aborts the pipeline for good.
pub struct TrackPipeline<W: Write> {
    encoder: TrackEncoder<W>,
    session: Option<Session>,
    state: PipelineState,
}

impl<W: Write> TrackPipeline<W> {
    pub fn new(out: W) -> Self {
        Self {
            encoder: TrackEncoder::new(out),
            session: None,
            state: PipelineState::Uninitialized,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Metadata captured from the first frame.
    pub fn metadata(&self) -> Option<&StreamMetadata> {
        self.session.as_ref().map(|s| &s.metadata)
    }

    /// Header written to the track.
    pub fn header(&self) -> Option<&TrackHeader> {
        self.session.as_ref().map(|s| &s.header)
    }

    /// Encode a single decoded frame.
    ///
    /// # Arguments
    ///
    /// * `metadata` - stream metadata. Only read on the first frame.
    /// * `frame` - the decoded frame.
    pub fn push_frame(
        &mut self,
        metadata: &StreamMetadata,
        frame: &DecodedFrame,
    ) -> Result<Progress> {
        match self.state {
            PipelineState::Uninitialized | PipelineState::Streaming => {}
            PipelineState::Aborted => return Err(Error::Aborted),
            PipelineState::Finalized => return Err(Error::Finalized),
        }

        let ret = self.encode_frame(metadata, frame);

        if ret.is_err() {
            self.state = PipelineState::Aborted;
        }

        ret
    }

    fn encode_frame(&mut self, metadata: &StreamMetadata, frame: &DecodedFrame) -> Result<Progress> {
        let session = match &mut self.session {
            Some(session) => session,
            session @ None => {
                let new = Session::new(metadata)?;
                self.encoder.write_header(&new.header)?;
                self.state = PipelineState::Streaming;
                session.insert(new)
            }
        };

        let used = session.grid.accumulate(&frame.motion_vectors);

        let timestamp_ms = session.metadata.time_base.to_ms(frame.pts);
        let sequenced = session.sequencer.advance(timestamp_ms)?;

        session.quantized.quantize_grid(&session.grid);

        let header = FrameHeader {
            index: sequenced.index,
            timestamp_ms: sequenced.timestamp_ms_trunc(),
            picture_type: frame.picture_type,
        };

        self.encoder
            .write_frame(&header, session.quantized.x(), session.quantized.y())?;

        debug!(
            "Frame {} ({:?}) at {}ms: {}/{} vectors used",
            header.index,
            header.picture_type,
            header.timestamp_ms,
            used,
            frame.motion_vectors.len()
        );

        Ok(Progress {
            frame_index: header.index,
            timestamp_ms: header.timestamp_ms,
            video_length_ms: session.header.duration_ms,
            motion_sum: session.quantized.sum(),
        })
    }

    /// Encode every frame the decoder produces and finalize the track.
    ///
    /// Returns the number of encoded frames. `on_progress` is invoked after each one.
    pub fn run(
        &mut self,
        decoder: &mut impl Decoder,
        mut on_progress: impl FnMut(&Progress),
    ) -> Result<u32> {
        let mut frames = 0;
        let metadata = decoder.metadata();

        loop {
            let frame = match decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    self.state = PipelineState::Aborted;
                    return Err(e);
                }
            };

            let progress = self.push_frame(&metadata, &frame)?;
            on_progress(&progress);
            frames += 1;
        }

        self.finish()?;

        Ok(frames)
    }

    /// Flush the output and finalize the track.
    ///
    /// No more frames are accepted afterwards.
    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Aborted => return Err(Error::Aborted),
            PipelineState::Finalized => return Ok(()),
            _ => {}
        }

        if let Err(e) = self.encoder.flush() {
            self.state = PipelineState::Aborted;
            return Err(e);
        }

        self.state = PipelineState::Finalized;

        Ok(())
    }

    /// Consume the pipeline and return the output.
    pub fn into_inner(self) -> W {
        self.encoder.into_inner()
    }
}
