//! # Track container format
//!
//! A track is a 60 byte header followed by one record per frame. Each record is a 20 byte prefix
//! and two `blocks_x * blocks_y` signed byte planes (horizontal, then vertical motion), both in
//! row-major order. All integers are 32-bit little-endian.
//!
//! The format is append-only: records are written once, in frame order, and never revisited.

use crate::decoder::{PictureType, StreamMetadata};
use crate::error::{Error, Result};
use crate::grid::GridDims;
use bytemuck::{Pod, Zeroable};
use log::*;
use std::io::{ErrorKind, Read, Write};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Magic bytes at the start of every track.
pub const MAGIC: [u8; 4] = *b"FTMV";

/// Current format version.
pub const FORMAT_VERSION: i32 = 1;

/// Size of the file header in bytes.
pub const HEADER_SIZE: usize = std::mem::size_of::<RawHeader>();

/// Size of the fixed part of each frame record in bytes.
pub const FRAME_PREFIX_SIZE: usize = std::mem::size_of::<RawFrameHeader>();

/// On-disk header layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct RawHeader {
    magic: [u8; 4],
    version: i32,
    duration_ms: i32,
    frame_rate_milli: i32,
    frame_count: i32,
    width: i32,
    height: i32,
    blocks_x: i32,
    blocks_y: i32,
    reserved: [u8; 24],
}

/// On-disk frame record prefix layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct RawFrameHeader {
    index: i32,
    timestamp_ms: i32,
    picture_type: u8,
    reserved: [u8; 11],
}

/// Track header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackHeader {
    pub version: i32,
    /// Video duration in milliseconds.
    pub duration_ms: i32,
    /// Average frame rate times 1000.
    pub frame_rate_milli: i32,
    /// Declared frame count, 0 if unknown.
    pub frame_count: i32,
    pub width: i32,
    pub height: i32,
    pub blocks_x: i32,
    pub blocks_y: i32,
}

impl TrackHeader {
    /// Build the header describing a stream.
    pub fn from_metadata(metadata: &StreamMetadata) -> Self {
        let dims = metadata.grid_dims();
        Self {
            version: FORMAT_VERSION,
            duration_ms: metadata.duration_ms(),
            frame_rate_milli: metadata.frame_rate_milli(),
            frame_count: metadata.frame_count,
            width: metadata.width as i32,
            height: metadata.height as i32,
            blocks_x: dims.blocks_x as i32,
            blocks_y: dims.blocks_y as i32,
        }
    }

    /// Grid dimensions of every record in the track.
    pub fn dims(&self) -> GridDims {
        GridDims::new(self.blocks_x.max(0) as u32, self.blocks_y.max(0) as u32)
    }

    /// Frame rate in frames per second.
    pub fn frame_rate(&self) -> f64 {
        self.frame_rate_milli as f64 / 1000.0
    }

    /// Size of a single frame record in bytes.
    pub fn record_size(&self) -> usize {
        FRAME_PREFIX_SIZE + 2 * self.dims().len()
    }

    fn to_raw(self) -> RawHeader {
        RawHeader {
            magic: MAGIC,
            version: self.version.to_le(),
            duration_ms: self.duration_ms.to_le(),
            frame_rate_milli: self.frame_rate_milli.to_le(),
            frame_count: self.frame_count.to_le(),
            width: self.width.to_le(),
            height: self.height.to_le(),
            blocks_x: self.blocks_x.to_le(),
            blocks_y: self.blocks_y.to_le(),
            reserved: [0; 24],
        }
    }

    fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let raw: RawHeader = bytemuck::pod_read_unaligned(bytes);

        if raw.magic != MAGIC {
            return Err(Error::InvalidTrack(format!("bad magic {:?}", raw.magic)));
        }

        let header = Self {
            version: i32::from_le(raw.version),
            duration_ms: i32::from_le(raw.duration_ms),
            frame_rate_milli: i32::from_le(raw.frame_rate_milli),
            frame_count: i32::from_le(raw.frame_count),
            width: i32::from_le(raw.width),
            height: i32::from_le(raw.height),
            blocks_x: i32::from_le(raw.blocks_x),
            blocks_y: i32::from_le(raw.blocks_y),
        };

        if header.version != FORMAT_VERSION {
            return Err(Error::InvalidTrack(format!(
                "unsupported version {}",
                header.version
            )));
        }

        if header.blocks_x < 0 || header.blocks_y < 0 {
            return Err(Error::InvalidTrack(format!(
                "negative grid {}x{}",
                header.blocks_x, header.blocks_y
            )));
        }

        Ok(header)
    }
}

/// Fixed part of a frame record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrameHeader {
    pub index: u32,
    /// Timestamp in milliseconds, truncated.
    pub timestamp_ms: i32,
    pub picture_type: PictureType,
}

impl FrameHeader {
    fn to_raw(self) -> RawFrameHeader {
        RawFrameHeader {
            index: (self.index as i32).to_le(),
            timestamp_ms: self.timestamp_ms.to_le(),
            picture_type: self.picture_type.to_char(),
            reserved: [0; 11],
        }
    }

    fn from_bytes(bytes: &[u8; FRAME_PREFIX_SIZE]) -> Self {
        let raw: RawFrameHeader = bytemuck::pod_read_unaligned(bytes);
        Self {
            index: i32::from_le(raw.index) as u32,
            timestamp_ms: i32::from_le(raw.timestamp_ms),
            picture_type: PictureType::from_char(raw.picture_type),
        }
    }
}

/// A complete frame record, as read back from a track.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrameRecord {
    pub header: FrameHeader,
    /// Horizontal motion, row-major.
    pub x: Vec<i8>,
    /// Vertical motion, row-major.
    pub y: Vec<i8>,
}

impl FrameRecord {
    /// Sum of all motion values, both axes combined.
    pub fn motion_sum(&self) -> i32 {
        self.x.iter().chain(&self.y).map(|&v| v as i32).sum()
    }

    /// Motion at block coordinates.
    ///
    /// Returns `None` outside of `dims`, or if the record holds fewer blocks than `dims` describes.
    pub fn get(&self, dims: GridDims, bx: u32, by: u32) -> Option<(i8, i8)> {
        let idx = dims.cell(bx, by)?;
        Some((*self.x.get(idx)?, *self.y.get(idx)?))
    }
}

/// Append-only track writer.
///
/// The encoder only lays out bytes. It is up to the caller to write the header first, and to
/// hand frames over in order with planes of the header's grid size.
pub struct TrackEncoder<W> {
    out: W,
    header_written: bool,
}

impl<W: Write> TrackEncoder<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header_written: false,
        }
    }

    /// Write the track header. Must be called exactly once, before any frame.
    pub fn write_header(&mut self, header: &TrackHeader) -> Result<()> {
        debug_assert!(!self.header_written, "header already written");
        self.out.write_all(bytemuck::bytes_of(&header.to_raw()))?;
        self.header_written = true;
        Ok(())
    }

    /// Append a single frame record.
    pub fn write_frame(&mut self, header: &FrameHeader, x: &[i8], y: &[i8]) -> Result<()> {
        debug_assert!(self.header_written, "frame written before header");
        debug_assert_eq!(x.len(), y.len());
        self.out.write_all(bytemuck::bytes_of(&header.to_raw()))?;
        self.out.write_all(bytemuck::cast_slice(x))?;
        self.out.write_all(bytemuck::cast_slice(y))?;
        Ok(())
    }

    /// Append a complete frame record.
    pub fn write_record(&mut self, record: &FrameRecord) -> Result<()> {
        self.write_frame(&record.header, &record.x, &record.y)
    }

    /// Flush the underlying output.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(Into::into)
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Consume the encoder and return the output.
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Sequential track reader.
///
/// Yields frame records in file order, checking that frame indices follow each other.
pub struct TrackReader<R> {
    reader: R,
    header: TrackHeader,
    next_index: u32,
}

impl<R: Read> TrackReader<R> {
    /// Parse the header of a track.
    pub fn new(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        reader
            .read_exact(&mut buf)
            .map_err(|e| Error::InvalidTrack(format!("unable to read header ({})", e)))?;

        let header = TrackHeader::from_bytes(&buf)?;

        debug!("Opened track: {:?}", header);

        Ok(Self {
            reader,
            header,
            next_index: 0,
        })
    }

    pub fn header(&self) -> &TrackHeader {
        &self.header
    }

    /// Frame number displayed at a given time.
    pub fn frame_number_from_time(&self, time_ms: i64) -> u32 {
        (time_ms as f64 / 1000.0 * self.header.frame_rate()).round() as u32
    }

    /// Read the next frame record.
    ///
    /// Returns `Ok(None)` on a clean end of track.
    pub fn next_frame(&mut self) -> Result<Option<FrameRecord>> {
        let mut prefix = [0u8; FRAME_PREFIX_SIZE];

        match read_full(&mut self.reader, &mut prefix)? {
            0 => return Ok(None),
            FRAME_PREFIX_SIZE => {}
            n => {
                return Err(Error::InvalidTrack(format!(
                    "truncated frame record prefix ({} bytes)",
                    n
                )))
            }
        }

        let header = FrameHeader::from_bytes(&prefix);

        if header.index != self.next_index {
            return Err(Error::InvalidTrack(format!(
                "wrong frame: received {}, expected {}",
                header.index, self.next_index
            )));
        }

        let size = self.header.dims().len();
        let mut x = vec![0i8; size];
        let mut y = vec![0i8; size];

        for plane in [&mut x, &mut y] {
            self.reader
                .read_exact(bytemuck::cast_slice_mut(plane.as_mut_slice()))
                .map_err(|e| {
                    Error::InvalidTrack(format!("truncated frame {} ({})", header.index, e))
                })?;
        }

        self.next_index += 1;

        Ok(Some(FrameRecord { header, x, y }))
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> Iterator for TrackReader<R> {
    type Item = Result<FrameRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

/// Fill `buf` as far as the reader allows, returning the number of bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::InvalidTrack(format!("read failed ({})", e))),
        }
    }

    Ok(filled)
}
