//! FFMPEG's AV Decoder
//!
//! Decodes the best video stream of an input file with `+export_mvs`, and converts the motion
//! vector side data of every frame into `mvtrack` records.

use ::core::ops::{Deref, DerefMut};
use ::core::{mem, ptr, slice};
use c_str_macro::c_str;
use ffmpeg_sys_next::*;
use libc::{c_int, EAGAIN};
use log::*;
use mvtrack::prelude::v1::*;
use std::ffi::CString;

macro_rules! av_owned {
    ($name:ident, $ty:ty, $free:ident) => {
        /// Owned libav allocation, released on drop.
        pub struct $name(&'static mut $ty);

        impl $name {
            fn try_from_raw(raw: *mut $ty, what: &str) -> Result<Self> {
                unsafe { raw.as_mut() }
                    .map(Self)
                    .ok_or_else(|| Error::Decode(format!("Failed to allocate {}", what)))
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                // SAFETY: the reference will be dangling,
                // but after the drop nobody will read it.
                unsafe { $free(&mut (self.0 as *mut _)) };
            }
        }

        impl Deref for $name {
            type Target = $ty;

            fn deref(&self) -> &$ty {
                &*self.0
            }
        }

        impl DerefMut for $name {
            fn deref_mut(&mut self) -> &mut $ty {
                &mut *self.0
            }
        }
    };
}

av_owned!(CodecContext, AVCodecContext, avcodec_free_context);
av_owned!(Frame, AVFrame, av_frame_free);
av_owned!(Packet, AVPacket, av_packet_free);

/// Opened input file.
pub struct AvInput {
    fmt_ctx: &'static mut AVFormatContext,
    url: CString,
}

impl Drop for AvInput {
    fn drop(&mut self) {
        unsafe { avformat_close_input(&mut (self.fmt_ctx as *mut _)) };
    }
}

impl AvInput {
    /// Open a file and probe its streams.
    pub fn open(path: &str) -> Result<Self> {
        let url = CString::new(path)
            .map_err(|_| Error::InputOpen(format!("Invalid source path {:?}", path)))?;

        let mut fmt_ctx: *mut AVFormatContext = ptr::null_mut();

        match unsafe {
            avformat_open_input(
                &mut fmt_ctx,
                url.as_ptr(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        } {
            e if e < 0 => {
                return Err(Error::InputOpen(format!(
                    "Could not open source file {} ({})",
                    path, e
                )))
            }
            _ => {}
        }

        let fmt_ctx = unsafe { fmt_ctx.as_mut() }
            .ok_or_else(|| Error::InputOpen(format!("Could not open source file {}", path)))?;

        let mut input = Self { fmt_ctx, url };

        match unsafe { avformat_find_stream_info(input.fmt_ctx, ptr::null_mut()) } {
            e if e < 0 => Err(Error::InputOpen(format!(
                "Could not find stream information ({})",
                e
            ))),
            _ => Ok(input),
        }
    }

    /// Print input format information to stderr.
    pub fn dump_format(&mut self) {
        unsafe { av_dump_format(self.fmt_ctx, 0, self.url.as_ptr(), 0) };
    }
}

/// Frame reference that is unreferenced when going out of scope.
struct RefFrame<'a> {
    frame: &'a mut AVFrame,
}

impl<'a> Drop for RefFrame<'a> {
    fn drop(&mut self) {
        unsafe { av_frame_unref(self.frame) };
    }
}

impl<'a> Deref for RefFrame<'a> {
    type Target = AVFrame;

    fn deref(&self) -> &Self::Target {
        self.frame
    }
}

/// Packet reference that is unreferenced when going out of scope.
struct RefPacket<'a> {
    packet: &'a mut AVPacket,
}

impl<'a> Drop for RefPacket<'a> {
    fn drop(&mut self) {
        unsafe { av_packet_unref(self.packet) };
    }
}

impl<'a> Deref for RefPacket<'a> {
    type Target = AVPacket;

    fn deref(&self) -> &Self::Target {
        self.packet
    }
}

enum Received {
    Frame(DecodedFrame),
    Again,
    Eof,
}

/// Motion vector exporting libav decoder.
pub struct AvDecoder {
    // Field order matters: everything must be released before the input is closed.
    codec_ctx: CodecContext,
    av_frame: Frame,
    packet: Packet,
    input: AvInput,
    stream_idx: c_int,
    metadata: StreamMetadata,
    flushing: bool,
    drained: bool,
}

impl AvDecoder {
    /// Open a video file for decoding.
    pub fn open(path: &str) -> Result<Self> {
        Self::try_new(AvInput::open(path)?)
    }

    /// Set up a decoder for the best video stream of the input.
    pub fn try_new(mut input: AvInput) -> Result<Self> {
        let mut decoder: *const AVCodec = ptr::null();

        let stream_idx = match unsafe {
            av_find_best_stream(
                input.fmt_ctx,
                AVMediaType::AVMEDIA_TYPE_VIDEO,
                -1,
                -1,
                &mut decoder,
                0,
            )
        } {
            e if e < 0 => Err(Error::NoVideoStream(format!(
                "Could not find video stream in the input ({})",
                e
            ))),
            i => Ok(i),
        }?;

        let stream = unsafe { (*input.fmt_ctx.streams.offset(stream_idx as _)).as_ref() }
            .ok_or_else(|| Error::NoVideoStream("Stream info null".into()))?;

        let mut codec_ctx =
            CodecContext::try_from_raw(unsafe { avcodec_alloc_context3(decoder) }, "codec")?;

        match unsafe { avcodec_parameters_to_context(&mut *codec_ctx, stream.codecpar) } {
            e if e < 0 => {
                return Err(Error::NoVideoStream(format!(
                    "Failed to copy codec parameters to codec context ({})",
                    e
                )))
            }
            _ => {}
        }

        // Let the codec pick the thread count, preferring frame threads.
        let capabilities = unsafe { (*decoder).capabilities } as u32;
        codec_ctx.thread_count = 0;

        if capabilities & AV_CODEC_CAP_FRAME_THREADS as u32 != 0 {
            codec_ctx.thread_type = FF_THREAD_FRAME as c_int;
        } else if capabilities & AV_CODEC_CAP_SLICE_THREADS as u32 != 0 {
            codec_ctx.thread_type = FF_THREAD_SLICE as c_int;
        } else {
            codec_ctx.thread_count = 1;
        }

        let mut av_opts: *mut AVDictionary = ptr::null_mut();

        let ret = unsafe {
            av_dict_set(
                &mut av_opts,
                c_str!("flags2").as_ptr(),
                c_str!("+export_mvs").as_ptr(),
                0,
            );
            let ret = avcodec_open2(&mut *codec_ctx, decoder, &mut av_opts);
            av_dict_free(&mut av_opts);
            ret
        };

        if ret < 0 {
            return Err(Error::NoVideoStream(format!(
                "Failed to open video codec ({})",
                ret
            )));
        }

        let metadata = stream_metadata(input.fmt_ctx, stream, &codec_ctx);

        debug!("Opened video stream {}: {:?}", stream_idx, metadata);

        let av_frame = Frame::try_from_raw(unsafe { av_frame_alloc() }, "frame")?;
        let packet = Packet::try_from_raw(unsafe { av_packet_alloc() }, "packet")?;

        Ok(Self {
            codec_ctx,
            av_frame,
            packet,
            input,
            stream_idx,
            metadata,
            flushing: false,
            drained: false,
        })
    }

    /// Print input format information to stderr.
    pub fn dump_format(&mut self) {
        self.input.dump_format()
    }

    fn receive_frame(&mut self) -> Result<Received> {
        match unsafe { avcodec_receive_frame(&mut *self.codec_ctx, &mut *self.av_frame) } {
            e if e == AVERROR(EAGAIN) => Ok(Received::Again),
            e if e == AVERROR_EOF => Ok(Received::Eof),
            e if e < 0 => Err(Error::Decode(format!(
                "Error while receiving a frame from the decoder ({})",
                e
            ))),
            _ => {
                let frame = RefFrame {
                    frame: &mut self.av_frame,
                };
                Ok(Received::Frame(decoded_frame(&frame)))
            }
        }
    }

    /// Read packets until one of the video stream is sent to the decoder.
    ///
    /// Once the input runs out, the decoder is put into flushing mode instead.
    fn feed_packet(&mut self) -> Result<()> {
        loop {
            match unsafe { av_read_frame(self.input.fmt_ctx, &mut *self.packet) } {
                e if e < 0 => {
                    if e != AVERROR_EOF {
                        warn!("Failed to read frame ({}), flushing decoder", e);
                    }
                    debug!("Flushing decoder");
                    self.flushing = true;
                    return send_packet(&mut self.codec_ctx, None);
                }
                _ => {
                    let packet = RefPacket {
                        packet: &mut self.packet,
                    };

                    trace!("Read packet: {} {}", packet.stream_index, packet.size);

                    if packet.stream_index == self.stream_idx {
                        return send_packet(&mut self.codec_ctx, Some(&*packet));
                    }
                }
            }
        }
    }
}

impl Decoder for AvDecoder {
    fn metadata(&self) -> StreamMetadata {
        self.metadata.clone()
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        while !self.drained {
            match self.receive_frame()? {
                Received::Frame(frame) => return Ok(Some(frame)),
                Received::Again if !self.flushing => self.feed_packet()?,
                Received::Again | Received::Eof => self.drained = true,
            }
        }

        Ok(None)
    }
}

fn send_packet(codec_ctx: &mut AVCodecContext, packet: Option<&AVPacket>) -> Result<()> {
    let packet = packet.map_or(ptr::null(), |p| p as *const _);

    match unsafe { avcodec_send_packet(codec_ctx, packet) } {
        e if e < 0 => Err(Error::Decode(format!(
            "Error while sending a packet to the decoder ({})",
            e
        ))),
        _ => Ok(()),
    }
}

/// Convert a rational to a float, treating an undefined rational as 0.
fn rational_to_f64(r: AVRational) -> f64 {
    if r.num == 0 || r.den == 0 {
        0.0
    } else {
        r.num as f64 / r.den as f64
    }
}

/// Convert a container level duration (`AV_TIME_BASE` units) to stream ticks.
fn container_duration_ticks(duration: i64, time_base: TimeBase) -> i64 {
    if duration == AV_NOPTS_VALUE || time_base.num <= 0 {
        0
    } else {
        (duration as f64 / AV_TIME_BASE as f64 * time_base.den as f64 / time_base.num as f64)
            .round() as i64
    }
}

fn stream_metadata(
    fmt_ctx: &AVFormatContext,
    stream: &AVStream,
    codec_ctx: &AVCodecContext,
) -> StreamMetadata {
    let time_base = TimeBase::new(stream.time_base.num, stream.time_base.den);

    let duration = if stream.duration != AV_NOPTS_VALUE {
        stream.duration
    } else {
        container_duration_ticks(fmt_ctx.duration, time_base)
    };

    let frame_rate = match rational_to_f64(stream.avg_frame_rate) {
        r if r > 0.0 => r,
        _ => rational_to_f64(stream.r_frame_rate),
    };

    StreamMetadata {
        time_base,
        duration,
        frame_rate,
        frame_count: stream.nb_frames.clamp(0, i32::MAX as i64) as i32,
        width: codec_ctx.width.max(0) as u32,
        height: codec_ctx.height.max(0) as u32,
    }
}

/// Motion vectors attached to a frame as side data.
///
/// # Safety
///
/// The frame must be a valid, referenced libav frame.
unsafe fn side_data_vectors(frame: &AVFrame) -> &[AVMotionVector] {
    match av_frame_get_side_data(frame, AVFrameSideDataType::AV_FRAME_DATA_MOTION_VECTORS).as_ref()
    {
        Some(side_data) if !side_data.data.is_null() => {
            let size = side_data.size as usize / mem::size_of::<AVMotionVector>();
            trace!("{} motion vectors at {:?}", size, side_data.data);
            slice::from_raw_parts(side_data.data as *const AVMotionVector, size)
        }
        _ => &[],
    }
}

/// Convert libav's motion vector representation.
pub fn motion_vector(mv: &AVMotionVector) -> MotionVector {
    MotionVector {
        dst_x: mv.dst_x as i32,
        dst_y: mv.dst_y as i32,
        w: mv.w as u32,
        h: mv.h as u32,
        motion_x: mv.motion_x,
        motion_y: mv.motion_y,
        source: mv.source,
    }
}

fn decoded_frame(frame: &AVFrame) -> DecodedFrame {
    let pts = if frame.pts != AV_NOPTS_VALUE {
        frame.pts
    } else {
        frame.best_effort_timestamp
    };

    let picture_type =
        PictureType::from_char(unsafe { av_get_picture_type_char(frame.pict_type) } as u8);

    let motion_vectors = unsafe { side_data_vectors(frame) }
        .iter()
        .map(motion_vector)
        .collect::<Vec<_>>();

    if motion_vectors.is_empty() {
        trace!("No motion vectors in frame {}", pts);
    }

    DecodedFrame {
        pts,
        duration: frame.duration,
        picture_type,
        motion_vectors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn av_mv(dst: (i16, i16), size: (u8, u8), motion: (i32, i32), source: i32) -> AVMotionVector {
        AVMotionVector {
            source,
            w: size.0,
            h: size.1,
            dst_x: dst.0,
            dst_y: dst.1,
            motion_x: motion.0,
            motion_y: motion.1,
            motion_scale: 4,
            // SAFETY: plain C struct, all-zero is a valid value.
            ..unsafe { mem::zeroed() }
        }
    }

    #[test]
    fn converts_motion_vectors() {
        let mvs = [
            av_mv((8, 24), (16, 16), (-12, 4), -1),
            av_mv((-4, 1080), (8, 8), (0, 0), 1),
        ];

        let converted = mvs.iter().map(motion_vector).collect::<Vec<_>>();

        assert_eq!(
            converted[0],
            MotionVector {
                dst_x: 8,
                dst_y: 24,
                w: 16,
                h: 16,
                motion_x: -12,
                motion_y: 4,
                source: -1,
            }
        );
        assert_eq!(converted[1].dst_x, -4);
        assert_eq!(converted[1].dst_y, 1080);
        assert!(!converted[1].has_motion());
    }

    #[test]
    fn rational_conversion() {
        assert_eq!(rational_to_f64(AVRational { num: 30, den: 1 }), 30.0);
        assert_eq!(rational_to_f64(AVRational { num: 0, den: 0 }), 0.0);
        assert_eq!(rational_to_f64(AVRational { num: 1, den: 0 }), 0.0);
        assert!((rational_to_f64(AVRational { num: 30000, den: 1001 }) - 29.97).abs() < 0.001);
    }

    #[test]
    fn container_duration_fallback() {
        let tb = TimeBase::new(1, 90000);
        assert_eq!(container_duration_ticks(10_010_000, tb), 900900);
        assert_eq!(container_duration_ticks(AV_NOPTS_VALUE, tb), 0);
        assert_eq!(container_duration_ticks(1_000_000, TimeBase::new(0, 1)), 0);
    }
}
