//! End-to-end tests driving the pipeline with a scripted decoder.

use mvtrack::container::{FRAME_PREFIX_SIZE, HEADER_SIZE};
use mvtrack::prelude::v1::*;
use rand::prelude::*;
use std::collections::VecDeque;
use std::io::Cursor;

/// Decoder replaying a fixed list of frames.
struct ScriptedDecoder {
    metadata: StreamMetadata,
    frames: VecDeque<Result<DecodedFrame>>,
}

impl ScriptedDecoder {
    fn new(metadata: StreamMetadata, frames: impl IntoIterator<Item = DecodedFrame>) -> Self {
        Self {
            metadata,
            frames: frames.into_iter().map(Ok).collect(),
        }
    }
}

impl Decoder for ScriptedDecoder {
    fn metadata(&self) -> StreamMetadata {
        self.metadata.clone()
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        self.frames.pop_front().transpose()
    }
}

fn metadata(width: u32, height: u32) -> StreamMetadata {
    StreamMetadata {
        time_base: TimeBase::new(1, 12800),
        duration: 12800 * 4,
        frame_rate: 25.0,
        frame_count: 100,
        width,
        height,
    }
}

/// Frame `index` of a 25 fps stream in a 1/12800 time base.
fn frame_at(index: i64, motion_vectors: Vec<MotionVector>) -> DecodedFrame {
    DecodedFrame {
        pts: index * 512,
        duration: 512,
        picture_type: if index % 12 == 0 {
            PictureType::Intra
        } else {
            PictureType::Predicted
        },
        motion_vectors,
    }
}

fn random_vectors(rng: &mut StdRng, width: u32, height: u32) -> Vec<MotionVector> {
    (0..rng.gen_range(0..300))
        .map(|_| MotionVector {
            dst_x: rng.gen_range(0..width as i32 + 8),
            dst_y: rng.gen_range(0..height as i32 + 8),
            w: *[8, 16].choose(&mut *rng).unwrap(),
            h: *[8, 16].choose(&mut *rng).unwrap(),
            motion_x: rng.gen_range(-600..600),
            motion_y: rng.gen_range(-600..600),
            source: *[-1, 1].choose(&mut *rng).unwrap(),
        })
        .collect()
}

fn random_stream(seed: u64, frames: i64, width: u32, height: u32) -> Vec<DecodedFrame> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..frames)
        .map(|i| {
            let vectors = if i % 12 == 0 {
                vec![]
            } else {
                random_vectors(&mut rng, width, height)
            };
            frame_at(i, vectors)
        })
        .collect()
}

fn encode(decoder: &mut ScriptedDecoder) -> (Result<u32>, Vec<Progress>, TrackPipeline<Vec<u8>>) {
    let mut pipeline = TrackPipeline::new(vec![]);
    let mut progress = vec![];
    let ret = pipeline.run(decoder, |p| progress.push(*p));
    (ret, progress, pipeline)
}

#[test]
fn encodes_full_stream() {
    let (width, height) = (100, 100);
    let frames = random_stream(1, 100, width, height);
    let mut decoder = ScriptedDecoder::new(metadata(width, height), frames);

    let (ret, progress, mut pipeline) = encode(&mut decoder);
    assert_eq!(ret.unwrap(), 100);
    assert_eq!(progress.len(), 100);
    assert_eq!(pipeline.state(), PipelineState::Finalized);

    pipeline.finish().unwrap();
    let out = pipeline.into_inner();

    // 100x100 px only fits 6x6 whole blocks.
    assert_eq!(out.len(), HEADER_SIZE + 100 * (FRAME_PREFIX_SIZE + 2 * 36));

    let reader = TrackReader::new(Cursor::new(out)).unwrap();
    let header = *reader.header();
    assert_eq!((header.blocks_x, header.blocks_y), (6, 6));
    assert_eq!(header.duration_ms, 4000);
    assert_eq!(header.frame_rate_milli, 25000);
    assert_eq!(header.frame_count, 100);

    for (i, (record, p)) in reader.zip(&progress).enumerate() {
        let record = record.unwrap();
        assert_eq!(record.header.index, i as u32);
        assert_eq!(record.header.timestamp_ms, i as i32 * 40);
        assert_eq!(record.motion_sum(), p.motion_sum);
        assert_eq!(p.frame_index, i as u32);
        assert_eq!(p.video_length_ms, 4000);

        if i % 12 == 0 {
            assert_eq!(record.header.picture_type, PictureType::Intra);
            assert!(record.x.iter().chain(&record.y).all(|&v| v == 0));
        }

        assert!(record
            .x
            .iter()
            .chain(&record.y)
            .all(|&v| (-127..=127).contains(&v)));
    }
}

#[test]
fn output_is_deterministic() {
    let run = || {
        let mut decoder = ScriptedDecoder::new(metadata(320, 240), random_stream(7, 50, 320, 240));
        let (ret, _, mut pipeline) = encode(&mut decoder);
        ret.unwrap();
        pipeline.finish().unwrap();
        pipeline.into_inner()
    };

    assert_eq!(run(), run());
}

#[test]
fn saturates_large_motion() {
    let m = metadata(32, 32);
    let vectors = vec![
        MotionVector {
            dst_x: 0,
            dst_y: 0,
            w: 16,
            h: 16,
            motion_x: 250,
            motion_y: -250,
            source: 0,
        },
        MotionVector {
            dst_x: 31,
            dst_y: 31,
            w: 8,
            h: 8,
            motion_x: 1000,
            motion_y: 4,
            source: 0,
        },
    ];

    let mut decoder = ScriptedDecoder::new(m, [frame_at(0, vectors)]);
    let (ret, progress, mut pipeline) = encode(&mut decoder);
    assert_eq!(ret.unwrap(), 1);
    pipeline.finish().unwrap();

    let mut reader = TrackReader::new(Cursor::new(pipeline.into_inner())).unwrap();
    let dims = reader.header().dims();
    let record = reader.next_frame().unwrap().unwrap();

    assert_eq!(record.get(dims, 0, 0), Some((127, -127)));
    assert_eq!(record.get(dims, 1, 1), Some((127, 1)));
    assert_eq!(progress[0].motion_sum, 127 - 127 + 127 + 1);
}

#[test]
fn halts_on_skipped_frame() {
    let mut frames = random_stream(3, 10, 64, 64);
    frames.remove(5);

    let mut decoder = ScriptedDecoder::new(metadata(64, 64), frames);
    let (ret, progress, pipeline) = encode(&mut decoder);

    assert!(matches!(
        ret,
        Err(Error::FrameIndexMismatch {
            expected: 6,
            actual: 5
        })
    ));
    assert_eq!(progress.len(), 5);
    assert_eq!(pipeline.state(), PipelineState::Aborted);

    // Frames after the failure were never pulled from the decoder.
    assert_eq!(decoder.frames.len(), 3);
}

#[test]
fn halts_on_out_of_order_frame() {
    let mut frames = random_stream(4, 10, 64, 64);
    frames.swap(3, 4);

    let mut decoder = ScriptedDecoder::new(metadata(64, 64), frames);
    let (ret, progress, _) = encode(&mut decoder);

    // Frame 4 arrives in place of 3, so the index check trips before ordering is violated.
    assert!(matches!(ret, Err(Error::FrameIndexMismatch { .. })));
    assert_eq!(progress.len(), 3);

    let frames = vec![frame_at(0, vec![]), frame_at(1, vec![]), {
        let mut f = frame_at(1, vec![]);
        f.pts -= 1;
        f
    }];

    let mut decoder = ScriptedDecoder::new(metadata(64, 64), frames);
    let (ret, progress, mut pipeline) = encode(&mut decoder);

    assert!(matches!(ret, Err(Error::OutOfOrderTimestamp { .. })));
    assert_eq!(progress.len(), 2);
    assert!(matches!(pipeline.finish(), Err(Error::Aborted)));

    // Records encoded before the failure stay in the output.
    let reader = TrackReader::new(Cursor::new(pipeline.into_inner())).unwrap();
    assert_eq!(reader.count(), 2);
}

#[test]
fn decode_errors_propagate() {
    let mut decoder = ScriptedDecoder::new(metadata(64, 64), random_stream(5, 3, 64, 64));
    decoder
        .frames
        .push_back(Err(Error::Decode("Failed to recv frame (-22)".into())));
    decoder.frames.push_back(Ok(frame_at(3, vec![])));

    let (ret, progress, pipeline) = encode(&mut decoder);
    assert!(matches!(ret, Err(Error::Decode(_))));
    assert_eq!(progress.len(), 3);
    assert_eq!(pipeline.state(), PipelineState::Aborted);
}

#[test]
fn empty_stream_writes_nothing() {
    let mut decoder = ScriptedDecoder::new(metadata(64, 64), []);
    let (ret, progress, mut pipeline) = encode(&mut decoder);
    assert_eq!(ret.unwrap(), 0);
    assert!(progress.is_empty());
    assert_eq!(pipeline.state(), PipelineState::Finalized);

    // Finishing again is a no-op.
    pipeline.finish().unwrap();
    assert!(pipeline.into_inner().is_empty());
}
