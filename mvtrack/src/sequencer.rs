//! # Frame sequencing
//!
//! Guards the track against frames arriving out of order, being dropped or being duplicated by
//! the decoding layer.

use crate::error::{Error, Result};
use log::*;

/// Timing of a frame that passed validation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SequencedFrame {
    /// Running frame index.
    pub index: u32,
    /// Presentation timestamp in milliseconds.
    pub timestamp_ms: f64,
}

impl SequencedFrame {
    /// Timestamp as stored in the track, truncated towards zero.
    pub fn timestamp_ms_trunc(&self) -> i32 {
        self.timestamp_ms as i32
    }
}

/// Frame order validator.
///
/// Tracks the last accepted timestamp and the running frame counter. Every accepted frame must
/// not go back in time, and its timestamp must map to exactly the next frame index.
pub struct FrameSequencer {
    frame_duration_ms: f64,
    last_timestamp_ms: f64,
    next_index: u32,
}

impl FrameSequencer {
    /// Create a new sequencer.
    ///
    /// # Arguments
    ///
    /// * `frame_rate` - average frame rate of the stream, in frames per second.
    pub fn new(frame_rate: f64) -> Self {
        Self {
            frame_duration_ms: 1000.0 / frame_rate,
            last_timestamp_ms: -1.0,
            next_index: 0,
        }
    }

    /// Index the next accepted frame will get.
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    /// Frame index a timestamp maps to.
    pub fn expected_index(&self, timestamp_ms: f64) -> i64 {
        (timestamp_ms / self.frame_duration_ms).round() as i64
    }

    /// Check the next frame and advance the sequence.
    ///
    /// On error the sequencer is left untouched.
    pub fn advance(&mut self, timestamp_ms: f64) -> Result<SequencedFrame> {
        if timestamp_ms < self.last_timestamp_ms {
            error!(
                "Out of order frame: {} < {}",
                timestamp_ms, self.last_timestamp_ms
            );
            return Err(Error::OutOfOrderTimestamp {
                timestamp_ms,
                last_timestamp_ms: self.last_timestamp_ms,
            });
        }

        let expected = self.expected_index(timestamp_ms);

        if expected != self.next_index as i64 {
            error!(
                "Invalid calculated frame number: {} != {}",
                expected, self.next_index
            );
            return Err(Error::FrameIndexMismatch {
                expected,
                actual: self.next_index,
            });
        }

        let frame = SequencedFrame {
            index: self.next_index,
            timestamp_ms,
        };

        self.last_timestamp_ms = timestamp_ms;
        self.next_index += 1;

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_regular_sequence() {
        let mut seq = FrameSequencer::new(25.0);

        for i in 0..100 {
            let frame = seq.advance(i as f64 * 40.0).unwrap();
            assert_eq!(frame.index, i);
        }

        assert_eq!(seq.next_index(), 100);
    }

    #[test]
    fn tolerates_jitter_within_half_a_frame() {
        let mut seq = FrameSequencer::new(30000.0 / 1001.0);
        // 90 kHz timestamps of NTSC video, converted to ms.
        for (i, pts) in [0i64, 3003, 6006, 9009, 12012].into_iter().enumerate() {
            let frame = seq.advance(pts as f64 / 90.0).unwrap();
            assert_eq!(frame.index, i as u32);
        }

        let frame = seq.advance(15015.0 / 90.0 + 10.0).unwrap();
        assert_eq!(frame.index, 5);
        assert_eq!(frame.timestamp_ms_trunc(), 176);
    }

    #[test]
    fn rejects_out_of_order() {
        let mut seq = FrameSequencer::new(25.0);
        seq.advance(0.0).unwrap();
        seq.advance(40.0).unwrap();

        match seq.advance(39.0) {
            Err(Error::OutOfOrderTimestamp {
                timestamp_ms,
                last_timestamp_ms,
            }) => {
                assert_eq!(timestamp_ms, 39.0);
                assert_eq!(last_timestamp_ms, 40.0);
            }
            r => panic!("unexpected result {:?}", r),
        }

        // Nothing got consumed by the failed frame.
        assert_eq!(seq.next_index(), 2);
    }

    #[test]
    fn rejects_skipped_frame() {
        let mut seq = FrameSequencer::new(25.0);
        seq.advance(0.0).unwrap();
        seq.advance(40.0).unwrap();

        assert!(matches!(
            seq.advance(120.0),
            Err(Error::FrameIndexMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn rejects_duplicated_frame() {
        let mut seq = FrameSequencer::new(25.0);
        seq.advance(0.0).unwrap();
        seq.advance(40.0).unwrap();

        // Same timestamp is in order, but maps to an index already taken.
        assert!(matches!(
            seq.advance(40.0),
            Err(Error::FrameIndexMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn first_frame_must_start_at_zero() {
        let mut seq = FrameSequencer::new(25.0);
        assert!(matches!(
            seq.advance(80.0),
            Err(Error::FrameIndexMismatch {
                expected: 2,
                actual: 0
            })
        ));
        assert!(seq.advance(19.0).is_ok());
    }
}
