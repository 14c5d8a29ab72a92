use crate::frame::{FrameType, VideoFrame};

use bytes::BytesMut;

/// Joins encoder writes into whole frames.
///
/// The encoder occasionally splits a large frame across several writes; only
/// the final write of a frame is flagged `complete`.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    pending: BytesMut,
    next_frame_num: u64,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` to the frame in progress, returning the finished frame when `complete`
    pub fn push(
        &mut self,
        chunk: &[u8],
        complete: bool,
        frame_type: FrameType,
        timestamp: f64,
    ) -> Option<VideoFrame> {
        self.pending.extend_from_slice(chunk);
        if !complete {
            return None;
        }

        let data = self.pending.split().freeze();
        let frame = VideoFrame::new(data, self.next_frame_num, timestamp, frame_type);
        self.next_frame_num += 1;
        Some(frame)
    }

    /// Bytes received for a frame that is not complete yet
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn frames_assembled(&self) -> u64 {
        self.next_frame_num
    }
}
