use crate::error::BufferError;
use crate::frame::VideoFrame;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Bounded circular buffer of H.264 frames with group-of-pictures awareness
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Frames, oldest first
    frames: VecDeque<VideoFrame>,
    /// Maximum number of frames held
    max_len: usize,
    /// Frames dropped from the front because the buffer was full
    evicted: u64,
}

impl FrameBuffer {
    /// Create a new frame buffer holding at most `max_len` frames
    ///
    /// # Example
    /// ```
    /// use motioncam::frame_buffer::FrameBuffer;
    ///
    /// let buffer = FrameBuffer::new(60).unwrap();
    /// assert!(buffer.is_empty());
    /// ```
    pub fn new(max_len: usize) -> Result<Self, BufferError> {
        if max_len == 0 {
            return Err(BufferError::ZeroCapacity);
        }

        debug!("Created frame buffer with capacity {}", max_len);
        Ok(Self::with_max_len(max_len))
    }

    fn with_max_len(max_len: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(max_len),
            max_len,
            evicted: 0,
        }
    }

    /// Add a frame to the end of the buffer, dropping the oldest frame when full
    pub fn append(&mut self, frame: VideoFrame) {
        if self.frames.len() == self.max_len {
            if let Some(oldest) = self.frames.pop_front() {
                self.evicted += 1;
                trace!("Evicted frame {} from full buffer", oldest.frame_num);
            }
        }
        self.frames.push_back(frame);
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() == self.max_len
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Number of frames evicted since the buffer was created
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Whether at least one SPS header is present
    pub fn contains_header_frame(&self) -> bool {
        self.frames.iter().any(VideoFrame::is_header)
    }

    /// Drop leading frames until an SPS header is the first frame.
    ///
    /// No-op when the buffer holds no header at all.
    pub fn trim_start(&mut self) {
        if !self.contains_header_frame() {
            return;
        }

        let mut dropped = 0usize;
        while self.frames.front().is_some_and(|frame| !frame.is_header()) {
            self.frames.pop_front();
            dropped += 1;
        }

        if dropped > 0 {
            debug!("Trimmed {} frames preceding the first SPS header", dropped);
        }
    }

    /// Remove and return the most recent group of pictures.
    ///
    /// The group runs from the last SPS header to the end of the buffer. A header sitting
    /// at the very end (with no data frames after it) is set aside while the group before
    /// it is extracted, then put back. Returns an empty buffer if there is no header.
    pub fn final_group(&mut self) -> FrameBuffer {
        let mut group = FrameBuffer::with_max_len(self.max_len);

        let trailing_header = match self.frames.back() {
            Some(frame) if frame.is_header() => self.frames.pop_back(),
            _ => None,
        };

        if let Some(start) = self.frames.iter().rposition(VideoFrame::is_header) {
            group.frames.extend(self.frames.drain(start..));
        }

        if let Some(header) = trailing_header {
            self.frames.push_back(header);
        }

        trace!("Extracted final group of {} frames", group.len());
        group
    }

    /// New buffer holding this buffer's frames followed by `other`'s frames.
    ///
    /// Its capacity is the sum of both capacities; neither operand is modified.
    pub fn concatenate(&self, other: &FrameBuffer) -> FrameBuffer {
        let mut joined = FrameBuffer::with_max_len(self.max_len + other.max_len);
        joined
            .frames
            .extend(self.frames.iter().chain(other.frames.iter()).cloned());
        joined
    }

    /// All frame payloads concatenated in order
    pub fn raw_bytes(&self) -> Bytes {
        let total = self.frames.iter().map(VideoFrame::len).sum();
        let mut out = BytesMut::with_capacity(total);
        for frame in &self.frames {
            out.extend_from_slice(&frame.data);
        }
        out.freeze()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn first(&self) -> Option<&VideoFrame> {
        self.frames.front()
    }

    pub fn last(&self) -> Option<&VideoFrame> {
        self.frames.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VideoFrame> {
        self.frames.iter()
    }
}

impl<'a> IntoIterator for &'a FrameBuffer {
    type Item = &'a VideoFrame;
    type IntoIter = std::collections::vec_deque::Iter<'a, VideoFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

/// Builder sizing a buffer from a framerate and a number of seconds
pub struct FrameBufferBuilder {
    capacity: Option<usize>,
}

impl FrameBufferBuilder {
    pub fn new() -> Self {
        Self { capacity: None }
    }

    /// Set the capacity directly
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Size the buffer to hold `seconds` of video at `framerate`
    pub fn window(mut self, framerate: u32, seconds: u32) -> Self {
        self.capacity = Some(framerate as usize * seconds as usize);
        self
    }

    pub fn build(self) -> Result<FrameBuffer, BufferError> {
        let capacity = self.capacity.ok_or(BufferError::MissingCapacity)?;
        FrameBuffer::new(capacity)
    }
}

impl Default for FrameBufferBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameType;

    fn data_frame(frame_num: u64) -> VideoFrame {
        VideoFrame::new(vec![frame_num as u8; 4], frame_num, frame_num as f64, FrameType::PFrame)
    }

    fn header_frame(frame_num: u64) -> VideoFrame {
        VideoFrame::new(vec![0xAA; 2], frame_num, frame_num as f64, FrameType::SpsHeader)
    }

    fn buffer_of(frames: Vec<VideoFrame>) -> FrameBuffer {
        let mut buffer = FrameBuffer::new(frames.len().max(1)).unwrap();
        for frame in frames {
            buffer.append(frame);
        }
        buffer
    }

    fn frame_nums(buffer: &FrameBuffer) -> Vec<u64> {
        buffer.iter().map(|f| f.frame_num).collect()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(FrameBuffer::new(0), Err(BufferError::ZeroCapacity)));
    }

    #[test]
    fn test_append_past_capacity_evicts_oldest() {
        let capacity = 5;
        let mut buffer = FrameBuffer::new(capacity).unwrap();

        for i in 0..capacity as u64 {
            buffer.append(data_frame(i));
        }
        assert!(buffer.is_full());
        assert_eq!(buffer.first().unwrap().frame_num, 0);

        buffer.append(data_frame(capacity as u64));

        assert_eq!(buffer.len(), capacity);
        assert_eq!(frame_nums(&buffer), vec![1, 2, 3, 4, 5]);
        assert_eq!(buffer.evicted(), 1);
    }

    #[test]
    fn test_full_and_empty() {
        let mut buffer = FrameBuffer::new(2).unwrap();
        assert!(buffer.is_empty());
        assert!(!buffer.is_full());

        buffer.append(data_frame(0));
        assert!(!buffer.is_empty());
        assert!(!buffer.is_full());

        buffer.append(data_frame(1));
        assert!(buffer.is_full());

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_trim_start_drops_until_header() {
        let mut buffer = buffer_of(vec![
            data_frame(0),
            data_frame(1),
            header_frame(2),
            data_frame(3),
        ]);

        buffer.trim_start();

        assert_eq!(frame_nums(&buffer), vec![2, 3]);
        assert!(buffer.first().unwrap().is_header());
    }

    #[test]
    fn test_trim_start_without_header_is_noop() {
        let mut buffer = buffer_of(vec![data_frame(0), data_frame(1)]);
        buffer.trim_start();
        assert_eq!(frame_nums(&buffer), vec![0, 1]);
    }

    #[test]
    fn test_final_group_with_trailing_header() {
        let mut buffer = buffer_of(vec![
            header_frame(0),
            data_frame(1),
            data_frame(2),
            header_frame(3),
        ]);

        let group = buffer.final_group();

        assert_eq!(frame_nums(&group), vec![0, 1, 2]);
        assert_eq!(frame_nums(&buffer), vec![3]);
        assert!(buffer.first().unwrap().is_header());
    }

    #[test]
    fn test_final_group_takes_last_gop_only() {
        let mut buffer = buffer_of(vec![
            data_frame(0),
            header_frame(1),
            data_frame(2),
            header_frame(3),
            data_frame(4),
            data_frame(5),
        ]);

        let group = buffer.final_group();

        assert_eq!(frame_nums(&group), vec![3, 4, 5]);
        assert_eq!(frame_nums(&buffer), vec![0, 1, 2]);
    }

    #[test]
    fn test_final_group_without_header_is_empty() {
        let mut buffer = buffer_of(vec![data_frame(0), data_frame(1)]);

        let group = buffer.final_group();

        assert!(group.is_empty());
        assert_eq!(frame_nums(&buffer), vec![0, 1]);
    }

    #[test]
    fn test_final_group_of_lone_header_is_empty() {
        let mut buffer = buffer_of(vec![header_frame(0)]);

        let group = buffer.final_group();

        assert!(group.is_empty());
        assert_eq!(frame_nums(&buffer), vec![0]);
    }

    #[test]
    fn test_concatenate_leaves_operands_untouched() {
        let first = buffer_of(vec![header_frame(0), data_frame(1)]);
        let second = buffer_of(vec![data_frame(2), data_frame(3), data_frame(4)]);

        let joined = first.concatenate(&second);

        assert_eq!(joined.max_len(), first.max_len() + second.max_len());
        assert_eq!(frame_nums(&joined), vec![0, 1, 2, 3, 4]);
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 3);
    }

    #[test]
    fn test_raw_bytes_in_order() {
        let buffer = buffer_of(vec![header_frame(0), data_frame(1), data_frame(2)]);

        let raw = buffer.raw_bytes();

        assert_eq!(
            raw.as_ref(),
            &[0xAA, 0xAA, 1, 1, 1, 1, 2, 2, 2, 2][..]
        );
    }

    #[test]
    fn test_builder_window() {
        let buffer = FrameBufferBuilder::new().window(10, 2).build().unwrap();
        assert_eq!(buffer.max_len(), 20);

        assert!(matches!(
            FrameBufferBuilder::new().build(),
            Err(BufferError::MissingCapacity)
        ));
        assert!(matches!(
            FrameBufferBuilder::new().window(10, 0).build(),
            Err(BufferError::ZeroCapacity)
        ));
    }
}
