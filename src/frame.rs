use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Pixel size of one encoder macroblock
pub const MACROBLOCK_SIZE: i32 = 16;

/// Seconds since the epoch, as produced by the hardware callbacks
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Anything delivered through a frame channel carries a monotonic frame number
pub trait Sequenced {
    fn frame_num(&self) -> u64;
}

/// H.264 frame types reported by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    /// Predicted frame, depends on earlier frames
    PFrame,
    /// Key frame
    IFrame,
    /// Stream header; also marks the start of a group of pictures
    SpsHeader,
}

impl FrameType {
    pub fn label(&self) -> &'static str {
        match self {
            FrameType::PFrame => "P-frame",
            FrameType::IFrame => "I-frame",
            FrameType::SpsHeader => "SPS header",
        }
    }
}

/// A single complete encoded video frame
#[derive(Clone, PartialEq)]
pub struct VideoFrame {
    /// Raw encoded bytes (shared, never mutated)
    pub data: Bytes,
    /// Monotonically increasing frame count
    pub frame_num: u64,
    /// Seconds since the epoch when the frame was produced
    pub timestamp: f64,
    pub frame_type: FrameType,
}

impl VideoFrame {
    pub fn new(data: impl Into<Bytes>, frame_num: u64, timestamp: f64, frame_type: FrameType) -> Self {
        Self {
            data: data.into(),
            frame_num,
            timestamp,
            frame_type,
        }
    }

    /// Whether this frame is an SPS header, i.e. a GOP boundary
    pub fn is_header(&self) -> bool {
        self.frame_type == FrameType::SpsHeader
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Sequenced for VideoFrame {
    fn frame_num(&self) -> u64 {
        self.frame_num
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("frame_num", &self.frame_num)
            .field("frame_len", &self.data.len())
            .field("frame_type", &self.frame_type.label())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Motion vector for one macroblock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionVector {
    pub x: i16,
    pub y: i16,
    /// Sum of absolute differences reported by the encoder
    pub sad: u16,
}

impl MotionVector {
    pub fn new(x: i16, y: i16, sad: u16) -> Self {
        Self { x, y, sad }
    }

    pub fn magnitude(&self) -> f64 {
        let x = i64::from(self.x);
        let y = i64::from(self.y);
        ((x * x + y * y) as f64).sqrt()
    }
}

/// Row-major grid of macroblock motion vectors
#[derive(Debug, Clone, PartialEq)]
pub struct MotionGrid {
    rows: usize,
    cols: usize,
    vectors: Vec<MotionVector>,
}

impl MotionGrid {
    /// Build a grid from row-major vectors. Returns `None` when the length doesn't match.
    pub fn new(rows: usize, cols: usize, vectors: Vec<MotionVector>) -> Option<Self> {
        if vectors.len() != rows * cols {
            return None;
        }
        Some(Self { rows, cols, vectors })
    }

    /// A grid with no motion at all
    pub fn zeroed(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            vectors: vec![MotionVector::default(); rows * cols],
        }
    }

    /// Grid `(rows, cols)` covering a `width`x`height` stream in `block_size` pixel blocks
    pub fn dimensions(width: u32, height: u32, block_size: u32) -> (usize, usize) {
        let block = block_size.max(1);
        (height.div_ceil(block) as usize, width.div_ceil(block) as usize)
    }

    /// Parse the encoder's raw motion data for a `width`x`height` stream.
    ///
    /// Each macroblock row holds `cols + 1` entries of 4 bytes (`x: i8`, `y: i8`,
    /// `sad: u16` little-endian); the trailing entry of every row is padding.
    pub fn from_raw(data: &[u8], width: u32, height: u32, block_size: u32) -> Option<Self> {
        let (rows, cols) = Self::dimensions(width, height, block_size);
        let stride = (cols + 1) * 4;

        if data.len() < rows * stride {
            return None;
        }

        let mut vectors = Vec::with_capacity(rows * cols);
        for row in data.chunks_exact(stride).take(rows) {
            for entry in row.chunks_exact(4).take(cols) {
                vectors.push(MotionVector {
                    x: i16::from(entry[0] as i8),
                    y: i16::from(entry[1] as i8),
                    sad: u16::from_le_bytes([entry[2], entry[3]]),
                });
            }
        }

        Some(Self { rows, cols, vectors })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&MotionVector> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.vectors.get(row * self.cols + col)
    }

    pub fn set(&mut self, row: usize, col: usize, vector: MotionVector) {
        if row < self.rows && col < self.cols {
            self.vectors[row * self.cols + col] = vector;
        }
    }

    pub fn vectors(&self) -> &[MotionVector] {
        &self.vectors
    }
}

/// One frame's worth of motion vector data
#[derive(Debug, Clone, PartialEq)]
pub struct MotionFrame {
    pub grid: MotionGrid,
    pub frame_num: u64,
    pub timestamp: f64,
}

impl MotionFrame {
    pub fn new(grid: MotionGrid, frame_num: u64, timestamp: f64) -> Self {
        Self {
            grid,
            frame_num,
            timestamp,
        }
    }
}

impl Sequenced for MotionFrame {
    fn frame_num(&self) -> u64 {
        self.frame_num
    }
}
