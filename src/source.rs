use crate::camera::Camera;
use crate::frame::{FrameType, MotionGrid, MotionVector};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const NAL_START_CODE: [u8; 4] = [0, 0, 0, 1];
const BLOB_SIZE: usize = 4;
const BLOB_VECTOR: MotionVector = MotionVector { x: 24, y: -12, sad: 300 };

/// Stand-in for the camera hardware.
///
/// Drives a [`Camera`] at its configured framerate with a fixed group-of-pictures
/// pattern (SPS header, I-frame, then P-frames) and motion data containing a
/// moving square of blocks for `active_seconds` out of every `cycle_seconds`.
pub struct SyntheticSource {
    camera: Arc<Camera>,
    framerate: u64,
    gop_length: u64,
    cycle_seconds: u64,
    active_seconds: u64,
}

impl SyntheticSource {
    pub fn new(camera: Arc<Camera>) -> Self {
        let framerate = u64::from(camera.config().camera.framerate.max(1));
        Self {
            camera,
            framerate,
            gop_length: 30,
            cycle_seconds: 60,
            active_seconds: 5,
        }
    }

    /// Frames between SPS headers
    pub fn with_gop_length(mut self, gop_length: u64) -> Self {
        self.gop_length = gop_length.max(2);
        self
    }

    pub fn with_motion_cycle(mut self, cycle_seconds: u64, active_seconds: u64) -> Self {
        self.cycle_seconds = cycle_seconds.max(1);
        self.active_seconds = active_seconds.min(self.cycle_seconds);
        self
    }

    pub fn frame_type(&self, index: u64) -> FrameType {
        match index % self.gop_length {
            0 => FrameType::SpsHeader,
            1 => FrameType::IFrame,
            _ => FrameType::PFrame,
        }
    }

    /// Encoded bytes for frame `index`
    pub fn frame_data(&self, index: u64) -> Vec<u8> {
        let frame_type = self.frame_type(index);
        let (nal_type, padding) = match frame_type {
            FrameType::SpsHeader => (0x67, 8),
            FrameType::IFrame => (0x65, 2048),
            FrameType::PFrame => (0x41, 256),
        };

        let mut data = Vec::with_capacity(NAL_START_CODE.len() + 9 + padding);
        data.extend_from_slice(&NAL_START_CODE);
        data.push(nal_type);
        data.extend_from_slice(&index.to_be_bytes());
        data.resize(data.len() + padding, (index % 251) as u8);
        data
    }

    /// Motion vectors for frame `index` of a `rows`x`cols` grid
    pub fn motion_grid(&self, index: u64, rows: usize, cols: usize) -> MotionGrid {
        let mut grid = MotionGrid::zeroed(rows, cols);

        let second = index / self.framerate;
        if second % self.cycle_seconds >= self.active_seconds {
            return grid;
        }
        if rows < BLOB_SIZE || cols < BLOB_SIZE {
            return grid;
        }

        let top = (rows - BLOB_SIZE) / 2;
        let left = (index as usize) % (cols - BLOB_SIZE + 1);
        for row in top..top + BLOB_SIZE {
            for col in left..left + BLOB_SIZE {
                grid.set(row, col, BLOB_VECTOR);
            }
        }
        grid
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Produce frames until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let config = self.camera.config();
        let framerate = self.framerate as u32;
        let (width, height) = config.camera.resolution;
        let (rows, cols) = MotionGrid::dimensions(width, height, config.camera.macroblock_size);

        info!(
            "Synthetic source running at {}fps with a {}x{} motion grid",
            framerate, rows, cols
        );

        let mut ticker = tokio::time::interval(Duration::from_secs(1) / framerate);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut index = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let data = self.frame_data(index);
            if self.frame_type(index) == FrameType::IFrame {
                // Large frames arrive from the encoder in more than one write
                let (head, tail) = data.split_at(data.len() / 2);
                self.camera.write_video(head, false, FrameType::IFrame);
                self.camera.write_video(tail, true, FrameType::IFrame);
            } else {
                self.camera.write_video(&data, true, self.frame_type(index));
            }

            self.camera.analyze_motion(self.motion_grid(index, rows, cols));
            index += 1;
        }

        debug!("Synthetic source stopped after {} frames", index);
    }
}
