use super::vectors::MotionVectorAnalyzer;
use crate::boxes::BoxSet;
use crate::config::MotionConfig;
use crate::frame::MotionFrame;

use tracing::{debug, trace};

/// Sustained motion confirmed on one motion frame
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEvent {
    /// Timestamp of the motion frame that confirmed the event
    pub timestamp: f64,
    pub boxes: BoxSet,
}

/// Debounced motion decision over successive motion frames
#[derive(Debug, Clone)]
pub struct MotionDetector {
    analyzer: MotionVectorAnalyzer,
    min_frames: u32,
    /// Qualifying frames seen before the current one
    consecutive_motion_frames: u32,
}

impl MotionDetector {
    pub fn new(sensitivity: u8, min_blocks: u32, min_frames: u32) -> Self {
        Self::with_denoise(sensitivity, min_blocks, min_frames, None)
    }

    pub fn with_denoise(
        sensitivity: u8,
        min_blocks: u32,
        min_frames: u32,
        denoise_min_neighbours: Option<u8>,
    ) -> Self {
        Self {
            analyzer: MotionVectorAnalyzer::new(sensitivity, min_blocks, denoise_min_neighbours),
            min_frames: min_frames.max(1),
            consecutive_motion_frames: 0,
        }
    }

    pub fn from_config(config: &MotionConfig, macroblock_size: u32) -> Self {
        let mut detector = Self::with_denoise(
            config.sensitivity,
            config.min_blocks,
            config.min_frames,
            config.denoise_min_neighbours,
        );
        detector.analyzer = detector.analyzer.with_block_size(macroblock_size as i32);
        detector
    }

    pub fn consecutive_motion_frames(&self) -> u32 {
        self.consecutive_motion_frames
    }

    pub fn reset(&mut self) {
        self.consecutive_motion_frames = 0;
    }

    /// Analyse one motion frame, returning an event once `min_frames` consecutive
    /// frames have produced boxes. The counter restarts after every event.
    pub fn detect(&mut self, frame: &MotionFrame) -> Option<MotionEvent> {
        let analysis = self.analyzer.analyze(&frame.grid);

        if analysis.positive_blocks < self.analyzer.min_blocks() || analysis.boxes.is_empty() {
            if self.consecutive_motion_frames > 0 {
                trace!(
                    "Motion streak broken at frame {} after {} frames",
                    frame.frame_num,
                    self.consecutive_motion_frames
                );
            }
            self.consecutive_motion_frames = 0;
            return None;
        }

        if self.consecutive_motion_frames + 1 < self.min_frames {
            self.consecutive_motion_frames += 1;
            trace!(
                "Motion in frame {} ({} of {} frames)",
                frame.frame_num,
                self.consecutive_motion_frames,
                self.min_frames
            );
            return None;
        }

        self.consecutive_motion_frames = 0;

        let timings = analysis.timings;
        let areas: Vec<String> = analysis.boxes.iter().map(|b| format!("{}px", b.area())).collect();
        debug!(
            mask_us = timings.mask.as_micros() as u64,
            denoise_us = timings.denoise.as_micros() as u64,
            areas_us = timings.areas.as_micros() as u64,
            boxes_us = timings.boxes.as_micros() as u64,
            total_us = timings.total().as_micros() as u64,
            "Motion confirmed at frame {}: {} areas ({})",
            frame.frame_num,
            analysis.boxes.len(),
            areas.join(", ")
        );

        Some(MotionEvent {
            timestamp: frame.timestamp,
            boxes: analysis.boxes,
        })
    }
}
