mod detector;
mod vectors;

pub use detector::{MotionDetector, MotionEvent};
pub use vectors::{
    bounding_boxes, count_positive, denoise, find_motion_areas, motion_mask, Analysis,
    AnalysisTimings, MotionArea, MotionVectorAnalyzer,
};

#[cfg(test)]
mod tests;
