use super::*;
use crate::boxes::MotionBox;
use crate::frame::{MotionFrame, MotionGrid, MotionVector};

const MOVING: MotionVector = MotionVector { x: 6, y: 8, sad: 0 };

fn grid_with(rows: usize, cols: usize, moving: &[(usize, usize)]) -> MotionGrid {
    let mut grid = MotionGrid::zeroed(rows, cols);
    for &(row, col) in moving {
        grid.set(row, col, MOVING);
    }
    grid
}

fn motion_frame(frame_num: u64, grid: MotionGrid) -> MotionFrame {
    MotionFrame::new(grid, frame_num, 1_000.0 + frame_num as f64 * 0.1)
}

/// A 2x2 block of motion in the top-left corner, enough for `min_blocks = 4`
fn busy_grid() -> MotionGrid {
    grid_with(6, 8, &[(0, 0), (0, 1), (1, 0), (1, 1)])
}

#[test]
fn test_mask_uses_magnitude_threshold() {
    let mut grid = MotionGrid::zeroed(1, 3);
    grid.set(0, 0, MotionVector::new(3, 4, 0)); // magnitude 5
    grid.set(0, 1, MotionVector::new(-3, -3, 0)); // ~4.24
    grid.set(0, 2, MotionVector::new(0, -5, 0)); // 5

    let mask = motion_mask(&grid, 5.0);

    assert_eq!(mask.dimensions(), (3, 1));
    assert_eq!(count_positive(&mask), 2);
    assert_eq!(mask.get_pixel(1, 0)[0], 0);
}

#[test]
fn test_diagonal_blocks_form_single_area() {
    let grid = grid_with(4, 4, &[(1, 1), (2, 2)]);
    let mask = motion_mask(&grid, 1.0);

    let areas = find_motion_areas(&mask);

    assert_eq!(areas.len(), 1);
    assert_eq!(
        areas[0],
        MotionArea {
            row_start: 1,
            row_stop: 3,
            col_start: 1,
            col_stop: 3,
            blocks: 2,
        }
    );
}

#[test]
fn test_separate_areas_in_scan_order() {
    let grid = grid_with(5, 6, &[(4, 0), (0, 4), (0, 5)]);
    let mask = motion_mask(&grid, 1.0);

    let areas = find_motion_areas(&mask);

    assert_eq!(areas.len(), 2);
    assert_eq!((areas[0].row_start, areas[0].col_start, areas[0].blocks), (0, 4, 2));
    assert_eq!((areas[1].row_start, areas[1].col_start, areas[1].blocks), (4, 0, 1));
}

#[test]
fn test_bounding_boxes_swap_rows_to_y() {
    // Two rows tall, three columns wide, starting at row 1 col 2
    let areas = [MotionArea {
        row_start: 1,
        row_stop: 3,
        col_start: 2,
        col_stop: 5,
        blocks: 6,
    }];

    let boxes = bounding_boxes(&areas, 3, 16);

    assert_eq!(boxes.serialise(), vec![(32, 16, 80, 48)]);
}

#[test]
fn test_bounding_boxes_filter_small_areas() {
    let areas = [
        MotionArea {
            row_start: 0,
            row_stop: 1,
            col_start: 0,
            col_stop: 1,
            blocks: 1,
        },
        MotionArea {
            row_start: 3,
            row_stop: 5,
            col_start: 3,
            col_stop: 5,
            blocks: 4,
        },
    ];

    let boxes = bounding_boxes(&areas, 2, 16);

    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes.get(0), Some(&MotionBox::new(48, 48, 80, 80)));
}

#[test]
fn test_denoise_removes_isolated_blocks() {
    let grid = grid_with(5, 5, &[(0, 4), (2, 1), (2, 2), (3, 1)]);
    let mask = motion_mask(&grid, 1.0);

    let cleaned = denoise(&mask, 2);

    // (0, 4) has no neighbours; the L-shaped cluster members have two each
    assert_eq!(cleaned.get_pixel(4, 0)[0], 0);
    assert_eq!(count_positive(&cleaned), 3);
}

#[test]
fn test_denoise_never_adds_blocks() {
    let grid = grid_with(3, 3, &[(0, 0), (0, 2), (2, 0), (2, 2)]);
    let mask = motion_mask(&grid, 1.0);

    // The empty centre has four positive neighbours but stays negative
    let cleaned = denoise(&mask, 1);

    assert_eq!(cleaned.get_pixel(1, 1)[0], 0);
    assert_eq!(count_positive(&cleaned), 0);
}

#[test]
fn test_analyzer_with_and_without_denoise() {
    let grid = grid_with(4, 4, &[(0, 0), (3, 3)]);

    let plain = MotionVectorAnalyzer::new(5, 1, None).analyze(&grid);
    assert_eq!(plain.positive_blocks, 2);
    assert_eq!(plain.boxes.len(), 2);

    let denoised = MotionVectorAnalyzer::new(5, 1, Some(1)).analyze(&grid);
    assert_eq!(denoised.positive_blocks, 0);
    assert!(denoised.boxes.is_empty());
}

#[test]
fn test_analyzer_drops_enclosed_boxes() {
    // A ring of motion around a single isolated block in the middle
    let mut moving = Vec::new();
    for i in 0..5 {
        moving.extend([(0, i), (4, i), (i, 0), (i, 4)]);
    }
    moving.push((2, 2));
    let grid = grid_with(5, 5, &moving);

    let analysis = MotionVectorAnalyzer::new(5, 1, None).analyze(&grid);

    assert_eq!(analysis.boxes.serialise(), vec![(0, 0, 80, 80)]);
}

#[test]
fn test_detector_debounces_min_frames() {
    let mut detector = MotionDetector::new(5, 4, 3);

    assert!(detector.detect(&motion_frame(0, busy_grid())).is_none());
    assert!(detector.detect(&motion_frame(1, busy_grid())).is_none());

    let event = detector.detect(&motion_frame(2, busy_grid())).unwrap();
    assert_eq!(event.timestamp, motion_frame(2, busy_grid()).timestamp);
    assert_eq!(event.boxes.serialise(), vec![(0, 0, 32, 32)]);
}

#[test]
fn test_detector_single_frame_fires_immediately() {
    let mut detector = MotionDetector::new(5, 4, 1);
    assert!(detector.detect(&motion_frame(0, busy_grid())).is_some());
    assert!(detector.detect(&motion_frame(1, busy_grid())).is_some());
}

#[test]
fn test_detector_quiet_frame_resets_streak() {
    let mut detector = MotionDetector::new(5, 4, 3);

    detector.detect(&motion_frame(0, busy_grid()));
    detector.detect(&motion_frame(1, busy_grid()));
    assert_eq!(detector.consecutive_motion_frames(), 2);

    assert!(detector.detect(&motion_frame(2, MotionGrid::zeroed(6, 8))).is_none());
    assert_eq!(detector.consecutive_motion_frames(), 0);

    assert!(detector.detect(&motion_frame(3, busy_grid())).is_none());
    assert!(detector.detect(&motion_frame(4, busy_grid())).is_none());
    assert!(detector.detect(&motion_frame(5, busy_grid())).is_some());
}

#[test]
fn test_detector_scattered_blocks_do_not_qualify() {
    // Four positive blocks overall, but no single area reaches min_blocks
    let grid = grid_with(6, 8, &[(0, 0), (0, 4), (4, 0), (4, 4)]);
    let mut detector = MotionDetector::new(5, 4, 1);

    assert!(detector.detect(&motion_frame(0, grid)).is_none());
    assert_eq!(detector.consecutive_motion_frames(), 0);
}

#[test]
fn test_detector_resets_after_event() {
    let mut detector = MotionDetector::new(5, 4, 2);

    assert!(detector.detect(&motion_frame(0, busy_grid())).is_none());
    assert!(detector.detect(&motion_frame(1, busy_grid())).is_some());
    assert_eq!(detector.consecutive_motion_frames(), 0);

    // A fresh streak is required for the next event
    assert!(detector.detect(&motion_frame(2, busy_grid())).is_none());
    assert!(detector.detect(&motion_frame(3, busy_grid())).is_some());
}
