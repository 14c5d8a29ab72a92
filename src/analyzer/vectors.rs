use crate::boxes::{BoxSet, MotionBox};
use crate::frame::{MotionGrid, MACROBLOCK_SIZE};

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::HashMap;
use std::time::{Duration, Instant};

const POSITIVE: Luma<u8> = Luma([255u8]);
const NEGATIVE: Luma<u8> = Luma([0u8]);

/// Bounding rectangle of one connected group, in macroblock units.
/// `row_stop` and `col_stop` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionArea {
    pub row_start: u32,
    pub row_stop: u32,
    pub col_start: u32,
    pub col_stop: u32,
    /// Positive blocks belonging to the group
    pub blocks: u32,
}

/// Time spent in each analysis step
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisTimings {
    pub mask: Duration,
    pub denoise: Duration,
    pub areas: Duration,
    pub boxes: Duration,
}

impl AnalysisTimings {
    pub fn total(&self) -> Duration {
        self.mask + self.denoise + self.areas + self.boxes
    }
}

/// Result of analysing one motion frame
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    /// Blocks over the sensitivity threshold after any denoising
    pub positive_blocks: u32,
    pub boxes: BoxSet,
    pub timings: AnalysisTimings,
}

/// Turns a grid of macroblock motion vectors into boxes of motion.
///
/// The mask is held as a `GrayImage` (x = column, y = row) so labelling can
/// use `imageproc` directly.
#[derive(Debug, Clone)]
pub struct MotionVectorAnalyzer {
    sensitivity: f64,
    min_blocks: u32,
    denoise_min_neighbours: Option<u8>,
    block_size: i32,
}

impl MotionVectorAnalyzer {
    pub fn new(sensitivity: u8, min_blocks: u32, denoise_min_neighbours: Option<u8>) -> Self {
        Self {
            sensitivity: f64::from(sensitivity),
            min_blocks,
            denoise_min_neighbours,
            block_size: MACROBLOCK_SIZE,
        }
    }

    /// Use a block size other than the encoder's usual 16 pixels
    pub fn with_block_size(mut self, block_size: i32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn min_blocks(&self) -> u32 {
        self.min_blocks
    }

    /// Run the full pipeline. Areas smaller than `min_blocks` are skipped at the box
    /// step, so `positive_blocks` may be large while `boxes` is empty.
    pub fn analyze(&self, grid: &MotionGrid) -> Analysis {
        let started = Instant::now();
        let mut mask = motion_mask(grid, self.sensitivity);
        let masked = Instant::now();

        if let Some(min_neighbours) = self.denoise_min_neighbours {
            mask = denoise(&mask, min_neighbours);
        }
        let denoised = Instant::now();

        let positive_blocks = count_positive(&mask);
        if positive_blocks < self.min_blocks {
            return Analysis {
                positive_blocks,
                boxes: BoxSet::new(),
                timings: AnalysisTimings {
                    mask: masked - started,
                    denoise: denoised - masked,
                    ..Default::default()
                },
            };
        }

        let areas = find_motion_areas(&mask);
        let labelled = Instant::now();

        let boxes = bounding_boxes(&areas, self.min_blocks, self.block_size);
        let boxed = Instant::now();

        Analysis {
            positive_blocks,
            boxes,
            timings: AnalysisTimings {
                mask: masked - started,
                denoise: denoised - masked,
                areas: labelled - denoised,
                boxes: boxed - labelled,
            },
        }
    }
}

/// Mark every block whose vector magnitude reaches `sensitivity`
pub fn motion_mask(grid: &MotionGrid, sensitivity: f64) -> GrayImage {
    GrayImage::from_fn(grid.cols() as u32, grid.rows() as u32, |x, y| {
        match grid.get(y as usize, x as usize) {
            Some(vector) if vector.magnitude() >= sensitivity => POSITIVE,
            _ => NEGATIVE,
        }
    })
}

/// Clear positive blocks that have fewer than `min_neighbours` positive 8-neighbours
pub fn denoise(mask: &GrayImage, min_neighbours: u8) -> GrayImage {
    let (width, height) = mask.dimensions();

    GrayImage::from_fn(width, height, |x, y| {
        if mask.get_pixel(x, y) == &NEGATIVE {
            return NEGATIVE;
        }

        let mut neighbours = 0u8;
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = i64::from(x) + dx;
                let ny = i64::from(y) + dy;
                if nx < 0 || ny < 0 || nx >= i64::from(width) || ny >= i64::from(height) {
                    continue;
                }
                if mask.get_pixel(nx as u32, ny as u32) == &POSITIVE {
                    neighbours += 1;
                }
            }
        }

        if neighbours >= min_neighbours {
            POSITIVE
        } else {
            NEGATIVE
        }
    })
}

pub fn count_positive(mask: &GrayImage) -> u32 {
    mask.pixels().filter(|p| **p == POSITIVE).count() as u32
}

/// Label 8-connected groups of positive blocks and return their extents,
/// ordered by where each group first appears in a row-major scan.
pub fn find_motion_areas(mask: &GrayImage) -> Vec<MotionArea> {
    let labels = connected_components(mask, Connectivity::Eight, NEGATIVE);

    let mut order: Vec<u32> = Vec::new();
    let mut areas: HashMap<u32, MotionArea> = HashMap::new();

    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }

        areas
            .entry(label)
            .and_modify(|area| {
                area.row_start = area.row_start.min(y);
                area.row_stop = area.row_stop.max(y + 1);
                area.col_start = area.col_start.min(x);
                area.col_stop = area.col_stop.max(x + 1);
                area.blocks += 1;
            })
            .or_insert_with(|| {
                order.push(label);
                MotionArea {
                    row_start: y,
                    row_stop: y + 1,
                    col_start: x,
                    col_stop: x + 1,
                    blocks: 1,
                }
            });
    }

    order.iter().filter_map(|label| areas.get(label).copied()).collect()
}

/// Convert areas holding at least `min_blocks` blocks into pixel boxes, then drop
/// boxes enclosed by others.
///
/// Rows map onto the y axis and columns onto x.
pub fn bounding_boxes(areas: &[MotionArea], min_blocks: u32, block_size: i32) -> BoxSet {
    let mut boxes: BoxSet = areas
        .iter()
        .filter(|area| area.blocks >= min_blocks)
        .map(|area| {
            MotionBox::new(
                area.col_start as i32 * block_size,
                area.row_start as i32 * block_size,
                area.col_stop as i32 * block_size,
                area.row_stop as i32 * block_size,
            )
        })
        .collect();

    boxes.remove_subboxes();
    boxes
}
