use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle of motion in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionBox {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl MotionBox {
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        debug_assert!(x1 >= x0 && y1 >= y0, "inverted box");
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> i32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> i32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> i64 {
        i64::from(self.width()) * i64::from(self.height())
    }

    /// True when this box lies strictly inside `other`, touching none of its edges
    pub fn is_contained_by(&self, other: &MotionBox) -> bool {
        self.x0 > other.x0 && self.y0 > other.y0 && self.x1 < other.x1 && self.y1 < other.y1
    }

    pub fn as_tuple(&self) -> (i32, i32, i32, i32) {
        (self.x0, self.y0, self.x1, self.y1)
    }
}

impl From<(i32, i32, i32, i32)> for MotionBox {
    fn from((x0, y0, x1, y1): (i32, i32, i32, i32)) -> Self {
        Self::new(x0, y0, x1, y1)
    }
}

/// Ordered collection of motion boxes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoxSet {
    boxes: Vec<MotionBox>,
}

impl BoxSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, motion_box: MotionBox) {
        self.boxes.push(motion_box);
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MotionBox> {
        self.boxes.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MotionBox> {
        self.boxes.iter()
    }

    /// Drop every box strictly contained in another box of the set.
    ///
    /// Equal boxes never contain each other, so duplicates survive.
    pub fn remove_subboxes(&mut self) {
        let boxes = &self.boxes;
        let keep: Vec<bool> = boxes
            .iter()
            .map(|inner| !boxes.iter().any(|outer| inner.is_contained_by(outer)))
            .collect();

        let mut flags = keep.into_iter();
        self.boxes.retain(|_| flags.next().unwrap_or(true));
    }

    /// Boxes as `(x0, y0, x1, y1)` tuples, the form sent to the media server
    pub fn serialise(&self) -> Vec<(i32, i32, i32, i32)> {
        self.boxes.iter().map(MotionBox::as_tuple).collect()
    }
}

impl FromIterator<MotionBox> for BoxSet {
    fn from_iter<I: IntoIterator<Item = MotionBox>>(iter: I) -> Self {
        Self {
            boxes: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a BoxSet {
    type Item = &'a MotionBox;
    type IntoIter = std::slice::Iter<'a, MotionBox>;

    fn into_iter(self) -> Self::IntoIter {
        self.boxes.iter()
    }
}
