use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixels, top-left origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        f64::from(self.width) * f64::from(self.height)
    }
}

/// One classified, localized entity reported for a single frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub bbox: BBox,
    pub frame_num: u64,
}

impl Detection {
    pub fn new(label: impl Into<String>, bbox: BBox, frame_num: u64) -> Self {
        Self {
            label: label.into(),
            bbox,
            frame_num,
        }
    }
}

/// All detections of one rendered frame from one source.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameBatch {
    pub source_id: u32,
    pub frame_num: u64,
    pub detections: Vec<Detection>,
    /// Object count reported downstream alongside the frame.
    pub object_count: usize,
    #[serde(skip)]
    pub(crate) filtered: bool,
}

impl FrameBatch {
    pub fn new(source_id: u32, frame_num: u64, detections: Vec<Detection>) -> Self {
        let object_count = detections.len();
        Self {
            source_id,
            frame_num,
            detections,
            object_count,
            filtered: false,
        }
    }

    /// Whether dominant-entity filtering already ran on this frame.
    pub fn is_filtered(&self) -> bool {
        self.filtered
    }
}
