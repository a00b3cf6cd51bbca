//! Overlay state: the latest frame and the boxes drawn over it
//!
//! Every `video_frame` replaces the box set wholesale. Boxes live exactly as
//! long as the backend keeps re-sending them; there is no local expiry.

use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};

use crate::data::{BoundingBox, BoxMap};

/// Stroke color for a box that has not been captured yet
pub const DETECTED_COLOR: Rgba<u8> = Rgba([46, 204, 113, 204]);
/// Stroke color once the backend captured the container
pub const CAPTURED_COLOR: Rgba<u8> = Rgba([231, 76, 60, 204]);

const STROKE_WIDTH: u32 = 3;
const LABEL_HEADROOM: f32 = 20.0;
const PLACEHOLDER_SIZE: (u32, u32) = (640, 480);

pub fn box_color(captured: bool) -> Rgba<u8> {
    if captured {
        CAPTURED_COLOR
    } else {
        DETECTED_COLOR
    }
}

/// Confidence text placed next to a box
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub entity_id: String,
    pub text: String,
    pub x: f32,
    /// Text baseline
    pub y: f32,
    pub color: Rgba<u8>,
}

/// Base image with strokes applied, plus labels for the text layer
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub image: RgbaImage,
    pub labels: Vec<Label>,
}

#[derive(Debug, Default)]
pub struct OverlayStore {
    frame: Option<Vec<u8>>,
    boxes: BoxMap,
    frames_seen: u64,
}

impl OverlayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the frame and the entire box set
    pub fn apply_frame(&mut self, image: Vec<u8>, boxes: BoxMap) {
        self.frame = Some(image);
        self.boxes = boxes;
        self.frames_seen += 1;
    }

    /// Mark a box from the latest frame as captured. Returns false when the id is not present.
    pub fn mark_captured(&mut self, entity_id: &str) -> bool {
        match self.boxes.get_mut(entity_id) {
            Some(bbox) => {
                bbox.captured = true;
                true
            }
            None => false,
        }
    }

    pub fn boxes(&self) -> &BoxMap {
        &self.boxes
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Composite the latest frame: base image first, then one stroked rectangle per box
    pub fn render(&self) -> Result<RenderedFrame> {
        let mut image = match &self.frame {
            Some(bytes) => image::load_from_memory(bytes)
                .context("Failed to decode video frame")?
                .to_rgba8(),
            None => RgbaImage::from_pixel(PLACEHOLDER_SIZE.0, PLACEHOLDER_SIZE.1, Rgba([0, 0, 0, 255])),
        };

        let mut labels = Vec::with_capacity(self.boxes.len());
        for bbox in self.boxes.values() {
            let color = box_color(bbox.captured);
            stroke_rect(&mut image, bbox, color);
            labels.push(confidence_label(bbox));
        }

        Ok(RenderedFrame { image, labels })
    }
}

/// Percentage label above the box, or just inside its top edge when there is no room above
pub fn confidence_label(bbox: &BoundingBox) -> Label {
    let y = if bbox.bbox.y1 > LABEL_HEADROOM {
        bbox.bbox.y1 - 5.0
    } else {
        bbox.bbox.y1 + LABEL_HEADROOM
    };
    Label {
        entity_id: bbox.entity_id.clone(),
        text: format!("{}%", (bbox.confidence * 100.0).round() as u32),
        x: bbox.bbox.x1,
        y,
        color: box_color(bbox.captured),
    }
}

fn stroke_rect(image: &mut RgbaImage, bbox: &BoundingBox, color: Rgba<u8>) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    let x1 = bbox.bbox.x1.round().max(0.0) as i64;
    let y1 = bbox.bbox.y1.round().max(0.0) as i64;
    let x2 = (bbox.bbox.x2.round() as i64).min(width as i64 - 1);
    let y2 = (bbox.bbox.y2.round() as i64).min(height as i64 - 1);
    if x1 > x2 || y1 > y2 {
        return;
    }

    let half = (STROKE_WIDTH / 2) as i64;
    let mut plot = |x: i64, y: i64| {
        if x >= 0 && y >= 0 && x < width as i64 && y < height as i64 {
            blend(image.get_pixel_mut(x as u32, y as u32), color);
        }
    };

    for offset in -half..=half {
        for x in x1..=x2 {
            plot(x, y1 + offset);
            plot(x, y2 + offset);
        }
        for y in (y1 + half + 1)..=(y2 - half - 1) {
            plot(x1 + offset, y);
            plot(x2 + offset, y);
        }
    }
}

/// Source-over blend of a translucent stroke onto an opaque pixel
fn blend(pixel: &mut Rgba<u8>, color: Rgba<u8>) {
    let alpha = color[3] as u32;
    for channel in 0..3 {
        let src = color[channel] as u32;
        let dst = pixel[channel] as u32;
        pixel[channel] = ((src * alpha + dst * (255 - alpha)) / 255) as u8;
    }
    pixel[3] = 255;
}
