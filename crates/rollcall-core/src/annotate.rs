//! Review-image rendering: one colored box and label plate per detected face.

use crate::types::FaceRegion;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
/// Padding between label text and the edge of its plate.
const PLATE_PADDING: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Matched,
    Unmatched,
}

/// A face box to draw, with its label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledRegion {
    pub region: FaceRegion,
    pub label: String,
    pub kind: RegionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub box_thickness: u32,
    /// Pixel size of one font cell.
    pub text_scale: u32,
    pub matched_color: [u8; 3],
    pub unmatched_color: [u8; 3],
    pub text_color: [u8; 3],
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            box_thickness: 3,
            text_scale: 2,
            matched_color: [0, 200, 0],
            unmatched_color: [255, 165, 0],
            text_color: [255, 255, 255],
        }
    }
}

/// Draw every labeled region onto a copy of `image`.
pub fn annotate(image: &RgbImage, regions: &[LabeledRegion], config: &AnnotationConfig) -> RgbImage {
    let mut canvas = image.clone();
    for labeled in regions {
        let color = match labeled.kind {
            RegionKind::Matched => Rgb(config.matched_color),
            RegionKind::Unmatched => Rgb(config.unmatched_color),
        };
        draw_box(&mut canvas, &labeled.region, color, config.box_thickness);
        draw_label(&mut canvas, &labeled.region, &labeled.label, color, config);
    }
    canvas
}

fn draw_box(canvas: &mut RgbImage, region: &FaceRegion, color: Rgb<u8>, thickness: u32) {
    for t in 0..thickness.max(1) {
        let (w, h) = (region.width.saturating_sub(2 * t), region.height.saturating_sub(2 * t));
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((region.x + t) as i32, (region.y + t) as i32).of_size(w, h);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

/// Size of the plate behind `label` at the configured scale.
fn plate_size(label: &str, scale: u32) -> (u32, u32) {
    let chars = label.chars().count().max(1) as u32;
    let text_w = chars * (GLYPH_WIDTH + 1) * scale - scale;
    let text_h = GLYPH_HEIGHT * scale;
    (text_w + 2 * PLATE_PADDING, text_h + 2 * PLATE_PADDING)
}

/// Top edge of the label plate: directly above the box, or directly below it
/// when the box is too close to the top of the image. A plate below the box
/// is pulled up so it stays on the canvas.
fn plate_top(region: &FaceRegion, plate_height: u32, image_height: u32) -> u32 {
    if region.y >= plate_height {
        region.y - plate_height
    } else {
        region.bottom().min(image_height.saturating_sub(plate_height))
    }
}

fn draw_label(
    canvas: &mut RgbImage,
    region: &FaceRegion,
    label: &str,
    color: Rgb<u8>,
    config: &AnnotationConfig,
) {
    let scale = config.text_scale.max(1);
    let (plate_w, plate_h) = plate_size(label, scale);
    let top = plate_top(region, plate_h, canvas.height());

    draw_filled_rect_mut(
        canvas,
        Rect::at(region.x as i32, top as i32).of_size(plate_w, plate_h),
        color,
    );
    draw_text(
        canvas,
        region.x + PLATE_PADDING,
        top + PLATE_PADDING,
        label,
        scale,
        Rgb(config.text_color),
    );
}

fn draw_text(canvas: &mut RgbImage, x: u32, y: u32, text: &str, scale: u32, color: Rgb<u8>) {
    let advance = (GLYPH_WIDTH + 1) * scale;
    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + i as u32 * advance;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) != 0 {
                    let px = origin_x + col * scale;
                    let py = y + row as u32 * scale;
                    draw_filled_rect_mut(
                        canvas,
                        Rect::at(px as i32, py as i32).of_size(scale, scale),
                        color,
                    );
                }
            }
        }
    }
}

/// 5×7 bitmap for `ch`. Case is preserved; unknown characters draw as `?`.
fn glyph(ch: char) -> [u8; 7] {
    match ch {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        'a' => [0x00, 0x00, 0x0E, 0x01, 0x0F, 0x11, 0x0F],
        'b' => [0x10, 0x10, 0x16, 0x19, 0x11, 0x11, 0x1E],
        'c' => [0x00, 0x00, 0x0E, 0x10, 0x10, 0x11, 0x0E],
        'd' => [0x01, 0x01, 0x0D, 0x13, 0x11, 0x11, 0x0F],
        'e' => [0x00, 0x00, 0x0E, 0x11, 0x1F, 0x10, 0x0E],
        'f' => [0x06, 0x09, 0x08, 0x1C, 0x08, 0x08, 0x08],
        'g' => [0x00, 0x0F, 0x11, 0x11, 0x0F, 0x01, 0x0E],
        'h' => [0x10, 0x10, 0x16, 0x19, 0x11, 0x11, 0x11],
        'i' => [0x04, 0x00, 0x0C, 0x04, 0x04, 0x04, 0x0E],
        'j' => [0x02, 0x00, 0x06, 0x02, 0x02, 0x12, 0x0C],
        'k' => [0x10, 0x10, 0x12, 0x14, 0x18, 0x14, 0x12],
        'l' => [0x0C, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'm' => [0x00, 0x00, 0x1A, 0x15, 0x15, 0x11, 0x11],
        'n' => [0x00, 0x00, 0x16, 0x19, 0x11, 0x11, 0x11],
        'o' => [0x00, 0x00, 0x0E, 0x11, 0x11, 0x11, 0x0E],
        'p' => [0x00, 0x00, 0x1E, 0x11, 0x1E, 0x10, 0x10],
        'q' => [0x00, 0x00, 0x0D, 0x13, 0x0F, 0x01, 0x01],
        'r' => [0x00, 0x00, 0x16, 0x19, 0x10, 0x10, 0x10],
        's' => [0x00, 0x00, 0x0E, 0x10, 0x0E, 0x01, 0x1E],
        't' => [0x08, 0x08, 0x1C, 0x08, 0x08, 0x09, 0x06],
        'u' => [0x00, 0x00, 0x11, 0x11, 0x11, 0x13, 0x0D],
        'v' => [0x00, 0x00, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'w' => [0x00, 0x00, 0x11, 0x11, 0x15, 0x15, 0x0A],
        'x' => [0x00, 0x00, 0x11, 0x0A, 0x04, 0x0A, 0x11],
        'y' => [0x00, 0x00, 0x11, 0x11, 0x0F, 0x01, 0x0E],
        'z' => [0x00, 0x00, 0x1F, 0x02, 0x04, 0x08, 0x1F],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ' ' => [0x00; 7],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}
