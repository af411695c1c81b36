//! Detection overlay.
//!
//! Draws every detection onto the frame it came from: a class-coloured
//! outline, a filled tag, and `"<LABEL> <CONF>"` text in a built-in 5x7
//! bitmap font. The output image always keeps the input's dimensions.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detect::{Detection, DetectionResult};

const BOX_THICKNESS: u32 = 2;
const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const TEXT_SCALE: u32 = 2;
const TAG_PADDING: u32 = 2;

const PALETTE: [[u8; 3]; 20] = [
    [0xFF, 0x38, 0x38],
    [0xFF, 0x9D, 0x97],
    [0xFF, 0x70, 0x1F],
    [0xFF, 0xB2, 0x1D],
    [0xCF, 0xD2, 0x31],
    [0x48, 0xF9, 0x0A],
    [0x92, 0xCC, 0x17],
    [0x3D, 0xDB, 0x86],
    [0x1A, 0x93, 0x34],
    [0x00, 0xD4, 0xBB],
    [0x2C, 0x99, 0xA8],
    [0x00, 0xC2, 0xFF],
    [0x34, 0x45, 0x93],
    [0x64, 0x73, 0xFF],
    [0x00, 0x18, 0xEC],
    [0x84, 0x38, 0xFF],
    [0x52, 0x00, 0x85],
    [0xCB, 0x38, 0xFF],
    [0xFF, 0x95, 0xC8],
    [0xFF, 0x37, 0xC7],
];

/// Colour assigned to `class_id`.
pub fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

/// Draw `result` onto `frame` in place.
pub fn annotate(frame: &mut RgbImage, result: &DetectionResult) {
    for detection in &result.detections {
        draw_detection(frame, detection);
    }
}

fn draw_detection(frame: &mut RgbImage, detection: &Detection) {
    let (fw, fh) = (frame.width(), frame.height());
    if fw == 0 || fh == 0 {
        return;
    }
    let d = detection.clone().clamped(fw, fh);
    let x = (d.x.round() as u32).min(fw - 1);
    let y = (d.y.round() as u32).min(fh - 1);
    let w = (d.w.round() as u32).clamp(1, fw - x);
    let h = (d.h.round() as u32).clamp(1, fh - y);
    let color = class_color(d.class_id);

    for inset in 0..BOX_THICKNESS {
        if w <= inset * 2 || h <= inset * 2 {
            break;
        }
        let rect = Rect::at((x + inset) as i32, (y + inset) as i32)
            .of_size(w - inset * 2, h - inset * 2);
        draw_hollow_rect_mut(frame, rect, color);
    }

    let text = format!("{} {:.2}", d.label, d.confidence);
    draw_tag(frame, x, y, &text, color);
}

/// Filled tag with text, above the box when there is room, otherwise inside it.
fn draw_tag(frame: &mut RgbImage, x: u32, y: u32, text: &str, color: Rgb<u8>) {
    let tag_h = GLYPH_H * TEXT_SCALE + TAG_PADDING * 2;
    let tag_w = (text_width(text) + TAG_PADDING * 2).min(frame.width() - x);
    let tag_y = if y >= tag_h { y - tag_h } else { y };
    let tag_h = tag_h.min(frame.height() - tag_y);
    if tag_w == 0 || tag_h == 0 {
        return;
    }
    draw_filled_rect_mut(
        frame,
        Rect::at(x as i32, tag_y as i32).of_size(tag_w, tag_h),
        color,
    );
    draw_text(
        frame,
        x + TAG_PADDING,
        tag_y + TAG_PADDING,
        text,
        contrast_color(color),
    );
}

fn contrast_color(bg: Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = bg.0;
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    if luma > 150.0 {
        Rgb([0, 0, 0])
    } else {
        Rgb([255, 255, 255])
    }
}

fn text_width(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars * (GLYPH_W + 1) * TEXT_SCALE
}

fn draw_text(frame: &mut RgbImage, mut x: u32, y: u32, text: &str, color: Rgb<u8>) {
    let (fw, fh) = (frame.width(), frame.height());
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_W {
                    if (pattern >> (GLYPH_W - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    for dy in 0..TEXT_SCALE {
                        for dx in 0..TEXT_SCALE {
                            let px = x + col * TEXT_SCALE + dx;
                            let py = y + row as u32 * TEXT_SCALE + dy;
                            if px < fw && py < fh {
                                frame.put_pixel(px, py, color);
                            }
                        }
                    }
                }
            }
        }
        x += (GLYPH_W + 1) * TEXT_SCALE;
        if x >= fw {
            break;
        }
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
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
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        _ => return None,
    };
    Some(bits)
}
