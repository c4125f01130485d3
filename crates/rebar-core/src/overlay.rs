//! Result overlays rendered onto the analysed frame.

use image::{ImageBuffer, Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;

use crate::{
    detector::{Instance, Mask},
    model::{PixelBox, Segment},
};

const MASK_ALPHA: f32 = 0.4;
const PRIMARY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const SEGMENT_PALETTE: [Rgb<u8>; 6] = [
    Rgb([255, 64, 64]),
    Rgb([64, 160, 255]),
    Rgb([255, 200, 0]),
    Rgb([200, 64, 255]),
    Rgb([0, 220, 200]),
    Rgb([255, 128, 0]),
];

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("JPEG encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("cannot encode an empty {width}x{height} image")]
    EmptyImage { width: u32, height: u32 },
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, OverlayError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(OverlayError::EmptyImage { width, height });
    }
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(image)?;
    Ok(buffer)
}

/// Outline the primary object with its score, e.g. `REBAR 0.91`.
pub fn annotate_primary(frame: &RgbImage, primary: &Instance) -> RgbImage {
    let mut image = frame.clone();
    let bbox = PixelBox::from_corners(primary.bbox);
    draw_rectangle(&mut image, bbox, PRIMARY_COLOR);
    draw_tag(
        &mut image,
        bbox,
        &format!("REBAR {:.2}", primary.score),
        PRIMARY_COLOR,
    );
    image
}

/// Draw every measured segment: mask tint, outline and `S<n>` tag. The primary
/// object, when given, is outlined underneath.
pub fn annotate_segments(
    frame: &RgbImage,
    primary: Option<&Instance>,
    segments: &[Segment],
    masks: &[Option<&Mask>],
) -> RgbImage {
    let mut image = match primary {
        Some(primary) => annotate_primary(frame, primary),
        None => frame.clone(),
    };

    for (idx, mask) in masks.iter().enumerate() {
        if let Some(mask) = mask {
            blend_mask(&mut image, mask, palette(idx));
        }
    }
    for (idx, segment) in segments.iter().enumerate() {
        draw_rectangle(&mut image, segment.bbox, palette(idx));
    }
    for (idx, segment) in segments.iter().enumerate() {
        draw_tag(&mut image, segment.bbox, &format!("S{}", segment.id), palette(idx));
    }

    image
}

fn palette(idx: usize) -> Rgb<u8> {
    SEGMENT_PALETTE[idx % SEGMENT_PALETTE.len()]
}

fn blend_mask(image: &mut RgbImage, mask: &Mask, color: Rgb<u8>) {
    let width = image.width().min(mask.width());
    let height = image.height().min(mask.height());
    for y in 0..height {
        for x in 0..width {
            if !mask.get(x, y) {
                continue;
            }
            let pixel = image.get_pixel_mut(x, y);
            for channel in 0..3 {
                let base = pixel.0[channel] as f32;
                let tint = color.0[channel] as f32;
                pixel.0[channel] = (base * (1.0 - MASK_ALPHA) + tint * MASK_ALPHA).round() as u8;
            }
        }
    }
}

fn draw_tag(image: &mut RgbImage, bbox: PixelBox, text: &str, color: Rgb<u8>) {
    let label_x = bbox.x1;
    let label_y = (bbox.y1 - 12).max(0);
    let text_width = text.chars().count() as i32 * 6;
    fill_rect(
        image,
        label_x,
        label_y,
        label_x + text_width,
        label_y + 8,
        LABEL_BACKGROUND,
    );
    draw_label(image, label_x, label_y, text, color);
}

fn draw_rectangle(image: &mut ImageBuffer<Rgb<u8>, Vec<u8>>, bbox: PixelBox, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    let left = bbox.x1.min(bbox.x2).clamp(0, width - 1);
    let right = bbox.x1.max(bbox.x2).clamp(0, width - 1);
    let top = bbox.y1.min(bbox.y2).clamp(0, height - 1);
    let bottom = bbox.y1.max(bbox.y2).clamp(0, height - 1);

    for x in left..=right {
        *image.get_pixel_mut(x as u32, top as u32) = color;
        *image.get_pixel_mut(x as u32, bottom as u32) = color;
    }
    for y in top..=bottom {
        *image.get_pixel_mut(left as u32, y as u32) = color;
        *image.get_pixel_mut(right as u32, y as u32) = color;
    }
}

fn fill_rect(
    image: &mut ImageBuffer<Rgb<u8>, Vec<u8>>,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            *image.get_pixel_mut(x as u32, y as u32) = color;
        }
    }
}

fn draw_label(image: &mut ImageBuffer<Rgb<u8>, Vec<u8>>, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            *image.get_pixel_mut(px as u32, py as u32) = color;
                        }
                    }
                }
            }
        }
        x += 6;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([
            0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'B' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110,
        ]),
        'E' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'R' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001,
        ]),
        'S' => Some([
            0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '0' => Some([
            0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110,
        ]),
        '1' => Some([
            0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        '2' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111,
        ]),
        '3' => Some([
            0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        '4' => Some([
            0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010,
        ]),
        '5' => Some([
            0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '6' => Some([
            0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110,
        ]),
        '7' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000,
        ]),
        '8' => Some([
            0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110,
        ]),
        '9' => Some([
            0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100,
        ]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([100, 100, 100]))
    }

    #[test]
    fn primary_outline_is_drawn_and_source_untouched() {
        let frame = gray(64, 64);
        let primary = Instance::new([20.0, 20.0, 40.0, 50.0], 0.91);
        let annotated = annotate_primary(&frame, &primary);
        assert_eq!(*annotated.get_pixel(20, 30), PRIMARY_COLOR);
        assert_eq!(*annotated.get_pixel(30, 50), PRIMARY_COLOR);
        assert_eq!(*annotated.get_pixel(30, 30), Rgb([100, 100, 100]));
        assert_eq!(*frame.get_pixel(20, 30), Rgb([100, 100, 100]));
    }

    #[test]
    fn masks_are_blended_not_painted() {
        let frame = gray(4, 4);
        let mask = Mask::new(4, 4, (0..16).map(|i| i == 5).collect()).unwrap();
        let mut image = frame.clone();
        blend_mask(&mut image, &mask, Rgb([200, 0, 100]));
        assert_eq!(*image.get_pixel(1, 1), Rgb([140, 60, 100]));
        assert_eq!(*image.get_pixel(0, 0), Rgb([100, 100, 100]));
    }

    #[test]
    fn drawing_outside_the_frame_is_clipped() {
        let mut image = gray(10, 10);
        draw_rectangle(&mut image, PixelBox::new(-5, -5, 50, 50), PRIMARY_COLOR);
        draw_label(&mut image, 8, 8, "S12", PRIMARY_COLOR);
        assert_eq!(*image.get_pixel(0, 0), PRIMARY_COLOR);
        assert_eq!(*image.get_pixel(9, 9), PRIMARY_COLOR);
    }

    #[test]
    fn encoded_result_is_a_jpeg() {
        let bytes = encode_jpeg(&gray(16, 16), 85).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert!(matches!(
            encode_jpeg(&RgbImage::new(0, 0), 85),
            Err(OverlayError::EmptyImage { .. })
        ));
    }
}
