//! Colored masks and compositing them over camera frames

use image::imageops::{self, FilterType};
use image::{Pixel, RgbaImage};

use super::SegmentationResult;
use crate::draw::{Color, AQUA};

/// Per-pixel colored mask
pub type Mask = RgbaImage;

/// Color every person pixel `foreground` and everything else `background`.
///
/// Multi-person results are merged into one mask. With `draw_contour`, pixels
/// on the person boundary are painted aqua. Returns `None` when the result
/// holds no mask.
pub fn to_mask(
    result: &SegmentationResult,
    foreground: Color,
    background: Color,
    draw_contour: bool,
) -> Option<Mask> {
    let (width, height) = result.dimensions()?;
    if width == 0 || height == 0 {
        return None;
    }

    let len = width as usize * height as usize;
    let mut person = vec![false; len];
    match result {
        SegmentationResult::SinglePerson(seg) => {
            for (p, &v) in person.iter_mut().zip(&seg.data) {
                *p = v != 0;
            }
        }
        SegmentationResult::MultiPerson(people) => {
            for seg in people.iter().filter(|s| s.width == width && s.height == height) {
                for (p, &v) in person.iter_mut().zip(&seg.data) {
                    *p |= v != 0;
                }
            }
        }
    }

    let mut mask = RgbaImage::from_pixel(width, height, background);
    for (i, pixel) in mask.pixels_mut().enumerate() {
        if person[i] {
            *pixel = foreground;
        }
    }

    if draw_contour {
        let (w, h) = (width as usize, height as usize);
        for y in 1..h.saturating_sub(1) {
            for x in 1..w.saturating_sub(1) {
                let i = y * w + x;
                let edge = person[i]
                    && (!person[i - 1] || !person[i + 1] || !person[i - w] || !person[i + w]);
                if edge {
                    mask.put_pixel(x as u32, y as u32, AQUA);
                }
            }
        }
    }

    Some(mask)
}

/// Blend `src` over `dst` with its alpha scaled by `opacity`
fn composite(dst: &mut image::Rgba<u8>, mut src: Color, opacity: f32) {
    src.0[3] = (src.0[3] as f32 * opacity.clamp(0.0, 1.0)).round() as u8;
    match src.0[3] {
        0 => {}
        u8::MAX => *dst = src,
        _ => dst.blend(&src),
    }
}

/// Composite `mask` over `frame` into `canvas`.
///
/// The canvas takes the frame's size. The mask is stretched to the frame,
/// blurred by `mask_blur_amount` pixels and blended at `opacity`; the whole
/// image is mirrored when `flip_horizontal` is set.
pub fn draw_mask(
    canvas: &mut RgbaImage,
    frame: &RgbaImage,
    mask: Option<&Mask>,
    opacity: f32,
    mask_blur_amount: u32,
    flip_horizontal: bool,
) {
    let mut output = frame.clone();

    if let Some(mask) = mask {
        let (width, height) = frame.dimensions();
        let mut mask = if mask.dimensions() == (width, height) {
            mask.clone()
        } else {
            imageops::resize(mask, width, height, FilterType::Nearest)
        };
        if mask_blur_amount > 0 {
            mask = imageops::blur(&mask, mask_blur_amount as f32);
        }
        for (dst, src) in output.pixels_mut().zip(mask.pixels()) {
            composite(dst, *src, opacity);
        }
    }

    if flip_horizontal {
        imageops::flip_horizontal_in_place(&mut output);
    }

    *canvas = output;
}
