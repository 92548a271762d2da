//! [`Canvas`] backed by an RGBA image
//!
//! Paths are flattened to polygons and rendered with `imageproc` into a
//! coverage mask. Each fill or stroke blends the covered pixels once, so
//! overlapping stroke segments never double-blend translucent colors.

use image::{GrayImage, Luma, Pixel, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_polygon_mut};
use imageproc::point::Point as Vertex;
use imageproc::rect::Rect;

use super::{Canvas, Color};

/// Angular step used when flattening arcs
const ARC_STEP: f32 = std::f32::consts::PI / 48.0;

const COVERED: Luma<u8> = Luma([255]);

type Point = (f32, f32);

/// How a subpath was built, so fills and strokes can use the matching
/// `imageproc` primitive
#[derive(Clone, Copy, Debug, PartialEq)]
enum Shape {
    Path,
    Circle { center: Point, radius: f32 },
    Rect { x: f32, y: f32, width: f32, height: f32 },
}

#[derive(Clone, Debug)]
struct Subpath {
    points: Vec<Point>,
    closed: bool,
    shape: Shape,
}

impl Subpath {
    fn starting_at(point: Point) -> Self {
        Self {
            points: vec![point],
            closed: false,
            shape: Shape::Path,
        }
    }
}

/// A [`Canvas`] that draws into an owned [`RgbaImage`]
pub struct RasterCanvas {
    image: RgbaImage,
    subpaths: Vec<Subpath>,
    fill_style: Color,
    stroke_style: Color,
    line_width: f32,
}

impl RasterCanvas {
    /// Create a transparent canvas
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            subpaths: Vec::new(),
            fill_style: image::Rgba([0, 0, 0, 255]),
            stroke_style: image::Rgba([0, 0, 0, 255]),
            line_width: 1.0,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    fn open_subpath(&mut self) -> Option<&mut Subpath> {
        self.subpaths.last_mut().filter(|s| !s.closed)
    }

    fn push_point(&mut self, x: f32, y: f32) {
        match self.open_subpath() {
            Some(subpath) => {
                subpath.points.push((x, y));
                subpath.shape = Shape::Path;
            }
            None => self.subpaths.push(Subpath::starting_at((x, y))),
        }
    }

    fn paint(&mut self, coverage: &Coverage, color: Color) {
        let Some((x0, y0, x1, y1)) = coverage.bounds else { return };
        for y in y0..=y1 {
            for x in x0..=x1 {
                if coverage.mask.get_pixel(x, y)[0] == 0 {
                    continue;
                }
                let pixel = self.image.get_pixel_mut(x, y);
                if color.0[3] == u8::MAX {
                    *pixel = color;
                } else {
                    pixel.blend(&color);
                }
            }
        }
    }
}

impl Canvas for RasterCanvas {
    fn begin_path(&mut self) {
        self.subpaths.clear();
    }

    fn close_path(&mut self) {
        let Some(subpath) = self.open_subpath() else { return };
        let Some(&first) = subpath.points.first() else { return };
        subpath.closed = true;
        self.subpaths.push(Subpath::starting_at(first));
    }

    fn move_to(&mut self, x: f32, y: f32) {
        self.subpaths.push(Subpath::starting_at((x, y)));
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.push_point(x, y);
    }

    fn arc(&mut self, x: f32, y: f32, radius: f32, start_angle: f32, end_angle: f32) {
        let radius = radius.abs();
        let fresh = self.open_subpath().is_none();
        let sweep = arc_sweep(start_angle, end_angle);
        let steps = ((sweep / ARC_STEP).ceil() as usize).max(1);
        for i in 0..=steps {
            let angle = start_angle + sweep * i as f32 / steps as f32;
            self.push_point(x + radius * angle.cos(), y + radius * angle.sin());
        }

        if fresh && sweep >= std::f32::consts::TAU {
            if let Some(subpath) = self.subpaths.last_mut() {
                subpath.shape = Shape::Circle {
                    center: (x, y),
                    radius,
                };
            }
        }
    }

    fn rect(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.subpaths.push(Subpath {
            points: vec![(x, y), (x + width, y), (x + width, y + height), (x, y + height)],
            closed: true,
            shape: Shape::Rect { x, y, width, height },
        });
        self.move_to(x, y);
    }

    fn set_fill_style(&mut self, color: Color) {
        self.fill_style = color;
    }

    fn set_stroke_style(&mut self, color: Color) {
        self.stroke_style = color;
    }

    fn set_line_width(&mut self, width: f32) {
        if width.is_finite() && width > 0.0 {
            self.line_width = width;
        }
    }

    fn fill(&mut self) {
        let mut coverage = Coverage::new(self.image.width(), self.image.height());
        for subpath in &self.subpaths {
            match subpath.shape {
                Shape::Circle { center, radius } => coverage.disc(center, radius),
                Shape::Path | Shape::Rect { .. } => coverage.polygon(&subpath.points),
            }
        }
        self.paint(&coverage, self.fill_style);
    }

    fn stroke(&mut self) {
        let half = self.line_width / 2.0;
        let mut coverage = Coverage::new(self.image.width(), self.image.height());

        for subpath in &self.subpaths {
            if let Shape::Rect { x, y, width, height } = subpath.shape {
                coverage.rect_outline(x, y, width, height, self.line_width);
                continue;
            }

            let points = &subpath.points;
            if points.len() < 2 {
                continue;
            }
            let segment_count = if subpath.closed { points.len() } else { points.len() - 1 };
            for i in 0..segment_count {
                if let Some(quad) = segment_quad(points[i], points[(i + 1) % points.len()], half) {
                    coverage.polygon(&quad);
                }
            }
            // Round joins
            let joins = if subpath.closed { 0..points.len() } else { 1..points.len() - 1 };
            for i in joins {
                coverage.disc(points[i], half);
            }
        }

        self.paint(&coverage, self.stroke_style);
    }
}

fn arc_sweep(start: f32, end: f32) -> f32 {
    let tau = std::f32::consts::TAU;
    let sweep = end - start;
    if sweep >= tau {
        tau
    } else if sweep < 0.0 {
        sweep.rem_euclid(tau)
    } else {
        sweep
    }
}

/// Corners of the band of half-width `half` around segment `a`-`b`
fn segment_quad(a: Point, b: Point, half: f32) -> Option<[Point; 4]> {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len = (dx * dx + dy * dy).sqrt();
    if len < f32::EPSILON {
        return None;
    }
    let (nx, ny) = (-dy / len * half, dx / len * half);
    Some([
        (a.0 + nx, a.1 + ny),
        (b.0 + nx, b.1 + ny),
        (b.0 - nx, b.1 - ny),
        (a.0 - nx, a.1 - ny),
    ])
}

/// Pixels touched by one fill or stroke, plus their clipped bounding box
struct Coverage {
    mask: GrayImage,
    /// Inclusive (x0, y0, x1, y1)
    bounds: Option<(u32, u32, u32, u32)>,
}

impl Coverage {
    fn new(width: u32, height: u32) -> Self {
        Self {
            mask: GrayImage::new(width, height),
            bounds: None,
        }
    }

    /// Grow the bounds by a box in pixel coordinates. Returns false when the
    /// box misses the image entirely.
    fn touch(&mut self, min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> bool {
        let (width, height) = (self.mask.width() as i32, self.mask.height() as i32);
        if max_x < 0 || max_y < 0 || min_x >= width || min_y >= height {
            return false;
        }
        let x0 = min_x.max(0) as u32;
        let y0 = min_y.max(0) as u32;
        let x1 = max_x.min(width - 1) as u32;
        let y1 = max_y.min(height - 1) as u32;
        self.bounds = Some(match self.bounds {
            None => (x0, y0, x1, y1),
            Some((a, b, c, d)) => (a.min(x0), b.min(y0), c.max(x1), d.max(y1)),
        });
        true
    }

    fn polygon(&mut self, points: &[Point]) {
        let mut vertices: Vec<Vertex<i32>> = Vec::with_capacity(points.len());
        for &(x, y) in points {
            if !x.is_finite() || !y.is_finite() {
                return;
            }
            let vertex = Vertex::new(x.round() as i32, y.round() as i32);
            if vertices.last() != Some(&vertex) {
                vertices.push(vertex);
            }
        }
        // imageproc wants an open polygon
        while vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        if vertices.len() < 2 {
            return;
        }

        let min_x = vertices.iter().map(|v| v.x).min().unwrap_or(0);
        let max_x = vertices.iter().map(|v| v.x).max().unwrap_or(0);
        let min_y = vertices.iter().map(|v| v.y).min().unwrap_or(0);
        let max_y = vertices.iter().map(|v| v.y).max().unwrap_or(0);
        if self.touch(min_x, min_y, max_x, max_y) {
            draw_polygon_mut(&mut self.mask, &vertices, COVERED);
        }
    }

    fn disc(&mut self, center: Point, radius: f32) {
        if !center.0.is_finite() || !center.1.is_finite() || !radius.is_finite() {
            return;
        }
        let (cx, cy) = (center.0.round() as i32, center.1.round() as i32);
        let r = radius.round() as i32;
        if self.touch(cx - r, cy - r, cx + r, cy + r) {
            draw_filled_circle_mut(&mut self.mask, (cx, cy), r, COVERED);
        }
    }

    /// Concentric one-pixel rectangles, one per pixel of line width,
    /// centered on the rectangle's edges
    fn rect_outline(&mut self, x: f32, y: f32, width: f32, height: f32, line_width: f32) {
        if ![x, y, width, height].iter().all(|v| v.is_finite()) {
            return;
        }
        let rings = line_width.round().max(1.0) as i32;
        let outset = rings / 2;
        let (left, top) = (x.round() as i32, y.round() as i32);
        let (right, bottom) = ((x + width).round() as i32, (y + height).round() as i32);
        if !self.touch(left - outset, top - outset, right + outset, bottom + outset) {
            return;
        }

        for ring in 0..rings {
            let inset = ring - outset;
            let w = right - left + 1 - 2 * inset;
            let h = bottom - top + 1 - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(left + inset, top + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut self.mask, rect, COVERED);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::{draw_bounding_box, draw_point, draw_segment, RED, WHITE};
    use crate::pose::{Keypoint, PartName};

    fn is_painted(canvas: &RasterCanvas, x: u32, y: u32, color: Color) -> bool {
        *canvas.image().get_pixel(x, y) == color
    }

    #[test]
    fn test_fill_circle() {
        let mut canvas = RasterCanvas::new(40, 40);
        draw_point(&mut canvas, 20.0, 20.0, 5.0, WHITE);

        assert!(is_painted(&canvas, 20, 20, WHITE));
        assert!(is_painted(&canvas, 23, 20, WHITE));
        assert!(!is_painted(&canvas, 27, 20, WHITE));
        assert!(!is_painted(&canvas, 0, 0, WHITE));
    }

    #[test]
    fn test_full_arc_is_a_circle() {
        let mut canvas = RasterCanvas::new(10, 10);
        canvas.begin_path();
        canvas.arc(5.0, 5.0, 2.0, 0.0, std::f32::consts::TAU);
        assert_eq!(
            canvas.subpaths[0].shape,
            Shape::Circle {
                center: (5.0, 5.0),
                radius: 2.0
            }
        );

        canvas.line_to(9.0, 9.0);
        assert_eq!(canvas.subpaths[0].shape, Shape::Path);
    }

    #[test]
    fn test_fill_rect() {
        let mut canvas = RasterCanvas::new(20, 20);
        canvas.begin_path();
        canvas.rect(2.0, 2.0, 4.0, 4.0);
        canvas.set_fill_style(RED);
        canvas.fill();

        assert!(is_painted(&canvas, 2, 2, RED));
        assert!(is_painted(&canvas, 5, 5, RED));
        assert!(!is_painted(&canvas, 8, 8, RED));
        assert!(!is_painted(&canvas, 1, 3, RED));
    }

    #[test]
    fn test_stroke_segment() {
        let mut canvas = RasterCanvas::new(20, 20);
        draw_segment((10.0, 2.0), (10.0, 18.0), RED, 1.0, &mut canvas);

        // Line width 2 centered on y = 10
        assert!(is_painted(&canvas, 10, 9, RED));
        assert!(is_painted(&canvas, 10, 10, RED));
        assert!(!is_painted(&canvas, 10, 13, RED));
        assert!(!is_painted(&canvas, 0, 10, RED));
    }

    #[test]
    fn test_stroke_rect_outline_only() {
        let mut canvas = RasterCanvas::new(20, 20);
        let a = Keypoint::new(PartName::Nose, 4.0, 4.0, 1.0);
        let b = Keypoint::new(PartName::LeftEye, 14.0, 14.0, 1.0);
        draw_bounding_box(&[a, b], &mut canvas);

        assert!(is_painted(&canvas, 4, 4, RED));
        assert!(is_painted(&canvas, 14, 9, RED));
        assert!(is_painted(&canvas, 9, 14, RED));
        assert!(!is_painted(&canvas, 9, 9, RED));
    }

    #[test]
    fn test_shapes_clip_to_canvas() {
        let mut canvas = RasterCanvas::new(10, 10);
        draw_point(&mut canvas, -50.0, -50.0, 5.0, WHITE);
        assert!(canvas.image().pixels().all(|p| p.0[3] == 0));

        draw_point(&mut canvas, 0.0, 0.0, 3.0, WHITE);
        assert!(is_painted(&canvas, 0, 0, WHITE));
    }

    #[test]
    fn test_offscreen_polygon_leaves_edge_untouched() {
        let mut canvas = RasterCanvas::new(10, 10);
        canvas.begin_path();
        canvas.move_to(-20.0, 2.0);
        canvas.line_to(-10.0, 2.0);
        canvas.line_to(-10.0, 8.0);
        canvas.set_fill_style(RED);
        canvas.fill();
        assert!(canvas.image().pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_translucent_stroke_blends_once() {
        let mut canvas = RasterCanvas::new(30, 30);
        for pixel in canvas.image_mut().pixels_mut() {
            *pixel = image::Rgba([0, 0, 0, 255]);
        }
        canvas.begin_path();
        canvas.move_to(5.0, 15.0);
        canvas.line_to(15.0, 15.0);
        canvas.line_to(25.0, 15.0);
        canvas.set_line_width(4.0);
        canvas.set_stroke_style(image::Rgba([255, 0, 0, 128]));
        canvas.stroke();

        // The join overlaps both segments and the disc, yet matches a
        // pixel covered by one segment only
        let join = *canvas.image().get_pixel(15, 15);
        let span = *canvas.image().get_pixel(8, 15);
        assert_eq!(join, span);
        assert!(join.0[0] > 100 && join.0[0] < 160);
    }

    #[test]
    fn test_arc_sweep_normalization() {
        let tau = std::f32::consts::TAU;
        assert_eq!(arc_sweep(0.0, tau), tau);
        assert_eq!(arc_sweep(0.0, 3.0 * tau), tau);
        assert!((arc_sweep(1.0, 0.5) - (tau - 0.5)).abs() < 1e-5);
    }
}
