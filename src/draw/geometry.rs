//! Drawing primitives for the face and skeleton overlays
//!
//! Coordinates are passed y before x, matching how keypoint positions are
//! stored.

use std::f32::consts::PI;

use super::{Canvas, Color};

/// Stroke width of the mouth curve
const CURVE_LINE_WIDTH: f32 = 5.0;
/// Stroke width of skeleton segments
const SEGMENT_LINE_WIDTH: f32 = 2.0;

/// Fill a circle centered at (x, y)
pub fn draw_point(canvas: &mut dyn Canvas, y: f32, x: f32, radius: f32, color: Color) {
    canvas.begin_path();
    canvas.arc(x, y, radius, 0.0, 2.0 * PI);
    canvas.set_fill_style(color);
    canvas.fill();
}

/// Stroke a 120° arc around the midpoint of two points, tilted with the line
/// between them. Used for the mouth.
pub fn draw_curve(
    canvas: &mut dyn Canvas,
    y1: f32,
    y2: f32,
    x1: f32,
    x2: f32,
    radius: f32,
    color: Color,
) {
    let angle = (y2 - y1).atan2((x2 - x1).abs());
    canvas.set_stroke_style(color);
    canvas.set_line_width(CURVE_LINE_WIDTH);
    canvas.begin_path();
    canvas.arc(
        (x1 + x2) / 2.0,
        (y1 + y2) / 2.0,
        radius,
        angle + PI / 6.0,
        angle + PI * 5.0 / 6.0,
    );
    canvas.stroke();
}

/// Fill the right-hand 60° blade of the ribbon, anchored at `ribbon_y` below
/// the midpoint of the two reference points
#[allow(clippy::too_many_arguments)]
pub fn draw_right_part_of_ribbon(
    canvas: &mut dyn Canvas,
    y1: f32,
    y2: f32,
    x1: f32,
    x2: f32,
    radius: f32,
    ribbon_y: f32,
    color: Color,
) {
    let angle = (y2 - y1).atan2(x2 - x1);
    fill_sector(
        canvas,
        (x1 + x2) / 2.0,
        ribbon_y,
        radius,
        angle - PI / 6.0,
        angle + PI / 6.0,
        color,
    );
}

/// Mirror image of [`draw_right_part_of_ribbon`]
#[allow(clippy::too_many_arguments)]
pub fn draw_left_part_of_ribbon(
    canvas: &mut dyn Canvas,
    y1: f32,
    y2: f32,
    x1: f32,
    x2: f32,
    radius: f32,
    ribbon_y: f32,
    color: Color,
) {
    let angle = (y2 - y1).atan2(x2 - x1);
    fill_sector(
        canvas,
        (x1 + x2) / 2.0,
        ribbon_y,
        radius,
        angle + PI * 5.0 / 6.0,
        angle + PI * 7.0 / 6.0,
        color,
    );
}

fn fill_sector(
    canvas: &mut dyn Canvas,
    cx: f32,
    cy: f32,
    radius: f32,
    start: f32,
    end: f32,
    color: Color,
) {
    canvas.set_fill_style(color);
    canvas.begin_path();
    canvas.move_to(cx, cy);
    canvas.arc(cx, cy, radius, start, end);
    canvas.close_path();
    canvas.fill();
}

/// Stroke a line between two (y, x) points, i.e. a joint
pub fn draw_segment(
    (ay, ax): (f32, f32),
    (by, bx): (f32, f32),
    color: Color,
    scale: f32,
    canvas: &mut dyn Canvas,
) {
    canvas.begin_path();
    canvas.move_to(ax * scale, ay * scale);
    canvas.line_to(bx * scale, by * scale);
    canvas.set_line_width(SEGMENT_LINE_WIDTH);
    canvas.set_stroke_style(color);
    canvas.stroke();
}
