//! Gingerbread face: two eyes, a smile and a ribbon under the chin

use super::geometry::{draw_curve, draw_left_part_of_ribbon, draw_point, draw_right_part_of_ribbon};
use super::{Canvas, RED, WHITE};
use crate::pose::Keypoint;

/// Draw the face for a pose, reading keypoints 1 and 2 as the eyes.
///
/// Short keypoint slices are ignored.
pub fn draw_face(keypoints: &[Keypoint], canvas: &mut dyn Canvas, scale: f32) {
    if let (Some(first), Some(second)) = (keypoints.get(1), keypoints.get(2)) {
        draw_face_eyes(first, second, canvas, scale);
    }
}

/// Draw the face anchored at two eye keypoints.
///
/// Nothing is drawn unless `second` lies strictly to the right of `first`; a
/// face turned away or a degenerate detection leaves the canvas untouched.
pub fn draw_face_eyes(first: &Keypoint, second: &Keypoint, canvas: &mut dyn Canvas, scale: f32) {
    let (y1, x1) = (first.position.y, first.position.x);
    let (y2, x2) = (second.position.y, second.position.x);
    if x2 - x1 <= 0.0 || !(x2 - x1).is_finite() {
        return;
    }

    let separation = (x2 - x1).abs();
    let (sy1, sx1, sy2, sx2) = (y1 * scale, x1 * scale, y2 * scale, x2 * scale);

    // Eyes
    draw_point(canvas, sy1, sx1, separation / 8.0 * scale, WHITE);
    draw_point(canvas, sy2, sx2, separation / 8.0 * scale, WHITE);

    // Mouth
    draw_curve(canvas, sy1, sy2, sx1, sx2, separation * scale, WHITE);

    // Ribbon, two eye-separations below the eyes
    let ribbon_y = ((y1 + y2) / 2.0 + separation * 2.0) * scale;
    draw_right_part_of_ribbon(canvas, sy1, sy2, sx1, sx2, separation * scale, ribbon_y, RED);
    draw_left_part_of_ribbon(canvas, sy1, sy2, sx1, sx2, separation * scale, ribbon_y, RED);
}
