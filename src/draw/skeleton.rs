//! Pose skeleton, keypoint markers and bounding box

use super::geometry::{draw_point, draw_segment};
use super::{Canvas, AQUA, RED};
use crate::pose::{adjacent_keypoints, bounding_box, Keypoint};

const KEYPOINT_RADIUS: f32 = 3.0;

/// Draw a segment for every adjacent keypoint pair where both ends reach
/// `min_confidence`
pub fn draw_skeleton(keypoints: &[Keypoint], min_confidence: f32, canvas: &mut dyn Canvas, scale: f32) {
    for (a, b) in adjacent_keypoints(keypoints, min_confidence) {
        draw_segment(
            (a.position.y, a.position.x),
            (b.position.y, b.position.x),
            AQUA,
            scale,
            canvas,
        );
    }
}

/// Draw a dot on every keypoint reaching `min_confidence`
pub fn draw_keypoints(keypoints: &[Keypoint], min_confidence: f32, canvas: &mut dyn Canvas, scale: f32) {
    for keypoint in keypoints.iter().filter(|k| k.score >= min_confidence) {
        let (y, x) = (keypoint.position.y, keypoint.position.x);
        draw_point(canvas, y * scale, x * scale, KEYPOINT_RADIUS, AQUA);
    }
}

/// Stroke the box enclosing all keypoints
pub fn draw_bounding_box(keypoints: &[Keypoint], canvas: &mut dyn Canvas) {
    let Some(bbox) = bounding_box(keypoints) else { return };
    canvas.begin_path();
    canvas.rect(bbox.min_x, bbox.min_y, bbox.width(), bbox.height());
    canvas.set_stroke_style(RED);
    canvas.stroke();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{PartName, Pose, Position, CONNECTED_PARTS};
    use crate::testing::{CanvasCall, RecordingCanvas};

    fn pose_with_scores(score: f32) -> Pose {
        let mut pose = Pose::empty();
        for (i, kp) in pose.keypoints.iter_mut().enumerate() {
            kp.position = Position::new(i as f32, 2.0 * i as f32);
            kp.score = score;
        }
        pose
    }

    #[test]
    fn test_skeleton_one_segment_per_confident_pair() {
        let pose = pose_with_scores(0.8);
        let mut canvas = RecordingCanvas::default();
        draw_skeleton(&pose.keypoints, 0.5, &mut canvas, 1.0);
        assert_eq!(canvas.strokes(), CONNECTED_PARTS.len());
    }

    #[test]
    fn test_skeleton_skips_pairs_below_threshold() {
        let pose = pose_with_scores(0.3);
        let mut canvas = RecordingCanvas::default();
        draw_skeleton(&pose.keypoints, 0.5, &mut canvas, 1.0);
        assert!(canvas.calls.is_empty());

        let mut partial = pose_with_scores(0.8);
        partial.keypoint_mut(PartName::LeftKnee).score = 0.1;
        let mut canvas = RecordingCanvas::default();
        draw_skeleton(&partial.keypoints, 0.5, &mut canvas, 1.0);
        // hip-knee and knee-ankle on the left side drop out
        assert_eq!(canvas.strokes(), CONNECTED_PARTS.len() - 2);
    }

    #[test]
    fn test_keypoints_drawn_above_threshold_only() {
        let mut pose = pose_with_scores(0.8);
        pose.keypoint_mut(PartName::Nose).score = 0.2;
        pose.keypoint_mut(PartName::LeftEye).score = 0.5;
        let mut canvas = RecordingCanvas::default();
        draw_keypoints(&pose.keypoints, 0.5, &mut canvas, 2.0);

        assert_eq!(canvas.fills(), 16);
        let first = canvas.arcs()[0];
        assert_eq!((first.x, first.y, first.radius), (4.0, 2.0, 3.0));
    }

    #[test]
    fn test_bounding_box_rect() {
        let pose = pose_with_scores(0.8);
        let mut canvas = RecordingCanvas::default();
        draw_bounding_box(&pose.keypoints, &mut canvas);
        assert!(canvas.calls.contains(&CanvasCall::Rect(0.0, 0.0, 32.0, 16.0)));
        assert_eq!(canvas.strokes(), 1);

        let mut empty = RecordingCanvas::default();
        draw_bounding_box(&[], &mut empty);
        assert!(empty.calls.is_empty());
    }
}
