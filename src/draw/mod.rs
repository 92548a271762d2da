//! Canvas drawing
//!
//! [`Canvas`] is the 2D path API the overlays draw through. [`RasterCanvas`]
//! implements it on top of an RGBA image; tests use a recording implementation.

pub mod face;
pub mod geometry;
pub mod raster;
pub mod skeleton;

pub use face::{draw_face, draw_face_eyes};
pub use geometry::{
    draw_curve, draw_left_part_of_ribbon, draw_point, draw_right_part_of_ribbon, draw_segment,
};
pub use raster::RasterCanvas;
pub use skeleton::{draw_bounding_box, draw_keypoints, draw_skeleton};

/// RGBA color, straight alpha
pub type Color = image::Rgba<u8>;

pub const WHITE: Color = image::Rgba([255, 255, 255, 255]);
pub const RED: Color = image::Rgba([255, 0, 0, 255]);
pub const AQUA: Color = image::Rgba([0, 255, 255, 255]);
pub const TRANSPARENT: Color = image::Rgba([0, 0, 0, 0]);

/// A 2D drawing surface with a current path.
///
/// Angles are in radians, measured clockwise from the +x axis because y grows
/// downwards. Arcs always sweep from `start_angle` towards increasing angles.
pub trait Canvas {
    /// Discard the current path
    fn begin_path(&mut self);
    /// Close the current subpath back to its first point
    fn close_path(&mut self);
    fn move_to(&mut self, x: f32, y: f32);
    fn line_to(&mut self, x: f32, y: f32);
    /// Append a circular arc, connected to the current point by a straight line
    fn arc(&mut self, x: f32, y: f32, radius: f32, start_angle: f32, end_angle: f32);
    /// Append a closed rectangle subpath
    fn rect(&mut self, x: f32, y: f32, width: f32, height: f32);
    fn set_fill_style(&mut self, color: Color);
    fn set_stroke_style(&mut self, color: Color);
    fn set_line_width(&mut self, width: f32);
    /// Fill every subpath of the current path
    fn fill(&mut self);
    /// Stroke the current path with the current line width
    fn stroke(&mut self);
}
