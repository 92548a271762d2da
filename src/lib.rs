//! Gingerbread Cam - webcam person segmentation with a gingerbread overlay
//!
//! Captures camera frames, segments people with a BodyPix model running on
//! ONNX Runtime, and draws each person as a gingerbread man: a brown mask,
//! white eyes and smile, and a red ribbon. Pose skeletons can be overlaid.

pub mod app;
pub mod camera;
pub mod config;
pub mod draw;
pub mod error;
pub mod ml;
pub mod page;
pub mod pose;
pub mod presenter;
pub mod render_loop;

#[cfg(test)]
pub(crate) mod testing;

pub use app::App;
pub use error::{Error, Result};
