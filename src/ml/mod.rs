//! Person segmentation
//!
//! The model sits behind [`SegmentationModel`]; [`load`] builds the ONNX
//! Runtime backend in [`bodypix`]. [`mask`] turns results into colored masks
//! and composites them over the camera image.

pub mod bodypix;
pub mod mask;

use std::path::PathBuf;

use image::RgbaImage;

use crate::config::{Architecture, GuiState, InternalResolution};
use crate::error::Result;
use crate::pose::Pose;

pub use bodypix::BodyPix;
pub use mask::{draw_mask, to_mask, Mask};

/// Segmentation of a single person
#[derive(Debug, Clone)]
pub struct PersonSegmentation {
    pub pose: Pose,
    pub width: u32,
    pub height: u32,
    /// Row-major, 1 = person, 0 = background
    pub data: Vec<u8>,
}

/// One combined mask for everybody in the frame
#[derive(Debug, Clone)]
pub struct SemanticSegmentation {
    pub width: u32,
    pub height: u32,
    /// Row-major, 1 = person, 0 = background
    pub data: Vec<u8>,
    pub all_poses: Vec<Pose>,
}

/// Output of [`SegmentationModel::segment_person`]
#[derive(Debug, Clone)]
pub enum SegmentationResult {
    SinglePerson(SemanticSegmentation),
    MultiPerson(Vec<PersonSegmentation>),
}

impl SegmentationResult {
    /// Every detected pose with the width of the mask it belongs to
    pub fn poses(&self) -> Vec<(&Pose, u32)> {
        match self {
            SegmentationResult::SinglePerson(seg) => {
                seg.all_poses.iter().map(|pose| (pose, seg.width)).collect()
            }
            SegmentationResult::MultiPerson(people) => {
                people.iter().map(|person| (&person.pose, person.width)).collect()
            }
        }
    }

    /// Mask dimensions, `None` for an empty multi-person result
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            SegmentationResult::SinglePerson(seg) => Some((seg.width, seg.height)),
            SegmentationResult::MultiPerson(people) => {
                people.first().map(|person| (person.width, person.height))
            }
        }
    }
}

/// Per-frame inference settings
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationOptions {
    pub internal_resolution: InternalResolution,
    pub segmentation_threshold: f32,
    pub max_detections: usize,
    pub score_threshold: f32,
    pub nms_radius: f32,
}

impl SegmentationOptions {
    pub fn from_state(state: &GuiState) -> Self {
        Self {
            internal_resolution: state.input.internal_resolution,
            segmentation_threshold: state.segmentation.segmentation_threshold,
            max_detections: state.multi_person_decoding.max_detections,
            score_threshold: state.multi_person_decoding.score_threshold,
            nms_radius: state.multi_person_decoding.nms_radius,
        }
    }
}

impl Default for SegmentationOptions {
    fn default() -> Self {
        Self::from_state(&GuiState::default())
    }
}

/// Which network to load
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub architecture: Architecture,
    pub output_stride: u32,
    pub multiplier: f32,
    pub quant_bytes: u32,
    pub model_path: Option<PathBuf>,
}

impl ModelConfig {
    pub fn from_state(state: &GuiState) -> Self {
        Self {
            architecture: state.input.architecture,
            output_stride: state.input.output_stride,
            multiplier: state.input.multiplier,
            quant_bytes: state.input.quant_bytes,
            model_path: state.input.model_path.clone(),
        }
    }
}

/// A person segmentation and pose estimation model
pub trait SegmentationModel: Send {
    fn segment_person(
        &mut self,
        frame: &RgbaImage,
        options: &SegmentationOptions,
    ) -> Result<SegmentationResult>;
}

/// Load the ONNX Runtime backend for `config`
pub fn load(config: &ModelConfig) -> Result<Box<dyn SegmentationModel>> {
    Ok(Box::new(BodyPix::load(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{PartName, Position};

    fn pose_at(x: f32) -> Pose {
        let mut pose = Pose::empty();
        pose.keypoint_mut(PartName::Nose).position = Position::new(10.0, x);
        pose
    }

    #[test]
    fn test_poses_single_person() {
        let result = SegmentationResult::SinglePerson(SemanticSegmentation {
            width: 64,
            height: 48,
            data: vec![0; 64 * 48],
            all_poses: vec![pose_at(1.0), pose_at(2.0)],
        });
        let poses = result.poses();
        assert_eq!(poses.len(), 2);
        assert!(poses.iter().all(|(_, width)| *width == 64));
        assert_eq!(result.dimensions(), Some((64, 48)));
    }

    #[test]
    fn test_poses_multi_person() {
        let person = |x| PersonSegmentation {
            pose: pose_at(x),
            width: 32,
            height: 16,
            data: vec![0; 32 * 16],
        };
        let result = SegmentationResult::MultiPerson(vec![person(3.0), person(4.0), person(5.0)]);
        let poses = result.poses();
        assert_eq!(poses.len(), 3);
        assert_eq!(poses[2].0.keypoint(PartName::Nose).position.x, 5.0);
        assert_eq!(poses[0].1, 32);

        let empty = SegmentationResult::MultiPerson(Vec::new());
        assert!(empty.poses().is_empty());
        assert_eq!(empty.dimensions(), None);
    }

    #[test]
    fn test_options_follow_state() {
        let mut state = GuiState::default();
        state.segmentation.segmentation_threshold = 0.4;
        state.input.internal_resolution = InternalResolution::Full;
        let options = SegmentationOptions::from_state(&state);
        assert_eq!(options.segmentation_threshold, 0.4);
        assert_eq!(options.internal_resolution, InternalResolution::Full);
        assert_eq!(options.max_detections, 20);

        let model = ModelConfig::from_state(&state);
        assert_eq!(model.output_stride, 16);
        assert_eq!(model.multiplier, 0.75);
    }
}
