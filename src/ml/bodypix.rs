//! BodyPix person segmentation on ONNX Runtime
//!
//! Expects a BodyPix network exported to ONNX with NHWC float input and the
//! usual `segments`, `heatmaps` and `short_offsets` outputs. One pose is
//! decoded per frame by taking the strongest heatmap cell for each part.

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::RgbaImage;
use ndarray::Array4;

use super::{ModelConfig, SegmentationModel, SegmentationOptions, SegmentationResult, SemanticSegmentation};
use crate::config::Architecture;
use crate::error::{Error, Result};
use crate::pose::{Keypoint, PartName, Pose, Position, NUM_KEYPOINTS};

/// Per-channel offsets added to ResNet inputs
const RESNET_MEAN: [f32; 3] = [-123.15, -115.90, -103.06];

/// Loaded BodyPix session
pub struct BodyPix {
    session: ort::session::Session,
    architecture: Architecture,
    output_stride: u32,
}

impl BodyPix {
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let model_path = match &config.model_path {
            Some(path) => path.clone(),
            None => find_model_dir()?.join(model_file_name(config)),
        };
        if !model_path.exists() {
            return Err(Error::ModelLoad(format!(
                "segmentation model not found: {:?}",
                model_path
            )));
        }
        if config.quant_bytes != 4 {
            log::debug!(
                "Quantization ({} bytes) is fixed by the ONNX export, ignoring",
                config.quant_bytes
            );
        }

        let session = ort::session::Session::builder()
            .map_err(|e| Error::ModelLoad(format!("failed to create session builder: {}", e)))?
            .with_intra_threads(2)
            .map_err(|e| Error::ModelLoad(format!("failed to set threads: {}", e)))?
            .commit_from_file(&model_path)
            .map_err(|e| Error::ModelLoad(format!("failed to load {:?}: {}", model_path, e)))?;

        log::info!("Loaded segmentation model from {:?}", model_path);

        Ok(Self {
            session,
            architecture: config.architecture,
            output_stride: config.output_stride,
        })
    }

    fn run(&mut self, input: Array4<f32>) -> Result<Vec<OutputTensor>> {
        let input_tensor = ort::value::Tensor::from_array(input)
            .map_err(|e| Error::InferenceFailure(format!("failed to create tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| Error::InferenceFailure(e.to_string()))?;

        let mut tensors = Vec::new();
        for (name, value) in outputs.iter() {
            let (shape, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| Error::InferenceFailure(format!("failed to extract {}: {}", name, e)))?;
            tensors.push(OutputTensor {
                name: name.to_string(),
                dims: shape.iter().map(|&d| d.max(0) as usize).collect(),
                data: data.to_vec(),
            });
        }
        Ok(tensors)
    }
}

impl SegmentationModel for BodyPix {
    fn segment_person(
        &mut self,
        frame: &RgbaImage,
        options: &SegmentationOptions,
    ) -> Result<SegmentationResult> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::InferenceFailure("empty frame".to_string()));
        }

        let fraction = options.internal_resolution.fraction();
        let input_width = valid_input_resolution((width as f32 * fraction) as u32, self.output_stride);
        let input_height = valid_input_resolution((height as f32 * fraction) as u32, self.output_stride);

        let resized = imageops::resize(frame, input_width, input_height, FilterType::Triangle);
        let input = preprocess(&resized, self.architecture)?;
        let outputs = self.run(input)?;

        let segments = find_output(&outputs, "segments")?;
        let heatmaps = find_output(&outputs, "heatmaps")?;
        let offsets = find_output(&outputs, "short_offsets")?;

        let data = segmentation_mask(segments, width, height, options.segmentation_threshold)?;

        let mut all_poses = Vec::new();
        if options.max_detections > 0 {
            let scale = (
                height as f32 / input_height as f32,
                width as f32 / input_width as f32,
            );
            let pose = decode_single_pose(heatmaps, offsets, self.output_stride, scale, (width, height))?;
            let best = pose.keypoints.iter().map(|k| k.score).fold(0.0, f32::max);
            if best >= options.score_threshold {
                all_poses.push(pose);
            }
        }

        Ok(SegmentationResult::SinglePerson(SemanticSegmentation {
            width,
            height,
            data,
            all_poses,
        }))
    }
}

/// A model output copied out of the session
#[derive(Debug, Clone)]
struct OutputTensor {
    name: String,
    /// NHWC
    dims: Vec<usize>,
    data: Vec<f32>,
}

impl OutputTensor {
    /// (height, width, channels), checked against the data length
    fn grid(&self) -> Result<(usize, usize, usize)> {
        let (h, w, c) = match self.dims.as_slice() {
            [1, h, w, c] => (*h, *w, *c),
            [h, w, c] => (*h, *w, *c),
            other => {
                return Err(Error::InferenceFailure(format!(
                    "unexpected shape {:?} for {}",
                    other, self.name
                )))
            }
        };
        if h * w * c != self.data.len() || h == 0 || w == 0 {
            return Err(Error::InferenceFailure(format!(
                "{} holds {} values, expected {}x{}x{}",
                self.name,
                self.data.len(),
                h,
                w,
                c
            )));
        }
        Ok((h, w, c))
    }

    fn at(&self, y: usize, x: usize, c: usize, (_, w, channels): (usize, usize, usize)) -> f32 {
        self.data[(y * w + x) * channels + c]
    }
}

/// Output named `key`, optionally with a `float_` prefix, a graph scope or a
/// `:0` port suffix. `heatmaps` never matches `float_part_heatmaps`.
fn find_output<'a>(outputs: &'a [OutputTensor], key: &str) -> Result<&'a OutputTensor> {
    outputs
        .iter()
        .find(|o| output_name_matches(&o.name, key))
        .ok_or_else(|| Error::InferenceFailure(format!("model has no {} output", key)))
}

fn output_name_matches(name: &str, key: &str) -> bool {
    let base = name.rsplit('/').next().unwrap_or(name);
    let base = base.split(':').next().unwrap_or(base);
    base == key || base.strip_prefix("float_") == Some(key)
}

/// Model file name for a configuration, e.g. `bodypix_mobilenetv1_075_stride16.onnx`
pub fn model_file_name(config: &ModelConfig) -> String {
    match config.architecture {
        Architecture::MobileNetV1 => format!(
            "bodypix_mobilenetv1_{:03}_stride{}.onnx",
            (config.multiplier * 100.0).round() as u32,
            config.output_stride
        ),
        Architecture::ResNet50 => format!("bodypix_resnet50_stride{}.onnx", config.output_stride),
    }
}

/// Round a resolution down to the nearest size the network accepts,
/// a multiple of `stride` plus one
pub fn valid_input_resolution(resolution: u32, stride: u32) -> u32 {
    let stride = stride.max(1);
    if resolution > 0 && (resolution - 1) % stride == 0 {
        return resolution;
    }
    (resolution / stride).max(1) * stride + 1
}

/// NHWC float tensor in the value range the backbone was trained on
fn preprocess(image: &RgbaImage, architecture: Architecture) -> Result<Array4<f32>> {
    let (width, height) = image.dimensions();
    let mut values = Vec::with_capacity(width as usize * height as usize * 3);
    for pixel in image.pixels() {
        for c in 0..3 {
            let v = pixel.0[c] as f32;
            values.push(match architecture {
                Architecture::MobileNetV1 => v / 127.5 - 1.0,
                Architecture::ResNet50 => v + RESNET_MEAN[c],
            });
        }
    }
    Array4::from_shape_vec((1, height as usize, width as usize, 3), values)
        .map_err(|e| Error::InferenceFailure(format!("failed to create input array: {}", e)))
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Upsample segmentation logits to the frame and threshold them
fn segmentation_mask(segments: &OutputTensor, width: u32, height: u32, threshold: f32) -> Result<Vec<u8>> {
    let grid = segments.grid()?;
    let (gh, gw, _) = grid;
    let probability = |y: usize, x: usize| sigmoid(segments.at(y, x, 0, grid));

    // Align corners: frame edges map onto the outer grid cells
    let sx = if width > 1 { (gw - 1) as f32 / (width - 1) as f32 } else { 0.0 };
    let sy = if height > 1 { (gh - 1) as f32 / (height - 1) as f32 } else { 0.0 };

    let mut data = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        let fy = y as f32 * sy;
        let y0 = (fy.floor() as usize).min(gh - 1);
        let y1 = (y0 + 1).min(gh - 1);
        let ty = fy - y0 as f32;
        for x in 0..width {
            let fx = x as f32 * sx;
            let x0 = (fx.floor() as usize).min(gw - 1);
            let x1 = (x0 + 1).min(gw - 1);
            let tx = fx - x0 as f32;

            let top = probability(y0, x0) * (1.0 - tx) + probability(y0, x1) * tx;
            let bottom = probability(y1, x0) * (1.0 - tx) + probability(y1, x1) * tx;
            let p = top * (1.0 - ty) + bottom * ty;
            data.push(u8::from(p > threshold));
        }
    }
    Ok(data)
}

/// Strongest heatmap cell per part, refined by its short-range offset.
///
/// `scale` maps model input pixels to frame pixels as (y, x).
fn decode_single_pose(
    heatmaps: &OutputTensor,
    offsets: &OutputTensor,
    output_stride: u32,
    scale: (f32, f32),
    (width, height): (u32, u32),
) -> Result<Pose> {
    let grid = heatmaps.grid()?;
    let offset_grid = offsets.grid()?;
    if grid.2 < NUM_KEYPOINTS || offset_grid.2 < 2 * NUM_KEYPOINTS || offset_grid.0 != grid.0 || offset_grid.1 != grid.1 {
        return Err(Error::InferenceFailure(format!(
            "heatmaps {:?} and offsets {:?} do not describe {} parts",
            heatmaps.dims, offsets.dims, NUM_KEYPOINTS
        )));
    }

    let (gh, gw, _) = grid;
    let stride = output_stride as f32;
    let mut pose = Pose::empty();

    for part in PartName::ALL {
        let k = part.index();
        let mut best = (0, 0, f32::NEG_INFINITY);
        for y in 0..gh {
            for x in 0..gw {
                let v = heatmaps.at(y, x, k, grid);
                if v > best.2 {
                    best = (y, x, v);
                }
            }
        }

        let (hy, hx, logit) = best;
        let offset_y = offsets.at(hy, hx, k, offset_grid);
        let offset_x = offsets.at(hy, hx, k + NUM_KEYPOINTS, offset_grid);
        let y = ((hy as f32 * stride + offset_y) * scale.0).clamp(0.0, (height - 1) as f32);
        let x = ((hx as f32 * stride + offset_x) * scale.1).clamp(0.0, (width - 1) as f32);

        *pose.keypoint_mut(part) = Keypoint {
            position: Position::new(y, x),
            score: sigmoid(logit),
            part,
        };
    }

    pose.score = pose.keypoints.iter().map(|k| k.score).sum::<f32>() / NUM_KEYPOINTS as f32;
    Ok(pose)
}

/// Find the models directory
fn find_model_dir() -> Result<PathBuf> {
    // Next to the executable, or up to three levels above it for target/ builds
    if let Ok(exe_path) = std::env::current_exe() {
        let mut dir: Option<&Path> = exe_path.parent();
        for _ in 0..4 {
            let Some(current) = dir else { break };
            let model_dir = current.join("models");
            if model_dir.exists() {
                return Ok(model_dir);
            }
            dir = current.parent();
        }
    }

    let cwd = std::env::current_dir()?;
    let model_dir = cwd.join("models");
    if model_dir.exists() {
        return Ok(model_dir);
    }

    Err(Error::ModelLoad(
        "models directory not found. Create a 'models' directory with BodyPix ONNX models.".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(name: &str, h: usize, w: usize, c: usize, data: Vec<f32>) -> OutputTensor {
        OutputTensor {
            name: name.to_string(),
            dims: vec![1, h, w, c],
            data,
        }
    }

    #[test]
    fn test_valid_input_resolution() {
        assert_eq!(valid_input_resolution(320, 16), 321);
        assert_eq!(valid_input_resolution(321, 16), 321);
        assert_eq!(valid_input_resolution(240, 16), 241);
        assert_eq!(valid_input_resolution(250, 8), 249);
        assert_eq!(valid_input_resolution(3, 16), 17);
    }

    #[test]
    fn test_model_file_name() {
        let mut config = ModelConfig {
            architecture: Architecture::MobileNetV1,
            output_stride: 16,
            multiplier: 0.75,
            quant_bytes: 2,
            model_path: None,
        };
        assert_eq!(model_file_name(&config), "bodypix_mobilenetv1_075_stride16.onnx");
        config.multiplier = 1.0;
        config.output_stride = 8;
        assert_eq!(model_file_name(&config), "bodypix_mobilenetv1_100_stride8.onnx");
        config.architecture = Architecture::ResNet50;
        assert_eq!(model_file_name(&config), "bodypix_resnet50_stride8.onnx");
    }

    #[test]
    fn test_preprocess_ranges() {
        let image = RgbaImage::from_pixel(2, 1, image::Rgba([255, 0, 255, 255]));
        let mobilenet = preprocess(&image, Architecture::MobileNetV1).unwrap();
        assert_eq!(mobilenet.shape(), &[1, 1, 2, 3]);
        assert_eq!(mobilenet[[0, 0, 1, 0]], 1.0);
        assert_eq!(mobilenet[[0, 0, 1, 1]], -1.0);

        let resnet = preprocess(&image, Architecture::ResNet50).unwrap();
        assert!((resnet[[0, 0, 0, 1]] + 115.90).abs() < 1e-4);
    }

    #[test]
    fn test_segmentation_mask_upsamples_and_thresholds() {
        // Left column person, right column background
        let segments = tensor("float_segments", 2, 2, 1, vec![10.0, -10.0, 10.0, -10.0]);
        let data = segmentation_mask(&segments, 5, 2, 0.7).unwrap();
        assert_eq!(data, vec![1, 1, 0, 0, 0, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn test_grid_rejects_bad_shapes() {
        let bad = tensor("segments", 2, 2, 1, vec![0.0; 3]);
        assert!(bad.grid().is_err());
        let flat = OutputTensor {
            name: "segments".to_string(),
            dims: vec![4],
            data: vec![0.0; 4],
        };
        assert!(flat.grid().is_err());
    }

    #[test]
    fn test_decode_single_pose() {
        let (h, w) = (3, 3);
        let mut heat = vec![-5.0; h * w * NUM_KEYPOINTS];
        let mut offsets = vec![0.0; h * w * 2 * NUM_KEYPOINTS];
        // Every part peaks at cell (1, 2); the left eye is offset by (2, -3)
        for k in 0..NUM_KEYPOINTS {
            heat[(w + 2) * NUM_KEYPOINTS + k] = 5.0;
        }
        let eye = PartName::LeftEye.index();
        offsets[(w + 2) * 2 * NUM_KEYPOINTS + eye] = 2.0;
        offsets[(w + 2) * 2 * NUM_KEYPOINTS + eye + NUM_KEYPOINTS] = -3.0;

        let heatmaps = tensor("float_heatmaps", h, w, NUM_KEYPOINTS, heat);
        let offsets = tensor("float_short_offsets", h, w, 2 * NUM_KEYPOINTS, offsets);
        let pose = decode_single_pose(&heatmaps, &offsets, 16, (2.0, 2.0), (200, 200)).unwrap();

        let nose = pose.keypoint(PartName::Nose);
        assert_eq!((nose.position.y, nose.position.x), (32.0, 64.0));
        let left_eye = pose.keypoint(PartName::LeftEye);
        assert_eq!((left_eye.position.y, left_eye.position.x), (36.0, 58.0));
        assert!(left_eye.score > 0.99);
        assert_eq!(left_eye.part, PartName::LeftEye);
        assert!(pose.score > 0.99);
    }

    #[test]
    fn test_decode_rejects_mismatched_outputs() {
        let heatmaps = tensor("heatmaps", 2, 2, 3, vec![0.0; 12]);
        let offsets = tensor("short_offsets", 2, 2, 6, vec![0.0; 24]);
        assert!(decode_single_pose(&heatmaps, &offsets, 16, (1.0, 1.0), (10, 10)).is_err());
    }

    #[test]
    fn test_find_output_by_name() {
        let outputs = vec![
            tensor("float_segments", 1, 1, 1, vec![0.0]),
            tensor("float_short_offsets", 1, 1, 1, vec![0.0]),
        ];
        assert_eq!(find_output(&outputs, "short_offsets").unwrap().name, "float_short_offsets");
        assert!(find_output(&outputs, "heatmaps").is_err());
    }

    #[test]
    fn test_find_output_skips_part_and_long_range_outputs() {
        // Full BodyPix output set with the lookalikes listed first
        let outputs = vec![
            tensor("float_part_heatmaps", 1, 1, 24, vec![0.0; 24]),
            tensor("float_long_offsets", 1, 1, 34, vec![0.0; 34]),
            tensor("float_heatmaps", 1, 1, 17, vec![0.0; 17]),
            tensor("float_short_offsets", 1, 1, 34, vec![0.0; 34]),
            tensor("float_part_offsets", 1, 1, 48, vec![0.0; 48]),
            tensor("float_segments", 1, 1, 1, vec![0.0]),
        ];
        assert_eq!(find_output(&outputs, "heatmaps").unwrap().name, "float_heatmaps");
        assert_eq!(find_output(&outputs, "short_offsets").unwrap().name, "float_short_offsets");
        assert_eq!(find_output(&outputs, "segments").unwrap().name, "float_segments");
        assert!(find_output(&outputs, "offsets").is_err());
    }

    #[test]
    fn test_output_name_forms() {
        assert!(output_name_matches("heatmaps", "heatmaps"));
        assert!(output_name_matches("float_heatmaps:0", "heatmaps"));
        assert!(output_name_matches("MobilenetV1/float_heatmaps", "heatmaps"));
        assert!(!output_name_matches("float_part_heatmaps", "heatmaps"));
        assert!(!output_name_matches("displacement_fwd", "heatmaps"));
    }
}
