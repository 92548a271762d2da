//! Demo configuration
//!
//! [`GuiState`] is an immutable snapshot. UI handlers build a modified copy and
//! publish it through a [`ConfigSlot`]; the segmentation loop reads the slot
//! once per frame, so a frame in flight always finishes with the values it
//! started with.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Environment variable overriding the configuration file location
pub const CONFIG_PATH_ENV: &str = "GINGERBREAD_CONFIG";

/// Backbone of the segmentation network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Architecture {
    #[default]
    MobileNetV1,
    ResNet50,
}

impl Architecture {
    pub fn display_name(&self) -> &'static str {
        match self {
            Architecture::MobileNetV1 => "MobileNetV1",
            Architecture::ResNet50 => "ResNet50",
        }
    }
}

/// Fraction of the frame size fed to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InternalResolution {
    Low,
    #[default]
    Medium,
    High,
    Full,
}

impl InternalResolution {
    pub const ALL: [InternalResolution; 4] = [
        InternalResolution::Low,
        InternalResolution::Medium,
        InternalResolution::High,
        InternalResolution::Full,
    ];

    pub fn fraction(&self) -> f32 {
        match self {
            InternalResolution::Low => 0.25,
            InternalResolution::Medium => 0.5,
            InternalResolution::High => 0.75,
            InternalResolution::Full => 1.0,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            InternalResolution::Low => "low",
            InternalResolution::Medium => "medium",
            InternalResolution::High => "high",
            InternalResolution::Full => "full",
        }
    }
}

/// What gets composited under the overlays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisplayEffect {
    /// Person pixels painted in the gingerbread color
    #[default]
    Mask,
    /// Plain camera image
    None,
}

/// Model selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InputConfig {
    pub architecture: Architecture,
    pub output_stride: u32,
    pub internal_resolution: InternalResolution,
    pub multiplier: f32,
    pub quant_bytes: u32,
    /// Explicit model file, bypassing the `models` directory lookup
    pub model_path: Option<PathBuf>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            architecture: Architecture::MobileNetV1,
            output_stride: 16,
            internal_resolution: InternalResolution::Medium,
            multiplier: 0.75,
            quant_bytes: 2,
            model_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MultiPersonDecoding {
    pub max_detections: usize,
    pub score_threshold: f32,
    pub nms_radius: f32,
}

impl Default for MultiPersonDecoding {
    fn default() -> Self {
        Self {
            max_detections: 20,
            score_threshold: 0.9,
            nms_radius: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SegmentationConfig {
    pub segmentation_threshold: f32,
    pub effect: DisplayEffect,
    /// Mask opacity (0-1)
    pub opacity: f32,
    /// Gaussian blur applied to the mask, in pixels
    pub mask_blur_amount: u32,
    /// Outline each person's mask
    pub draw_contour: bool,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            segmentation_threshold: 0.7,
            effect: DisplayEffect::Mask,
            opacity: 1.0,
            mask_blur_amount: 0,
            draw_contour: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OverlayConfig {
    pub show_face: bool,
    pub show_skeleton: bool,
    pub show_keypoints: bool,
    pub show_bounding_box: bool,
    /// Minimum keypoint score for skeleton and keypoint markers
    pub min_part_confidence: f32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            show_face: true,
            show_skeleton: false,
            show_keypoints: false,
            show_bounding_box: false,
            min_part_confidence: 0.5,
        }
    }
}

/// Complete configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GuiState {
    /// Camera label to open, `None` for the default device
    pub camera: Option<String>,
    pub flip_horizontal: bool,
    pub input: InputConfig,
    pub multi_person_decoding: MultiPersonDecoding,
    pub segmentation: SegmentationConfig,
    pub overlay: OverlayConfig,
    /// Segmentation loop rate
    pub target_fps: u32,
    /// Warn when no frame completes within this many milliseconds
    pub watchdog_timeout_ms: u64,
    /// Where snapshots are written, defaults to the user's download directory
    pub download_dir: Option<PathBuf>,
}

impl Default for GuiState {
    fn default() -> Self {
        Self {
            camera: None,
            flip_horizontal: true,
            input: InputConfig::default(),
            multi_person_decoding: MultiPersonDecoding::default(),
            segmentation: SegmentationConfig::default(),
            overlay: OverlayConfig::default(),
            target_fps: 30,
            watchdog_timeout_ms: 5000,
            download_dir: None,
        }
    }
}

impl GuiState {
    /// Load from `path`. A missing file yields defaults; so does a malformed
    /// one, with a warning.
    pub fn load_or_default(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No configuration at {}, using defaults", path.display());
                return Self::default();
            }
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str::<GuiState>(&content) {
            Ok(state) => {
                log::info!("Loaded configuration from {}", path.display());
                state.sanitized()
            }
            Err(e) => {
                log::warn!("Error parsing {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Clamp values the UI and the loop rely on being in range
    pub fn sanitized(mut self) -> Self {
        self.segmentation.opacity = self.segmentation.opacity.clamp(0.0, 1.0);
        self.segmentation.segmentation_threshold =
            self.segmentation.segmentation_threshold.clamp(0.0, 1.0);
        self.multi_person_decoding.score_threshold =
            self.multi_person_decoding.score_threshold.clamp(0.0, 1.0);
        self.overlay.min_part_confidence = self.overlay.min_part_confidence.clamp(0.0, 1.0);
        self.target_fps = self.target_fps.clamp(1, 240);
        if !matches!(self.input.output_stride, 8 | 16 | 32) {
            log::warn!("Unsupported output stride {}, using 16", self.input.output_stride);
            self.input.output_stride = 16;
        }
        self
    }

    /// Directory snapshots are saved to
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Configuration file location: `$GINGERBREAD_CONFIG`, else the platform
/// config directory
pub fn default_config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gingerbread-cam")
        .join("config.json")
}

/// Single-writer, single-reader slot holding the current [`GuiState`]
pub struct ConfigSlot {
    current: Mutex<Arc<GuiState>>,
    version: AtomicU64,
}

impl ConfigSlot {
    pub fn new(state: GuiState) -> Self {
        Self {
            current: Mutex::new(Arc::new(state)),
            version: AtomicU64::new(0),
        }
    }

    /// The snapshot in effect right now
    pub fn snapshot(&self) -> Arc<GuiState> {
        self.current.lock().clone()
    }

    /// Replace the snapshot
    pub fn publish(&self, state: GuiState) {
        *self.current.lock() = Arc::new(state);
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Publish a modified copy of the current snapshot
    pub fn update(&self, edit: impl FnOnce(&mut GuiState)) {
        let mut next = (*self.snapshot()).clone();
        edit(&mut next);
        self.publish(next);
    }

    /// Number of snapshots published since creation
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl Default for ConfigSlot {
    fn default() -> Self {
        Self::new(GuiState::default())
    }
}
