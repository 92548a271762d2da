//! Page controller
//!
//! Owns the camera source on the UI thread and drives what the window shows:
//! a loading indicator while the camera starts, the canvas once it runs, and
//! an info message when no camera can be used. Also handles the camera switch
//! and snapshot download buttons.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{ImageFormat, RgbaImage};

use crate::camera::{resolve_facing_mode, CameraSource, FacingMode, MediaDevices, VideoDimensions};
use crate::config::ConfigSlot;
use crate::error::Result;

/// Base name of saved snapshots
pub const SNAPSHOT_NAME: &str = "gingerbread-man";

/// Label requested when switching to the back camera on mobile
const BACK_CAMERA_LABEL: &str = "back";

/// Which parts of the window are visible
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiRegions {
    pub loading: bool,
    pub main: bool,
    /// Shown instead of the canvas when the camera cannot be used
    pub info: Option<String>,
    pub switch_button: bool,
    pub download_button: bool,
}

pub struct PageController<D: MediaDevices> {
    camera: CameraSource<D>,
    config: Arc<ConfigSlot>,
    regions: UiRegions,
}

impl<D: MediaDevices> PageController<D> {
    pub fn new(camera: CameraSource<D>, config: Arc<ConfigSlot>) -> Self {
        Self {
            camera,
            config,
            regions: UiRegions {
                loading: true,
                ..Default::default()
            },
        }
    }

    pub fn regions(&self) -> &UiRegions {
        &self.regions
    }

    pub fn camera(&self) -> &CameraSource<D> {
        &self.camera
    }

    /// Start the camera configured in the current snapshot
    pub fn bind(&mut self) -> Result<VideoDimensions> {
        let label = self.config.snapshot().camera.clone();
        let dimensions = self.open_camera(label.as_deref())?;

        let platform = self.camera.platform();
        self.regions.switch_button =
            platform.mobile || self.camera.enumerate_video_inputs().len() > 1;
        self.regions.download_button = true;
        Ok(dimensions)
    }

    /// Move to the next camera.
    ///
    /// Mobile devices toggle between the default and the back camera; desktops
    /// cycle through the enumerated inputs. Mirroring follows the new camera:
    /// on for user-facing cameras, off for environment-facing ones.
    pub fn switch_camera(&mut self) -> Result<VideoDimensions> {
        let current = self.config.snapshot().camera.clone();
        let next = if self.camera.platform().mobile {
            match current {
                Some(_) => None,
                None => Some(BACK_CAMERA_LABEL.to_string()),
            }
        } else {
            let labels: Vec<String> = self
                .camera
                .enumerate_video_inputs()
                .into_iter()
                .map(|d| d.label)
                .collect();
            next_label(&labels, current.as_deref())
        };

        let flip = resolve_facing_mode(next.as_deref()) != FacingMode::Environment;
        let label = next.clone();
        self.config.update(move |state| {
            state.camera = label;
            state.flip_horizontal = flip;
        });

        log::info!("Switching camera to {:?}", next.as_deref().unwrap_or("default"));
        self.open_camera(next.as_deref())
    }

    fn open_camera(&mut self, label: Option<&str>) -> Result<VideoDimensions> {
        self.regions.loading = true;
        self.regions.main = false;

        let opened = self.camera.open(label);
        self.regions.loading = false;
        match opened {
            Ok(dimensions) => {
                self.regions.main = true;
                self.regions.info = None;
                Ok(dimensions)
            }
            Err(e) => {
                self.regions.info = Some(format!(
                    "This device does not have a usable camera, or video capture is not supported ({})",
                    e
                ));
                Err(e)
            }
        }
    }

    /// Save `canvas` as a PNG in `dir`, returning the written path
    pub fn download(&self, canvas: &RgbaImage, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = snapshot_path(dir);
        canvas.save_with_format(&path, ImageFormat::Png)?;
        log::info!("Saved snapshot to {}", path.display());
        Ok(path)
    }

    /// Release the camera
    pub fn shutdown(&mut self) {
        self.camera.stop();
        self.regions.main = false;
    }
}

/// Camera label after `current` in `labels`, wrapping around. No current
/// label counts as the first camera.
fn next_label(labels: &[String], current: Option<&str>) -> Option<String> {
    if labels.is_empty() {
        return None;
    }
    let index = current
        .and_then(|c| labels.iter().position(|l| l == c))
        .unwrap_or(0);
    labels.get((index + 1) % labels.len()).cloned()
}

/// `gingerbread-man.png`, or the first free `gingerbread-man-<n>.png`
pub fn snapshot_path(dir: &Path) -> PathBuf {
    let path = dir.join(format!("{}.png", SNAPSHOT_NAME));
    if !path.exists() {
        return path;
    }
    (1u32..)
        .map(|n| dir.join(format!("{}-{}.png", SNAPSHOT_NAME, n)))
        .find(|p| !p.exists())
        .unwrap_or(path)
}
