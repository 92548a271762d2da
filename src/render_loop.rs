//! Segmentation loop
//!
//! Runs on its own thread: on every frame tick it takes the latest camera
//! frame, segments it, composites the mask and draws the gingerbread face and
//! optional pose overlays. Finished canvases are handed to the UI thread
//! through a [`CanvasSlot`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Sender};
use image::RgbaImage;
use parking_lot::Mutex;

use crate::camera::FrameSlot;
use crate::config::{ConfigSlot, DisplayEffect, GuiState};
use crate::draw::{
    draw_bounding_box, draw_face_eyes, draw_keypoints, draw_skeleton, Color, RasterCanvas,
    TRANSPARENT,
};
use crate::error::{Error, Result};
use crate::ml::{draw_mask, to_mask, ModelConfig, SegmentationModel, SegmentationOptions};
use crate::pose::{flip_pose_horizontal, PartName, Pose};

/// Gingerbread brown painted over person pixels
pub const FOREGROUND_COLOR: Color = image::Rgba([170, 91, 0, 255]);

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A new canvas was drawn
    Rendered { people: usize },
    /// No camera frame newer than the last one processed
    NoFrame,
    /// Inference failed on this frame
    Skipped,
}

/// Iteration timing and counters, shared with the UI thread
pub struct LoopHealth {
    started: Instant,
    /// Milliseconds since `started` when the last iteration completed
    last_completed_ms: AtomicU64,
    frames: AtomicU64,
    failures: AtomicU64,
    stall_reported: AtomicBool,
}

impl LoopHealth {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_completed_ms: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            stall_reported: AtomicBool::new(false),
        }
    }

    fn mark_completed(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_completed_ms.store(elapsed, Ordering::Release);
    }

    pub fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.mark_completed();
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.mark_completed();
    }

    /// Record a tick that found nothing new to draw
    pub fn record_idle(&self) {
        self.mark_completed();
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Time since the last completed iteration
    pub fn since_last_completion(&self) -> Duration {
        let last = self.last_completed_ms.load(Ordering::Acquire);
        let now = self.started.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(last))
    }

    pub fn is_stalled(&self, timeout: Duration) -> bool {
        self.since_last_completion() > timeout
    }

    /// Warn once when the loop stalls, and again after it recovers and
    /// stalls anew. Returns whether the loop is stalled.
    pub fn check_watchdog(&self, timeout: Duration) -> bool {
        let stalled = self.is_stalled(timeout);
        let reported = self.stall_reported.swap(stalled, Ordering::AcqRel);
        if stalled && !reported {
            log::warn!(
                "Segmentation loop stalled: no iteration completed for {:?}",
                self.since_last_completion()
            );
        } else if !stalled && reported {
            log::info!("Segmentation loop recovered");
        }
        stalled
    }
}

impl Default for LoopHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Latest finished canvas
#[derive(Default)]
pub struct CanvasSlot {
    latest: Mutex<Option<Arc<RgbaImage>>>,
    version: AtomicU64,
}

impl CanvasSlot {
    pub fn publish(&self, canvas: RgbaImage) {
        *self.latest.lock() = Some(Arc::new(canvas));
        self.version.fetch_add(1, Ordering::Release);
    }

    pub fn latest(&self) -> Option<Arc<RgbaImage>> {
        self.latest.lock().clone()
    }

    /// Incremented on every publish
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

/// Lifecycle of the loop thread
#[derive(Debug, Clone, PartialEq)]
pub enum LoopStatus {
    Loading,
    Running,
    Failed(String),
}

/// One segmentation-and-draw pass per call to [`run_frame`](Self::run_frame)
pub struct SegmentationLoop {
    model: Box<dyn SegmentationModel>,
    frames: Arc<FrameSlot>,
    config: Arc<ConfigSlot>,
    health: Arc<LoopHealth>,
    canvas: RasterCanvas,
    last_frame: Option<u64>,
}

impl SegmentationLoop {
    pub fn new(
        model: Box<dyn SegmentationModel>,
        frames: Arc<FrameSlot>,
        config: Arc<ConfigSlot>,
        health: Arc<LoopHealth>,
    ) -> Self {
        Self {
            model,
            frames,
            config,
            health,
            canvas: RasterCanvas::new(0, 0),
            last_frame: None,
        }
    }

    pub fn canvas(&self) -> &RasterCanvas {
        &self.canvas
    }

    pub fn run_frame(&mut self) -> FrameOutcome {
        let state = self.config.snapshot();

        let frame = match self.frames.latest() {
            Some(frame) if self.last_frame != Some(frame.frame_number) => frame,
            _ => {
                self.health.record_idle();
                return FrameOutcome::NoFrame;
            }
        };
        self.last_frame = Some(frame.frame_number);

        let options = SegmentationOptions::from_state(&state);
        let result = match self.model.segment_person(&frame.image, &options) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Frame {} skipped: {}", frame.frame_number, e);
                self.health.record_failure();
                return FrameOutcome::Skipped;
            }
        };

        let segmentation = &state.segmentation;
        let mask = match segmentation.effect {
            DisplayEffect::Mask => to_mask(&result, FOREGROUND_COLOR, TRANSPARENT, segmentation.draw_contour),
            DisplayEffect::None => None,
        };
        draw_mask(
            self.canvas.image_mut(),
            &frame.image,
            mask.as_ref(),
            segmentation.opacity,
            segmentation.mask_blur_amount,
            state.flip_horizontal,
        );

        let poses = result.poses();
        for (pose, mask_width) in &poses {
            draw_pose(&mut self.canvas, pose, *mask_width, &state);
        }

        self.health.record_frame();
        FrameOutcome::Rendered { people: poses.len() }
    }
}

/// Draw the face and enabled overlays for one pose.
///
/// When the canvas is mirrored the pose is mirrored with it and the eyes are
/// passed as (left, right); otherwise as (right, left). Either way the first
/// eye sits at the smaller canvas x for a subject facing the camera.
fn draw_pose(canvas: &mut RasterCanvas, pose: &Pose, mask_width: u32, state: &GuiState) {
    let pose = if state.flip_horizontal {
        flip_pose_horizontal(pose, mask_width)
    } else {
        pose.clone()
    };
    let overlay = &state.overlay;

    if overlay.show_face {
        let left = pose.keypoint(PartName::LeftEye);
        let right = pose.keypoint(PartName::RightEye);
        let (first, second) = if state.flip_horizontal { (left, right) } else { (right, left) };
        draw_face_eyes(first, second, canvas, 1.0);
    }
    if overlay.show_skeleton {
        draw_skeleton(&pose.keypoints, overlay.min_part_confidence, canvas, 1.0);
    }
    if overlay.show_keypoints {
        draw_keypoints(&pose.keypoints, overlay.min_part_confidence, canvas, 1.0);
    }
    if overlay.show_bounding_box {
        draw_bounding_box(&pose.keypoints, canvas);
    }
}

/// Running loop thread. Dropping the handle stops and joins it.
pub struct LoopHandle {
    shutdown: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
    canvas: Arc<CanvasSlot>,
    health: Arc<LoopHealth>,
    status: Arc<Mutex<LoopStatus>>,
}

impl LoopHandle {
    pub fn canvas(&self) -> &Arc<CanvasSlot> {
        &self.canvas
    }

    pub fn health(&self) -> &Arc<LoopHealth> {
        &self.health
    }

    pub fn status(&self) -> LoopStatus {
        self.status.lock().clone()
    }

    pub fn stop(&mut self) {
        // Disconnecting the channel wakes the loop
        self.shutdown = None;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick_interval(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / fps.max(1) as f64)
}

/// Start the loop on a dedicated thread.
///
/// `loader` runs on that thread with the model section of the current
/// configuration; the handle reports [`LoopStatus::Loading`] until it returns.
pub fn spawn<L>(loader: L, frames: Arc<FrameSlot>, config: Arc<ConfigSlot>) -> Result<LoopHandle>
where
    L: FnOnce(&ModelConfig) -> Result<Box<dyn SegmentationModel>> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
    let canvas = Arc::new(CanvasSlot::default());
    let health = Arc::new(LoopHealth::new());
    let status = Arc::new(Mutex::new(LoopStatus::Loading));

    let canvas_clone = canvas.clone();
    let health_clone = health.clone();
    let status_clone = status.clone();

    let thread_handle = std::thread::Builder::new()
        .name("segmentation".to_string())
        .spawn(move || {
            log::info!("Segmentation thread started");

            let state = config.snapshot();
            let model = match loader(&ModelConfig::from_state(&state)) {
                Ok(model) => model,
                Err(e) => {
                    log::error!("Segmentation model unavailable: {}", e);
                    *status_clone.lock() = LoopStatus::Failed(e.to_string());
                    return;
                }
            };
            *status_clone.lock() = LoopStatus::Running;

            let mut fps = state.target_fps;
            let mut ticker = crossbeam_channel::tick(tick_interval(fps));
            let mut segmentation =
                SegmentationLoop::new(model, frames, config.clone(), health_clone);

            loop {
                select! {
                    recv(shutdown_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        if let FrameOutcome::Rendered { .. } = segmentation.run_frame() {
                            canvas_clone.publish(segmentation.canvas().image().clone());
                        }
                    }
                }

                let target = config.snapshot().target_fps;
                if target != fps {
                    fps = target;
                    ticker = crossbeam_channel::tick(tick_interval(fps));
                }
            }

            log::info!("Segmentation thread stopped");
        })
        .map_err(|e| Error::InferenceFailure(format!("failed to spawn segmentation thread: {}", e)))?;

    Ok(LoopHandle {
        shutdown: Some(shutdown_tx),
        thread_handle: Some(thread_handle),
        canvas,
        health,
        status,
    })
}
