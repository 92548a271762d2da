//! Native cameras through nokhwa
//!
//! Each stream owns a capture thread that decodes frames to RGBA and
//! publishes them into a shared [`FrameSlot`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use image::RgbaImage;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;

use super::{
    FacingMode, FrameSlot, MediaDeviceInfo, MediaDevices, MediaStream, VideoConstraints,
    VideoDimensions,
};
use crate::error::{Error, Result};

/// Camera enumeration and stream creation for the native platform
pub struct NokhwaDevices {
    frames: Arc<FrameSlot>,
}

impl NokhwaDevices {
    /// Streams opened from here publish into `frames`
    pub fn new(frames: Arc<FrameSlot>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &Arc<FrameSlot> {
        &self.frames
    }

    fn query() -> Result<Vec<nokhwa::utils::CameraInfo>> {
        nokhwa::query(ApiBackend::Auto)
            .map_err(|e| Error::CameraUnavailable(format!("failed to enumerate cameras: {}", e)))
    }

    /// Pick the camera index for a request. Desktop cameras carry no facing
    /// information, so an environment-facing request picks the first camera
    /// whose name mentions "back".
    fn select_index(constraints: &VideoConstraints) -> Result<CameraIndex> {
        if let Some(id) = &constraints.device_id {
            return Ok(match id.parse::<u32>() {
                Ok(n) => CameraIndex::Index(n),
                Err(_) => CameraIndex::String(id.clone()),
            });
        }

        if constraints.facing_mode == Some(FacingMode::Environment) {
            let back = Self::query()?
                .into_iter()
                .find(|info| info.human_name().to_lowercase().contains("back"));
            if let Some(info) = back {
                return Ok(info.index().clone());
            }
            log::debug!("No back-facing camera found, using the default camera");
        }

        Ok(CameraIndex::Index(0))
    }
}

impl MediaDevices for NokhwaDevices {
    type Stream = NokhwaStream;

    fn can_enumerate(&self) -> bool {
        true
    }

    fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>> {
        Ok(Self::query()?
            .iter()
            .map(|info| MediaDeviceInfo::video(info.index().to_string(), info.human_name()))
            .collect())
    }

    fn get_user_media(&mut self, constraints: &VideoConstraints) -> Result<NokhwaStream> {
        let index = Self::select_index(constraints)?;
        self.frames.clear();
        NokhwaStream::start(index, self.frames.clone())
    }
}

/// A running capture thread
pub struct NokhwaStream {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    metadata: Receiver<std::result::Result<VideoDimensions, String>>,
    dimensions: Option<VideoDimensions>,
}

impl NokhwaStream {
    fn start(index: CameraIndex, frames: Arc<FrameSlot>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (metadata_tx, metadata_rx) = crossbeam_channel::bounded(1);

        let running_clone = running.clone();
        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || capture_thread(index, frames, running_clone, metadata_tx))
            .map_err(|e| Error::CameraUnavailable(format!("failed to spawn capture thread: {}", e)))?;

        Ok(Self {
            running,
            thread_handle: Some(thread_handle),
            metadata: metadata_rx,
            dimensions: None,
        })
    }
}

impl MediaStream for NokhwaStream {
    fn wait_for_metadata(&mut self, timeout: Duration) -> Result<VideoDimensions> {
        if let Some(dimensions) = self.dimensions {
            return Ok(dimensions);
        }
        match self.metadata.recv_timeout(timeout) {
            Ok(Ok(dimensions)) => {
                self.dimensions = Some(dimensions);
                Ok(dimensions)
            }
            Ok(Err(reason)) => Err(Error::CameraUnavailable(reason)),
            Err(_) => Err(Error::CameraUnavailable(format!(
                "camera did not start within {:?}",
                timeout
            ))),
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn is_live(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.thread_handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for NokhwaStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the camera, trying progressively less demanding formats
fn open_camera(index: &CameraIndex) -> std::result::Result<Camera, String> {
    let attempts = [
        RequestedFormatType::AbsoluteHighestResolution,
        RequestedFormatType::HighestResolution(Resolution::new(640, 480)),
        RequestedFormatType::None,
    ];

    let mut last_error = String::from("no format attempted");
    for format in attempts {
        let description = format!("{:?}", format);
        match Camera::new(index.clone(), RequestedFormat::new::<RgbAFormat>(format)) {
            Ok(camera) => return Ok(camera),
            Err(e) => {
                log::warn!("Failed to open camera {} with {}: {:?}", index, description, e);
                last_error = e.to_string();
            }
        }
    }
    Err(last_error)
}

fn capture_thread(
    index: CameraIndex,
    frames: Arc<FrameSlot>,
    running: Arc<AtomicBool>,
    metadata: Sender<std::result::Result<VideoDimensions, String>>,
) {
    log::info!("Starting camera capture thread (camera {})", index);

    let mut camera = match open_camera(&index) {
        Ok(camera) => camera,
        Err(reason) => {
            log::error!("Failed to open camera with all format attempts: {}", reason);
            let _ = metadata.send(Err(reason));
            running.store(false, Ordering::Release);
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        log::error!("Failed to open camera stream: {:?}", e);
        let _ = metadata.send(Err(e.to_string()));
        running.store(false, Ordering::Release);
        return;
    }

    let resolution = camera.resolution();
    log::info!(
        "Camera opened: {} ({}x{})",
        camera.info().human_name(),
        resolution.width(),
        resolution.height()
    );
    let _ = metadata.send(Ok(VideoDimensions {
        width: resolution.width(),
        height: resolution.height(),
    }));

    while running.load(Ordering::Acquire) {
        let buffer = match camera.frame() {
            Ok(buffer) => buffer,
            Err(e) => {
                log::warn!("Failed to capture frame: {:?}", e);
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
        };

        let (width, height) = (buffer.resolution().width(), buffer.resolution().height());
        let decoded = match buffer.decode_image::<RgbAFormat>() {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("Failed to decode frame: {:?}", e);
                continue;
            }
        };

        match RgbaImage::from_raw(width, height, decoded.into_raw()) {
            Some(image) => {
                frames.publish(image);
            }
            None => log::warn!("Decoded frame does not match {}x{}", width, height),
        }
    }

    if let Err(e) = camera.stop_stream() {
        log::debug!("Failed to stop camera stream: {:?}", e);
    }
    log::info!("Camera capture thread stopped");
}
