//! Camera source
//!
//! Finds video inputs, resolves a camera label to a device and facing mode and
//! manages the single active stream. Platform access goes through the
//! [`MediaDevices`] and [`MediaStream`] traits; [`nokhwa_backend`] implements
//! them for native cameras.

pub mod nokhwa_backend;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;
use parking_lot::Mutex;

use crate::error::{Error, Result};

pub use nokhwa_backend::{NokhwaDevices, NokhwaStream};

/// How long `open` waits for a new stream to report its dimensions
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaDeviceKind {
    VideoInput,
    AudioInput,
    AudioOutput,
}

/// A capture device as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDeviceInfo {
    pub device_id: String,
    pub label: String,
    pub kind: MediaDeviceKind,
}

impl MediaDeviceInfo {
    pub fn video(device_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            label: label.into(),
            kind: MediaDeviceKind::VideoInput,
        }
    }
}

/// Which way a camera points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacingMode {
    /// Towards the user (front camera)
    #[default]
    User,
    /// Away from the user (back camera)
    Environment,
}

/// Stream request. Unset fields leave the choice to the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoConstraints {
    pub device_id: Option<String>,
    pub facing_mode: Option<FacingMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoDimensions {
    pub width: u32,
    pub height: u32,
}

/// One captured frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: RgbaImage,
    /// Monotonic per slot, starting at 0
    pub frame_number: u64,
    pub timestamp: Instant,
}

impl VideoFrame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Latest-frame exchange between a capture thread and its readers.
///
/// Triple buffered: the writer rotates through three slots so a reader
/// holding the lock on the newest slot never blocks the next write.
pub struct FrameSlot {
    frames: [Mutex<Option<Arc<VideoFrame>>>; 3],
    /// Index of the latest complete frame
    latest_idx: AtomicU64,
    frame_count: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            frames: [Mutex::new(None), Mutex::new(None), Mutex::new(None)],
            latest_idx: AtomicU64::new(0),
            frame_count: AtomicU64::new(0),
        }
    }

    /// Store a new frame, returning its frame number
    pub fn publish(&self, image: RgbaImage) -> u64 {
        let frame_number = self.frame_count.fetch_add(1, Ordering::AcqRel);
        let frame = VideoFrame {
            image,
            frame_number,
            timestamp: Instant::now(),
        };
        let slot = (frame_number % 3) as usize;
        *self.frames[slot].lock() = Some(Arc::new(frame));
        self.latest_idx.store(frame_number, Ordering::Release);
        frame_number
    }

    /// The most recently published frame
    pub fn latest(&self) -> Option<Arc<VideoFrame>> {
        let idx = self.latest_idx.load(Ordering::Acquire);
        self.frames[(idx % 3) as usize].lock().clone()
    }

    /// Number of frames published so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    /// Drop buffered frames, e.g. when the stream changes
    pub fn clear(&self) {
        for frame in &self.frames {
            *frame.lock() = None;
        }
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Platform media capture
pub trait MediaDevices {
    type Stream: MediaStream;

    /// Whether the platform can list devices at all
    fn can_enumerate(&self) -> bool;

    fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>>;

    /// Request a video stream. Fails with [`Error::CameraUnavailable`] when
    /// capture is unsupported, denied or no device matches.
    fn get_user_media(&mut self, constraints: &VideoConstraints) -> Result<Self::Stream>;
}

/// A live video stream
pub trait MediaStream {
    /// Block until the stream reports its frame size
    fn wait_for_metadata(&mut self, timeout: Duration) -> Result<VideoDimensions>;

    /// Stop every track of the stream. Idempotent.
    fn stop(&mut self);

    fn is_live(&self) -> bool;
}

/// Platform traits that change camera handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Platform {
    /// Phones and tablets: cameras are chosen by facing mode, not by device
    pub mobile: bool,
}

impl Platform {
    pub fn current() -> Self {
        Self {
            mobile: cfg!(any(target_os = "android", target_os = "ios")),
        }
    }
}

/// Lifecycle of the camera source
#[derive(Debug)]
pub enum CameraState<S> {
    Uninitialized,
    Requesting,
    Active {
        stream: S,
        dimensions: VideoDimensions,
        label: Option<String>,
    },
    Failed {
        reason: String,
    },
}

/// Facing mode implied by a camera label: any label mentioning "back" faces
/// the environment
pub fn resolve_facing_mode(label: Option<&str>) -> FacingMode {
    match label {
        Some(label) if label.to_lowercase().contains("back") => FacingMode::Environment,
        _ => FacingMode::User,
    }
}

/// Owns the active camera stream
pub struct CameraSource<D: MediaDevices> {
    devices: D,
    platform: Platform,
    state: CameraState<D::Stream>,
    metadata_timeout: Duration,
}

impl<D: MediaDevices> CameraSource<D> {
    pub fn new(devices: D, platform: Platform) -> Self {
        Self {
            devices,
            platform,
            state: CameraState::Uninitialized,
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
        }
    }

    pub fn with_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = timeout;
        self
    }

    pub fn state(&self) -> &CameraState<D::Stream> {
        &self.state
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn devices(&self) -> &D {
        &self.devices
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, CameraState::Active { .. })
    }

    pub fn dimensions(&self) -> Option<VideoDimensions> {
        match &self.state {
            CameraState::Active { dimensions, .. } => Some(*dimensions),
            _ => None,
        }
    }

    /// Label the active stream was opened with
    pub fn active_label(&self) -> Option<&str> {
        match &self.state {
            CameraState::Active { label, .. } => label.as_deref(),
            _ => None,
        }
    }

    /// Video inputs known to the platform. Empty when enumeration is
    /// unsupported or fails.
    pub fn enumerate_video_inputs(&self) -> Vec<MediaDeviceInfo> {
        if !self.devices.can_enumerate() {
            log::debug!("Device enumeration not supported");
            return Vec::new();
        }

        match self.devices.enumerate_devices() {
            Ok(devices) => devices
                .into_iter()
                .filter(|d| d.kind == MediaDeviceKind::VideoInput)
                .collect(),
            Err(e) => {
                log::warn!("Failed to enumerate cameras: {}", e);
                Vec::new()
            }
        }
    }

    /// Device id of the video input whose label matches exactly
    pub fn resolve_device_id(&self, label: &str) -> Option<String> {
        let found = self
            .enumerate_video_inputs()
            .into_iter()
            .find(|d| d.label == label)
            .map(|d| d.device_id);
        if found.is_none() {
            log::debug!("{}, using the default camera", Error::DeviceNotFound(label.to_string()));
        }
        found
    }

    /// Stream request for a camera label
    pub fn constraints(&self, label: Option<&str>) -> VideoConstraints {
        VideoConstraints {
            device_id: label.and_then(|l| self.resolve_device_id(l)),
            facing_mode: self.platform.mobile.then(|| resolve_facing_mode(label)),
        }
    }

    /// Open the camera with the given label, replacing any active stream.
    ///
    /// The previous stream is fully stopped before the new one is requested.
    pub fn open(&mut self, label: Option<&str>) -> Result<VideoDimensions> {
        self.stop();
        self.state = CameraState::Requesting;

        let constraints = self.constraints(label);
        log::info!("Requesting camera {:?} ({:?})", label.unwrap_or("default"), constraints);

        let timeout = self.metadata_timeout;
        let opened = self.devices.get_user_media(&constraints).and_then(|mut stream| {
            match stream.wait_for_metadata(timeout) {
                Ok(dimensions) => Ok((stream, dimensions)),
                Err(e) => {
                    stream.stop();
                    Err(e)
                }
            }
        });

        match opened {
            Ok((stream, dimensions)) => {
                log::info!(
                    "Camera active: {}x{}",
                    dimensions.width,
                    dimensions.height
                );
                self.state = CameraState::Active {
                    stream,
                    dimensions,
                    label: label.map(str::to_string),
                };
                Ok(dimensions)
            }
            Err(e) => {
                let reason = match e {
                    Error::CameraUnavailable(reason) => reason,
                    other => other.to_string(),
                };
                log::error!("Camera unavailable: {}", reason);
                self.state = CameraState::Failed {
                    reason: reason.clone(),
                };
                Err(Error::CameraUnavailable(reason))
            }
        }
    }

    /// Stop the active stream, if any
    pub fn stop(&mut self) {
        if let CameraState::Active { mut stream, label, .. } =
            std::mem::replace(&mut self.state, CameraState::Uninitialized)
        {
            stream.stop();
            log::info!("Camera {:?} stopped", label.as_deref().unwrap_or("default"));
        }
    }
}

impl<D: MediaDevices> Drop for CameraSource<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDevices;

    fn devices() -> FakeDevices {
        FakeDevices::with_devices(vec![
            MediaDeviceInfo::video("front-id", "Front Camera"),
            MediaDeviceInfo::video("back-id", "Back Camera"),
            MediaDeviceInfo {
                device_id: "mic".to_string(),
                label: "Microphone".to_string(),
                kind: MediaDeviceKind::AudioInput,
            },
        ])
    }

    #[test]
    fn test_enumerate_filters_video_inputs() {
        let source = CameraSource::new(devices(), Platform::default());
        let inputs = source.enumerate_video_inputs();
        assert_eq!(inputs.len(), 2);
        assert!(inputs.iter().all(|d| d.kind == MediaDeviceKind::VideoInput));
    }

    #[test]
    fn test_enumerate_empty_when_unsupported_or_failing() {
        let mut fake = devices();
        fake.can_enumerate = false;
        let source = CameraSource::new(fake, Platform::default());
        assert!(source.enumerate_video_inputs().is_empty());

        let mut fake = devices();
        fake.fail_enumeration = true;
        let source = CameraSource::new(fake, Platform::default());
        assert!(source.enumerate_video_inputs().is_empty());
        assert_eq!(source.resolve_device_id("Back Camera"), None);
    }

    #[test]
    fn test_resolve_device_id_exact_match() {
        let source = CameraSource::new(devices(), Platform::default());
        assert_eq!(source.resolve_device_id("Back Camera"), Some("back-id".to_string()));
        assert_eq!(source.resolve_device_id("back camera"), None);
        assert_eq!(source.resolve_device_id("Side Camera"), None);

        let empty = CameraSource::new(FakeDevices::with_devices(vec![]), Platform::default());
        assert_eq!(empty.resolve_device_id("Back Camera"), None);
    }

    #[test]
    fn test_resolve_facing_mode() {
        assert_eq!(resolve_facing_mode(Some("Back Camera")), FacingMode::Environment);
        assert_eq!(resolve_facing_mode(Some("BACK")), FacingMode::Environment);
        assert_eq!(resolve_facing_mode(Some("Front Camera")), FacingMode::User);
        assert_eq!(resolve_facing_mode(None), FacingMode::User);
    }

    #[test]
    fn test_facing_mode_only_on_mobile() {
        let desktop = CameraSource::new(devices(), Platform { mobile: false });
        let c = desktop.constraints(Some("Back Camera"));
        assert_eq!(c.device_id.as_deref(), Some("back-id"));
        assert_eq!(c.facing_mode, None);

        let mobile = CameraSource::new(devices(), Platform { mobile: true });
        let c = mobile.constraints(Some("back"));
        assert_eq!(c.device_id, None);
        assert_eq!(c.facing_mode, Some(FacingMode::Environment));
        assert_eq!(mobile.constraints(None).facing_mode, Some(FacingMode::User));
    }

    #[test]
    fn test_open_activates_with_dimensions() {
        let mut source = CameraSource::new(devices(), Platform::default());
        let dims = source.open(Some("Front Camera")).unwrap();
        assert_eq!(dims, VideoDimensions { width: 640, height: 480 });
        assert!(source.is_active());
        assert_eq!(source.active_label(), Some("Front Camera"));
        assert_eq!(source.devices().requests()[0].device_id.as_deref(), Some("front-id"));
    }

    #[test]
    fn test_reopen_stops_previous_stream_first() {
        let mut source = CameraSource::new(devices(), Platform::default());
        source.open(Some("Front Camera")).unwrap();
        source.open(Some("Back Camera")).unwrap();
        source.open(None).unwrap();

        let fake = source.devices();
        assert_eq!(
            fake.events(),
            vec!["request 0", "stop 0", "request 1", "stop 1", "request 2"]
        );
        assert_eq!(fake.max_live_streams(), 1);
        assert_eq!(fake.live_streams(), 1);
    }

    #[test]
    fn test_request_failure_enters_failed() {
        let mut fake = devices();
        fake.fail_request = Some("permission denied".to_string());
        let mut source = CameraSource::new(fake, Platform::default());

        let err = source.open(None).unwrap_err();
        assert!(matches!(err, Error::CameraUnavailable(ref r) if r == "permission denied"));
        assert!(matches!(source.state(), CameraState::Failed { .. }));
    }

    #[test]
    fn test_metadata_timeout_stops_stream() {
        let mut fake = devices();
        fake.metadata = None;
        let mut source = CameraSource::new(fake, Platform::default())
            .with_metadata_timeout(Duration::from_millis(1));

        assert!(matches!(source.open(None), Err(Error::CameraUnavailable(_))));
        assert!(matches!(source.state(), CameraState::Failed { .. }));
        assert_eq!(source.devices().live_streams(), 0);
    }

    #[test]
    fn test_stop_returns_to_uninitialized() {
        let mut source = CameraSource::new(devices(), Platform::default());
        source.open(None).unwrap();
        source.stop();
        assert!(matches!(source.state(), CameraState::Uninitialized));
        assert_eq!(source.devices().live_streams(), 0);
        // Stopping again is harmless
        source.stop();
    }

    #[test]
    fn test_frame_slot_keeps_latest() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());

        for i in 0..5u8 {
            slot.publish(RgbaImage::from_pixel(2, 2, image::Rgba([i, 0, 0, 255])));
        }
        let latest = slot.latest().unwrap();
        assert_eq!(latest.frame_number, 4);
        assert_eq!(latest.image.get_pixel(0, 0).0[0], 4);
        assert_eq!(slot.frame_count(), 5);

        slot.clear();
        assert!(slot.latest().is_none());
    }
}
