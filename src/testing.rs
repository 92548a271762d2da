//! Test doubles for the canvas, media devices and segmentation model

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use parking_lot::Mutex;

use crate::camera::{MediaDeviceInfo, MediaDevices, MediaStream, VideoConstraints, VideoDimensions};
use crate::draw::{Canvas, Color};
use crate::error::{Error, Result};
use crate::ml::{SegmentationModel, SegmentationOptions, SegmentationResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcCall {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub start: f32,
    pub end: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CanvasCall {
    BeginPath,
    ClosePath,
    MoveTo(f32, f32),
    LineTo(f32, f32),
    Arc(ArcCall),
    Rect(f32, f32, f32, f32),
    FillStyle(Color),
    StrokeStyle(Color),
    LineWidth(f32),
    Fill,
    Stroke,
}

/// Canvas that records every call
#[derive(Debug, Default)]
pub struct RecordingCanvas {
    pub calls: Vec<CanvasCall>,
}

impl RecordingCanvas {
    pub fn fills(&self) -> usize {
        self.calls.iter().filter(|c| **c == CanvasCall::Fill).count()
    }

    pub fn strokes(&self) -> usize {
        self.calls.iter().filter(|c| **c == CanvasCall::Stroke).count()
    }

    pub fn arcs(&self) -> Vec<ArcCall> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                CanvasCall::Arc(arc) => Some(*arc),
                _ => None,
            })
            .collect()
    }
}

impl Canvas for RecordingCanvas {
    fn begin_path(&mut self) {
        self.calls.push(CanvasCall::BeginPath);
    }

    fn close_path(&mut self) {
        self.calls.push(CanvasCall::ClosePath);
    }

    fn move_to(&mut self, x: f32, y: f32) {
        self.calls.push(CanvasCall::MoveTo(x, y));
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.calls.push(CanvasCall::LineTo(x, y));
    }

    fn arc(&mut self, x: f32, y: f32, radius: f32, start: f32, end: f32) {
        self.calls.push(CanvasCall::Arc(ArcCall { x, y, radius, start, end }));
    }

    fn rect(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.calls.push(CanvasCall::Rect(x, y, width, height));
    }

    fn set_fill_style(&mut self, color: Color) {
        self.calls.push(CanvasCall::FillStyle(color));
    }

    fn set_stroke_style(&mut self, color: Color) {
        self.calls.push(CanvasCall::StrokeStyle(color));
    }

    fn set_line_width(&mut self, width: f32) {
        self.calls.push(CanvasCall::LineWidth(width));
    }

    fn fill(&mut self) {
        self.calls.push(CanvasCall::Fill);
    }

    fn stroke(&mut self) {
        self.calls.push(CanvasCall::Stroke);
    }
}

#[derive(Debug, Default)]
struct MediaLog {
    events: Vec<String>,
    requests: Vec<VideoConstraints>,
    live: usize,
    max_live: usize,
}

/// In-memory media devices. Streams report into a shared log so tests can
/// check request and stop ordering.
pub struct FakeDevices {
    pub devices: Vec<MediaDeviceInfo>,
    pub can_enumerate: bool,
    pub fail_enumeration: bool,
    /// Reject every request with this reason
    pub fail_request: Option<String>,
    /// Reported by new streams; `None` makes them time out
    pub metadata: Option<VideoDimensions>,
    log: Arc<Mutex<MediaLog>>,
    next_id: usize,
}

impl FakeDevices {
    pub fn with_devices(devices: Vec<MediaDeviceInfo>) -> Self {
        Self {
            devices,
            can_enumerate: true,
            fail_enumeration: false,
            fail_request: None,
            metadata: Some(VideoDimensions { width: 640, height: 480 }),
            log: Arc::new(Mutex::new(MediaLog::default())),
            next_id: 0,
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().events.clone()
    }

    pub fn requests(&self) -> Vec<VideoConstraints> {
        self.log.lock().requests.clone()
    }

    pub fn live_streams(&self) -> usize {
        self.log.lock().live
    }

    pub fn max_live_streams(&self) -> usize {
        self.log.lock().max_live
    }
}

impl MediaDevices for FakeDevices {
    type Stream = FakeStream;

    fn can_enumerate(&self) -> bool {
        self.can_enumerate
    }

    fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>> {
        if self.fail_enumeration {
            return Err(Error::CameraUnavailable("enumeration failed".to_string()));
        }
        Ok(self.devices.clone())
    }

    fn get_user_media(&mut self, constraints: &VideoConstraints) -> Result<FakeStream> {
        if let Some(reason) = &self.fail_request {
            return Err(Error::CameraUnavailable(reason.clone()));
        }

        let id = self.next_id;
        self.next_id += 1;
        let mut log = self.log.lock();
        log.events.push(format!("request {}", id));
        log.requests.push(constraints.clone());
        log.live += 1;
        log.max_live = log.max_live.max(log.live);

        Ok(FakeStream {
            id,
            live: true,
            metadata: self.metadata,
            log: self.log.clone(),
        })
    }
}

pub struct FakeStream {
    id: usize,
    live: bool,
    metadata: Option<VideoDimensions>,
    log: Arc<Mutex<MediaLog>>,
}

impl MediaStream for FakeStream {
    fn wait_for_metadata(&mut self, timeout: Duration) -> Result<VideoDimensions> {
        self.metadata.ok_or_else(|| {
            Error::CameraUnavailable(format!("camera did not start within {:?}", timeout))
        })
    }

    fn stop(&mut self) {
        if self.live {
            self.live = false;
            let mut log = self.log.lock();
            log.live -= 1;
            log.events.push(format!("stop {}", self.id));
        }
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

type Respond = Box<dyn FnMut(&RgbaImage) -> Result<SegmentationResult> + Send>;

/// Segmentation model answering from a closure
pub struct FakeModel {
    respond: Respond,
    calls: Arc<AtomicUsize>,
}

impl FakeModel {
    pub fn new(respond: impl FnMut(&RgbaImage) -> Result<SegmentationResult> + Send + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of `segment_person` calls
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl SegmentationModel for FakeModel {
    fn segment_person(
        &mut self,
        frame: &RgbaImage,
        _options: &SegmentationOptions,
    ) -> Result<SegmentationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(frame)
    }
}
