//! Window, GPU presentation and control panel
//!
//! Holds the wgpu context that shows the latest segmentation canvas, the egui
//! side panel that edits configuration snapshots, the page controller that
//! owns the camera, and the segmentation loop thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use image::RgbaImage;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::camera::{CameraSource, FrameSlot, NokhwaDevices, Platform};
use crate::config::{Architecture, ConfigSlot, DisplayEffect, GuiState, InternalResolution};
use crate::ml;
use crate::page::PageController;
use crate::presenter::CanvasPresenter;
use crate::render_loop::{self, LoopHandle, LoopStatus};

/// Main application state
pub struct App {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,

    presenter: CanvasPresenter,
    latest_canvas: Option<Arc<RgbaImage>>,
    last_canvas_version: u64,

    // egui integration
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,

    // Demo state
    settings: Arc<ConfigSlot>,
    settings_path: PathBuf,
    frames: Arc<FrameSlot>,
    page: PageController<NokhwaDevices>,
    segmentation: Option<LoopHandle>,
    status_message: Option<String>,

    // Frame timing
    fps: f64,
    last_fps_update: Instant,
    frames_since_update: u64,
}

impl App {
    /// Create the GPU context, open the configured camera and start the
    /// segmentation loop
    pub async fn new(
        window: Arc<Window>,
        settings: Arc<ConfigSlot>,
        settings_path: PathBuf,
    ) -> anyhow::Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .context("Failed to create surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("Failed to find suitable GPU adapter")?;

        log::info!("Using GPU: {}", adapter.get_info().name);
        log::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Gingerbread Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .context("Failed to create device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .context("Surface reports no formats")?;

        log::info!("Surface format: {:?}", surface_format);

        let present_mode = if surface_caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
            wgpu::PresentMode::Mailbox
        } else {
            wgpu::PresentMode::Fifo
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &config);

        let presenter = CanvasPresenter::new(&device, surface_format);

        let egui_ctx = egui::Context::default();
        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );
        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        // Camera first, then the loop reading its frames
        let frames = Arc::new(FrameSlot::new());
        let camera = CameraSource::new(NokhwaDevices::new(frames.clone()), Platform::current());
        let mut page = PageController::new(camera, settings.clone());
        if let Err(e) = page.bind() {
            log::error!("Camera setup failed: {}", e);
        }

        let segmentation = match render_loop::spawn(ml::load, frames.clone(), settings.clone()) {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("{}", e);
                None
            }
        };

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            presenter,
            latest_canvas: None,
            last_canvas_version: 0,
            egui_ctx,
            egui_state,
            egui_renderer,
            settings,
            settings_path,
            frames,
            page,
            segmentation,
            status_message: None,
            fps: 0.0,
            last_fps_update: Instant::now(),
            frames_since_update: 0,
        })
    }

    /// Handle a window event, returning true if egui consumed it
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(&self.window, event);
        response.consumed
    }

    /// Resize the surface
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    /// Switch to the next camera
    pub fn switch_camera(&mut self) {
        match self.page.switch_camera() {
            Ok(dims) => {
                self.status_message = Some(format!("Camera switched ({}x{})", dims.width, dims.height));
            }
            Err(e) => {
                log::error!("Camera switch failed: {}", e);
            }
        }
    }

    /// Save the latest canvas as a PNG
    pub fn download(&mut self) {
        let Some(canvas) = self.latest_canvas.clone() else {
            self.status_message = Some("Nothing to save yet".to_string());
            return;
        };
        let dir = self.settings.snapshot().download_dir();
        self.status_message = Some(match self.page.download(&canvas, &dir) {
            Ok(path) => format!("Saved {}", path.display()),
            Err(e) => {
                log::error!("Snapshot failed: {}", e);
                format!("Snapshot failed: {}", e)
            }
        });
    }

    /// Toggle horizontal mirroring
    pub fn toggle_flip(&mut self) {
        self.settings.update(|state| state.flip_horizontal = !state.flip_horizontal);
    }

    /// Restart the segmentation loop so model settings take effect
    pub fn reload_model(&mut self) {
        if let Some(mut handle) = self.segmentation.take() {
            handle.stop();
        }
        log::info!("Reloading segmentation model");
        self.segmentation =
            match render_loop::spawn(ml::load, self.frames.clone(), self.settings.clone()) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log::error!("{}", e);
                    None
                }
            };
    }

    pub fn save_settings(&mut self) {
        self.status_message = Some(match self.settings.snapshot().save(&self.settings_path) {
            Ok(()) => format!("Settings saved to {}", self.settings_path.display()),
            Err(e) => format!("Failed to save settings: {}", e),
        });
    }

    /// Release the camera and stop the loop
    pub fn shutdown(&mut self) {
        if let Some(mut handle) = self.segmentation.take() {
            handle.stop();
        }
        self.page.shutdown();
    }

    /// Pull the newest canvas from the loop and upload it
    pub fn update(&mut self) {
        let Some(handle) = &self.segmentation else { return };

        if handle.status() == LoopStatus::Running {
            let timeout = Duration::from_millis(self.settings.snapshot().watchdog_timeout_ms);
            handle.health().check_watchdog(timeout);
        }

        let version = handle.canvas().version();
        if version == self.last_canvas_version {
            return;
        }
        self.last_canvas_version = version;
        let Some(canvas) = handle.canvas().latest() else { return };
        self.presenter.upload(&self.device, &self.queue, &canvas);
        self.latest_canvas = Some(canvas);
    }

    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });

        self.presenter.encode(
            &self.queue,
            &mut encoder,
            &view,
            (self.config.width, self.config.height),
        );

        self.render_ui(&mut encoder, &view);

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        self.update_fps();
        Ok(())
    }

    fn render_ui(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        let raw_input = self.egui_state.take_egui_input(&self.window);

        let original = self.settings.snapshot();
        let mut state: GuiState = (*original).clone();
        let regions = self.page.regions().clone();
        let loop_status = self.segmentation.as_ref().map(|h| h.status());
        let (processed, failures) = self
            .segmentation
            .as_ref()
            .map(|h| (h.health().frames(), h.health().failures()))
            .unwrap_or((0, 0));
        let camera_frames = self.frames.frame_count();
        let fps = self.fps;
        let has_canvas = self.latest_canvas.is_some();
        let status_message = self.status_message.clone();

        let mut switch_camera = false;
        let mut download = false;
        let mut reload_model = false;
        let mut save_settings = false;

        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            egui::SidePanel::left("controls").show(ctx, |ui| {
                ui.heading("Gingerbread Man");
                ui.label(format!("FPS: {:.1}", fps));
                ui.label(format!("Camera frames: {}  Segmented: {}", camera_frames, processed));
                if failures > 0 {
                    ui.label(format!("Skipped frames: {}", failures));
                }
                ui.separator();

                if regions.loading {
                    ui.horizontal(|ui| {
                        ui.spinner();
                        ui.label("Starting camera...");
                    });
                }
                if let Some(info) = &regions.info {
                    ui.colored_label(egui::Color32::LIGHT_RED, info);
                }
                match &loop_status {
                    Some(LoopStatus::Loading) => {
                        ui.horizontal(|ui| {
                            ui.spinner();
                            ui.label("Loading model...");
                        });
                    }
                    Some(LoopStatus::Failed(reason)) => {
                        ui.colored_label(egui::Color32::LIGHT_RED, format!("Model unavailable: {}", reason));
                    }
                    Some(LoopStatus::Running) | None => {}
                }

                ui.horizontal(|ui| {
                    if regions.switch_button && ui.button("Switch camera").clicked() {
                        switch_camera = true;
                    }
                    if regions.download_button
                        && ui.add_enabled(has_canvas, egui::Button::new("Download")).clicked()
                    {
                        download = true;
                    }
                });
                ui.checkbox(&mut state.flip_horizontal, "Flip horizontal");
                ui.separator();

                egui::CollapsingHeader::new("Segmentation")
                    .default_open(true)
                    .show(ui, |ui| {
                        ui.horizontal(|ui| {
                            ui.radio_value(&mut state.segmentation.effect, DisplayEffect::Mask, "Mask");
                            ui.radio_value(&mut state.segmentation.effect, DisplayEffect::None, "None");
                        });
                        ui.add(
                            egui::Slider::new(&mut state.segmentation.opacity, 0.0..=1.0)
                                .text("Opacity"),
                        );
                        ui.add(
                            egui::Slider::new(&mut state.segmentation.mask_blur_amount, 0..=20)
                                .text("Mask blur"),
                        );
                        ui.add(
                            egui::Slider::new(
                                &mut state.segmentation.segmentation_threshold,
                                0.0..=1.0,
                            )
                            .text("Threshold"),
                        );
                        ui.checkbox(&mut state.segmentation.draw_contour, "Contour");
                    });

                egui::CollapsingHeader::new("Overlay")
                    .default_open(true)
                    .show(ui, |ui| {
                        ui.checkbox(&mut state.overlay.show_face, "Gingerbread face");
                        ui.checkbox(&mut state.overlay.show_skeleton, "Skeleton");
                        ui.checkbox(&mut state.overlay.show_keypoints, "Keypoints");
                        ui.checkbox(&mut state.overlay.show_bounding_box, "Bounding box");
                        ui.add(
                            egui::Slider::new(&mut state.overlay.min_part_confidence, 0.0..=1.0)
                                .text("Min part confidence"),
                        );
                    });

                egui::CollapsingHeader::new("Input")
                    .default_open(false)
                    .show(ui, |ui| {
                        egui::ComboBox::from_label("Internal resolution")
                            .selected_text(state.input.internal_resolution.display_name())
                            .show_ui(ui, |ui| {
                                for resolution in InternalResolution::ALL {
                                    ui.selectable_value(
                                        &mut state.input.internal_resolution,
                                        resolution,
                                        resolution.display_name(),
                                    );
                                }
                            });
                        ui.add(
                            egui::Slider::new(&mut state.multi_person_decoding.max_detections, 0..=20)
                                .text("Max detections"),
                        );
                        ui.add(
                            egui::Slider::new(
                                &mut state.multi_person_decoding.score_threshold,
                                0.0..=1.0,
                            )
                            .text("Score threshold"),
                        );

                        ui.separator();
                        egui::ComboBox::from_label("Architecture")
                            .selected_text(state.input.architecture.display_name())
                            .show_ui(ui, |ui| {
                                for arch in [Architecture::MobileNetV1, Architecture::ResNet50] {
                                    ui.selectable_value(
                                        &mut state.input.architecture,
                                        arch,
                                        arch.display_name(),
                                    );
                                }
                            });
                        egui::ComboBox::from_label("Output stride")
                            .selected_text(state.input.output_stride.to_string())
                            .show_ui(ui, |ui| {
                                for stride in [8, 16, 32] {
                                    ui.selectable_value(
                                        &mut state.input.output_stride,
                                        stride,
                                        stride.to_string(),
                                    );
                                }
                            });
                        if state.input.architecture == Architecture::MobileNetV1 {
                            egui::ComboBox::from_label("Multiplier")
                                .selected_text(format!("{:.2}", state.input.multiplier))
                                .show_ui(ui, |ui| {
                                    for multiplier in [0.5, 0.75, 1.0] {
                                        ui.selectable_value(
                                            &mut state.input.multiplier,
                                            multiplier,
                                            format!("{:.2}", multiplier),
                                        );
                                    }
                                });
                        }
                        if ui.button("Reload model").clicked() {
                            reload_model = true;
                        }
                    });

                ui.separator();
                if ui.button("Save settings").clicked() {
                    save_settings = true;
                }
                if let Some(message) = &status_message {
                    ui.label(message);
                }
            });
        });

        if state != *original {
            self.settings.publish(state);
        }
        if switch_camera {
            self.switch_camera();
        }
        if download {
            self.download();
        }
        if reload_model {
            self.reload_model();
        }
        if save_settings {
            self.save_settings();
        }

        self.egui_state.handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = self.egui_ctx.tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer.update_texture(&self.device, &self.queue, *id, image_delta);
        }

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: self.window.scale_factor() as f32,
        };

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            encoder,
            &paint_jobs,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("egui Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                })
                .forget_lifetime();

            self.egui_renderer.render(&mut render_pass, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }

    fn update_fps(&mut self) {
        self.frames_since_update += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f64();
        if elapsed >= 1.0 {
            self.fps = self.frames_since_update as f64 / elapsed;
            self.frames_since_update = 0;
            self.last_fps_update = now;
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
