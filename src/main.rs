//! Gingerbread Cam - Main Entry Point
//!
//! Opens a window showing the webcam with every detected person turned into a
//! gingerbread man.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gingerbread_cam::config::{default_config_path, ConfigSlot, GuiState};
use gingerbread_cam::App;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

const WINDOW_TITLE: &str = "Gingerbread Man";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const TARGET_FPS: u32 = 60;

/// Application state machine
enum AppState {
    /// Initial state before window is created
    Uninitialized,
    /// Window and graphics context are ready
    Running { window: Arc<Window>, app: App },
}

/// Main application handler implementing winit's ApplicationHandler trait
struct GingerbreadApp {
    state: AppState,
    settings: Arc<ConfigSlot>,
    settings_path: PathBuf,
    next_redraw_at: Instant,
}

impl GingerbreadApp {
    fn new(settings: GuiState, settings_path: PathBuf) -> Self {
        Self {
            state: AppState::Uninitialized,
            settings: Arc::new(ConfigSlot::new(settings)),
            settings_path,
            next_redraw_at: Instant::now(),
        }
    }

    fn start(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<(Arc<Window>, App)> {
        let window_attributes = WindowAttributes::default()
            .with_title(WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(DEFAULT_WIDTH, DEFAULT_HEIGHT));
        let window = Arc::new(event_loop.create_window(window_attributes)?);

        log::info!(
            "Window created: {}x{}",
            window.inner_size().width,
            window.inner_size().height
        );

        let app = pollster::block_on(App::new(
            window.clone(),
            self.settings.clone(),
            self.settings_path.clone(),
        ))?;
        Ok((window, app))
    }
}

impl ApplicationHandler for GingerbreadApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let AppState::Uninitialized = &self.state {
            log::info!("Creating window...");
            match self.start(event_loop) {
                Ok((window, app)) => {
                    log::info!("Ready. ESC exits, F11 toggles fullscreen, S switches camera, D saves a snapshot, F flips");
                    self.state = AppState::Running { window, app };
                }
                Err(e) => {
                    log::error!("Startup failed: {:#}", e);
                    event_loop.exit();
                }
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let AppState::Running { window, app } = &mut self.state else {
            return;
        };

        // Let egui handle the event first
        let egui_consumed = app.handle_window_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, exiting...");
                app.shutdown();
                event_loop.exit();
            }

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } if !egui_consumed => match key_code {
                KeyCode::Escape => {
                    log::info!("Escape pressed, exiting...");
                    app.shutdown();
                    event_loop.exit();
                }
                KeyCode::F11 => {
                    if window.fullscreen().is_some() {
                        window.set_fullscreen(None);
                    } else {
                        window.set_fullscreen(Some(winit::window::Fullscreen::Borderless(None)));
                    }
                }
                KeyCode::KeyS => app.switch_camera(),
                KeyCode::KeyD => app.download(),
                KeyCode::KeyF => app.toggle_flip(),
                _ => {}
            },

            WindowEvent::Resized(physical_size) => {
                app.resize(physical_size);
            }

            WindowEvent::RedrawRequested => {
                app.update();

                match app.render() {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost) => {
                        log::warn!("Surface lost, reconfiguring...");
                        app.resize(app.size());
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        log::error!("Out of GPU memory!");
                        event_loop.exit();
                    }
                    Err(e) => {
                        log::warn!("Surface error: {:?}", e);
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let AppState::Running { window, .. } = &mut self.state else {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        };

        // Drive redraws at target FPS
        let frame_duration = Duration::from_nanos(1_000_000_000u64 / TARGET_FPS as u64);
        let now = Instant::now();

        if now >= self.next_redraw_at {
            window.request_redraw();
            self.next_redraw_at += frame_duration;

            // Reset if too far behind
            if now > self.next_redraw_at + frame_duration * 2 {
                self.next_redraw_at = now + frame_duration;
            }
        }

        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_redraw_at));
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Gingerbread Cam v{}", env!("CARGO_PKG_VERSION"));

    let settings_path = default_config_path();
    let settings = GuiState::load_or_default(&settings_path);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = GingerbreadApp::new(settings, settings_path);
    event_loop.run_app(&mut app)?;
    Ok(())
}
