// Window + input glue around the renderer

use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

use crate::camera::{Camera, CameraAction};
use crate::config::{key_code, Config, ControlsConfig};
use crate::renderer::Renderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Quit,
    ToggleFullscreen,
    Camera(CameraAction),
}

/// Key bindings resolved from config names
#[derive(Debug, Clone)]
pub struct Controls {
    bindings: Vec<(KeyCode, InputAction)>,
}

impl Controls {
    pub fn from_config(config: &ControlsConfig) -> Self {
        let wanted = [
            (&config.quit_key, InputAction::Quit),
            (&config.fullscreen_key, InputAction::ToggleFullscreen),
            (&config.fov_increase_key, InputAction::Camera(CameraAction::FovIncrease)),
            (&config.fov_decrease_key, InputAction::Camera(CameraAction::FovDecrease)),
            (&config.rotate_positive_key, InputAction::Camera(CameraAction::RotatePositive)),
            (&config.rotate_negative_key, InputAction::Camera(CameraAction::RotateNegative)),
        ];

        let bindings = wanted
            .into_iter()
            .filter_map(|(name, action)| match key_code(name) {
                Some(key) => Some((key, action)),
                None => {
                    log::warn!("Unknown key '{}' for {:?}, binding disabled", name, action);
                    None
                }
            })
            .collect();

        Self { bindings }
    }

    pub fn action(&self, key: KeyCode) -> Option<InputAction> {
        self.bindings
            .iter()
            .find(|(bound, _)| *bound == key)
            .map(|&(_, action)| action)
    }
}

/// Frame counter that reports once per second
struct FpsCounter {
    frame_count: u32,
    last_update: Instant,
    last_frame: Instant,
}

impl FpsCounter {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            frame_count: 0,
            last_update: now,
            last_frame: now,
        }
    }

    /// Returns (fps, last frame time in ms) when a second has passed
    fn tick(&mut self) -> Option<(f32, f32)> {
        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_update).as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }

        let fps = self.frame_count as f32 / elapsed;
        self.frame_count = 0;
        self.last_update = now;
        Some((fps, frame_time * 1000.0))
    }
}

pub struct App {
    config: Config,
    controls: Controls,
    camera: Camera,
    fps: FpsCounter,
    is_fullscreen: bool,

    // Renderer before window: the surface must go first
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self {
            controls: Controls::from_config(&config.controls),
            camera: Camera::new(&config.camera),
            fps: FpsCounter::new(),
            is_fullscreen: config.window.fullscreen,
            renderer: None,
            window: None,
            config,
        }
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        match self.controls.action(key) {
            Some(InputAction::Quit) => {
                log::info!("{:?} pressed, exiting...", key);
                event_loop.exit();
            }
            Some(InputAction::ToggleFullscreen) => self.toggle_fullscreen(),
            Some(InputAction::Camera(action)) => self.camera.apply(action),
            None => {}
        }
    }

    fn toggle_fullscreen(&mut self) {
        let Some(window) = self.window.as_ref() else {
            return;
        };

        self.is_fullscreen = !self.is_fullscreen;
        if self.is_fullscreen {
            window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            log::info!("Entered fullscreen mode");
        } else {
            window.set_fullscreen(None);
            log::info!("Exited fullscreen mode");
        }

        // The Resized event usually follows, but not on every platform
        let size = window.inner_size();
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.notify_resized(size.width, size.height);
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        if let Some((fps, frame_ms)) = self.fps.tick() {
            if let Some(window) = self.window.as_ref() {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title, fps, frame_ms, mode
                ));
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match Renderer::new(&window, &self.config) {
            Ok(renderer) => {
                log::info!("Rendering on {}", renderer.device_name());
                self.renderer = Some(renderer);
            }
            Err(e) => {
                log::error!("Failed to initialize renderer: {:?}", e);
                event_loop.exit();
            }
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.notify_resized(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                match renderer.render_frame(&self.camera) {
                    Ok(true) => self.update_fps(),
                    Ok(false) => {}
                    Err(e) => {
                        log::error!("Render error: {:?}", e);
                        event_loop.exit();
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        self.handle_key(event_loop, key);
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Vulkan objects go before the window they render into
        self.renderer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bindings() {
        let controls = Controls::from_config(&ControlsConfig::default());
        assert_eq!(controls.action(KeyCode::Escape), Some(InputAction::Quit));
        assert_eq!(controls.action(KeyCode::F11), Some(InputAction::ToggleFullscreen));
        assert_eq!(
            controls.action(KeyCode::NumpadAdd),
            Some(InputAction::Camera(CameraAction::FovIncrease))
        );
        assert_eq!(
            controls.action(KeyCode::NumpadSubtract),
            Some(InputAction::Camera(CameraAction::FovDecrease))
        );
        assert_eq!(
            controls.action(KeyCode::KeyQ),
            Some(InputAction::Camera(CameraAction::RotatePositive))
        );
        assert_eq!(
            controls.action(KeyCode::KeyE),
            Some(InputAction::Camera(CameraAction::RotateNegative))
        );
        assert_eq!(controls.action(KeyCode::KeyW), None);
    }

    #[test]
    fn unknown_key_names_are_dropped() {
        let config = ControlsConfig {
            quit_key: "NotAKey".to_string(),
            ..ControlsConfig::default()
        };
        let controls = Controls::from_config(&config);
        assert_eq!(controls.action(KeyCode::Escape), None);
        assert_eq!(controls.action(KeyCode::F11), Some(InputAction::ToggleFullscreen));
    }

    #[test]
    fn rebinding_moves_action() {
        let config = ControlsConfig {
            rotate_positive_key: "KeyR".to_string(),
            ..ControlsConfig::default()
        };
        let controls = Controls::from_config(&config);
        assert_eq!(
            controls.action(KeyCode::KeyR),
            Some(InputAction::Camera(CameraAction::RotatePositive))
        );
        assert_eq!(controls.action(KeyCode::KeyQ), None);
    }
}
