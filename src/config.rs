// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::Path;
use winit::keyboard::KeyCode;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub camera: CameraConfig,
    pub assets: AssetsConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "V-Renderer".to_string(),
            width: 800,
            height: 600,
            fullscreen: false,
        }
    }
}

/// Either `"max"` or an explicit sample count
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MsaaSetting {
    Samples(u32),
    Named(String),
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    pub msaa: MsaaSetting,
    pub max_anisotropy: f32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.25, 0.50, 0.75, 1.0],
            max_frames_in_flight: 2,
            msaa: MsaaSetting::Named("max".to_string()),
            max_anisotropy: 16.0,
        }
    }
}

/// Initial camera placement and input step sizes
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub eye: [f32; 3],
    pub center: [f32; 3],
    pub up: [f32; 3],
    pub rotation_axis: [f32; 3],
    pub rotation_angle: f32,
    pub fov_step: f32,
    pub rotation_step: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov: 45.0,
            near: 0.1,
            far: 10.0,
            eye: [2.0, 2.0, 2.0],
            center: [0.0, 0.0, 0.0],
            up: [0.0, 0.0, 1.0],
            rotation_axis: [0.0, 0.0, 1.0],
            rotation_angle: 0.0,
            fov_step: 1.0,
            rotation_step: 1.0,
        }
    }
}

/// Files loaded at startup
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Empty selects the built-in quad
    pub model_path: String,
    pub texture_path: String,
    pub vertex_shader: String,
    pub fragment_shader: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            model_path: "models/chalet.obj".to_string(),
            texture_path: "textures/chalet.jpg".to_string(),
            vertex_shader: "shaders/vert.spv".to_string(),
            fragment_shader: "shaders/frag.spv".to_string(),
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "v_renderer.log".to_string(),
            show_fps: true,
        }
    }
}

/// Control key bindings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub quit_key: String,
    pub fullscreen_key: String,
    pub fov_increase_key: String,
    pub fov_decrease_key: String,
    pub rotate_positive_key: String,
    pub rotate_negative_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            quit_key: "Escape".to_string(),
            fullscreen_key: "F11".to_string(),
            fov_increase_key: "NumpadAdd".to_string(),
            fov_decrease_key: "NumpadSubtract".to_string(),
            rotate_positive_key: "KeyQ".to_string(),
            rotate_negative_key: "KeyE".to_string(),
        }
    }
}

pub const CONFIG_PATH: &str = "config.toml";

impl Config {
    /// Load `config.toml`, falling back to defaults if it is missing or broken.
    ///
    /// Runs before the logger exists, so a load error is handed back to be
    /// reported once logging is up.
    pub fn load() -> (Self, Option<anyhow::Error>) {
        Self::load_or_default(CONFIG_PATH)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.graphics.max_frames_in_flight == 0 {
            anyhow::bail!("graphics.max_frames_in_flight must be at least 1");
        }
        Ok(config)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Highest MSAA sample count the user allows
    pub fn msaa_cap(&self) -> vk::SampleCountFlags {
        match &self.graphics.msaa {
            MsaaSetting::Named(name) if name.eq_ignore_ascii_case("max") => {
                vk::SampleCountFlags::TYPE_64
            }
            MsaaSetting::Named(name) if name.eq_ignore_ascii_case("off") => {
                vk::SampleCountFlags::TYPE_1
            }
            MsaaSetting::Samples(count) => match count {
                0 | 1 => vk::SampleCountFlags::TYPE_1,
                2 => vk::SampleCountFlags::TYPE_2,
                4 => vk::SampleCountFlags::TYPE_4,
                8 => vk::SampleCountFlags::TYPE_8,
                16 => vk::SampleCountFlags::TYPE_16,
                32 => vk::SampleCountFlags::TYPE_32,
                64 => vk::SampleCountFlags::TYPE_64,
                other => {
                    log::warn!("Unsupported MSAA sample count {}, using max", other);
                    vk::SampleCountFlags::TYPE_64
                }
            },
            MsaaSetting::Named(other) => {
                log::warn!("Unknown MSAA setting '{}', using max", other);
                vk::SampleCountFlags::TYPE_64
            }
        }
    }
}

/// Map a key name (winit `KeyCode` variant name) to a key code
pub fn key_code(name: &str) -> Option<KeyCode> {
    let key = match name {
        "Escape" => KeyCode::Escape,
        "Space" => KeyCode::Space,
        "Enter" => KeyCode::Enter,
        "Tab" => KeyCode::Tab,
        "Backspace" => KeyCode::Backspace,
        "Minus" => KeyCode::Minus,
        "Equal" => KeyCode::Equal,
        "ArrowUp" => KeyCode::ArrowUp,
        "ArrowDown" => KeyCode::ArrowDown,
        "ArrowLeft" => KeyCode::ArrowLeft,
        "ArrowRight" => KeyCode::ArrowRight,
        "PageUp" => KeyCode::PageUp,
        "PageDown" => KeyCode::PageDown,
        "NumpadAdd" => KeyCode::NumpadAdd,
        "NumpadSubtract" => KeyCode::NumpadSubtract,
        "NumpadMultiply" => KeyCode::NumpadMultiply,
        "NumpadDivide" => KeyCode::NumpadDivide,
        "F1" => KeyCode::F1,
        "F2" => KeyCode::F2,
        "F3" => KeyCode::F3,
        "F4" => KeyCode::F4,
        "F5" => KeyCode::F5,
        "F6" => KeyCode::F6,
        "F7" => KeyCode::F7,
        "F8" => KeyCode::F8,
        "F9" => KeyCode::F9,
        "F10" => KeyCode::F10,
        "F11" => KeyCode::F11,
        "F12" => KeyCode::F12,
        _ => return letter_or_digit(name),
    };
    Some(key)
}

fn letter_or_digit(name: &str) -> Option<KeyCode> {
    const LETTERS: [KeyCode; 26] = [
        KeyCode::KeyA, KeyCode::KeyB, KeyCode::KeyC, KeyCode::KeyD, KeyCode::KeyE,
        KeyCode::KeyF, KeyCode::KeyG, KeyCode::KeyH, KeyCode::KeyI, KeyCode::KeyJ,
        KeyCode::KeyK, KeyCode::KeyL, KeyCode::KeyM, KeyCode::KeyN, KeyCode::KeyO,
        KeyCode::KeyP, KeyCode::KeyQ, KeyCode::KeyR, KeyCode::KeyS, KeyCode::KeyT,
        KeyCode::KeyU, KeyCode::KeyV, KeyCode::KeyW, KeyCode::KeyX, KeyCode::KeyY,
        KeyCode::KeyZ,
    ];
    const DIGITS: [KeyCode; 10] = [
        KeyCode::Digit0, KeyCode::Digit1, KeyCode::Digit2, KeyCode::Digit3, KeyCode::Digit4,
        KeyCode::Digit5, KeyCode::Digit6, KeyCode::Digit7, KeyCode::Digit8, KeyCode::Digit9,
    ];

    let single = |rest: &str| {
        let mut chars = rest.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        }
    };

    if let Some(c) = name.strip_prefix("Key").and_then(single) {
        if c.is_ascii_uppercase() {
            return Some(LETTERS[(c as u8 - b'A') as usize]);
        }
    }
    if let Some(c) = name.strip_prefix("Digit").and_then(single) {
        if c.is_ascii_digit() {
            return Some(DIGITS[(c as u8 - b'0') as usize]);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.title, "V-Renderer");
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.camera.fov, 45.0);
        assert_eq!(config.assets.model_path, "models/chalet.obj");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            width = 1024

            [camera]
            eye = [4.0, 0.0, 1.0]
            "#,
        )
        .unwrap();
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.camera.eye, [4.0, 0.0, 1.0]);
        assert_eq!(config.camera.far, 10.0);
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let err = Config::from_toml_str("[graphics]\nmax_frames_in_flight = 0\n");
        assert!(err.is_err());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::from_toml_str("[window\nwidth = ").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(config.graphics.present_mode, "mailbox");
    }

    #[test]
    fn malformed_file_gives_defaults_and_error() {
        let path = std::env::temp_dir().join(format!("v-renderer-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[window\nwidth = \n").unwrap();

        let (config, error) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.width, 800);
        let message = format!("{:#}", error.expect("parse error should be returned"));
        assert!(message.contains("Failed to parse config file"), "{}", message);
    }

    #[test]
    fn missing_file_reports_no_error() {
        let (config, error) = Config::load_or_default("definitely/not/here.toml");
        assert!(error.is_none());
        assert_eq!(config.window.title, "V-Renderer");
    }

    #[test]
    fn present_mode_names() {
        let mut config = Config::default();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);

        config.graphics.present_mode = "FIFO_Relaxed".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO_RELAXED);

        config.graphics.present_mode = "vsync-please".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn msaa_accepts_name_or_count() {
        let config = Config::from_toml_str("[graphics]\nmsaa = 4\n").unwrap();
        assert_eq!(config.graphics.msaa, MsaaSetting::Samples(4));
        assert_eq!(config.msaa_cap(), vk::SampleCountFlags::TYPE_4);

        let config = Config::from_toml_str("[graphics]\nmsaa = \"off\"\n").unwrap();
        assert_eq!(config.msaa_cap(), vk::SampleCountFlags::TYPE_1);

        assert_eq!(Config::default().msaa_cap(), vk::SampleCountFlags::TYPE_64);
    }

    #[test]
    fn key_names_map_to_codes() {
        assert_eq!(key_code("Escape"), Some(KeyCode::Escape));
        assert_eq!(key_code("NumpadAdd"), Some(KeyCode::NumpadAdd));
        assert_eq!(key_code("KeyQ"), Some(KeyCode::KeyQ));
        assert_eq!(key_code("KeyZ"), Some(KeyCode::KeyZ));
        assert_eq!(key_code("Digit7"), Some(KeyCode::Digit7));
        assert_eq!(key_code("F11"), Some(KeyCode::F11));
        assert_eq!(key_code("Keyq"), None);
        assert_eq!(key_code("KeyQQ"), None);
        assert_eq!(key_code("Hyper"), None);
    }
}
