// =============================================================================
// V-RENDERER - Vulkan model viewer
// =============================================================================
//
// Loads a textured OBJ model and draws it with depth testing, mipmapped
// sampling and MSAA. Window resizes rebuild the swapchain and everything
// sized by it.
//
// FRAME FLOW:
// 1. Wait for this frame slot's fence
// 2. Acquire swapchain image (rebuild if out of date)
// 3. Wait for whichever slot last rendered into that image
// 4. Update the image's uniform buffer
// 5. Submit the pre-recorded command buffer
// 6. Present, rebuild on resize / suboptimal / out of date
//
// =============================================================================

mod app;
mod backend;
mod camera;
mod config;
mod model;
mod renderer;

use anyhow::Result;
use config::Config;
use std::fs::OpenOptions;
use std::io::Write;
use winit::event_loop::EventLoop;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let (config, load_error) = Config::load();

    init_logging(&config);
    log::info!("Starting V-Renderer");
    match load_error {
        Some(e) => log::warn!("Failed to load {}: {:#}. Using defaults.", config::CONFIG_PATH, e),
        None if std::path::Path::new(config::CONFIG_PATH).exists() => {
            log::info!("Loaded configuration from {}", config::CONFIG_PATH)
        }
        None => log::info!("{} not found, using defaults", config::CONFIG_PATH),
    }
    log::debug!("Config: {:?}", config);
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);
    log::info!("Frames in flight: {}", config.graphics.max_frames_in_flight);

    let event_loop = EventLoop::new()?;
    let mut app = app::App::new(config);
    event_loop.run_app(&mut app)?;

    log::info!("Goodbye");
    Ok(())
}

/// Initialize logging, optionally redirected into the configured log file.
/// `RUST_LOG` overrides the default `info` filter.
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== V-Renderer Log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!(
                "Cannot open log file {}: {}. Logging to stderr.",
                config.debug.log_file, e
            ),
        }
    }

    builder.init();
}
