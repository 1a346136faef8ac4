//! PICA HAL Frame Driver
//!
//! Runs the graphics core against the headless platform:
//! 1. Loads configuration (first argument, or defaults)
//! 2. Initializes the graphics context and a demo scene
//! 3. Renders, flushes and swaps frames until the frame limit or Ctrl+C
//! 4. Optionally writes a BMP screenshot of the final frame

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pica_hal::config::Config;
use pica_hal::gpu::resources::{ShaderHandle, TextureHandle, VboHandle};
use pica_hal::gpu::state::TexEnv;
use pica_hal::gpu::types::{vbo_attribute, AttributeType, PixelFormat, Primitive, Screen, TexUnit};
use pica_hal::gpu::GraphicsContext;
use pica_hal::headless::HeadlessPlatform;
use pica_hal::platform::Placement;
use pica_hal::screenshot;
use pica_hal::transform::Transforms;

/// Pacing for the headless loop, which never blocks on a real vblank.
const FRAME_TIME: Duration = Duration::from_millis(16);

const CHECKER_SIZE: u32 = 8;

/// Objects drawn every frame.
struct Scene {
    texture: TextureHandle,
    quad: VboHandle,
    shader: ShaderHandle,
    transforms: Transforms,
}

impl Scene {
    fn new(ctx: &mut GraphicsContext<HeadlessPlatform>) -> Self {
        let texture = ctx.create_texture();
        ctx.set_texture_data(
            texture,
            &checkerboard(CHECKER_SIZE),
            CHECKER_SIZE,
            CHECKER_SIZE,
            PixelFormat::Rgba8,
            0,
            Placement::Vram,
        );
        ctx.bind_texture(TexUnit::Unit0, texture);
        ctx.set_tex_env(0, TexEnv::first_stage());

        // position (3f), texcoord (2f), colour (4f)
        let quad = ctx.create_vbo();
        ctx.set_vbo_attributes(
            quad,
            vbo_attribute(0, 3, AttributeType::Float)
                | vbo_attribute(1, 2, AttributeType::Float)
                | vbo_attribute(2, 4, AttributeType::Float),
            3,
        );
        let vertices = quad_vertices(-50.0, -50.0, 100.0, 100.0);
        ctx.set_vbo_data(quad, &vertices, 6, Primitive::Triangles);

        // No program is bundled; uniforms are still tracked on the handle.
        let shader = ctx.create_shader();
        ctx.use_shader(shader);

        let mut transforms = Transforms::new(ctx, shader);
        let (width, height) = (ctx.viewport_width() as f32, ctx.viewport_height() as f32);
        transforms.set_ortho(ctx, 0.0, width, 0.0, height, -1.0, 1.0);

        Self {
            texture,
            quad,
            shader,
            transforms,
        }
    }

    fn draw(&mut self, ctx: &mut GraphicsContext<HeadlessPlatform>, frame: u64) {
        let (width, height) = (ctx.viewport_width() as f32, ctx.viewport_height() as f32);

        self.transforms.push_modelview();
        self.transforms.translate(ctx, width / 2.0, height / 2.0, 0.0);
        self.transforms.rotate_z(ctx, frame as f32 * 0.05);
        ctx.draw_vbo(self.quad);
        self.transforms.pop_modelview(ctx);
    }

    fn free(self, ctx: &mut GraphicsContext<HeadlessPlatform>) {
        ctx.free_shader(self.shader);
        ctx.free_vbo(self.quad);
        ctx.free_texture(self.texture);
    }
}

fn checkerboard(size: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let value = if (x + y) % 2 == 0 { 0xFF } else { 0x40 };
            pixels.extend_from_slice(&[0xFF, value, value, value]);
        }
    }
    pixels
}

fn quad_vertices(x: f32, y: f32, width: f32, height: f32) -> Vec<u8> {
    let corners = [
        [x, y, 0.0, 0.0],
        [x + width, y, 1.0, 0.0],
        [x + width, y + height, 1.0, 1.0],
        [x + width, y + height, 1.0, 1.0],
        [x, y + height, 0.0, 1.0],
        [x, y, 0.0, 0.0],
    ];

    let mut bytes = Vec::with_capacity(corners.len() * 9 * 4);
    for [px, py, u, v] in corners {
        for value in [px, py, -0.1, u, v, 1.0, 1.0, 1.0, 1.0] {
            bytes.extend_from_slice(&f32::to_le_bytes(value));
        }
    }
    bytes
}

fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::DEBUG,
    }
}

fn run(config: &Config, shutdown: &AtomicBool) -> Result<()> {
    let platform = HeadlessPlatform::new(config.linear_heap_bytes, config.vram_bytes);
    let mut ctx = GraphicsContext::init(platform, config)?;
    ctx.set_viewport(Screen::Top, 0, 0, 400, 240);

    let mut scene = Scene::new(&mut ctx);

    info!("Rendering...");
    let mut frame = 0u64;
    loop {
        let last = shutdown.load(Ordering::Relaxed) || (config.frames != 0 && frame + 1 >= config.frames);

        ctx.clear();
        scene.draw(&mut ctx, frame);
        ctx.flush_commands();
        ctx.flush_buffer();

        if ctx.errors().has_error() {
            warn!("Frame {}: {}", frame, ctx.errors_mut().get_error());
        }

        if last {
            if let Some(path) = &config.screenshot_path {
                if let Some(bmp) = screenshot::capture(&ctx, true, false) {
                    std::fs::write(path, bmp)
                        .with_context(|| format!("writing screenshot to {}", path.display()))?;
                    info!("Screenshot written to {}", path.display());
                }
            }
        }

        ctx.swap_buffers(config.vblank_wait);
        frame += 1;

        if last {
            break;
        }
        thread::sleep(FRAME_TIME);
    }

    info!("Rendered {} frames", frame);
    scene.free(&mut ctx);
    ctx.exit();
    Ok(())
}

fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).with_context(|| format!("loading config from {}", path))?,
        None => Config::default(),
    };

    FmtSubscriber::builder()
        .with_max_level(parse_level(&config.log_level))
        .with_target(true)
        .init();

    info!("PICA HAL frame driver starting...");
    info!("Configuration loaded: {:?}", config);

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        handler_flag.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl+C handler")?;

    let result = run(&config, &shutdown);
    info!("Frame driver shutting down");
    result
}
