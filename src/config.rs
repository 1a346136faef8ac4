//! Configuration Module
//!
//! TOML configuration for the graphics context, the headless platform and
//! the frame-loop driver.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::headless::{DEFAULT_LINEAR_BYTES, DEFAULT_VRAM_BYTES};
use crate::protocol::DEFAULT_COMMAND_BUFFER_WORDS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Command list capacity in 32-bit words
    #[serde(default = "default_command_buffer_words")]
    pub command_buffer_words: usize,

    /// Bound on every hardware event wait
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Render the top screen in stereo
    #[serde(default)]
    pub allow_3d: bool,

    /// Clear colour as [r, g, b, a]
    #[serde(default = "default_clear_color")]
    pub clear_color: [u8; 4],

    #[serde(default)]
    pub clear_depth: u32,

    /// Wait for vertical blank after each swap
    #[serde(default = "default_vblank_wait")]
    pub vblank_wait: bool,

    /// Frames to render before exiting (0 = until interrupted)
    #[serde(default)]
    pub frames: u64,

    /// Where to write a BMP of the last frame
    #[serde(default)]
    pub screenshot_path: Option<PathBuf>,

    /// Log level: "trace", "debug", "info", "warn" or "error"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Headless linear heap budget
    #[serde(default = "default_linear_heap_bytes")]
    pub linear_heap_bytes: usize,

    /// Headless VRAM budget
    #[serde(default = "default_vram_bytes")]
    pub vram_bytes: usize,
}

fn default_command_buffer_words() -> usize {
    DEFAULT_COMMAND_BUFFER_WORDS
}

fn default_wait_timeout_ms() -> u64 {
    40
}

fn default_clear_color() -> [u8; 4] {
    [0, 0, 0, 255]
}

fn default_vblank_wait() -> bool {
    true
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_linear_heap_bytes() -> usize {
    DEFAULT_LINEAR_BYTES
}

fn default_vram_bytes() -> usize {
    DEFAULT_VRAM_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command_buffer_words: default_command_buffer_words(),
            wait_timeout_ms: default_wait_timeout_ms(),
            allow_3d: false,
            clear_color: default_clear_color(),
            clear_depth: 0,
            vblank_wait: default_vblank_wait(),
            frames: 0,
            screenshot_path: None,
            log_level: default_log_level(),
            linear_heap_bytes: default_linear_heap_bytes(),
            vram_bytes: default_vram_bytes(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").expect("parse");
        assert_eq!(config.command_buffer_words, 0x80000);
        assert_eq!(config.wait_timeout_ms, 40);
        assert_eq!(config.clear_color, [0, 0, 0, 255]);
        assert!(config.vblank_wait);
        assert_eq!(config.screenshot_path, None);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_partial_override() {
        let config: Config = toml::from_str(
            r#"
            allow_3d = true
            frames = 3
            screenshot_path = "shot.bmp"
            clear_color = [16, 32, 48, 255]
            "#,
        )
        .expect("parse");
        assert!(config.allow_3d);
        assert_eq!(config.frames, 3);
        assert_eq!(config.screenshot_path, Some(PathBuf::from("shot.bmp")));
        assert_eq!(config.clear_color, [16, 32, 48, 255]);
        assert_eq!(config.vram_bytes, DEFAULT_VRAM_BYTES);
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir().join(format!("pica-hal-config-{}.toml", std::process::id()));
        let config = Config {
            frames: 10,
            log_level: "info".to_string(),
            ..Config::default()
        };
        config.save(&path).expect("save");
        let loaded = Config::load(&path).expect("load");
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.frames, 10);
        assert_eq!(loaded.log_level, "info");
        assert_eq!(loaded.command_buffer_words, config.command_buffer_words);
    }
}
