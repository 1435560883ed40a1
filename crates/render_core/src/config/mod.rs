//! Configuration system
//!
//! Every section deserializes with defaults for missing fields, so a config
//! file only needs the values it changes. Files are TOML or RON, chosen by
//! extension.

use ash::vk;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest number of frames the loop may keep in flight
pub const MAX_FRAMES_IN_FLIGHT: u32 = 8;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => {
                toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            ConfigFormat::Ron => {
                ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
            }
        }
    }

    /// Save configuration to file
    fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
            }
            ConfigFormat::Ron => ron::ser::to_string_pretty(self, Default::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
        };

        std::fs::write(path, contents)?;
        Ok(())
    }
}

enum ConfigFormat {
    Toml,
    Ron,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("ron") => Ok(Self::Ron),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Preferred presentation mode
///
/// FIFO is the only mode every driver must support, so it is also the
/// fallback when the preferred mode is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PresentModePreference {
    /// Vertical sync, never tears
    #[default]
    Fifo,
    /// Triple buffering, latest image wins
    Mailbox,
    /// No synchronization, may tear
    Immediate,
    /// Vertical sync that tears when a frame is late
    FifoRelaxed,
}

impl PresentModePreference {
    /// Native present mode
    pub fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
            PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
            PresentModePreference::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        }
    }
}

/// Swapchain creation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapchainConfig {
    /// Requested image count, clamped to the surface limits (`None`: minimum + 1)
    pub desired_image_count: Option<u32>,
    /// Preferred present mode
    pub present_mode: PresentModePreference,
    /// Colour the demo clears to
    pub clear_color: [f32; 4],
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            desired_image_count: None,
            present_mode: PresentModePreference::Fifo,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Renderer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Whether to enable Vulkan validation layers (`None`: debug builds only)
    pub enable_validation: Option<bool>,
    /// Number of frames recorded ahead of the GPU
    pub frames_in_flight: u32,
    /// Longest wait on a frame fence (`None`: wait indefinitely)
    pub fence_timeout_ms: Option<u64>,
    /// Swapchain settings
    pub swapchain: SwapchainConfig,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            enable_validation: None,
            frames_in_flight: 2,
            fence_timeout_ms: None,
            swapchain: SwapchainConfig::default(),
        }
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the number of frames in flight
    pub fn with_frames_in_flight(mut self, frames: u32) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Bound every frame fence wait
    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Set swapchain settings
    pub fn with_swapchain(mut self, swapchain: SwapchainConfig) -> Self {
        self.swapchain = swapchain;
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Frame fence timeout
    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid(
                "Application name cannot be empty".to_string(),
            ));
        }
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(ConfigError::Invalid(format!(
                "frames_in_flight must be between 1 and {MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }
        if self.swapchain.desired_image_count == Some(0) {
            return Err(ConfigError::Invalid(
                "desired_image_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Render Core Application")
    }
}

/// Core engine behaviour: logging and debug features
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default log level when `RUST_LOG` is unset
    pub log_level: String,
    /// Whether to enable debug features
    pub debug_mode: bool,
}

impl EngineConfig {
    /// Create a new engine configuration
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
            debug_mode: cfg!(debug_assertions),
        }
    }

    /// Set log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Enable debug mode
    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug_mode = enabled;
        self
    }

    /// Parsed log level
    pub fn level_filter(&self) -> Result<log::LevelFilter, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.log_level)))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// SPIR-V shader paths for the demo pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Look for the shaders in the usual build output directories
    ///
    /// Falls back to `shaders/<name>` when neither file is found.
    pub fn with_path_resolution(base_vertex: &str, base_fragment: &str) -> Self {
        const SHADER_DIRS: [&str; 4] = ["target/shaders/", "shaders/", "resources/shaders/", "./"];

        let find = |name: &str| {
            SHADER_DIRS
                .iter()
                .map(|dir| format!("{dir}{name}"))
                .find(|candidate| Path::new(candidate).exists())
                .unwrap_or_else(|| format!("shaders/{name}"))
        };

        Self {
            vertex_shader_path: find(base_vertex),
            fragment_shader_path: find(base_fragment),
        }
    }

    /// Whether both shader files exist
    pub fn is_available(&self) -> bool {
        Path::new(&self.vertex_shader_path).exists() && Path::new(&self.fragment_shader_path).exists()
    }

    /// Validate that shader files exist
    pub fn validate(&self) -> Result<(), ConfigError> {
        for path in [&self.vertex_shader_path, &self.fragment_shader_path] {
            if !Path::new(path).exists() {
                return Err(ConfigError::Invalid(format!("Shader not found: {path}")));
            }
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("triangle.vert.spv", "triangle.frag.spv")
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Engine core configuration
    pub engine: EngineConfig,
    /// Rendering configuration
    pub renderer: RendererConfig,
    /// Optional demo shaders
    pub shaders: ShaderConfig,
}

impl ApplicationConfig {
    /// Create a new application configuration with defaults
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            engine: EngineConfig::default(),
            renderer: RendererConfig::new(app_name),
            shaders: ShaderConfig::default(),
        }
    }

    /// Validate everything except shader presence, which is optional
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.level_filter()?;
        self.renderer.validate()
    }
}

impl Config for ApplicationConfig {}
