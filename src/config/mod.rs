// Configuration management module
// TOML-backed settings plus the interactive `config` command

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, DoorScheduleConfig, ExtractionConfig, LlmConfig, MaterialPrice,
    OcrEngineKind, OllamaConfig, UploadConfig, VectorConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
