pub mod check;
pub mod run;

use pulsarbeat_config_hcl::HclParser;
use pulsarbeat_engine::EngineError;
use pulsarbeat_engine::config::{BeatConfig, TomlParser};

/// TOML unless the file ends in `.hcl`.
pub fn load_config(path: &str) -> Result<BeatConfig, EngineError> {
    tracing::info!(config = %path, "loading configuration");
    BeatConfig::load_with(path, &[&TomlParser, &HclParser])
}
