use pulsarbeat_engine::config::{BeatConfig, ConfigParser};
use pulsarbeat_engine::error::EngineError;

/// Reads the configuration from HCL:
///
/// ```hcl
/// consumer {
///   topic             = "orders"
///   subscription_type = "Shared"
///   num_workers       = 4
/// }
/// ```
pub struct HclParser;

impl ConfigParser for HclParser {
    fn extensions(&self) -> &[&str] {
        &["hcl"]
    }

    fn parse(&self, content: &str) -> Result<BeatConfig, EngineError> {
        hcl::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }
}
