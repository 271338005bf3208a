use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use pulsarbeat_api::{InitialPosition, SubscribeOptions, SubscriptionType};

use crate::error::EngineError;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BeatConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Broker client settings. Passed through to the broker factory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub url: String,
    pub connection_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub authentication_tls: TlsAuthConfig,
    pub authentication_athenz: BTreeMap<String, String>,
    pub tls_trust_certs_file_path: String,
    pub tls_allow_insecure_connection: bool,
    pub tls_validate_hostname: bool,
    pub max_connections_per_broker: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "pulsar://localhost:6650".into(),
            connection_timeout_ms: 20_000,
            operation_timeout_ms: 0,
            authentication_tls: TlsAuthConfig::default(),
            authentication_athenz: BTreeMap::new(),
            tls_trust_certs_file_path: String::new(),
            tls_allow_insecure_connection: false,
            tls_validate_hostname: false,
            max_connections_per_broker: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlsAuthConfig {
    pub certificate_path: String,
    pub private_key_path: String,
}

/// Consumer settings. One consumer per worker is created from these.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub topic: String,
    pub topics: Vec<String>,
    pub topics_pattern: String,
    pub auto_discovery_period_ms: u64,
    pub subscription_name: String,
    pub properties: BTreeMap<String, String>,
    pub subscription_type: SubscriptionType,
    pub subscription_initial_position: InitialPosition,
    pub receiver_queue_size: usize,
    pub nack_redelivery_delay_ms: u64,
    pub name: String,
    pub read_compacted: bool,
    pub replicate_subscription_state: bool,
    pub num_workers: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            topics: Vec::new(),
            topics_pattern: String::new(),
            auto_discovery_period_ms: 0,
            subscription_name: "my-sub".into(),
            properties: BTreeMap::new(),
            subscription_type: SubscriptionType::Exclusive,
            subscription_initial_position: InitialPosition::Latest,
            receiver_queue_size: 0,
            nack_redelivery_delay_ms: 60_000,
            name: String::new(),
            read_compacted: false,
            replicate_subscription_state: false,
            num_workers: 1,
        }
    }
}

/// Where events go.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub kind: OutputKind,
    /// Target file for `kind = "file"`.
    pub path: String,
    pub pretty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    #[default]
    Console,
    File,
}

/// Which authentication provider the client settings select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProvider {
    None,
    Tls,
    Athenz,
}

const DEFAULT_TOPIC: &str = "my-topic";

const ATHENZ_KEYS: [&str; 6] = [
    "providerDomain",
    "tenantDomain",
    "tenantService",
    "privateKey",
    "keyId",
    "ztsUrl",
];

impl ClientConfig {
    /// Resolve the auth provider, rejecting partial or mixed settings.
    pub fn auth_provider(&self) -> Result<AuthProvider, EngineError> {
        let tls = &self.authentication_tls;
        if self.authentication_athenz.is_empty()
            && tls.certificate_path.is_empty()
            && tls.private_key_path.is_empty()
        {
            return Ok(AuthProvider::None);
        }

        if !self.authentication_athenz.is_empty() {
            for key in ATHENZ_KEYS {
                if !self.authentication_athenz.contains_key(key) {
                    return Err(EngineError::Config(format!("Athenz {key} is not configured")));
                }
            }
            if !tls.certificate_path.is_empty() || !tls.private_key_path.is_empty() {
                return Err(EngineError::Config(
                    "multiple authentication settings are configured".into(),
                ));
            }
            return Ok(AuthProvider::Athenz);
        }

        if tls.certificate_path.is_empty() {
            return Err(EngineError::Config("TLS certificate_path is not configured".into()));
        }
        if tls.private_key_path.is_empty() {
            return Err(EngineError::Config("TLS private_key_path is not configured".into()));
        }
        Ok(AuthProvider::Tls)
    }
}

impl ConsumerConfig {
    /// Topics to subscribe to. A non-empty `topic` wins over `topics`, which
    /// wins over `topics_pattern`. With none of them set, `my-topic`.
    pub fn topic_list(&self) -> Vec<String> {
        if !self.topic.is_empty() {
            return vec![self.topic.clone()];
        }
        let mut list: Vec<String> = Vec::new();
        for t in &self.topics {
            if !t.is_empty() && !list.contains(t) {
                list.push(t.clone());
            }
        }
        if list.is_empty() && self.topics_pattern.is_empty() {
            list.push(DEFAULT_TOPIC.to_string());
        }
        list
    }

    /// Pattern subscription, only when no explicit topic is configured.
    pub fn pattern(&self) -> Option<String> {
        self.topic_list().is_empty().then(|| self.topics_pattern.clone())
    }

    /// Options for the `index`-th consumer (1-based), named `"{name}-{index}"`.
    pub fn subscribe_options(&self, index: usize) -> SubscribeOptions {
        SubscribeOptions {
            topics: self.topic_list(),
            topics_pattern: self.pattern(),
            auto_discovery_period: Duration::from_millis(self.auto_discovery_period_ms),
            subscription_name: self.subscription_name.clone(),
            consumer_name: format!("{}-{index}", self.name),
            properties: self.properties.clone(),
            subscription_type: self.subscription_type,
            initial_position: self.subscription_initial_position,
            receiver_queue_size: self.receiver_queue_size,
            nack_redelivery_delay: Duration::from_millis(self.nack_redelivery_delay_ms),
            read_compacted: self.read_compacted,
            replicate_subscription_state: self.replicate_subscription_state,
        }
    }
}

/// A configuration file format.
pub trait ConfigParser: Send + Sync {
    /// File extensions handled by this parser, without the dot.
    fn extensions(&self) -> &[&str];

    fn parse(&self, content: &str) -> Result<BeatConfig, EngineError>;
}

/// Built-in TOML parser.
pub struct TomlParser;

impl ConfigParser for TomlParser {
    fn extensions(&self) -> &[&str] {
        &["toml"]
    }

    fn parse(&self, content: &str) -> Result<BeatConfig, EngineError> {
        BeatConfig::parse(content)
    }
}

impl BeatConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        Self::load_with(path, &[&TomlParser])
    }

    /// Load and validate, picking the parser by file extension.
    /// Files with an unknown or missing extension go to the first parser.
    pub fn load_with(path: &str, parsers: &[&dyn ConfigParser]) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;

        let ext = Path::new(path).extension().and_then(|e| e.to_str()).unwrap_or_default();
        let parser = parsers
            .iter()
            .find(|p| p.extensions().contains(&ext))
            .or_else(|| parsers.first())
            .ok_or_else(|| EngineError::Config("no config parser registered".into()))?;

        let config = parser.parse(&content).map_err(|e| e.with_context(path))?;
        config.validate().map_err(|e| e.with_context(path))?;
        Ok(config)
    }

    /// Parse configuration from a TOML string. Does not validate.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.client.url.is_empty() {
            return Err(EngineError::Config("client.url is required".into()));
        }
        self.client
            .auth_provider()
            .map_err(|e| e.with_context("invalid authentication settings"))?;

        if self.consumer.subscription_name.is_empty() {
            return Err(EngineError::Config("consumer.subscription_name is required".into()));
        }
        if self.consumer.num_workers < 1 {
            return Err(EngineError::Config("consumer.num_workers must be at least 1".into()));
        }
        if self.consumer.topic_list().is_empty() && self.consumer.topics_pattern.is_empty() {
            return Err(EngineError::Config(
                "one of consumer.topic, consumer.topics or consumer.topics_pattern is required".into(),
            ));
        }

        if self.output.kind == OutputKind::File && self.output.path.is_empty() {
            return Err(EngineError::Config("output.path is required for file output".into()));
        }
        Ok(())
    }
}
