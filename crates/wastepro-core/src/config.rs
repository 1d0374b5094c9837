//! TOML configuration.
//!
//! Loaded from the path in `WASTEPRO_CONFIG_PATH`, defaulting to
//! `./wastepro.toml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "WASTEPRO_CONFIG_PATH";

const DEFAULT_CONFIG_FILE: &str = "wastepro.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub version: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self { version: 3 }
    }
}

/// Broker selection plus per-broker endpoint tables.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub broker_name: String,
    #[serde(flatten)]
    pub endpoints: HashMap<String, BrokerEndpoint>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_name: "local".into(),
            endpoints: HashMap::new(),
        }
    }
}

impl BrokerConfig {
    /// The endpoint table selected by `broker_name`. The in-process broker
    /// needs none.
    pub fn selected(&self) -> Option<&BrokerEndpoint> {
        self.endpoints.get(&self.broker_name)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BrokerEndpoint {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub keepalive_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum LogLevel {
    #[serde(rename = "VERBOSE")]
    Verbose,
    #[serde(rename = "DEBUG")]
    #[default]
    Debug,
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "ERROR")]
    Error,
}

impl LogLevel {
    /// The `tracing` filter directive this level maps onto.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Verbose => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_name")]
    pub name: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub level: LogLevel,
}

fn default_log_name() -> String {
    "wastepro".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            name: default_log_name(),
            path: None,
            level: LogLevel::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub file: FileServiceConfig,
    #[serde(default)]
    pub kg: KgServiceConfig,
    #[serde(default)]
    pub llm: LlmServiceConfig,
    #[serde(default)]
    pub scq: ScqServiceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileServiceConfig {
    pub home_directory: PathBuf,
}

impl Default for FileServiceConfig {
    fn default() -> Self {
        Self {
            home_directory: PathBuf::from("_storage"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KgServiceConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_kg_datapath")]
    pub datapath: PathBuf,
}

fn default_hostname() -> String {
    "localhost".into()
}

fn default_kg_datapath() -> PathBuf {
    PathBuf::from("_kg")
}

impl Default for KgServiceConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            datapath: default_kg_datapath(),
        }
    }
}

/// Provider selection plus per-provider tables.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmServiceConfig {
    /// One of `ChatGpt`, `Claude`, `LLama`, `OssGpt`.
    pub name: String,
    #[serde(default)]
    pub chatgpt: Option<ProviderConfig>,
    #[serde(default)]
    pub claude: Option<ProviderConfig>,
    #[serde(default)]
    pub llama: Option<ProviderConfig>,
    #[serde(default)]
    pub ossgpt: Option<ProviderConfig>,
}

impl Default for LlmServiceConfig {
    fn default() -> Self {
        Self {
            name: "ChatGpt".into(),
            chatgpt: None,
            claude: None,
            llama: None,
            ossgpt: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub streaming: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScqServiceConfig {
    /// Run the evaluator loop after each generation.
    #[serde(default)]
    pub evaluation: bool,
    /// Ranker strategy: `simple`, `weighted`, or `waste_management`.
    #[serde(default = "default_ranker")]
    pub ranker: String,
}

fn default_ranker() -> String {
    "simple".into()
}

impl Default for ScqServiceConfig {
    fn default() -> Self {
        Self {
            evaluation: false,
            ranker: default_ranker(),
        }
    }
}

impl Config {
    /// Load from the path named by `WASTEPRO_CONFIG_PATH`, defaulting to
    /// `./wastepro.toml`.
    pub fn load() -> Result<Config> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Config> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[system]
version = 3

[broker]
broker_name = "mosquitto"

[broker.mosquitto]
host = "broker.internal"
port = 1883
keepalive_secs = 60

[logging]
name = "wastepro"
path = "_log/wastepro.log"
level = "VERBOSE"

[service.file]
home_directory = "_storage"

[service.kg]
hostname = "kg.internal"
datapath = "_kg"

[service.llm]
name = "ChatGpt"

[service.llm.chatgpt]
openai_api_key = "sk-test"
model = "gpt-4o-mini"

[service.scq]
evaluation = true
ranker = "weighted"
"#;

    #[test]
    fn parses_full_schema() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.system.version, 3);
        assert_eq!(config.broker.broker_name, "mosquitto");
        let endpoint = config.broker.selected().unwrap();
        assert_eq!(endpoint.host.as_deref(), Some("broker.internal"));
        assert_eq!(endpoint.port, Some(1883));
        assert_eq!(config.logging.level, LogLevel::Verbose);
        assert_eq!(config.logging.level.as_filter(), "trace");
        assert_eq!(config.service.kg.hostname, "kg.internal");
        assert_eq!(
            config
                .service
                .llm
                .chatgpt
                .as_ref()
                .unwrap()
                .model
                .as_deref(),
            Some("gpt-4o-mini")
        );
        assert!(config.service.scq.evaluation);
        assert_eq!(config.service.scq.ranker, "weighted");
    }

    #[test]
    fn defaults_cover_missing_tables() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.broker.broker_name, "local");
        assert!(config.broker.selected().is_none());
        assert_eq!(config.service.scq.ranker, "simple");
        assert!(!config.service.scq.evaluation);
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let raw = "[logging]\nlevel = \"LOUD\"\n";
        assert!(Config::parse(raw).is_err());
    }
}
