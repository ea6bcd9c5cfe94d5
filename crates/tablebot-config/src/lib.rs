use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub channel: Channel,
    pub access: Access,
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub ingress: Ingress,
    #[serde(default)]
    pub delivery: Delivery,
    #[serde(default)]
    pub ledger: Ledger,
    #[serde(default)]
    pub chat: Chat,
    pub catalog: Catalog,
    #[serde(default)]
    pub journal: Journal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub access_token: String,
    #[serde(default)]
    pub channel_secret: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Access {
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub group_admins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(default = "default_inactive_ms")]
    pub inactive_ms: u64,
    #[serde(default = "default_result_cooldown_ms")]
    pub result_cooldown_ms: u64,
    #[serde(default = "default_qa_window_ms")]
    pub qa_window_ms: u64,
    #[serde(default = "default_sequence_min_len")]
    pub sequence_min_len: usize,
    #[serde(default = "default_sequence_max_len")]
    pub sequence_max_len: usize,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            inactive_ms: default_inactive_ms(),
            result_cooldown_ms: default_result_cooldown_ms(),
            qa_window_ms: default_qa_window_ms(),
            sequence_min_len: default_sequence_min_len(),
            sequence_max_len: default_sequence_max_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingress {
    #[serde(default = "default_dedupe_ttl_ms")]
    pub dedupe_ttl_ms: u64,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for Ingress {
    fn default() -> Self {
        Self {
            dedupe_ttl_ms: default_dedupe_ttl_ms(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: usize,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_jitter_ms")]
    pub retry_jitter_ms: u64,
}

impl Default for Delivery {
    fn default() -> Self {
        Self {
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_jitter_ms: default_retry_jitter_ms(),
        }
    }
}

/// Business-day window is `[day_start_minutes, day_end_minutes)` measured
/// from local midnight, local time being UTC + `utc_offset_minutes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default = "default_unit_size")]
    pub unit_size: i64,
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_day_start_minutes")]
    pub day_start_minutes: u32,
    #[serde(default = "default_day_end_minutes")]
    pub day_end_minutes: u32,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            unit_size: default_unit_size(),
            utc_offset_minutes: default_utc_offset_minutes(),
            day_start_minutes: default_day_start_minutes(),
            day_end_minutes: default_day_end_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_chat_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for Chat {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            api_key: None,
            model: default_chat_model(),
            timeout_ms: default_chat_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub games: Vec<Game>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub name: String,
    pub halls: Vec<Hall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hall {
    pub name: String,
    pub tables: Vec<String>,
    #[serde(default)]
    pub dragon_tiger: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Journal {
    #[serde(default)]
    pub jsonl_path: Option<String>,
}

fn default_api_base() -> String {
    "https://api.line.me".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_inactive_ms() -> u64 {
    2 * 60 * 1000
}

fn default_result_cooldown_ms() -> u64 {
    10 * 1000
}

fn default_qa_window_ms() -> u64 {
    3 * 60 * 1000
}

fn default_sequence_min_len() -> usize {
    3
}

fn default_sequence_max_len() -> usize {
    10
}

fn default_dedupe_ttl_ms() -> u64 {
    5 * 60 * 1000
}

fn default_min_interval_ms() -> u64 {
    250
}

fn default_retry_max_attempts() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    150
}

fn default_retry_jitter_ms() -> u64 {
    100
}

fn default_unit_size() -> i64 {
    100
}

fn default_utc_offset_minutes() -> i32 {
    8 * 60
}

fn default_day_start_minutes() -> u32 {
    12 * 60
}

fn default_day_end_minutes() -> u32 {
    24 * 60
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_chat_timeout_ms() -> u64 {
    6_000
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    parse_and_validate(&config_text)
}

pub fn parse_and_validate(config_text: &str) -> Result<Config, ConfigError> {
    let expanded = expand_env_vars(config_text);
    let value: serde_yaml::Value =
        serde_yaml::from_str(&expanded).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

/// Replaces `${NAME}` with the environment value; unset variables expand
/// to the empty string.
pub fn expand_env_vars(input: &str) -> String {
    let re = match Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };
    re.replace_all(input, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.channel.access_token.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "channel.access_token must not be empty (is the env var set?)".to_string(),
        ));
    }
    if cfg.session.sequence_min_len == 0
        || cfg.session.sequence_min_len > cfg.session.sequence_max_len
    {
        return Err(ConfigError::UnsupportedConfig(format!(
            "session.sequence_min_len={} must be >= 1 and <= sequence_max_len={}",
            cfg.session.sequence_min_len, cfg.session.sequence_max_len
        )));
    }
    if cfg.delivery.retry_max_attempts == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "delivery.retry_max_attempts must be >= 1".to_string(),
        ));
    }
    if cfg.ledger.unit_size <= 0 {
        return Err(ConfigError::UnsupportedConfig(
            "ledger.unit_size must be >= 1".to_string(),
        ));
    }
    if cfg.ledger.day_start_minutes >= cfg.ledger.day_end_minutes
        || cfg.ledger.day_end_minutes - cfg.ledger.day_start_minutes > 24 * 60
    {
        return Err(ConfigError::UnsupportedConfig(format!(
            "ledger business day [{}, {}) must be non-empty and at most 24h long",
            cfg.ledger.day_start_minutes, cfg.ledger.day_end_minutes
        )));
    }
    if cfg.chat.enabled
        && cfg
            .chat
            .endpoint
            .as_ref()
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(ConfigError::UnsupportedConfig(
            "chat.endpoint is required when chat.enabled=true".to_string(),
        ));
    }
    for game in &cfg.catalog.games {
        let names = std::iter::once(game.name.as_str()).chain(
            game.halls.iter().flat_map(|hall| {
                std::iter::once(hall.name.as_str()).chain(hall.tables.iter().map(|t| t.as_str()))
            }),
        );
        for name in names {
            if name.trim().is_empty() || name.contains('|') || name.contains('/') {
                return Err(ConfigError::UnsupportedConfig(format!(
                    "catalog name {name:?} must be non-empty and must not contain '|' or '/'"
                )));
            }
        }
    }
    Ok(())
}
