//! Process configuration, read from the environment (after an optional
//! `.env` file has been loaded by the binary).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Settings for calls to the text-generation backend.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_key: String,
    pub endpoint: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            temperature: 0.7,
            max_output_tokens: 500,
            timeout: Duration::from_secs(20),
        }
    }
}

impl GenerationConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            api_key: required(&lookup, "GEN_API_KEY")?,
            endpoint: lookup("GEN_API_URL").unwrap_or(defaults.endpoint),
            temperature: parsed(&lookup, "GEN_TEMPERATURE")?.unwrap_or(defaults.temperature),
            max_output_tokens: parsed(&lookup, "GEN_MAX_OUTPUT_TOKENS")?
                .unwrap_or(defaults.max_output_tokens),
            timeout: parsed(&lookup, "GEN_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub generation: GenerationConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parsed(&lookup, "PORT")?.unwrap_or(3000);
        let addr = format!("{}:{}", host, port)
            .parse()
            .map_err(|_| ConfigError::Invalid {
                name: "HOST",
                value: host,
            })?;

        Ok(Self {
            addr,
            generation: GenerationConfig::from_lookup(lookup)?,
        })
    }
}

/// Where the chat front-end gets its quizzes from.
#[derive(Debug, Clone)]
pub enum QuizBackend {
    /// `POST /api/generate` on a running quiz server.
    Remote { url: String },
    /// Talk to the generation backend directly from the bot process.
    InProcess(GenerationConfig),
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub backend: QuizBackend,
    pub catalog_path: PathBuf,
    pub storage_path: String,
    pub request_timeout: Duration,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend = match lookup("QUIZ_API_URL") {
            Some(url) => QuizBackend::Remote { url },
            None => QuizBackend::InProcess(GenerationConfig::from_lookup(&lookup)?),
        };

        Ok(Self {
            backend,
            catalog_path: lookup("QUIZ_CATALOG")
                .unwrap_or_else(|| "data.csv".to_string())
                .into(),
            storage_path: lookup("QUIZ_DB").unwrap_or_else(|| "db.sqlite".to_string()),
            request_timeout: parsed(&lookup, "QUIZ_REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(30)),
        })
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    lookup(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value })
        })
        .transpose()
}
