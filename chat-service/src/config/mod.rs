use secrecy::SecretString;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_TEXT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_IMAGE_MODEL: &str = "gemini-2.0-flash-preview-image-generation";
const DEFAULT_LOCATION: &str = "us-central1";
const DEFAULT_BUCKET: &str = "images";
const DEFAULT_SIGNED_URL_TTL_SECS: u64 = 3600;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEV_ALLOWED_ORIGIN: &str = "http://localhost:3000";

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub common: core_config::Config,
    pub environment: DeploymentEnvironment,
    pub google: GoogleConfig,
    pub models: ModelConfig,
    pub chat: ChatRouteConfig,
    pub storage: StorageConfig,
    pub secrets: SecretsConfig,
    pub cors: CorsConfig,
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEnvironment {
    Development,
    Production,
}

impl DeploymentEnvironment {
    pub fn is_production(self) -> bool {
        self == DeploymentEnvironment::Production
    }
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// Vertex AI project; also used to expand bare secret names.
    pub project_id: Option<String>,
    pub location: String,
    /// When set, Gemini is called through the Generative Language API instead of Vertex AI.
    pub api_key: Option<SecretString>,
    /// Fixed OAuth token; otherwise tokens come from the metadata server.
    pub access_token: Option<SecretString>,
    /// Overrides the Gemini host, e.g. for an emulator.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Model for `/chat/blurb` when the request names none.
    pub text_model: String,
    /// Model for `/chat/image` when the request names none.
    pub image_model: String,
}

/// How `/chat/blurb` delivers text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurbMode {
    /// One JSON string body once generation is complete.
    Batch,
    /// `0:"fragment"\n` lines as fragments arrive.
    Stream,
}

impl FromStr for BlurbMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(BlurbMode::Batch),
            "stream" => Ok(BlurbMode::Stream),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "CHAT_BLURB_MODE must be 'batch' or 'stream', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRouteConfig {
    pub blurb_mode: BlurbMode,
}

/// Where storage credentials come from.
#[derive(Debug, Clone)]
pub enum StorageCredentials {
    Direct {
        url: String,
        key: SecretString,
    },
    SecretManager {
        url_secret_id: String,
        key_secret_id: String,
    },
    /// No credentials: keep objects in process memory (development only).
    InMemory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub credentials: StorageCredentials,
    /// Bucket for attachments that carry no bucket name, and for generated images.
    pub default_bucket: String,
    pub signed_url_ttl_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SecretsConfig {
    /// Secret read back by `/secretcheck`.
    pub example_secret_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CorsConfig {
    /// Production allow-list; empty means any origin.
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct UpstreamConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            common: core_config::Config { port: 8080 },
            environment: DeploymentEnvironment::Development,
            google: GoogleConfig {
                project_id: None,
                location: DEFAULT_LOCATION.to_string(),
                api_key: None,
                access_token: None,
                base_url: None,
            },
            models: ModelConfig {
                text_model: DEFAULT_TEXT_MODEL.to_string(),
                image_model: DEFAULT_IMAGE_MODEL.to_string(),
            },
            chat: ChatRouteConfig {
                blurb_mode: BlurbMode::Stream,
            },
            storage: StorageConfig {
                credentials: StorageCredentials::InMemory,
                default_bucket: DEFAULT_BUCKET.to_string(),
                signed_url_ttl_secs: DEFAULT_SIGNED_URL_TTL_SECS,
            },
            secrets: SecretsConfig::default(),
            cors: CorsConfig::default(),
            upstream: UpstreamConfig {
                connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
                request_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            },
        }
    }
}

impl ChatConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = get_bool("FAST_PRODUCTION")?
            || get_optional_env("ENVIRONMENT").as_deref() == Some("prod");
        let defaults = ChatConfig::default();

        let config = ChatConfig {
            common: common_config,
            environment: if is_prod {
                DeploymentEnvironment::Production
            } else {
                DeploymentEnvironment::Development
            },
            google: GoogleConfig {
                project_id: get_optional_env("PROJECT_ID"),
                location: get_env("LOCATION", Some(DEFAULT_LOCATION), false)?,
                api_key: get_optional_env("GOOGLE_API_KEY").map(SecretString::new),
                access_token: get_optional_env("GOOGLE_ACCESS_TOKEN").map(SecretString::new),
                base_url: get_optional_env("GEMINI_BASE_URL"),
            },
            models: ModelConfig {
                text_model: get_env("GENAI_TEXT_MODEL", Some(DEFAULT_TEXT_MODEL), false)?,
                image_model: get_env("GENAI_IMAGE_MODEL", Some(DEFAULT_IMAGE_MODEL), false)?,
            },
            chat: ChatRouteConfig {
                blurb_mode: get_env("CHAT_BLURB_MODE", Some("stream"), false)?.parse()?,
            },
            storage: StorageConfig {
                credentials: storage_credentials(is_prod)?,
                default_bucket: get_env("STORAGE_DEFAULT_BUCKET", Some(DEFAULT_BUCKET), is_prod)?,
                signed_url_ttl_secs: parse_env(
                    "SIGNED_URL_TTL_SECS",
                    defaults.storage.signed_url_ttl_secs,
                )?,
            },
            secrets: SecretsConfig {
                example_secret_id: get_optional_env("EXAMPLE_SECRET_ID"),
            },
            cors: CorsConfig {
                allowed_origins: get_optional_env("CORS_ALLOWED_ORIGINS")
                    .map(|origins| split_list(&origins))
                    .unwrap_or_default(),
            },
            upstream: UpstreamConfig {
                connect_timeout: defaults.upstream.connect_timeout,
                request_timeout: Duration::from_secs(parse_env(
                    "UPSTREAM_TIMEOUT_SECS",
                    DEFAULT_UPSTREAM_TIMEOUT_SECS,
                )?),
            },
        };

        if config.google.api_key.is_none() && config.google.project_id.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Either GOOGLE_API_KEY or PROJECT_ID must be set"
            )));
        }

        Ok(config)
    }

    /// Origins allowed by CORS. Development only serves the local web app;
    /// production uses the configured list. An empty list, or one containing
    /// `*`, allows any origin and yields an empty result.
    pub fn cors_origins(&self) -> Vec<String> {
        match self.environment {
            DeploymentEnvironment::Development => vec![DEV_ALLOWED_ORIGIN.to_string()],
            DeploymentEnvironment::Production => {
                if self.cors.allowed_origins.iter().any(|o| o == "*") {
                    Vec::new()
                } else {
                    self.cors.allowed_origins.clone()
                }
            }
        }
    }
}

fn storage_credentials(is_prod: bool) -> Result<StorageCredentials, AppError> {
    if let (Some(url), Some(key)) = (
        get_optional_env("SUPABASE_URL"),
        get_optional_env("SUPABASE_KEY"),
    ) {
        return Ok(StorageCredentials::Direct {
            url,
            key: SecretString::new(key),
        });
    }

    if let (Some(url_secret_id), Some(key_secret_id)) = (
        get_optional_env("SUPABASE_URL_SECRET_ID"),
        get_optional_env("SUPABASE_KEY_SECRET_ID"),
    ) {
        return Ok(StorageCredentials::SecretManager {
            url_secret_id,
            key_secret_id,
        });
    }

    if is_prod {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "SUPABASE_URL/SUPABASE_KEY or SUPABASE_URL_SECRET_ID/SUPABASE_KEY_SECRET_ID are required in production"
        )));
    }

    Ok(StorageCredentials::InMemory)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Unset and blank variables are both treated as absent.
fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// In production the variable must be set explicitly; elsewhere `default` applies.
fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match get_optional_env(key) {
        Some(val) => Ok(val),
        None if is_prod => Err(AppError::ConfigError(anyhow::anyhow!(
            "{} is required in production but not set",
            key
        ))),
        None => default.map(str::to_string).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("{} is required but not set", key))
        }),
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_optional_env(key) {
        Some(val) => val.trim().parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
        }),
        None => Ok(default),
    }
}

fn get_bool(key: &str) -> Result<bool, AppError> {
    match get_optional_env(key) {
        Some(val) => match val.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "{} must be true or false, got '{}'",
                key,
                other
            ))),
        },
        None => Ok(false),
    }
}
