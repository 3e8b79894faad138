//! Environment-backed runtime configuration for the `aula` command.

use std::{env, error::Error, fmt, path::PathBuf, time::Duration};

use aula_client::{NotificationConfig, RestConfig, websocket_base_from_api};
use aula_core::RetryPolicy;
use url::Url;

const DEFAULT_API_URL: &str = "http://localhost:8000/api";
const DEFAULT_DATA_DIR: &str = "./.aula-store";
const CREDENTIALS_FILENAME: &str = "credentials.json";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RECONNECT_BASE_MS: u64 = 1_000;
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Runtime configuration used by the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    /// REST base, e.g. `http://localhost:8000/api`.
    pub api_url: Url,
    /// Notification origin; derived from `api_url` unless set explicitly.
    pub ws_url: Url,
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
    /// Token override. When set, the credential file is not consulted.
    pub access_token: Option<String>,
    pub data_dir: PathBuf,
}

impl CliConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let api_url = parse_url(
            "AULA_API_URL",
            optional_trimmed_env("AULA_API_URL", &mut lookup)
                .unwrap_or_else(|| DEFAULT_API_URL.to_owned()),
        )?;
        let ws_url = match optional_trimmed_env("AULA_WS_URL", &mut lookup) {
            Some(raw) => parse_url("AULA_WS_URL", raw)?,
            None => websocket_base_from_api(&api_url).map_err(|err| ConfigError::InvalidValue {
                key: "AULA_API_URL",
                value: api_url.to_string(),
                reason: err.to_string(),
            })?,
        };
        if !matches!(ws_url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidValue {
                key: "AULA_WS_URL",
                value: ws_url.to_string(),
                reason: "scheme must be ws or wss".to_owned(),
            });
        }

        let request_timeout_ms = parse_optional_u64(
            "AULA_REQUEST_TIMEOUT_MS",
            &mut lookup,
        )?
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        if request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AULA_REQUEST_TIMEOUT_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        let reconnect_base_ms = parse_optional_u64("AULA_RECONNECT_BASE_MS", &mut lookup)?
            .unwrap_or(DEFAULT_RECONNECT_BASE_MS);
        let reconnect_max_attempts =
            parse_optional_u32("AULA_RECONNECT_MAX_ATTEMPTS", &mut lookup)?
                .unwrap_or(DEFAULT_RECONNECT_MAX_ATTEMPTS);
        let reconnect_max_delay_ms =
            parse_optional_u64("AULA_RECONNECT_MAX_DELAY_MS", &mut lookup)?;

        let mut retry_policy = RetryPolicy::new(reconnect_base_ms, reconnect_max_attempts);
        if let Some(max_delay_ms) = reconnect_max_delay_ms {
            if max_delay_ms < reconnect_base_ms {
                return Err(ConfigError::InvalidValue {
                    key: "AULA_RECONNECT_MAX_DELAY_MS",
                    value: max_delay_ms.to_string(),
                    reason: "must not be below AULA_RECONNECT_BASE_MS".to_owned(),
                });
            }
            retry_policy = retry_policy.with_max_delay_ms(max_delay_ms);
        }

        let access_token = optional_trimmed_env("AULA_ACCESS_TOKEN", &mut lookup);
        let data_dir = optional_trimmed_env("AULA_DATA_DIR", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        Ok(Self {
            api_url,
            ws_url,
            request_timeout: Duration::from_millis(request_timeout_ms),
            retry_policy,
            access_token,
            data_dir,
        })
    }

    /// Location of the JSON credential file.
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join(CREDENTIALS_FILENAME)
    }

    pub fn rest_config(&self) -> RestConfig {
        RestConfig {
            base_url: self.api_url.clone(),
            timeout: self.request_timeout,
        }
    }

    pub fn notification_config(&self) -> NotificationConfig {
        NotificationConfig::new(self.ws_url.clone()).with_policy(self.retry_policy)
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_url(key: &'static str, value: String) -> Result<Url, ConfigError> {
    Url::parse(&value).map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

fn parse_optional_u32<F>(key: &'static str, lookup: &mut F) -> Result<Option<u32>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u32>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
