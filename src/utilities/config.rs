use std::env;
use std::fmt;
use std::path::PathBuf;

use url::Url;

use super::rate_limit::RateLimiter;
use crate::models::Edition;

const DEFAULT_INFERENCE_HOST: &str = "https://api-inference.huggingface.co";
const DEFAULT_RATE_LIMIT_MAX: u32 = 20;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: i64 = 60 * 60;
const DEFAULT_RATE_LIMIT_FILE: &str = "rate_limit.dat";
const DEFAULT_DECLINE_URL: &str = "https://www.google.com";

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "{key} must be set"),
            Self::Invalid { key, value, reason } => write!(f, "invalid {key} {value:?}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

pub struct Config {
    pub edition: Edition,
    /// Only read for the hosted edition.
    pub api_token: Option<String>,
    pub inference_host: Url,
    pub rate_limit: Option<RateLimiter>,
    pub rate_limit_file: PathBuf,
    pub decline_url: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("edition", &self.edition)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("inference_host", &self.inference_host.as_str())
            .field("rate_limit", &self.rate_limit)
            .field("rate_limit_file", &self.rate_limit_file)
            .field("decline_url", &self.decline_url)
            .finish()
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        log::debug!("loading config from environment");
        Self::from_lookup(|key| env::var(key).ok().filter(|value| !value.trim().is_empty()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let edition = parse(&lookup, "EDITION", Edition::Personal)?;

        let inference_host = parse_host(
            &lookup("INFERENCE_HOST").unwrap_or_else(|| DEFAULT_INFERENCE_HOST.into()),
        )?;

        let (api_token, rate_limit) = match edition {
            Edition::Personal => (None, None),
            Edition::Hosted => {
                let api_token =
                    lookup("HF_API_TOKEN").ok_or(ConfigError::Missing("HF_API_TOKEN"))?;
                let max = parse(&lookup, "RATE_LIMIT_MAX", DEFAULT_RATE_LIMIT_MAX)?;
                let window_secs =
                    parse(&lookup, "RATE_LIMIT_WINDOW_SECS", DEFAULT_RATE_LIMIT_WINDOW_SECS)?;
                if max == 0 {
                    return Err(ConfigError::Invalid {
                        key: "RATE_LIMIT_MAX",
                        value: max.to_string(),
                        reason: "must be positive".into(),
                    });
                }
                if window_secs <= 0 {
                    return Err(ConfigError::Invalid {
                        key: "RATE_LIMIT_WINDOW_SECS",
                        value: window_secs.to_string(),
                        reason: "must be positive".into(),
                    });
                }

                (Some(api_token), Some(RateLimiter::new(max, window_secs.saturating_mul(1000))))
            }
        };

        Ok(Self {
            edition,
            api_token,
            inference_host,
            rate_limit,
            rate_limit_file: lookup("RATE_LIMIT_FILE")
                .unwrap_or_else(|| DEFAULT_RATE_LIMIT_FILE.into())
                .into(),
            decline_url: lookup("DECLINE_URL").unwrap_or_else(|| DEFAULT_DECLINE_URL.into()),
        })
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    lookup(key).map_or(Ok(default), |value| {
        value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            key,
            reason: err.to_string(),
            value,
        })
    })
}

fn parse_host(value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key: "INFERENCE_HOST",
        value: value.into(),
        reason,
    };

    let url = Url::parse(value).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("expected an http(s) URL".into()));
    }

    Ok(url)
}
