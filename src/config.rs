use url::Url;

// ── Defaults ─────────────────────────────────────────────────────────────────

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY environment variable not set")]
    MissingApiKey,
    #[error("OPENAI_BASE_URL is not a valid URL: {0}")]
    InvalidBaseUrl(String),
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

// ── Config ───────────────────────────────────────────────────────────────────

/// Process-wide settings, read once before the listener is bound.
#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

// Hand-written so the key never ends up in a log line.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = get("OPENAI_API_KEY").ok_or(ConfigError::MissingApiKey)?;

        let base_url = get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let parsed =
            Url::parse(&base_url).map_err(|e| ConfigError::InvalidBaseUrl(e.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ConfigError::InvalidBaseUrl(format!(
                "unsupported scheme {}",
                parsed.scheme()
            )));
        }

        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .ok()
                .filter(|p| *p > 0)
                .ok_or(ConfigError::InvalidNumber {
                    name: "PORT",
                    value: raw,
                })?,
            None => DEFAULT_PORT,
        };

        let max_upload_bytes = match get("MAX_UPLOAD_BYTES") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidNumber {
                    name: "MAX_UPLOAD_BYTES",
                    value: raw,
                })?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Config {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: get("VISION_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            max_upload_bytes,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn missing_api_key_is_fatal() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        assert!(matches!(
            load(&[("OPENAI_API_KEY", "   ")]),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = load(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
    }

    #[test]
    fn overrides_are_read() {
        let config = load(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_BASE_URL", "http://127.0.0.1:9999/v1/"),
            ("VISION_MODEL", "gpt-4o-mini"),
            ("HOST", "127.0.0.1"),
            ("PORT", "3000"),
            ("MAX_UPLOAD_BYTES", "1024"),
        ])
        .unwrap();
        assert_eq!(config.base_url, "http://127.0.0.1:9999/v1");
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.bind_addr(), "127.0.0.1:3000");
        assert_eq!(config.max_upload_bytes, 1024);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            load(&[("OPENAI_API_KEY", "k"), ("PORT", "eighty")]),
            Err(ConfigError::InvalidNumber { name: "PORT", .. })
        ));
        assert!(matches!(
            load(&[("OPENAI_API_KEY", "k"), ("MAX_UPLOAD_BYTES", "0")]),
            Err(ConfigError::InvalidNumber { name: "MAX_UPLOAD_BYTES", .. })
        ));
        assert!(matches!(
            load(&[("OPENAI_API_KEY", "k"), ("OPENAI_BASE_URL", "not a url")]),
            Err(ConfigError::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            load(&[("OPENAI_API_KEY", "k"), ("OPENAI_BASE_URL", "ftp://example.com")]),
            Err(ConfigError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn debug_output_hides_the_key() {
        let config = load(&[("OPENAI_API_KEY", "sk-secret")]).unwrap();
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }
}

#[cfg(test)]
impl Config {
    /// Config pointing the vision client at a mock server root.
    pub fn for_base_url(root: &str) -> Config {
        Config {
            api_key: "sk-test".to_string(),
            base_url: format!("{}/v1", root.trim_end_matches('/')),
            model: DEFAULT_MODEL.to_string(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}
