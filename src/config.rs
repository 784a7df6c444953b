use serde::Deserialize;
use std::{env, path::PathBuf, time::Duration};
use thiserror::Error;

pub const DEFAULT_BRAND: &str = "Carr & Priddle";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {message}")]
    Read { path: String, message: String },
    #[error("invalid config file: {0}")]
    Yaml(String),
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{key}`: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub feed: FeedSettings,
    pub catalog: CatalogSettings,
    pub http: HttpSettings,
    pub retry: RetrySettings,
    pub service: ServiceSettings,
    pub brand: String,
}

#[derive(Debug, Clone)]
pub enum FeedSettings {
    Ftp(FtpSettings),
    Http { url: String },
    File { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct FtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub passive: bool,
    pub path: String,
}

#[derive(Debug, Clone)]
pub enum CatalogSettings {
    Rest(RestSettings),
    Memory,
}

#[derive(Debug, Clone)]
pub struct RestSettings {
    pub base_url: String,
    pub service_key: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub port: u16,
    pub queue_capacity: usize,
    pub run_history: usize,
    pub sync_interval: Option<Duration>,
    pub run_on_start: bool,
    pub api_keys: String,
    pub metrics_key: Option<String>,
}

/// Shape of the optional YAML config file. Every key can also be supplied
/// through the environment, which takes precedence.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawSettings {
    pub feed_source: Option<String>,
    pub ftp_host: Option<String>,
    pub ftp_port: Option<u16>,
    pub ftp_user: Option<String>,
    pub ftp_password: Option<String>,
    pub ftp_passive: Option<bool>,
    pub ftp_path: Option<String>,
    pub feed_url: Option<String>,
    pub feed_path: Option<String>,
    pub catalog_backend: Option<String>,
    pub catalog_url: Option<String>,
    pub catalog_service_key: Option<String>,
    pub catalog_bucket: Option<String>,
    pub brand_name: Option<String>,
    pub http_timeout_secs: Option<u64>,
    pub http_connect_timeout_secs: Option<u64>,
    pub retry_max_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub port: Option<u16>,
    pub queue_capacity: Option<usize>,
    pub run_history: Option<usize>,
    pub sync_interval_secs: Option<u64>,
    pub run_on_start: Option<bool>,
    pub api_keys: Option<String>,
    pub metrics_key: Option<String>,
}

impl Settings {
    /// Loads `.env`, the optional `PROPFEED_CONFIG` YAML file and then the
    /// process environment, in increasing order of precedence.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut raw = match env::var("PROPFEED_CONFIG") {
            Ok(path) if !path.trim().is_empty() => RawSettings::from_file(path.trim())?,
            _ => RawSettings::default(),
        };
        raw.overlay(|key| env::var(key).ok());
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        let feed = match raw
            .feed_source
            .as_deref()
            .map(|v| v.trim().to_lowercase())
            .as_deref()
        {
            None | Some("ftp") => FeedSettings::Ftp(FtpSettings {
                host: required(raw.ftp_host, "FTP_HOST")?,
                port: raw.ftp_port.unwrap_or(21),
                user: required(raw.ftp_user, "FTP_USER")?,
                password: raw.ftp_password.unwrap_or_default(),
                passive: raw.ftp_passive.unwrap_or(true),
                path: required(raw.ftp_path, "FTP_PATH")?,
            }),
            Some("http") => FeedSettings::Http {
                url: required(raw.feed_url, "FEED_URL")?,
            },
            Some("file") => FeedSettings::File {
                path: PathBuf::from(required(raw.feed_path, "FEED_PATH")?),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "FEED_SOURCE",
                    value: other.to_string(),
                });
            }
        };

        let catalog = match raw
            .catalog_backend
            .as_deref()
            .map(|v| v.trim().to_lowercase())
            .as_deref()
        {
            None | Some("rest") => CatalogSettings::Rest(RestSettings {
                base_url: required(raw.catalog_url, "CATALOG_URL")?
                    .trim_end_matches('/')
                    .to_string(),
                service_key: required(raw.catalog_service_key, "CATALOG_SERVICE_KEY")?,
                bucket: raw
                    .catalog_bucket
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| "property-media".to_string()),
            }),
            Some("memory") => CatalogSettings::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "CATALOG_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        let defaults = HttpSettings::default();
        let http = HttpSettings {
            timeout: raw
                .http_timeout_secs
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            connect_timeout: raw
                .http_connect_timeout_secs
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
        };

        let retry_defaults = RetrySettings::default();
        let retry = RetrySettings {
            max_attempts: raw
                .retry_max_attempts
                .filter(|v| *v >= 1)
                .unwrap_or(retry_defaults.max_attempts),
            base_delay: raw
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.base_delay),
            max_delay: raw
                .retry_max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.max_delay),
        };
        if retry.max_delay < retry.base_delay {
            return Err(ConfigError::Invalid {
                key: "RETRY_MAX_DELAY_MS",
                value: format!("{}ms", retry.max_delay.as_millis()),
            });
        }

        let service = ServiceSettings {
            port: raw.port.unwrap_or(8000),
            queue_capacity: raw.queue_capacity.filter(|v| *v > 0).unwrap_or(8),
            run_history: raw.run_history.filter(|v| *v > 0).unwrap_or(64),
            sync_interval: raw
                .sync_interval_secs
                .filter(|v| *v > 0)
                .map(Duration::from_secs),
            run_on_start: raw.run_on_start.unwrap_or(false),
            api_keys: raw.api_keys.unwrap_or_default(),
            metrics_key: raw.metrics_key.filter(|v| !v.trim().is_empty()),
        };

        Ok(Self {
            feed,
            catalog,
            http,
            retry,
            service,
            brand: raw
                .brand_name
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BRAND.to_string()),
        })
    }
}

impl RawSettings {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|err| ConfigError::Yaml(err.to_string()))
    }

    /// Replaces file values with whatever `lookup` returns for the matching
    /// environment variable. Unparseable numbers and flags are ignored.
    pub fn overlay(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str| text(key).and_then(|v| v.trim().parse::<u64>().ok());
        let flag = |key: &str| text(key).map(|v| parse_bool(&v));

        set(&mut self.feed_source, text("FEED_SOURCE"));
        set(&mut self.ftp_host, text("FTP_HOST"));
        set(
            &mut self.ftp_port,
            number("FTP_PORT").and_then(|v| u16::try_from(v).ok()),
        );
        set(&mut self.ftp_user, text("FTP_USER"));
        set(&mut self.ftp_password, text("FTP_PASSWORD"));
        set(&mut self.ftp_passive, flag("FTP_PASSIVE"));
        set(&mut self.ftp_path, text("FTP_PATH"));
        set(&mut self.feed_url, text("FEED_URL"));
        set(&mut self.feed_path, text("FEED_PATH"));
        set(&mut self.catalog_backend, text("CATALOG_BACKEND"));
        set(&mut self.catalog_url, text("CATALOG_URL"));
        set(&mut self.catalog_service_key, text("CATALOG_SERVICE_KEY"));
        set(&mut self.catalog_bucket, text("CATALOG_BUCKET"));
        set(&mut self.brand_name, text("BRAND_NAME"));
        set(&mut self.http_timeout_secs, number("HTTP_TIMEOUT_SECS"));
        set(
            &mut self.http_connect_timeout_secs,
            number("HTTP_CONNECT_TIMEOUT_SECS"),
        );
        set(
            &mut self.retry_max_attempts,
            number("RETRY_MAX_ATTEMPTS").and_then(|v| u32::try_from(v).ok()),
        );
        set(&mut self.retry_base_delay_ms, number("RETRY_BASE_DELAY_MS"));
        set(&mut self.retry_max_delay_ms, number("RETRY_MAX_DELAY_MS"));
        set(
            &mut self.port,
            number("PORT").and_then(|v| u16::try_from(v).ok()),
        );
        set(
            &mut self.queue_capacity,
            number("QUEUE_CAPACITY").and_then(|v| usize::try_from(v).ok()),
        );
        set(
            &mut self.run_history,
            number("RUN_HISTORY").and_then(|v| usize::try_from(v).ok()),
        );
        set(&mut self.sync_interval_secs, number("SYNC_INTERVAL_SECS"));
        set(&mut self.run_on_start, flag("RUN_ON_START"));
        set(&mut self.api_keys, text("PROPFEED_API_KEYS"));
        set(&mut self.metrics_key, text("METRICS_KEY"));
    }
}

fn set<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn required(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn memory_http_raw() -> RawSettings {
        RawSettings {
            feed_source: Some("http".into()),
            feed_url: Some("https://feeds.example.com/properties.xml".into()),
            catalog_backend: Some("memory".into()),
            ..RawSettings::default()
        }
    }

    #[test]
    fn ftp_is_the_default_source() {
        let raw = RawSettings::from_yaml(
            "ftp_host: ftp.example.com\nftp_user: feed\nftp_password: secret\nftp_path: /out/feed.xml\ncatalog_backend: memory\n",
        )
        .expect("yaml");
        let settings = Settings::from_raw(raw).expect("settings");
        match settings.feed {
            FeedSettings::Ftp(ftp) => {
                assert_eq!(ftp.host, "ftp.example.com");
                assert_eq!(ftp.port, 21);
                assert!(ftp.passive);
                assert_eq!(ftp.path, "/out/feed.xml");
            }
            other => panic!("unexpected feed settings: {other:?}"),
        }
        assert_eq!(settings.brand, DEFAULT_BRAND);
        assert_eq!(settings.retry, RetrySettings::default());
    }

    #[test]
    fn missing_ftp_host_is_reported() {
        let raw = RawSettings {
            catalog_backend: Some("memory".into()),
            ..RawSettings::default()
        };
        let err = Settings::from_raw(raw).expect_err("should fail");
        assert!(matches!(err, ConfigError::Missing("FTP_HOST")));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut raw = RawSettings {
            brand_name: Some("From File".into()),
            port: Some(9000),
            ..memory_http_raw()
        };
        let env: HashMap<&str, &str> = HashMap::from([
            ("BRAND_NAME", "From Env"),
            ("PORT", "not-a-number"),
            ("RUN_ON_START", "yes"),
            ("SYNC_INTERVAL_SECS", "3600"),
            ("RUN_HISTORY", "5"),
        ]);
        raw.overlay(|key| env.get(key).map(|v| v.to_string()));
        let settings = Settings::from_raw(raw).expect("settings");
        assert_eq!(settings.brand, "From Env");
        assert_eq!(settings.service.port, 9000);
        assert!(settings.service.run_on_start);
        assert_eq!(settings.service.run_history, 5);
        assert_eq!(
            settings.service.sync_interval,
            Some(Duration::from_secs(3600))
        );
    }

    #[test]
    fn rejects_unknown_backend() {
        let raw = RawSettings {
            catalog_backend: Some("sqlite".into()),
            ..memory_http_raw()
        };
        let err = Settings::from_raw(raw).expect_err("should fail");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "CATALOG_BACKEND",
                ..
            }
        ));
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let raw = RawSettings {
            retry_base_delay_ms: Some(5_000),
            retry_max_delay_ms: Some(100),
            ..memory_http_raw()
        };
        assert!(Settings::from_raw(raw).is_err());
    }
}
