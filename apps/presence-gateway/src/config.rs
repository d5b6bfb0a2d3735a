use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG_PATH";
const MAX_REMOVE_GRACE_SECONDS: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderSourceKind {
    Http,
    Mqtt,
    Disabled,
}

impl ReaderSourceKind {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" | "stream" => Ok(Self::Http),
            "mqtt" => Ok(Self::Mqtt),
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            other => bail!("invalid READER_SOURCE {other:?} (expected http, mqtt or disabled)"),
        }
    }
}

/// Optional JSON file of settings. Environment variables win over anything set here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigOverrides {
    #[serde(default)]
    http_bind: Option<String>,
    #[serde(default)]
    remove_grace_seconds: Option<f64>,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    db_pool_size: Option<u32>,
    #[serde(default)]
    catalog_path: Option<String>,
    #[serde(default)]
    reader_source: Option<String>,
    #[serde(default)]
    reader_base_url: Option<String>,
    #[serde(default)]
    reader_user: Option<String>,
    #[serde(default)]
    reader_password: Option<String>,
    #[serde(default)]
    reader_mqtt_url: Option<String>,
    #[serde(default)]
    reader_mqtt_topic: Option<String>,
    #[serde(default)]
    reader_reconnect_delay_ms: Option<u64>,
}

impl ConfigOverrides {
    pub fn load(path: &Path) -> Option<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "presence-gateway failed to read config file; using env defaults"
                );
                return None;
            }
        };
        let mut bytes = contents.into_bytes();
        match simd_json::serde::from_slice(&mut bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "presence-gateway failed to parse config file; using env defaults"
                );
                None
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub http_bind: String,
    pub remove_grace_seconds: f64,
    pub database_url: String,
    pub db_pool_size: u32,
    pub catalog_path: Option<PathBuf>,
    pub reader_source: ReaderSourceKind,
    pub reader_base_url: Option<String>,
    pub reader_user: Option<String>,
    pub reader_password: Option<String>,
    pub reader_mqtt_host: String,
    pub reader_mqtt_port: u16,
    pub reader_mqtt_topic: String,
    pub reader_mqtt_username: Option<String>,
    pub reader_mqtt_password: Option<String>,
    pub reader_mqtt_client_id: String,
    pub reader_reconnect_delay_ms: u64,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let overrides = env_optional(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .filter(|path| path.exists())
            .and_then(|path| ConfigOverrides::load(&path))
            .unwrap_or_default();

        Self::from_vars(|key| env::var(key).ok(), &overrides)
    }

    pub fn from_vars<F>(var: F, overrides: &ConfigOverrides) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            var(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let or_file = |value: Option<String>, fallback: &Option<String>| {
            value.or_else(|| {
                fallback
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            })
        };

        let http_bind = or_file(get("GATEWAY_HTTP_BIND"), &overrides.http_bind)
            .unwrap_or_else(|| "0.0.0.0:8000".to_string());

        let remove_grace_seconds = match get("GATEWAY_REMOVE_GRACE_SECONDS") {
            Some(raw) => raw
                .parse::<f64>()
                .context("invalid GATEWAY_REMOVE_GRACE_SECONDS")?,
            None => overrides.remove_grace_seconds.unwrap_or(2.0),
        };
        if !remove_grace_seconds.is_finite() || remove_grace_seconds < 0.0 {
            bail!("GATEWAY_REMOVE_GRACE_SECONDS must be a non-negative number");
        }
        if remove_grace_seconds > MAX_REMOVE_GRACE_SECONDS {
            bail!("GATEWAY_REMOVE_GRACE_SECONDS must be at most {MAX_REMOVE_GRACE_SECONDS} seconds");
        }

        let database_url = get("GATEWAY_DATABASE_URL")
            .or_else(|| get("DATABASE_URL"))
            .or_else(|| or_file(None, &overrides.database_url))
            .context("GATEWAY_DATABASE_URL or DATABASE_URL is required (or database_url in the config file)")?;
        let database_url = normalize_database_url(database_url);

        let db_pool_size = match get("GATEWAY_DB_POOL_SIZE") {
            Some(raw) => raw.parse::<u32>().context("invalid GATEWAY_DB_POOL_SIZE")?,
            None => overrides.db_pool_size.unwrap_or(5),
        };

        let catalog_path =
            or_file(get("IAS_CATALOG_PATH"), &overrides.catalog_path).map(PathBuf::from);

        let reader_source = match or_file(get("READER_SOURCE"), &overrides.reader_source) {
            Some(raw) => ReaderSourceKind::parse(&raw)?,
            None => ReaderSourceKind::Http,
        };
        let reader_base_url = or_file(get("READER_BASE_URL"), &overrides.reader_base_url)
            .map(|url| url.trim_end_matches('/').to_string());
        let reader_user = or_file(get("READER_USER"), &overrides.reader_user);
        let reader_password = or_file(get("READER_PASSWORD"), &overrides.reader_password);

        let mqtt_url = or_file(get("READER_MQTT_URL"), &overrides.reader_mqtt_url)
            .unwrap_or_else(|| "mqtt://127.0.0.1:1883".to_string());
        let url = Url::parse(&mqtt_url).context("invalid READER_MQTT_URL")?;
        let reader_mqtt_host = url
            .host_str()
            .ok_or_else(|| anyhow!("READER_MQTT_URL missing host"))?
            .to_string();
        let reader_mqtt_port = url.port().unwrap_or(1883);
        let reader_mqtt_topic = or_file(get("READER_MQTT_TOPIC"), &overrides.reader_mqtt_topic)
            .unwrap_or_else(|| "impinj/events".to_string());
        let reader_mqtt_username = get("READER_MQTT_USERNAME");
        let reader_mqtt_password = get("READER_MQTT_PASSWORD");
        let reader_mqtt_client_id = get("READER_MQTT_CLIENT_ID")
            .unwrap_or_else(|| format!("presence-gateway-{}", std::process::id()));

        let reader_reconnect_delay_ms = match get("READER_RECONNECT_DELAY_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .context("invalid READER_RECONNECT_DELAY_MS")?,
            None => overrides.reader_reconnect_delay_ms.unwrap_or(2000),
        };

        let otlp_endpoint = get("OTEL_EXPORTER_OTLP_ENDPOINT");

        Ok(Self {
            http_bind,
            remove_grace_seconds,
            database_url,
            db_pool_size,
            catalog_path,
            reader_source,
            reader_base_url,
            reader_user,
            reader_password,
            reader_mqtt_host,
            reader_mqtt_port,
            reader_mqtt_topic,
            reader_mqtt_username,
            reader_mqtt_password,
            reader_mqtt_client_id,
            reader_reconnect_delay_ms,
            otlp_endpoint,
        })
    }

    pub fn remove_grace(&self) -> Duration {
        Duration::try_from_secs_f64(self.remove_grace_seconds)
            .unwrap_or(crate::presence::DEFAULT_REMOVE_GRACE)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reader_reconnect_delay_ms)
    }

    /// The reader stream runs only when its source is selected and addressable.
    pub fn reader_enabled(&self) -> bool {
        match self.reader_source {
            ReaderSourceKind::Http => self.reader_base_url.is_some(),
            ReaderSourceKind::Mqtt => true,
            ReaderSourceKind::Disabled => false,
        }
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_database_url(url: String) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url
}
