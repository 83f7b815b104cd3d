use std::time::Duration;

/// Runtime configuration, read once at startup from `VEILSTAT_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub duckdb_memory_limit: String,
    pub cors_origins: Vec<String>,
    /// Bearer token required by dashboard query and admin routes.
    /// `None` leaves query routes open and disables admin routes.
    pub api_token: Option<String>,
    /// How long a salt stays current before the next access replaces it.
    pub salt_ttl_secs: u64,
    /// Interval of the background loop that rotates an expired salt even
    /// when no traffic arrives.
    pub salt_maintenance_interval_secs: u64,
    pub ingest: IngestLimits,
    pub query_timeout_ms: u64,
    /// How long a positive "site is active" lookup is cached in-process.
    pub site_cache_ttl_secs: u64,
}

/// Bounds enforced by the event validator.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestLimits {
    /// Timestamps further than this into the future are rejected; smaller
    /// drift is clamped to the server clock.
    pub max_future_skew_secs: i64,
    /// Timestamps older than this are rejected.
    pub max_event_age_secs: i64,
    pub max_properties: usize,
    pub max_property_value_len: usize,
    pub max_path_len: usize,
    pub max_useragent_len: usize,
    pub max_event_name_len: usize,
    /// Hard cap on the request body, in bytes.
    pub max_body_bytes: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_future_skew_secs: 300,
            max_event_age_secs: 48 * 3600,
            max_properties: 32,
            max_property_value_len: 256,
            max_path_len: 2048,
            max_useragent_len: 512,
            max_event_name_len: 128,
            max_body_bytes: 16 * 1024,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| format!("invalid {key}: {e}")),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let defaults = IngestLimits::default();
        let salt_ttl_secs: u64 = env_or("VEILSTAT_SALT_TTL_SECS", 86_400)?;
        if salt_ttl_secs == 0 {
            return Err("VEILSTAT_SALT_TTL_SECS must be greater than zero".to_string());
        }

        Ok(Self {
            port: env_or("VEILSTAT_PORT", 3000)?,
            data_dir: std::env::var("VEILSTAT_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            duckdb_memory_limit: std::env::var("VEILSTAT_DUCKDB_MEMORY")
                .unwrap_or_else(|_| "1GB".to_string()),
            cors_origins: std::env::var("VEILSTAT_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            api_token: std::env::var("VEILSTAT_API_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
            salt_ttl_secs,
            salt_maintenance_interval_secs: env_or("VEILSTAT_SALT_MAINTENANCE_SECS", 300)?,
            ingest: IngestLimits {
                max_future_skew_secs: env_or(
                    "VEILSTAT_MAX_FUTURE_SKEW_SECS",
                    defaults.max_future_skew_secs,
                )?,
                max_event_age_secs: env_or(
                    "VEILSTAT_MAX_EVENT_AGE_SECS",
                    defaults.max_event_age_secs,
                )?,
                max_properties: env_or("VEILSTAT_MAX_PROPERTIES", defaults.max_properties)?,
                max_property_value_len: env_or(
                    "VEILSTAT_MAX_PROPERTY_VALUE_LEN",
                    defaults.max_property_value_len,
                )?,
                max_body_bytes: env_or("VEILSTAT_MAX_BODY_BYTES", defaults.max_body_bytes)?,
                ..defaults
            },
            query_timeout_ms: env_or("VEILSTAT_QUERY_TIMEOUT_MS", 10_000)?,
            site_cache_ttl_secs: env_or("VEILSTAT_SITE_CACHE_TTL_SECS", 60)?,
        })
    }

    pub fn salt_ttl(&self) -> Duration {
        Duration::from_secs(self.salt_ttl_secs)
    }

    pub fn salt_maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.salt_maintenance_interval_secs.max(1))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn site_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.site_cache_ttl_secs)
    }
}
