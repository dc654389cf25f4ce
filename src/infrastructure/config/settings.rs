use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub audience: AudienceConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

/// Selects the persistence backend for campaigns, deliveries and collaborators.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// "memory" (default) or "postgres"
    #[serde(default = "default_memory_backend")]
    pub backend: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Channel prefix used when publishing per-user messages
    #[serde(default = "default_publish_prefix")]
    pub publish_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the background due-scan runs in this process
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// "memory" (default) or "redis"
    #[serde(default = "default_memory_backend")]
    pub backend: String,
    /// Redis sorted-set key for the schedule index
    #[serde(default = "default_schedule_key")]
    pub redis_key: String,
    /// Due-scan interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Interval for rebuilding the index from the campaign store
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    /// Maximum campaigns dispatched concurrently by one worker
    #[serde(default = "default_max_concurrent_campaigns")]
    pub max_concurrent_campaigns: usize,
    /// Maximum due entries taken per scan
    #[serde(default = "default_scan_batch")]
    pub scan_batch_size: usize,
    /// A `sending` campaign whose heartbeat is older than this is taken over
    /// by reconcile
    #[serde(default = "default_stale_dispatch")]
    pub stale_dispatch_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Maximum concurrent per-recipient sends within one campaign
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
    /// Timeout for a single send attempt
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Attempts per recipient (first try included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// How often a running fan-out refreshes its campaign's `updated_at`;
    /// keep well below `scheduler.stale_dispatch_secs`
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudienceConfig {
    /// Timeout for each audience directory query
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_true() -> bool {
    true
}

fn default_memory_backend() -> String {
    "memory".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_idle_timeout() -> u32 {
    300
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_publish_prefix() -> String {
    "notification:user".to_string()
}

fn default_schedule_key() -> String {
    "broadcast:schedule".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_reconcile_interval() -> u64 {
    300 // 5 minutes
}

fn default_max_concurrent_campaigns() -> usize {
    4
}

fn default_scan_batch() -> usize {
    100
}

fn default_stale_dispatch() -> u64 {
    300
}

fn default_max_concurrent_sends() -> usize {
    100
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_initial_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    5000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_query_timeout_ms() -> u64 {
    10_000
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "broadcast-campaign-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8082)?
            .set_default("storage.backend", "memory")?
            .set_default("scheduler.poll_interval_ms", 1000)?
            .set_default("dispatch.max_concurrent_sends", 100)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, JWT__SECRET, DATABASE__URL, SCHEDULER__BACKEND, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            publish_prefix: default_publish_prefix(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: default_memory_backend(),
            redis_key: default_schedule_key(),
            poll_interval_ms: default_poll_interval_ms(),
            reconcile_interval_secs: default_reconcile_interval(),
            max_concurrent_campaigns: default_max_concurrent_campaigns(),
            scan_batch_size: default_scan_batch(),
            stale_dispatch_secs: default_stale_dispatch(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sends: default_max_concurrent_sends(),
            send_timeout_ms: default_send_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl Default for AudienceConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8082);
    }

    #[test]
    fn test_backends_default_to_memory() {
        assert_eq!(StorageConfig::default().backend, "memory");
        assert_eq!(SchedulerConfig::default().backend, "memory");
        assert!(!RedisConfig::default().enabled);
    }

    #[test]
    fn test_dispatch_defaults_bound_sends() {
        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.max_concurrent_sends, 100);
        assert_eq!(dispatch.max_attempts, 3);
        assert!(dispatch.send_timeout_ms > 0);
    }
}
