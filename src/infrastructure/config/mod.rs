mod settings;

pub use settings::{
    AudienceConfig, DatabaseConfig, DispatchConfig, JwtConfig, OtelConfig, RedisConfig,
    SchedulerConfig, ServerConfig, Settings, StorageConfig,
};
