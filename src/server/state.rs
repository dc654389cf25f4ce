use std::sync::Arc;
use std::time::Instant;

use crate::auth::JwtValidator;
use crate::broadcast::BroadcastService;
use crate::config::Settings;
use crate::domain::access::{create_access_control, AccessControl};
use crate::domain::audience::{create_audience_directory, AudienceDirectory, AudienceResolver};
use crate::domain::campaign::{create_campaign_store, CampaignStore};
use crate::domain::delivery::{
    create_delivery_store, create_message_sender, DeliveryStore, Dispatcher, MessageSender,
};
use crate::domain::schedule::{create_schedule_index, ScheduleIndex, ScheduleTrigger};
use crate::postgres::PostgresPool;
use crate::redis::RedisPool;

/// Storage and collaborator backends the service is assembled from.
pub struct Backends {
    pub campaigns: Arc<dyn CampaignStore>,
    pub deliveries: Arc<dyn DeliveryStore>,
    pub directory: Arc<dyn AudienceDirectory>,
    pub schedule_index: Arc<dyn ScheduleIndex>,
    pub sender: Arc<dyn MessageSender>,
    pub access: Arc<dyn AccessControl>,
}

impl Backends {
    /// Pick every backend from configuration and the pools that connected.
    pub fn from_settings(
        settings: &Settings,
        postgres_pool: Option<Arc<PostgresPool>>,
        redis_pool: Option<Arc<RedisPool>>,
    ) -> Self {
        Self {
            campaigns: create_campaign_store(&settings.storage, postgres_pool.clone()),
            deliveries: create_delivery_store(&settings.storage, postgres_pool.clone()),
            directory: create_audience_directory(&settings.storage, postgres_pool.clone()),
            schedule_index: create_schedule_index(&settings.scheduler, redis_pool.clone()),
            sender: create_message_sender(&settings.redis, redis_pool),
            access: create_access_control(&settings.storage, postgres_pool),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub broadcast: Arc<BroadcastService>,
    pub campaigns: Arc<dyn CampaignStore>,
    pub trigger: Arc<ScheduleTrigger>,
    pub dispatcher: Arc<Dispatcher>,
    pub postgres_pool: Option<Arc<PostgresPool>>,
    pub redis_pool: Option<Arc<RedisPool>>,
    pub start_time: Instant,
}

impl AppState {
    /// Connect the configured pools and build the service. A pool that cannot
    /// be created is logged and its backends fall back to memory.
    pub async fn new(settings: Settings) -> Self {
        let postgres_pool = if settings.storage.backend == "postgres" {
            match PostgresPool::new(&settings.database).await {
                Ok(pool) => Some(Arc::new(pool)),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create PostgreSQL pool");
                    None
                }
            }
        } else {
            None
        };

        let redis_pool = if settings.redis.enabled {
            match RedisPool::new(&settings.redis) {
                Ok(pool) => {
                    if let Err(e) = pool.ping().await {
                        tracing::warn!(error = %e, "Redis not reachable yet, will retry on use");
                    }
                    Some(Arc::new(pool))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create Redis pool");
                    None
                }
            }
        } else {
            None
        };

        let backends = Backends::from_settings(&settings, postgres_pool.clone(), redis_pool.clone());
        Self::with_backends(settings, backends, postgres_pool, redis_pool)
    }

    pub fn with_backends(
        settings: Settings,
        backends: Backends,
        postgres_pool: Option<Arc<PostgresPool>>,
        redis_pool: Option<Arc<RedisPool>>,
    ) -> Self {
        let jwt_validator = Arc::new(JwtValidator::new(&settings.jwt));
        let resolver = Arc::new(AudienceResolver::new(backends.directory, &settings.audience));
        let trigger = Arc::new(ScheduleTrigger::new(
            backends.schedule_index,
            backends.campaigns.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            backends.campaigns.clone(),
            backends.deliveries.clone(),
            resolver.clone(),
            backends.sender,
            settings.dispatch.clone(),
        ));
        let broadcast = Arc::new(BroadcastService::new(
            backends.campaigns.clone(),
            backends.deliveries,
            resolver,
            trigger.clone(),
            dispatcher.clone(),
            backends.access,
        ));

        Self {
            settings: Arc::new(settings),
            jwt_validator,
            broadcast,
            campaigns: backends.campaigns,
            trigger,
            dispatcher,
            postgres_pool,
            redis_pool,
            start_time: Instant::now(),
        }
    }
}
