use crate::config::Config;
use crate::fanout::{FanoutHub, SessionAuthenticator};
use crate::services::LedgerServices;
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub services: LedgerServices,
    /// Connections held by this process
    pub hub: Arc<FanoutHub>,
    pub sessions: Arc<dyn SessionAuthenticator>,
    /// Only set when running against real stores; checked by the health endpoint
    pub db: Option<PgPool>,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    pub fn new(
        config: Config,
        services: LedgerServices,
        hub: Arc<FanoutHub>,
        sessions: Arc<dyn SessionAuthenticator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            services,
            hub,
            sessions,
            db: None,
            redis: None,
        }
    }

    pub fn with_database(mut self, db: PgPool) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_redis(mut self, redis: ConnectionManager) -> Self {
        self.redis = Some(redis);
        self
    }
}
