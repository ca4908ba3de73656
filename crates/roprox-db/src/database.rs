use roprox_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::proxy_repository::ProxyRepository;

/// Connection pool for the proxy store, plus schema setup.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::debug!(max_connections = config.max_connections, "Connected to proxy store");
        Ok(Self { pool })
    }

    /// Wrap a pool opened elsewhere, e.g. against a test container.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create or upgrade the `proxy_list` table.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        tracing::debug!("Database migrations applied");
        Ok(())
    }

    pub fn proxy_repo(&self) -> ProxyRepository {
        ProxyRepository::new(self.pool.clone())
    }
}
