use chrono::{DateTime, Utc};
use roprox_core::error::AppError;
use roprox_core::models::{CandidateProxy, EvictionFilter, ProxyRecord, ProxyStatus, StatusUpdate};
use roprox_core::score::ScorePolicy;
use roprox_core::traits::ProxyStore;
use sqlx::{PgPool, Pool, Postgres};

const COLUMNS: &str = "source, host, port, type AS proxy_type, loc, status, \
                       success_count, fail_count, score, last_check, last_scanned";

fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

/// The `proxy_list` table.
///
/// Every method is a single statement, so each write is atomic on its own
/// and concurrent writers to one row resolve last-write-wins.
#[derive(Clone)]
pub struct ProxyRepository {
    pool: Pool<Postgres>,
}

impl ProxyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records never probed or last probed at or before `older_than`,
    /// never-probed first.
    pub async fn select_stale(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ProxyRecord>, AppError> {
        let rows = sqlx::query_as::<_, ProxyRow>(&format!(
            "SELECT {COLUMNS} FROM proxy_list \
             WHERE last_check IS NULL OR last_check <= $1 \
             ORDER BY last_check ASC NULLS FIRST"
        ))
        .bind(older_than)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Insert a never-probed record or refresh an existing one.
    ///
    /// Status, counters, score and `last_check` are left alone on conflict;
    /// a missing location doesn't erase a known one.
    pub async fn upsert(
        &self,
        candidate: &CandidateProxy,
        seen_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO proxy_list (source, host, port, type, loc, status, last_scanned)
            VALUES ($1, $2, $3, $4, $5, 'UNK', $6)
            ON CONFLICT (host, port) DO UPDATE SET
                source = EXCLUDED.source,
                type = EXCLUDED.type,
                loc = COALESCE(EXCLUDED.loc, proxy_list.loc),
                last_scanned = EXCLUDED.last_scanned
            "#,
        )
        .bind(&candidate.source)
        .bind(&candidate.host)
        .bind(i32::from(candidate.port))
        .bind(candidate.proxy_type.as_str())
        .bind(&candidate.location)
        .bind(seen_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Write back a probe result, bump the matching counter and rescore.
    ///
    /// The row is locked for the read-modify-write, so the score always
    /// matches the counters stored next to it. `last_check` never moves
    /// backwards: if the stored value is not older than the new one it
    /// advances by one microsecond instead.
    pub async fn update_status(
        &self,
        update: &StatusUpdate,
        policy: &dyn ScorePolicy,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let counters: Option<(i32, i32)> = sqlx::query_as(
            "SELECT success_count, fail_count FROM proxy_list \
             WHERE host = $1 AND port = $2 FOR UPDATE",
        )
        .bind(&update.host)
        .bind(i32::from(update.port))
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some((success, fail)) = counters else {
            tx.rollback().await.map_err(db_err)?;
            return Ok(false);
        };
        let (success, fail) = match update.status {
            ProxyStatus::Ok => (success.saturating_add(1), fail),
            _ => (success, fail.saturating_add(1)),
        };
        let score = policy.score(success.max(0) as u32, fail.max(0) as u32);

        sqlx::query(
            r#"
            UPDATE proxy_list SET
                status = $3,
                last_check = CASE
                    WHEN last_check IS NOT NULL AND last_check >= $4
                        THEN last_check + INTERVAL '1 microsecond'
                    ELSE $4
                END,
                success_count = $5,
                fail_count = $6,
                score = $7
            WHERE host = $1 AND port = $2
            "#,
        )
        .bind(&update.host)
        .bind(i32::from(update.port))
        .bind(update.status.as_str())
        .bind(update.last_check)
        .bind(success)
        .bind(fail)
        .bind(score)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    pub async fn delete_where(&self, filter: &EvictionFilter) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM proxy_list
            WHERE status = $1
              AND last_scanned <= $2
              AND ($3::float8 IS NULL OR score < $3)
            "#,
        )
        .bind(filter.status.as_str())
        .bind(filter.last_scanned_before)
        .bind(filter.score_below)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    pub async fn get(&self, host: &str, port: u16) -> Result<Option<ProxyRecord>, AppError> {
        let row = sqlx::query_as::<_, ProxyRow>(&format!(
            "SELECT {COLUMNS} FROM proxy_list WHERE host = $1 AND port = $2"
        ))
        .bind(host)
        .bind(i32::from(port))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(Into::into))
    }

    /// Records with the given status (all if `None`), best score first.
    pub async fn list(
        &self,
        status: Option<ProxyStatus>,
        limit: usize,
    ) -> Result<Vec<ProxyRecord>, AppError> {
        let rows = sqlx::query_as::<_, ProxyRow>(&format!(
            "SELECT {COLUMNS} FROM proxy_list \
             WHERE ($1::varchar IS NULL OR status = $1) \
             ORDER BY score DESC, last_check DESC NULLS LAST, host, port \
             LIMIT $2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn count_by_status(&self, status: ProxyStatus) -> Result<i64, AppError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM proxy_list WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.0)
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ProxyRow {
    source: String,
    host: String,
    port: i32,
    proxy_type: String,
    loc: Option<String>,
    status: String,
    success_count: i32,
    fail_count: i32,
    score: f64,
    last_check: Option<DateTime<Utc>>,
    last_scanned: DateTime<Utc>,
}

impl From<ProxyRow> for ProxyRecord {
    fn from(row: ProxyRow) -> Self {
        ProxyRecord {
            source: row.source,
            host: row.host,
            // Range enforced by chk_proxy_list_port.
            port: row.port as u16,
            proxy_type: row.proxy_type.parse().unwrap_or_default(),
            location: row.loc,
            status: row.status.parse().unwrap_or(ProxyStatus::Unknown),
            success_count: row.success_count.max(0) as u32,
            fail_count: row.fail_count.max(0) as u32,
            score: row.score,
            last_check: row.last_check,
            last_scanned: row.last_scanned,
        }
    }
}

// -- Trait implementation --

impl ProxyStore for ProxyRepository {
    async fn select_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<ProxyRecord>, AppError> {
        ProxyRepository::select_stale(self, older_than).await
    }

    async fn upsert(&self, candidate: &CandidateProxy, seen_at: DateTime<Utc>) -> Result<(), AppError> {
        ProxyRepository::upsert(self, candidate, seen_at).await
    }

    async fn update_status(
        &self,
        update: &StatusUpdate,
        policy: &dyn ScorePolicy,
    ) -> Result<bool, AppError> {
        ProxyRepository::update_status(self, update, policy).await
    }

    async fn delete_where(&self, filter: &EvictionFilter) -> Result<u64, AppError> {
        ProxyRepository::delete_where(self, filter).await
    }

    async fn get(&self, host: &str, port: u16) -> Result<Option<ProxyRecord>, AppError> {
        ProxyRepository::get(self, host, port).await
    }

    async fn list(
        &self,
        status: Option<ProxyStatus>,
        limit: usize,
    ) -> Result<Vec<ProxyRecord>, AppError> {
        ProxyRepository::list(self, status, limit).await
    }

    async fn count_by_status(&self, status: ProxyStatus) -> Result<i64, AppError> {
        ProxyRepository::count_by_status(self, status).await
    }
}
