use crate::domain::{BlacklistReason, IssuedToken, PendingRequest, WinnerClaim};
use crate::error::{BrokerError, Result};
use crate::persistence::{LedgerStore, TokenStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashSet;
use tracing::{debug, info, instrument};

/// PostgreSQL storage adapter for the ledger and the token store
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn pending_from_row(row: &PgRow) -> Result<PendingRequest> {
    Ok(PendingRequest {
        catalog_id: row.try_get("catalog_id")?,
        request_id: row.try_get("request_id")?,
        requester_service: row.try_get("requester_service")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn reason_from_row(row: &PgRow) -> Result<BlacklistReason> {
    let raw: String = row.try_get("reason")?;
    raw.parse::<BlacklistReason>().map_err(BrokerError::Store)
}

// ==================== Ledger ====================

#[async_trait]
impl LedgerStore for PostgresStore {
    #[instrument(skip(self, request), fields(catalog_id = %request.catalog_id, request_id = %request.request_id))]
    async fn put(&self, request: &PendingRequest, now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // A lapsed bucket takes its entries with it before the new one is opened
        sqlx::query("DELETE FROM pending_buckets WHERE catalog_id = $1 AND expires_at <= $2")
            .bind(&request.catalog_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO pending_buckets (catalog_id, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (catalog_id) DO UPDATE SET
                expires_at = GREATEST(pending_buckets.expires_at, EXCLUDED.expires_at)
            "#,
        )
        .bind(&request.catalog_id)
        .bind(request.expires_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO pending_requests
                (catalog_id, request_id, requester_service, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (catalog_id, request_id) DO UPDATE SET
                requester_service = EXCLUDED.requester_service,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&request.catalog_id)
        .bind(&request.request_id)
        .bind(&request.requester_service)
        .bind(request.created_at)
        .bind(request.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list(&self, catalog_id: &str, now: DateTime<Utc>) -> Result<Vec<PendingRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT r.catalog_id, r.request_id, r.requester_service, r.created_at, r.expires_at
            FROM pending_requests r
            JOIN pending_buckets b ON b.catalog_id = r.catalog_id
            WHERE r.catalog_id = $1 AND b.expires_at > $2
            ORDER BY r.created_at, r.request_id
            "#,
        )
        .bind(catalog_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(pending_from_row).collect()
    }

    async fn remove(&self, catalog_id: &str, request_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let deleted =
            sqlx::query("DELETE FROM pending_requests WHERE catalog_id = $1 AND request_id = $2")
                .bind(catalog_id)
                .bind(request_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        sqlx::query(
            r#"
            DELETE FROM pending_buckets b
            WHERE b.catalog_id = $1
              AND NOT EXISTS (SELECT 1 FROM pending_requests r WHERE r.catalog_id = $1)
            "#,
        )
        .bind(catalog_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn catalogs(&self, now: DateTime<Utc>) -> Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT b.catalog_id
            FROM pending_buckets b
            JOIN pending_requests r ON r.catalog_id = b.catalog_id
            WHERE b.expires_at > $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().collect())
    }

    async fn bucket_expiry(
        &self,
        catalog_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let expiry: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT expires_at FROM pending_buckets WHERE catalog_id = $1 AND expires_at > $2",
        )
        .bind(catalog_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(expiry)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let purged = sqlx::query("DELETE FROM pending_buckets WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(purged)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

// ==================== Tokens ====================

// Expiry filters bind the application clock, as the writers do
const SELECT_BLACKLIST_REASON: &str =
    "SELECT reason FROM token_blacklist WHERE token_id = $1 AND expires_at > $2";

const SELECT_ISSUED_FOR_REQUEST: &str = r#"
    SELECT token_id, peer_id, catalog_id, request_id
    FROM issued_tokens
    WHERE catalog_id = $1 AND request_id = $2 AND expires_at > $3
"#;

const SELECT_WINNER: &str = r#"
    SELECT token_id FROM request_winners
    WHERE catalog_id = $1 AND request_id = $2 AND expires_at > $3
"#;

#[async_trait]
impl TokenStore for PostgresStore {
    async fn set_blacklist(
        &self,
        token_id: &str,
        reason: BlacklistReason,
        ttl: Duration,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO token_blacklist (token_id, reason, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (token_id) DO UPDATE SET
                reason = EXCLUDED.reason,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(token_id)
        .bind(reason.as_str())
        .bind(Utc::now() + ttl)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn insert_blacklist_if_absent(
        &self,
        token_id: &str,
        reason: BlacklistReason,
        ttl: Duration,
    ) -> Result<Option<BlacklistReason>> {
        let now = Utc::now();

        // Only a lapsed row may be taken over; a live one makes the update a no-op
        let inserted: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO token_blacklist (token_id, reason, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (token_id) DO UPDATE SET
                reason = EXCLUDED.reason,
                expires_at = EXCLUDED.expires_at
            WHERE token_blacklist.expires_at <= $4
            RETURNING token_id
            "#,
        )
        .bind(token_id)
        .bind(reason.as_str())
        .bind(now + ttl)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            return Ok(None);
        }

        let existing = self.blacklist_reason(token_id).await?;
        debug!(%token_id, ?existing, "Blacklist entry already present");
        Ok(Some(existing.unwrap_or(reason)))
    }

    async fn blacklist_reason(&self, token_id: &str) -> Result<Option<BlacklistReason>> {
        let row = sqlx::query(SELECT_BLACKLIST_REASON)
            .bind(token_id)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(reason_from_row).transpose()
    }

    async fn record_issued(&self, token: &IssuedToken, ttl: Duration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO issued_tokens (token_id, peer_id, catalog_id, request_id, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (token_id) DO NOTHING
            "#,
        )
        .bind(&token.token_id)
        .bind(&token.peer_id)
        .bind(&token.catalog_id)
        .bind(&token.request_id)
        .bind(Utc::now() + ttl)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn issued_for_request(
        &self,
        catalog_id: &str,
        request_id: &str,
    ) -> Result<Vec<IssuedToken>> {
        let rows = sqlx::query(SELECT_ISSUED_FOR_REQUEST)
            .bind(catalog_id)
            .bind(request_id)
            .bind(Utc::now())
            .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(IssuedToken {
                    token_id: row.try_get("token_id")?,
                    peer_id: row.try_get("peer_id")?,
                    catalog_id: row.try_get("catalog_id")?,
                    request_id: row.try_get("request_id")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn claim_winner(
        &self,
        catalog_id: &str,
        request_id: &str,
        token_id: &str,
        ttl: Duration,
    ) -> Result<WinnerClaim> {
        let now = Utc::now();

        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO request_winners (catalog_id, request_id, token_id, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (catalog_id, request_id) DO UPDATE SET
                token_id = EXCLUDED.token_id,
                expires_at = EXCLUDED.expires_at
            WHERE request_winners.expires_at <= $5
            RETURNING token_id
            "#,
        )
        .bind(catalog_id)
        .bind(request_id)
        .bind(token_id)
        .bind(now + ttl)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(WinnerClaim::Won);
        }

        match self.winner_of(catalog_id, request_id).await? {
            Some(winner) if winner == token_id => Ok(WinnerClaim::Won),
            Some(winner) => Ok(WinnerClaim::Lost {
                winner_token_id: winner,
            }),
            // Lapsed and swept between the two statements; nobody holds it now
            None => Err(BrokerError::Store(format!(
                "winner key for {catalog_id}/{request_id} vanished during claim"
            ))),
        }
    }

    async fn winner_of(&self, catalog_id: &str, request_id: &str) -> Result<Option<String>> {
        let winner: Option<String> = sqlx::query_scalar(SELECT_WINNER)
            .bind(catalog_id)
            .bind(request_id)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
        .await?;

        Ok(winner)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut purged = 0u64;
        for table in ["token_blacklist", "issued_tokens", "request_winners"] {
            purged += sqlx::query(&format!("DELETE FROM {table} WHERE expires_at <= $1"))
                .bind(now)
                .execute(&self.pool)
                .await?
                .rows_affected();
        }
        Ok(purged)
    }
}
