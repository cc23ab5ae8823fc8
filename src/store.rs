//! Postgres-backed repositories: routing (C4), gateway health (C5), and
//! transactions (C6). A single `PgPool` is shared across all three via one
//! `Arc<AppState>`-style composition root — there are no module-level
//! singletons (see DESIGN.md's "module-level singletons -> dependency-
//! injected services" note).

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::StoreError;
use crate::models::{Country, Gateway, GatewayDetail, HealthStatus, Transaction, TransactionStatus};

/// Builds the shared connection pool. Bounded per §5 ("the store connection
/// pool (bounded, shared read-write, no explicit locking in this layer")).
pub async fn connect(uri: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(uri)
        .await
        .map_err(StoreError::from)
}

/// Routing repository (C4): the highest-priority healthy gateway for a
/// country, per §4.4.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoutingRepository: Send + Sync {
    async fn healthy_gateway_for_country(
        &self,
        country_id: i64,
    ) -> Result<Option<GatewayDetail>, StoreError>;
}

/// Gateway health repository (C5), per §4.5.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayHealthRepository: Send + Sync {
    async fn set_health(&self, gateway_id: i64, status: HealthStatus) -> Result<(), StoreError>;
}

/// Transaction repository (C6), per §4.6.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, tx: &mut Transaction) -> Result<(), StoreError>;
    async fn update_status_by_reference(
        &self,
        reference_id: uuid::Uuid,
        status: TransactionStatus,
    ) -> Result<(), StoreError>;
    async fn update_gateway_id_by_id(
        &self,
        id: i64,
        gateway_id: i64,
    ) -> Result<(), StoreError>;
    /// Idempotent lookup (§11 supplement), used by the callback handler to
    /// recognize an unknown reference instead of issuing a blind UPDATE.
    async fn find_by_reference(
        &self,
        reference_id: uuid::Uuid,
    ) -> Result<Option<Transaction>, StoreError>;
}

/// Country repository (§11 supplement): validates that a request's
/// `country_id` resolves to a real country before it is accepted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CountryRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Country>, StoreError>;
}

/// Thin `sqlx`-backed repository implementing all three traits above
/// (routing, gateway health, transactions) against one connection pool.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoutingRepository for PgRepository {
    async fn healthy_gateway_for_country(
        &self,
        country_id: i64,
    ) -> Result<Option<GatewayDetail>, StoreError> {
        // Ties on `priority` are broken by the lowest `gateway_id` (§9 Open
        // Question: tie-break rule) via the secondary ORDER BY key.
        let detail = sqlx::query_as::<_, GatewayDetail>(
            r#"
            SELECT
                g.id   AS gateway_id,
                g.name AS name,
                g.data_format_supported AS data_format_supported,
                g.health_status AS health_status,
                gc.priority AS priority,
                gc.country_id AS country_id,
                c.currency AS currency
            FROM gateway_countries gc
            JOIN gateways g ON gc.gateway_id = g.id
            JOIN countries c ON gc.country_id = c.id
            WHERE gc.country_id = $1
              AND g.health_status = 'healthy'
            ORDER BY gc.priority ASC, g.id ASC
            LIMIT 1
            "#,
        )
        .bind(country_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(detail)
    }
}

#[async_trait]
impl GatewayHealthRepository for PgRepository {
    async fn set_health(&self, gateway_id: i64, status: HealthStatus) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE gateways
            SET health_status = $1, last_checked_at = NOW(), updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(status)
        .bind(gateway_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError(format!("no gateway found with id {gateway_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionRepository for PgRepository {
    async fn insert(&self, tx: &mut Transaction) -> Result<(), StoreError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO transactions (
                reference_id, amount, currency, type, status, country_id, user_id,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(tx.reference_id)
        .bind(tx.amount)
        .bind(&tx.currency)
        .bind(tx.kind)
        .bind(tx.status)
        .bind(tx.country_id)
        .bind(tx.user_id)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .fetch_one(&self.pool)
        .await?;

        tx.id = row.0;
        Ok(())
    }

    async fn update_status_by_reference(
        &self,
        reference_id: uuid::Uuid,
        status: TransactionStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $1, updated_at = NOW()
            WHERE reference_id = $2
            "#,
        )
        .bind(status)
        .bind(reference_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError(format!(
                "no transaction found with reference_id {reference_id}"
            )));
        }
        Ok(())
    }

    async fn update_gateway_id_by_id(&self, id: i64, gateway_id: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET gateway_id = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(gateway_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError(format!("no transaction found with id {id}")));
        }
        Ok(())
    }

    async fn find_by_reference(
        &self,
        reference_id: uuid::Uuid,
    ) -> Result<Option<Transaction>, StoreError> {
        let tx = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE reference_id = $1",
        )
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tx)
    }
}

#[async_trait]
impl CountryRepository for PgRepository {
    async fn get(&self, id: i64) -> Result<Option<Country>, StoreError> {
        let country = sqlx::query_as::<_, Country>("SELECT * FROM countries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(country)
    }
}

/// Active gateway ids, for the health control loop (C11) to iterate
/// without a cache (§5: "There is no in-process cache of gateway health").
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayDirectory: Send + Sync {
    async fn active_gateway_ids(&self) -> Result<Vec<i64>, StoreError>;
    async fn get(&self, gateway_id: i64) -> Result<Option<Gateway>, StoreError>;
}

#[async_trait]
impl GatewayDirectory for PgRepository {
    async fn active_gateway_ids(&self) -> Result<Vec<i64>, StoreError> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM gateways ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn get(&self, gateway_id: i64) -> Result<Option<Gateway>, StoreError> {
        let gateway = sqlx::query_as::<_, Gateway>("SELECT * FROM gateways WHERE id = $1")
            .bind(gateway_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(gateway)
    }
}
