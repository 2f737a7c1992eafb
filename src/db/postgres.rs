use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgExecutor, PgPool, Row};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{
    ExecutionLogRecord, Order, OrderStatus, Pipeline, PipelineStepConfig, Position,
};
use crate::ports::{guarded, ExecutionLogSink, PositionInfo, PositionProvider};
use crate::{Result, ServiceError};

/// Connect to Postgres and run pending migrations.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|err| ServiceError::Unexpected(err.into()))?;

    tracing::info!("Connected to Postgres at {}", database_url);

    Ok(pool)
}

fn decimal_to_f64(value: rust_decimal::Decimal, column: &str) -> Result<f64> {
    value
        .to_f64()
        .ok_or_else(|| ServiceError::api(format!("numeric column {} out of f64 range", column)))
}

/// Order rows. Functions are generic over the executor so the same query
/// runs on the pool or inside a transaction.
pub struct OrderRepository;

impl OrderRepository {
    pub async fn insert<'e, E: PgExecutor<'e>>(executor: E, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, pipeline_id, symbol, market, side, quantity, price,
                status, exchange_order_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id)
        .bind(order.pipeline_id)
        .bind(&order.symbol)
        .bind(order.market.as_str())
        .bind(order.side.as_str())
        .bind(order.quantity)
        .bind(order.price)
        .bind(order.status.as_str())
        .bind(&order.exchange_order_id)
        .bind(order.created_at)
        .execute(executor)
        .await?;

        tracing::debug!("Saved order {} for pipeline {}", order.id, order.pipeline_id);

        Ok(())
    }

    pub async fn update_status<'e, E: PgExecutor<'e>>(
        executor: E,
        order_id: Uuid,
        status: OrderStatus,
        exchange_order_id: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2,
                exchange_order_id = COALESCE($3, exchange_order_id),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .bind(status.as_str())
        .bind(exchange_order_id)
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound(format!("order {}", order_id)));
        }

        Ok(())
    }
}

/// Position rows.
pub struct PositionRepository;

impl PositionRepository {
    pub async fn insert<'e, E: PgExecutor<'e>>(executor: E, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, pipeline_id, order_id, symbol, entry_price, quantity,
                status, opened_at, closed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(position.id)
        .bind(position.pipeline_id)
        .bind(position.order_id)
        .bind(&position.symbol)
        .bind(position.entry_price)
        .bind(position.quantity)
        .bind(position.status.as_str())
        .bind(position.opened_at)
        .bind(position.closed_at)
        .execute(executor)
        .await?;

        tracing::debug!(
            "Saved position {} for pipeline {}",
            position.id,
            position.pipeline_id
        );

        Ok(())
    }

    pub async fn find_open_by_pipeline<'e, E: PgExecutor<'e>>(
        executor: E,
        pipeline_id: Uuid,
    ) -> Result<Option<PositionInfo>> {
        let row = sqlx::query(
            r#"
            SELECT id, order_id, symbol, entry_price, quantity
            FROM positions
            WHERE pipeline_id = $1 AND status = 'Open'
            ORDER BY opened_at DESC
            LIMIT 1
            "#,
        )
        .bind(pipeline_id)
        .fetch_optional(executor)
        .await?;

        row.map(|row| {
            let entry_price: rust_decimal::Decimal = row.get("entry_price");
            let quantity: rust_decimal::Decimal = row.get("quantity");
            Ok(PositionInfo {
                position_id: row.get("id"),
                order_id: row.get("order_id"),
                symbol: row.get("symbol"),
                entry_price: decimal_to_f64(entry_price, "entry_price")?,
                quantity: decimal_to_f64(quantity, "quantity")?,
            })
        })
        .transpose()
    }

    pub async fn close_open_for_pipeline<'e, E: PgExecutor<'e>>(
        executor: E,
        pipeline_id: Uuid,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET status = 'Closed', closed_at = NOW()
            WHERE pipeline_id = $1 AND status = 'Open'
            "#,
        )
        .bind(pipeline_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Append-only audit trail written by the runner.
pub struct ExecutionLogRepository;

impl ExecutionLogRepository {
    pub async fn insert<'e, E: PgExecutor<'e>>(
        executor: E,
        record: &ExecutionLogRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_logs (
                pipeline_id, execution_id, step_key, outcome, message,
                context, started_at, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.pipeline_id)
        .bind(&record.execution_id)
        .bind(&record.step_key)
        .bind(&record.outcome)
        .bind(&record.message)
        .bind(&record.context)
        .bind(record.started_at)
        .bind(record.finished_at)
        .execute(executor)
        .await?;

        Ok(())
    }
}

/// Pipelines and their persisted step configuration.
pub struct PipelineRepository;

impl PipelineRepository {
    pub async fn list_active<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<Pipeline>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, symbol, market, is_active
            FROM pipelines
            WHERE is_active = TRUE
            ORDER BY name ASC
            "#,
        )
        .fetch_all(executor)
        .await?;

        rows.into_iter()
            .map(|row| {
                let market: String = row.get("market");
                Ok(Pipeline {
                    id: row.get("id"),
                    name: row.get("name"),
                    symbol: row.get("symbol"),
                    market: market.parse().map_err(ServiceError::api)?,
                    is_active: row.get("is_active"),
                })
            })
            .collect()
    }

    pub async fn step_configs<'e, E: PgExecutor<'e>>(
        executor: E,
        pipeline_id: Uuid,
    ) -> Result<Vec<PipelineStepConfig>> {
        let rows = sqlx::query(
            r#"
            SELECT step_key, step_order, is_enabled, parameters
            FROM pipeline_steps
            WHERE pipeline_id = $1
            ORDER BY step_order ASC
            "#,
        )
        .bind(pipeline_id)
        .fetch_all(executor)
        .await?;

        rows.into_iter()
            .map(|row| {
                let parameters: serde_json::Value = row.get("parameters");
                Ok(PipelineStepConfig {
                    step_key: row.get("step_key"),
                    order: row.get("step_order"),
                    is_enabled: row.get("is_enabled"),
                    parameters: serde_json::from_value(parameters)?,
                })
            })
            .collect()
    }
}

/// Postgres-backed position port.
pub struct PgPositionProvider {
    pool: PgPool,
}

impl PgPositionProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PositionProvider for PgPositionProvider {
    async fn get_open_position(
        &self,
        pipeline_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Option<PositionInfo>> {
        guarded(
            cancel,
            PositionRepository::find_open_by_pipeline(&self.pool, pipeline_id),
        )
        .await
    }
}

/// Postgres-backed audit sink.
pub struct PgExecutionLogSink {
    pool: PgPool,
}

impl PgExecutionLogSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionLogSink for PgExecutionLogSink {
    async fn append(&self, record: ExecutionLogRecord) -> Result<()> {
        ExecutionLogRepository::insert(&self.pool, &record).await
    }
}
