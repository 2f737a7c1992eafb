//! Ports the engine depends on without owning their implementation.
//!
//! Production wires these to Postgres, Redis and the exchange client; the
//! backtest driver and the test suites wire them to in-memory doubles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{Candle, ExecutionLogRecord, MarketType, Order, Timeframe};
use crate::pipeline::TradingContext;
use crate::{Result, ServiceError};

/// The currently open position for a pipeline, as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionInfo {
    pub position_id: Uuid,
    pub order_id: Uuid,
    pub symbol: String,
    pub entry_price: f64,
    pub quantity: f64,
}

/// Read access to the position store.
#[async_trait]
pub trait PositionProvider: Send + Sync {
    async fn get_open_position(
        &self,
        pipeline_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Option<PositionInfo>>;
}

/// Places and settles trades on behalf of the entry step.
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute_buy(
        &self,
        ctx: TradingContext,
        quantity: f64,
        cancel: &CancellationToken,
    ) -> Result<(TradingContext, String)>;

    async fn execute_sell(
        &self,
        ctx: TradingContext,
        cancel: &CancellationToken,
    ) -> Result<(TradingContext, String)>;
}

/// Submits an order to an exchange, returning the exchange order id.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn place_order(&self, order: &Order, cancel: &CancellationToken) -> Result<String>;
}

/// Historical candle queries. Results are ordered newest-first.
#[async_trait]
pub trait CandleStore: Send + Sync {
    async fn query_candles(
        &self,
        symbol: &str,
        market: MarketType,
        timeframe: Timeframe,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>>;

    /// The most recent `limit` candles, newest-first.
    async fn recent_candles(
        &self,
        symbol: &str,
        market: MarketType,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.query_candles(symbol, market, timeframe, None, None, Some(limit))
            .await
    }
}

/// Sink for the runner's per-step audit records. Write-only.
#[async_trait]
pub trait ExecutionLogSink: Send + Sync {
    async fn append(&self, record: ExecutionLogRecord) -> Result<()>;
}

/// Race an I/O future against the cancellation token.
///
/// A token fired mid-operation surfaces as an error, which steps treat as
/// `Fail`; the runner handles tokens observed between steps separately.
pub async fn guarded<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ServiceError::cancelled()),
        result = fut => result,
    }
}
