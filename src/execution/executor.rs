use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::db::{OrderRepository, PositionRepository};
use crate::models::{Order, OrderSide, OrderStatus, Position, TradingAction};
use crate::pipeline::TradingContext;
use crate::ports::{OrderExecutor, TradeExecutor};
use crate::{Result, ServiceError};

/// Trade executor backed by Postgres and an exchange port.
///
/// Order placement is a two-phase protocol. The pending order row is
/// written in its own unit of work before the exchange is called, so a
/// submitted-but-unconfirmed order stays visible even across a crash.
/// After the exchange confirms, the order update and the position write
/// happen in one transaction: there is never a Placed order without its
/// position, nor a position for an order that was not placed.
pub struct LiveTradeExecutor {
    pool: PgPool,
    exchange: Arc<dyn OrderExecutor>,
}

impl LiveTradeExecutor {
    pub fn new(pool: PgPool, exchange: Arc<dyn OrderExecutor>) -> Self {
        Self { pool, exchange }
    }

    async fn place_on_exchange(
        &self,
        order: &Order,
        cancel: &CancellationToken,
    ) -> Result<String> {
        match self.exchange.place_order(order, cancel).await {
            Ok(exchange_order_id) => Ok(exchange_order_id),
            Err(err) => {
                // Best-effort: the pending row should reflect the failure,
                // but the original error is what the caller needs.
                if let Err(mark_err) =
                    OrderRepository::update_status(&self.pool, order.id, OrderStatus::Failed, None)
                        .await
                {
                    tracing::warn!(
                        "failed to mark order {} as failed: {}",
                        order.id,
                        mark_err
                    );
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl TradeExecutor for LiveTradeExecutor {
    async fn execute_buy(
        &self,
        mut ctx: TradingContext,
        quantity: f64,
        cancel: &CancellationToken,
    ) -> Result<(TradingContext, String)> {
        let order = Order::new(
            ctx.pipeline_id,
            &ctx.symbol,
            ctx.market,
            OrderSide::Buy,
            quantity,
            ctx.current_price,
        );
        OrderRepository::insert(&self.pool, &order).await?;

        let exchange_order_id = self.place_on_exchange(&order, cancel).await?;

        let position = Position::open(
            ctx.pipeline_id,
            order.id,
            &ctx.symbol,
            ctx.current_price,
            quantity,
        );

        let mut tx = self.pool.begin().await?;
        OrderRepository::update_status(
            &mut *tx,
            order.id,
            OrderStatus::Placed,
            Some(&exchange_order_id),
        )
        .await?;
        PositionRepository::insert(&mut *tx, &position).await?;
        tx.commit().await?;

        tracing::info!(
            pipeline_id = %ctx.pipeline_id,
            order_id = %order.id,
            exchange_order_id = %exchange_order_id,
            "buy order placed, position {} opened",
            position.id
        );

        ctx.action = TradingAction::Hold;
        ctx.buy_price = Some(ctx.current_price);
        ctx.quantity = Some(quantity);
        ctx.active_order_id = Some(order.id);

        let message = format!(
            "bought {} {} at {:.4} (order {})",
            quantity, ctx.symbol, ctx.current_price, order.id
        );
        Ok((ctx, message))
    }

    async fn execute_sell(
        &self,
        mut ctx: TradingContext,
        cancel: &CancellationToken,
    ) -> Result<(TradingContext, String)> {
        let Some(quantity) = ctx.quantity else {
            return Err(ServiceError::api("no held quantity to sell"));
        };

        let order = Order::new(
            ctx.pipeline_id,
            &ctx.symbol,
            ctx.market,
            OrderSide::Sell,
            quantity,
            ctx.current_price,
        );
        OrderRepository::insert(&self.pool, &order).await?;

        let exchange_order_id = self.place_on_exchange(&order, cancel).await?;

        let mut tx = self.pool.begin().await?;
        OrderRepository::update_status(
            &mut *tx,
            order.id,
            OrderStatus::Placed,
            Some(&exchange_order_id),
        )
        .await?;
        let closed = PositionRepository::close_open_for_pipeline(&mut *tx, ctx.pipeline_id).await?;
        tx.commit().await?;

        if closed == 0 {
            tracing::warn!(
                pipeline_id = %ctx.pipeline_id,
                "sell order {} placed but no open position row was found",
                order.id
            );
        }

        tracing::info!(
            pipeline_id = %ctx.pipeline_id,
            order_id = %order.id,
            exchange_order_id = %exchange_order_id,
            "sell order placed, position closed"
        );

        ctx.action = TradingAction::NoAction;
        ctx.buy_price = None;
        ctx.quantity = None;
        ctx.active_order_id = None;

        let message = format!(
            "sold {} {} at {:.4} (order {})",
            quantity, ctx.symbol, ctx.current_price, order.id
        );
        Ok((ctx, message))
    }
}
