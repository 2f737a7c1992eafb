use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::models::Order;
use crate::ports::OrderExecutor;
use crate::{Result, ServiceError};

/// Simulated exchange port: every order fills immediately at its limit
/// price under a generated exchange id. Lets the engine run end-to-end
/// without exchange credentials.
pub struct PaperOrderExecutor;

#[async_trait]
impl OrderExecutor for PaperOrderExecutor {
    async fn place_order(&self, order: &Order, cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(ServiceError::cancelled());
        }

        let exchange_order_id = format!("paper-{:016x}", rand::random::<u64>());

        tracing::info!(
            order_id = %order.id,
            symbol = %order.symbol,
            side = order.side.as_str(),
            quantity = order.quantity,
            price = order.price,
            "paper fill as {}",
            exchange_order_id
        );

        Ok(exchange_order_id)
    }
}
