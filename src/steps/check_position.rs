use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::models::TradingAction;
use crate::pipeline::{StepCategory, StepDefinition, StepDeps, StepResult, TradingContext, TradingStep};
use crate::ports::PositionProvider;

pub const STEP_KEY: &str = "check-position";

/// First step of a pipeline: load the currently open position, if any,
/// into the context so later steps know whether the pipeline is holding.
pub struct CheckPositionStep {
    positions: Arc<dyn PositionProvider>,
}

pub fn definition() -> StepDefinition {
    StepDefinition::new(
        STEP_KEY,
        "Check position",
        "Loads the pipeline's open position into the context",
        StepCategory::Validation,
        "search",
        Vec::new(),
        |_, deps: &StepDeps| {
            Box::new(CheckPositionStep {
                positions: deps.positions.clone(),
            })
        },
    )
}

#[async_trait]
impl TradingStep for CheckPositionStep {
    fn key(&self) -> &str {
        STEP_KEY
    }

    async fn execute(&self, mut ctx: TradingContext, cancel: &CancellationToken) -> StepResult {
        match self.positions.get_open_position(ctx.pipeline_id, cancel).await {
            Ok(None) => {
                ctx.action = TradingAction::NoAction;
                StepResult::Continue(ctx, "no open position".to_string())
            }
            Ok(Some(position)) => {
                ctx.action = TradingAction::Hold;
                ctx.buy_price = Some(position.entry_price);
                ctx.quantity = Some(position.quantity);
                ctx.active_order_id = Some(position.order_id);
                let message = format!(
                    "holding {} {} entered at {:.4}",
                    position.quantity, position.symbol, position.entry_price
                );
                StepResult::Continue(ctx, message)
            }
            Err(err) => StepResult::Fail(format!("position lookup failed: {}", err)),
        }
    }
}
