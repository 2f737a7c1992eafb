use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::models::TradingAction;
use crate::pipeline::{StepCategory, StepDefinition, StepDeps, StepResult, TradingContext, TradingStep};
use crate::ports::PositionProvider;

pub const STEP_KEY: &str = "position-gate";

/// Re-checks the position store before any entry decision, defending
/// against a stale check-position snapshot. While a position or an active
/// order exists, no new entry can slip through.
pub struct PositionGateStep {
    positions: Arc<dyn PositionProvider>,
}

pub fn definition() -> StepDefinition {
    StepDefinition::new(
        STEP_KEY,
        "Position gate",
        "Blocks redundant entries while a position or order is active",
        StepCategory::Validation,
        "shield",
        Vec::new(),
        |_, deps: &StepDeps| {
            Box::new(PositionGateStep {
                positions: deps.positions.clone(),
            })
        },
    )
}

#[async_trait]
impl TradingStep for PositionGateStep {
    fn key(&self) -> &str {
        STEP_KEY
    }

    async fn execute(&self, mut ctx: TradingContext, cancel: &CancellationToken) -> StepResult {
        if ctx.active_order_id.is_some() || ctx.action != TradingAction::NoAction {
            return StepResult::Continue(
                ctx,
                "active order or pending action, gate passed through".to_string(),
            );
        }

        match self.positions.get_open_position(ctx.pipeline_id, cancel).await {
            Ok(Some(position)) => {
                ctx.active_order_id = Some(position.order_id);
                StepResult::Continue(ctx, "position already open, blocking new entries".to_string())
            }
            Ok(None) => StepResult::Continue(ctx, "no open position, entry allowed".to_string()),
            // A soft halt: the gate could not prove the pipeline is flat,
            // so this tick is abandoned without being flagged as an error.
            Err(err) => StepResult::Stop(format!("position re-check failed: {}", err)),
        }
    }
}
