use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::models::TradingAction;
use crate::params::{ParameterDef, ParameterType, ValidatedParams};
use crate::pipeline::{StepCategory, StepDefinition, StepDeps, StepResult, TradingContext, TradingStep};
use crate::ports::TradeExecutor;

pub const STEP_KEY: &str = "entry";

/// Terminal step: folds the accumulated signal weights into a trade
/// decision and drives the trade executor.
pub struct EntryStep {
    buy_threshold: f64,
    sell_threshold: f64,
    trade_amount: f64,
    trader: Arc<dyn TradeExecutor>,
}

pub fn definition() -> StepDefinition {
    let parameters = vec![
        ParameterDef::new(
            "buyThreshold",
            "Buy threshold",
            "Total signal weight above which a buy is placed",
            ParameterType::Decimal {
                min: -100.0,
                max: 100.0,
            },
        )
        .with_default("0.5"),
        ParameterDef::new(
            "sellThreshold",
            "Sell threshold",
            "Total signal weight below which the position is closed",
            ParameterType::Decimal {
                min: -100.0,
                max: 100.0,
            },
        )
        .with_default("-0.5"),
        ParameterDef::new(
            "tradeAmount",
            "Trade amount",
            "Quantity bought when a buy triggers",
            ParameterType::Decimal {
                min: 0.0,
                max: 1_000_000_000.0,
            },
        )
        .with_default("100.0"),
    ];

    StepDefinition::new(
        STEP_KEY,
        "Entry",
        "Aggregates signal weights and places orders",
        StepCategory::Execution,
        "zap",
        parameters,
        |params: ValidatedParams, deps: &StepDeps| {
            Box::new(EntryStep {
                buy_threshold: params.decimal_or("buyThreshold", 0.5),
                sell_threshold: params.decimal_or("sellThreshold", -0.5),
                trade_amount: params.decimal_or("tradeAmount", 100.0),
                trader: deps.trader.clone(),
            })
        },
    )
}

#[async_trait]
impl TradingStep for EntryStep {
    fn key(&self) -> &str {
        STEP_KEY
    }

    async fn execute(&self, mut ctx: TradingContext, cancel: &CancellationToken) -> StepResult {
        let total = ctx.total_signal_weight();

        let action = if total > self.buy_threshold {
            TradingAction::Buy
        } else if total < self.sell_threshold {
            TradingAction::Sell
        } else {
            ctx.action
        };
        ctx.action = action;

        match (ctx.active_order_id, action) {
            (None, TradingAction::Buy) => {
                tracing::info!(
                    pipeline_id = %ctx.pipeline_id,
                    symbol = %ctx.symbol,
                    total_weight = total,
                    "signal weights crossed buy threshold, placing order"
                );
                match self
                    .trader
                    .execute_buy(ctx, self.trade_amount, cancel)
                    .await
                {
                    Ok((ctx, message)) => StepResult::Continue(ctx, message),
                    Err(err) => StepResult::Fail(format!("buy order failed: {}", err)),
                }
            }
            (Some(_), TradingAction::Sell) => {
                tracing::info!(
                    pipeline_id = %ctx.pipeline_id,
                    symbol = %ctx.symbol,
                    total_weight = total,
                    "signal weights crossed sell threshold, closing position"
                );
                match self.trader.execute_sell(ctx, cancel).await {
                    Ok((ctx, message)) => StepResult::Continue(ctx, message),
                    Err(err) => StepResult::Fail(format!("sell order failed: {}", err)),
                }
            }
            _ => {
                let message = format!(
                    "no trade: total weight {:.4}, action {:?}, active order {}",
                    total,
                    action,
                    if ctx.active_order_id.is_some() {
                        "yes"
                    } else {
                        "no"
                    }
                );
                StepResult::Continue(ctx, message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StepDeps;
    use crate::steps::testing::{
        build_step, ctx, deps, RecordingTrader, StaticCandles, StaticPositions,
    };
    use uuid::Uuid;

    fn entry_deps(trader: RecordingTrader) -> StepDeps {
        deps(StaticCandles::new(Vec::new()), StaticPositions::none(), trader)
    }

    #[tokio::test]
    async fn test_weights_over_buy_threshold_place_buy() {
        let deps = entry_deps(RecordingTrader::default());
        let step = build_step(
            &definition(),
            &deps,
            &[("buyThreshold", "0.5"), ("tradeAmount", "3.0")],
        );

        let mut input = ctx();
        input.set_signal_weight("a", 0.3);
        input.set_signal_weight("b", 0.3);

        let result = step.execute(input, &CancellationToken::new()).await;

        let StepResult::Continue(ctx, _) = result else {
            panic!("expected Continue");
        };
        assert_eq!(ctx.action, TradingAction::Hold);
        assert!(ctx.active_order_id.is_some());
        assert_eq!(ctx.quantity, Some(3.0));
    }

    #[tokio::test]
    async fn test_weights_below_sell_threshold_close_position() {
        let deps = entry_deps(RecordingTrader::default());
        let step = build_step(&definition(), &deps, &[("sellThreshold", "-0.5")]);

        let mut input = ctx();
        input.active_order_id = Some(Uuid::new_v4());
        input.quantity = Some(2.0);
        input.set_signal_weight("a", -0.4);
        input.set_signal_weight("b", -0.4);

        let result = step.execute(input, &CancellationToken::new()).await;

        let StepResult::Continue(ctx, _) = result else {
            panic!("expected Continue");
        };
        assert_eq!(ctx.action, TradingAction::NoAction);
        assert!(ctx.active_order_id.is_none());
    }

    #[tokio::test]
    async fn test_buy_signal_with_active_order_does_not_trade() {
        let deps = entry_deps(RecordingTrader::default());
        let step = build_step(&definition(), &deps, &[]);

        let mut input = ctx();
        input.active_order_id = Some(Uuid::new_v4());
        input.set_signal_weight("a", 1.0);

        let result = step.execute(input, &CancellationToken::new()).await;

        let StepResult::Continue(ctx, message) = result else {
            panic!("expected Continue");
        };
        assert!(message.contains("no trade"));
        assert!(ctx.active_order_id.is_some());
    }

    #[tokio::test]
    async fn test_sell_signal_without_position_does_not_trade() {
        let deps = entry_deps(RecordingTrader::default());
        let step = build_step(&definition(), &deps, &[]);

        let mut input = ctx();
        input.set_signal_weight("a", -1.0);

        let result = step.execute(input, &CancellationToken::new()).await;

        let StepResult::Continue(_, message) = result else {
            panic!("expected Continue");
        };
        assert!(message.contains("no trade"));
    }

    #[tokio::test]
    async fn test_neutral_weights_keep_carried_action() {
        let deps = entry_deps(RecordingTrader::default());
        let step = build_step(&definition(), &deps, &[]);

        let mut input = ctx();
        input.set_signal_weight("a", 0.2);
        input.set_signal_weight("b", -0.1);

        let result = step.execute(input, &CancellationToken::new()).await;

        let StepResult::Continue(ctx, message) = result else {
            panic!("expected Continue");
        };
        assert_eq!(ctx.action, TradingAction::NoAction);
        assert!(message.contains("no trade"));
    }

    #[tokio::test]
    async fn test_executor_error_fails() {
        let deps = entry_deps(RecordingTrader::failing());
        let step = build_step(&definition(), &deps, &[]);

        let mut input = ctx();
        input.set_signal_weight("a", 1.0);

        let result = step.execute(input, &CancellationToken::new()).await;

        assert!(result.is_fail());
    }

    #[tokio::test]
    async fn test_boundary_weight_does_not_trade() {
        // Exactly at the threshold is not strictly greater.
        let deps = entry_deps(RecordingTrader::default());
        let step = build_step(&definition(), &deps, &[("buyThreshold", "0.5")]);

        let mut input = ctx();
        input.set_signal_weight("a", 0.5);

        let result = step.execute(input, &CancellationToken::new()).await;

        let StepResult::Continue(_, message) = result else {
            panic!("expected Continue");
        };
        assert!(message.contains("no trade"));
    }
}
