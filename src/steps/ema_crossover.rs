use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::indicators::{calculate_ema, classify};
use crate::models::Timeframe;
use crate::params::{ParameterDef, ParameterType, ValidatedParams};
use crate::pipeline::{StepCategory, StepDefinition, StepDeps, StepResult, TradingContext, TradingStep};
use crate::ports::CandleStore;
use crate::steps::{fetch_window, holding, signal_weight_param, timeframe_from, timeframe_param};

pub const STEP_KEY: &str = "ema-crossover";

/// EMA crossover signal: bullish when the fast EMA runs above the slow EMA
/// by more than the threshold, bearish when below by more than it.
pub struct EmaCrossoverStep {
    fast_period: usize,
    slow_period: usize,
    threshold: f64,
    signal_weight: f64,
    timeframe: Timeframe,
    candles: Arc<dyn CandleStore>,
}

pub fn definition() -> StepDefinition {
    let parameters = vec![
        ParameterDef::new(
            "fastPeriod",
            "Fast period",
            "Lookback of the fast EMA",
            ParameterType::Int { min: 1, max: 400 },
        )
        .with_default("12"),
        ParameterDef::new(
            "slowPeriod",
            "Slow period",
            "Lookback of the slow EMA",
            ParameterType::Int { min: 1, max: 400 },
        )
        .with_default("26"),
        ParameterDef::new(
            "threshold",
            "Threshold",
            "Minimum relative EMA spread before the signal turns directional",
            ParameterType::Decimal { min: 0.0, max: 1.0 },
        )
        .with_default("0.001"),
        signal_weight_param(),
        timeframe_param(),
    ];

    StepDefinition::new(
        STEP_KEY,
        "EMA crossover",
        "Directional signal from a fast/slow EMA spread",
        StepCategory::Signal,
        "trending-up",
        parameters,
        |params: ValidatedParams, deps: &StepDeps| {
            Box::new(EmaCrossoverStep {
                fast_period: params.int_or("fastPeriod", 12) as usize,
                slow_period: params.int_or("slowPeriod", 26) as usize,
                threshold: params.decimal_or("threshold", 0.001),
                signal_weight: params.decimal_or("signalWeight", 1.0),
                timeframe: timeframe_from(&params),
                candles: deps.candles.clone(),
            })
        },
    )
}

#[async_trait]
impl TradingStep for EmaCrossoverStep {
    fn key(&self) -> &str {
        STEP_KEY
    }

    async fn execute(&self, mut ctx: TradingContext, cancel: &CancellationToken) -> StepResult {
        if holding(&ctx) {
            return StepResult::Continue(ctx, "holding position, signal skipped".to_string());
        }

        let window = match fetch_window(
            &self.candles,
            &ctx,
            self.timeframe,
            self.slow_period * 2,
            cancel,
        )
        .await
        {
            Ok(window) => window,
            Err(err) => return StepResult::Fail(format!("candle fetch failed: {}", err)),
        };

        if window.len() < self.slow_period {
            let message = format!(
                "insufficient data: {} candles, need {}",
                window.len(),
                self.slow_period
            );
            return StepResult::Continue(ctx, message);
        }

        let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
        let (Some(fast), Some(slow)) = (
            calculate_ema(&closes, self.fast_period),
            calculate_ema(&closes, self.slow_period),
        ) else {
            return StepResult::Continue(ctx, "insufficient data for EMA".to_string());
        };

        let spread = if slow == 0.0 { 0.0 } else { (fast - slow) / slow };
        let direction = classify(spread, self.threshold);
        let weight = direction as f64 * self.signal_weight;
        ctx.set_signal_weight(STEP_KEY, weight);

        let message = format!(
            "ema {}/{} spread {:.5}, direction {}, weight {:.2}",
            self.fast_period, self.slow_period, spread, direction, weight
        );
        StepResult::Continue(ctx, message)
    }
}
