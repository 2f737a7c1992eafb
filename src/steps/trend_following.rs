use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::indicators::{calculate_momentum, calculate_sma};
use crate::models::Timeframe;
use crate::params::{ParameterDef, ParameterType, ValidatedParams};
use crate::pipeline::{StepCategory, StepDefinition, StepDeps, StepResult, TradingContext, TradingStep};
use crate::ports::CandleStore;
use crate::steps::{fetch_window, holding, signal_weight_param, timeframe_from, timeframe_param};

pub const STEP_KEY: &str = "trend-following";

/// Momentum trend signal with breadth confirmation: a directional vote
/// needs both sustained momentum over the lookback and a supporting share
/// of recent closes on the right side of their moving average.
pub struct TrendFollowingStep {
    lookback: usize,
    momentum_threshold: f64,
    breadth_period: usize,
    breadth_confirmation: f64,
    signal_weight: f64,
    timeframe: Timeframe,
    candles: Arc<dyn CandleStore>,
}

pub fn definition() -> StepDefinition {
    let parameters = vec![
        ParameterDef::new(
            "lookback",
            "Lookback",
            "Number of candles the momentum is measured over",
            ParameterType::Int { min: 2, max: 500 },
        )
        .with_default("90"),
        ParameterDef::new(
            "momentumThreshold",
            "Momentum threshold",
            "Minimum percent change over the lookback before the trend counts",
            ParameterType::Decimal {
                min: 0.0,
                max: 100.0,
            },
        )
        .with_default("5.0"),
        ParameterDef::new(
            "breadthPeriod",
            "Breadth period",
            "Number of recent closes checked against their moving average",
            ParameterType::Int { min: 2, max: 200 },
        )
        .with_default("20"),
        ParameterDef::new(
            "breadthConfirmation",
            "Breadth confirmation",
            "Fraction of closes that must confirm the trend direction",
            ParameterType::Decimal { min: 0.0, max: 1.0 },
        )
        .with_default("0.6"),
        signal_weight_param(),
        timeframe_param(),
    ];

    StepDefinition::new(
        STEP_KEY,
        "Trend following",
        "Momentum trend signal with breadth confirmation",
        StepCategory::Signal,
        "compass",
        parameters,
        |params: ValidatedParams, deps: &StepDeps| {
            Box::new(TrendFollowingStep {
                lookback: params.int_or("lookback", 90) as usize,
                momentum_threshold: params.decimal_or("momentumThreshold", 5.0),
                breadth_period: params.int_or("breadthPeriod", 20) as usize,
                breadth_confirmation: params.decimal_or("breadthConfirmation", 0.6),
                signal_weight: params.decimal_or("signalWeight", 1.0),
                timeframe: timeframe_from(&params),
                candles: deps.candles.clone(),
            })
        },
    )
}

impl TrendFollowingStep {
    fn min_candles(&self) -> usize {
        (self.lookback + 1).max(self.breadth_period)
    }

    /// Fraction of the last `breadth_period` closes strictly above the
    /// full window's average, the trend baseline.
    fn breadth(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.breadth_period {
            return None;
        }
        let baseline = calculate_sma(closes, closes.len())?;
        let tail = &closes[closes.len() - self.breadth_period..];
        let above = tail.iter().filter(|&&close| close > baseline).count();
        Some(above as f64 / self.breadth_period as f64)
    }
}

#[async_trait]
impl TradingStep for TrendFollowingStep {
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
            self.min_candles(),
            cancel,
        )
        .await
        {
            Ok(window) => window,
            Err(err) => return StepResult::Fail(format!("candle fetch failed: {}", err)),
        };

        if window.len() < self.min_candles() {
            let message = format!(
                "insufficient data: {} candles, need {}",
                window.len(),
                self.min_candles()
            );
            return StepResult::Continue(ctx, message);
        }

        let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
        let (Some(momentum), Some(breadth)) = (
            calculate_momentum(&closes, self.lookback),
            self.breadth(&closes),
        ) else {
            return StepResult::Continue(ctx, "insufficient data for trend measures".to_string());
        };

        let direction = if momentum > self.momentum_threshold && breadth > self.breadth_confirmation
        {
            1
        } else if momentum < -self.momentum_threshold
            && breadth < 1.0 - self.breadth_confirmation
        {
            -1
        } else {
            0
        };

        let weight = direction as f64 * self.signal_weight;
        ctx.set_signal_weight(STEP_KEY, weight);

        let message = format!(
            "trend momentum {:.2}% breadth {:.2}, direction {}, weight {:.2}",
            momentum, breadth, direction, weight
        );
        StepResult::Continue(ctx, message)
    }
}
