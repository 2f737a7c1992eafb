use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::indicators::{calculate_ema, calculate_returns, calculate_std_dev, classify};
use crate::models::Timeframe;
use crate::params::{ParameterDef, ParameterType, ValidatedParams};
use crate::pipeline::{StepCategory, StepDefinition, StepDeps, StepResult, TradingContext, TradingStep};
use crate::ports::CandleStore;
use crate::steps::{fetch_window, holding, signal_weight_param, timeframe_from, timeframe_param};

pub const STEP_KEY: &str = "ewmac";

/// Volatility-normalized EMA crossover: the raw fast/slow spread divided by
/// recent return volatility scaled to price, so one threshold works across
/// symbols and regimes.
pub struct EwmacStep {
    fast_period: usize,
    slow_period: usize,
    vol_window: usize,
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
        .with_default("16"),
        ParameterDef::new(
            "slowPeriod",
            "Slow period",
            "Lookback of the slow EMA",
            ParameterType::Int { min: 1, max: 400 },
        )
        .with_default("64"),
        ParameterDef::new(
            "volWindow",
            "Volatility window",
            "Number of returns in the volatility estimate",
            ParameterType::Int { min: 2, max: 200 },
        )
        .with_default("25"),
        ParameterDef::new(
            "threshold",
            "Threshold",
            "Minimum normalized forecast before the signal turns directional",
            ParameterType::Decimal {
                min: 0.0,
                max: 100.0,
            },
        )
        .with_default("0.5"),
        signal_weight_param(),
        timeframe_param(),
    ];

    StepDefinition::new(
        STEP_KEY,
        "EWMAC",
        "Volatility-normalized EMA crossover forecast",
        StepCategory::Signal,
        "waves",
        parameters,
        |params: ValidatedParams, deps: &StepDeps| {
            Box::new(EwmacStep {
                fast_period: params.int_or("fastPeriod", 16) as usize,
                slow_period: params.int_or("slowPeriod", 64) as usize,
                vol_window: params.int_or("volWindow", 25) as usize,
                threshold: params.decimal_or("threshold", 0.5),
                signal_weight: params.decimal_or("signalWeight", 1.0),
                timeframe: timeframe_from(&params),
                candles: deps.candles.clone(),
            })
        },
    )
}

impl EwmacStep {
    fn min_candles(&self) -> usize {
        self.slow_period.max(self.vol_window + 1)
    }
}

#[async_trait]
impl TradingStep for EwmacStep {
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
            self.min_candles() * 2,
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
        let (Some(fast), Some(slow)) = (
            calculate_ema(&closes, self.fast_period),
            calculate_ema(&closes, self.slow_period),
        ) else {
            return StepResult::Continue(ctx, "insufficient data for EMA".to_string());
        };

        let returns = calculate_returns(&closes);
        let tail = &returns[returns.len().saturating_sub(self.vol_window)..];
        let price = closes.last().copied().unwrap_or(0.0);

        let forecast = match calculate_std_dev(tail) {
            // A dead-flat window has no volatility to normalize by.
            Some(vol) if vol > 0.0 && price > 0.0 => (fast - slow) / (vol * price),
            _ => 0.0,
        };

        let direction = classify(forecast, self.threshold);
        let weight = direction as f64 * self.signal_weight;
        ctx.set_signal_weight(STEP_KEY, weight);

        let message = format!(
            "ewmac {}/{} forecast {:.4}, direction {}, weight {:.2}",
            self.fast_period, self.slow_period, forecast, direction, weight
        );
        StepResult::Continue(ctx, message)
    }
}
