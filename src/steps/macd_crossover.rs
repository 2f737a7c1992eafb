use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::indicators::{calculate_ema_series, classify};
use crate::models::Timeframe;
use crate::params::{ParameterDef, ParameterType, ValidatedParams};
use crate::pipeline::{StepCategory, StepDefinition, StepDeps, StepResult, TradingContext, TradingStep};
use crate::ports::CandleStore;
use crate::steps::{fetch_window, holding, signal_weight_param, timeframe_from, timeframe_param};

pub const STEP_KEY: &str = "macd-crossover";

/// MACD crossover signal on the price-normalized histogram: the MACD line
/// (fast EMA minus slow EMA) against its own signal-period EMA.
pub struct MacdCrossoverStep {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
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
            "signalPeriod",
            "Signal period",
            "EMA lookback applied to the MACD line",
            ParameterType::Int { min: 1, max: 200 },
        )
        .with_default("9"),
        ParameterDef::new(
            "threshold",
            "Threshold",
            "Minimum price-normalized histogram before the signal turns directional",
            ParameterType::Decimal { min: 0.0, max: 1.0 },
        )
        .with_default("0.0005"),
        signal_weight_param(),
        timeframe_param(),
    ];

    StepDefinition::new(
        STEP_KEY,
        "MACD crossover",
        "Directional signal from the MACD histogram",
        StepCategory::Signal,
        "bar-chart",
        parameters,
        |params: ValidatedParams, deps: &StepDeps| {
            Box::new(MacdCrossoverStep {
                fast_period: params.int_or("fastPeriod", 12) as usize,
                slow_period: params.int_or("slowPeriod", 26) as usize,
                signal_period: params.int_or("signalPeriod", 9) as usize,
                threshold: params.decimal_or("threshold", 0.0005),
                signal_weight: params.decimal_or("signalWeight", 1.0),
                timeframe: timeframe_from(&params),
                candles: deps.candles.clone(),
            })
        },
    )
}

impl MacdCrossoverStep {
    fn min_candles(&self) -> usize {
        // The MACD line needs at least `signal_period` points for its own EMA.
        self.slow_period + self.signal_period
    }
}

#[async_trait]
impl TradingStep for MacdCrossoverStep {
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
        let fast_series = calculate_ema_series(&closes, self.fast_period);
        let slow_series = calculate_ema_series(&closes, self.slow_period);

        let Some(offset) = fast_series.len().checked_sub(slow_series.len()) else {
            return StepResult::Continue(
                ctx,
                "fast period must be shorter than slow period".to_string(),
            );
        };

        let macd_line: Vec<f64> = fast_series[offset..]
            .iter()
            .zip(slow_series.iter())
            .map(|(fast, slow)| fast - slow)
            .collect();

        let signal_series = calculate_ema_series(&macd_line, self.signal_period);
        let (Some(macd), Some(signal)) = (macd_line.last(), signal_series.last()) else {
            return StepResult::Continue(ctx, "insufficient data for MACD signal line".to_string());
        };

        let price = closes.last().copied().unwrap_or(0.0);
        let histogram = macd - signal;
        let measure = if price == 0.0 { 0.0 } else { histogram / price };

        let direction = classify(measure, self.threshold);
        let weight = direction as f64 * self.signal_weight;
        ctx.set_signal_weight(STEP_KEY, weight);

        let message = format!(
            "macd {}/{}/{} histogram {:.6}, direction {}, weight {:.2}",
            self.fast_period, self.slow_period, self.signal_period, measure, direction, weight
        );
        StepResult::Continue(ctx, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing::{
        build_step, candles_from_closes, ctx, deps, RecordingTrader, StaticCandles,
        StaticPositions,
    };

    fn step_with_closes(closes: &[f64]) -> Box<dyn TradingStep> {
        let deps = deps(
            StaticCandles::new(candles_from_closes(closes)),
            StaticPositions::none(),
            RecordingTrader::default(),
        );
        build_step(
            &definition(),
            &deps,
            &[
                ("fastPeriod", "3"),
                ("slowPeriod", "6"),
                ("signalPeriod", "3"),
            ],
        )
    }

    #[tokio::test]
    async fn test_accelerating_uptrend_votes_bullish() {
        // Flat base then acceleration: MACD line rises away from its EMA.
        let mut closes = vec![100.0; 15];
        for i in 1..=10 {
            closes.push(100.0 + (i * i) as f64 * 0.5);
        }
        let step = step_with_closes(&closes);

        let result = step.execute(ctx(), &CancellationToken::new()).await;

        let StepResult::Continue(ctx, _) = result else {
            panic!("expected Continue");
        };
        assert_eq!(ctx.signal_weights[STEP_KEY], 1.0);
    }

    #[tokio::test]
    async fn test_accelerating_downtrend_votes_bearish() {
        let mut closes = vec![200.0; 15];
        for i in 1..=10 {
            closes.push(200.0 - (i * i) as f64 * 0.5);
        }
        let step = step_with_closes(&closes);

        let result = step.execute(ctx(), &CancellationToken::new()).await;

        let StepResult::Continue(ctx, _) = result else {
            panic!("expected Continue");
        };
        assert_eq!(ctx.signal_weights[STEP_KEY], -1.0);
    }

    #[tokio::test]
    async fn test_flat_series_is_neutral() {
        let step = step_with_closes(&vec![100.0; 30]);

        let result = step.execute(ctx(), &CancellationToken::new()).await;

        let StepResult::Continue(ctx, _) = result else {
            panic!("expected Continue");
        };
        assert_eq!(ctx.signal_weights[STEP_KEY], 0.0);
    }

    #[tokio::test]
    async fn test_insufficient_data_continues() {
        let step = step_with_closes(&[100.0, 101.0, 102.0]);

        let result = step.execute(ctx(), &CancellationToken::new()).await;

        let StepResult::Continue(ctx, message) = result else {
            panic!("expected Continue");
        };
        assert!(message.contains("insufficient data"));
        assert!(ctx.signal_weights.is_empty());
    }

    #[tokio::test]
    async fn test_inverted_periods_stay_neutral() {
        let closes: Vec<f64> = (1..=40).map(|i| 100.0 + i as f64).collect();
        let deps = deps(
            StaticCandles::new(candles_from_closes(&closes)),
            StaticPositions::none(),
            RecordingTrader::default(),
        );
        let step = build_step(
            &definition(),
            &deps,
            &[
                ("fastPeriod", "10"),
                ("slowPeriod", "5"),
                ("signalPeriod", "3"),
            ],
        );

        let result = step.execute(ctx(), &CancellationToken::new()).await;

        let StepResult::Continue(ctx, message) = result else {
            panic!("expected Continue");
        };
        assert!(message.contains("shorter"));
        assert!(ctx.signal_weights.is_empty());
    }
}
