use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::indicators::{calculate_vwap, classify};
use crate::models::Timeframe;
use crate::params::{ParameterDef, ParameterType, ValidatedParams};
use crate::pipeline::{StepCategory, StepDefinition, StepDeps, StepResult, TradingContext, TradingStep};
use crate::ports::CandleStore;
use crate::steps::{fetch_window, holding, signal_weight_param, timeframe_from, timeframe_param};

pub const STEP_KEY: &str = "vwap-deviation";

/// Mean-reversion signal against the volume-weighted average price: a
/// price stretched below VWAP votes bullish, stretched above votes bearish.
pub struct VwapDeviationStep {
    period: usize,
    threshold: f64,
    signal_weight: f64,
    timeframe: Timeframe,
    candles: Arc<dyn CandleStore>,
}

pub fn definition() -> StepDefinition {
    let parameters = vec![
        ParameterDef::new(
            "period",
            "Period",
            "Number of candles in the VWAP window",
            ParameterType::Int { min: 2, max: 500 },
        )
        .with_default("48"),
        ParameterDef::new(
            "threshold",
            "Threshold",
            "Minimum relative deviation from VWAP before the signal turns directional",
            ParameterType::Decimal { min: 0.0, max: 1.0 },
        )
        .with_default("0.01"),
        signal_weight_param(),
        timeframe_param(),
    ];

    StepDefinition::new(
        STEP_KEY,
        "VWAP deviation",
        "Mean-reversion signal from the deviation against VWAP",
        StepCategory::Signal,
        "activity",
        parameters,
        |params: ValidatedParams, deps: &StepDeps| {
            Box::new(VwapDeviationStep {
                period: params.int_or("period", 48) as usize,
                threshold: params.decimal_or("threshold", 0.01),
                signal_weight: params.decimal_or("signalWeight", 1.0),
                timeframe: timeframe_from(&params),
                candles: deps.candles.clone(),
            })
        },
    )
}

#[async_trait]
impl TradingStep for VwapDeviationStep {
    fn key(&self) -> &str {
        STEP_KEY
    }

    async fn execute(&self, mut ctx: TradingContext, cancel: &CancellationToken) -> StepResult {
        if holding(&ctx) {
            return StepResult::Continue(ctx, "holding position, signal skipped".to_string());
        }

        let window =
            match fetch_window(&self.candles, &ctx, self.timeframe, self.period, cancel).await {
                Ok(window) => window,
                Err(err) => return StepResult::Fail(format!("candle fetch failed: {}", err)),
            };

        if window.len() < self.period {
            let message = format!(
                "insufficient data: {} candles, need {}",
                window.len(),
                self.period
            );
            return StepResult::Continue(ctx, message);
        }

        let pairs: Vec<(f64, f64)> = window
            .iter()
            .map(|c| (c.typical_price(), c.volume))
            .collect();

        let (deviation, direction) = match calculate_vwap(&pairs) {
            Some(vwap) if vwap != 0.0 => {
                let deviation = (vwap - ctx.current_price) / vwap;
                (deviation, classify(deviation, self.threshold))
            }
            // No traded volume in the window: nothing to deviate from.
            _ => (0.0, 0),
        };

        let weight = direction as f64 * self.signal_weight;
        ctx.set_signal_weight(STEP_KEY, weight);

        let message = format!(
            "vwap({}) deviation {:.5}, direction {}, weight {:.2}",
            self.period, deviation, direction, weight
        );
        StepResult::Continue(ctx, message)
    }
}
