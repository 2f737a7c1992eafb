//! Built-in pipeline steps.
//!
//! Steps compose into the conceptual flow
//! check-position -> position-gate -> [signal steps] -> entry;
//! the builder assembles whatever subset a pipeline has configured.

pub mod check_position;
pub mod ema_crossover;
pub mod entry;
pub mod ewmac;
pub mod macd_crossover;
pub mod position_gate;
pub mod trend_following;
pub mod vwap_deviation;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::models::{Candle, TradingAction, Timeframe};
use crate::params::{ParameterDef, ParameterType, ValidatedParams};
use crate::pipeline::{StepRegistry, TradingContext};
use crate::ports::{guarded, CandleStore};
use crate::Result;

/// Registry with every built-in step kind.
pub fn default_registry() -> StepRegistry {
    StepRegistry::from_defs([
        check_position::definition(),
        position_gate::definition(),
        ema_crossover::definition(),
        macd_crossover::definition(),
        vwap_deviation::definition(),
        ewmac::definition(),
        trend_following::definition(),
        entry::definition(),
    ])
}

/// True while an order is active and the pipeline is holding; signal steps
/// skip their computation in that state.
pub(crate) fn holding(ctx: &TradingContext) -> bool {
    ctx.active_order_id.is_some() && ctx.action == TradingAction::Hold
}

pub(crate) fn signal_weight_param() -> ParameterDef {
    ParameterDef::new(
        "signalWeight",
        "Signal weight",
        "Multiplier applied to this step's directional vote",
        ParameterType::Decimal {
            min: -10.0,
            max: 10.0,
        },
    )
    .with_default("1.0")
}

pub(crate) fn timeframe_param() -> ParameterDef {
    let options = Timeframe::ALL.iter().map(|tf| tf.as_str().to_string()).collect();
    ParameterDef::new(
        "timeframe",
        "Timeframe",
        "Candle timeframe used for the signal computation",
        ParameterType::Choice(options),
    )
    .with_default("1h")
}

pub(crate) fn timeframe_from(params: &ValidatedParams) -> Timeframe {
    params
        .choice_or("timeframe", "1h")
        .parse()
        .unwrap_or(Timeframe::H1)
}

/// Fetch a bounded candle window for a signal step, oldest-first.
pub(crate) async fn fetch_window(
    candles: &Arc<dyn CandleStore>,
    ctx: &TradingContext,
    timeframe: Timeframe,
    limit: usize,
    cancel: &CancellationToken,
) -> Result<Vec<Candle>> {
    let mut window = guarded(
        cancel,
        candles.recent_candles(&ctx.symbol, ctx.market, timeframe, limit),
    )
    .await?;
    // The store returns newest-first; indicator math wants oldest-first.
    window.reverse();
    Ok(window)
}
