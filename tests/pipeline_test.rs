//! End-to-end pipeline runs against in-memory ports: configuration is
//! built through the real registry and builder, executed by the real
//! runner, with only the outside world (candles, positions, exchange)
//! replaced by doubles.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pipebot::models::{Candle, ExecutionLogRecord, MarketType, PipelineStepConfig, Timeframe, TradingAction};
use pipebot::pipeline::{build_steps, run_pipeline, StepDeps, StepResult, TradingContext};
use pipebot::ports::{CandleStore, ExecutionLogSink, PositionInfo, PositionProvider, TradeExecutor};
use pipebot::steps::default_registry;
use pipebot::{Result, ServiceError};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct MemoryCandles {
    candles: Vec<Candle>,
    fail: bool,
}

#[async_trait]
impl CandleStore for MemoryCandles {
    async fn query_candles(
        &self,
        _symbol: &str,
        _market: MarketType,
        _timeframe: Timeframe,
        _from: Option<DateTime<Utc>>,
        _to: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>> {
        if self.fail {
            return Err(ServiceError::api("candle store unavailable"));
        }
        let mut newest_first: Vec<Candle> = self.candles.iter().rev().cloned().collect();
        if let Some(limit) = limit {
            newest_first.truncate(limit);
        }
        Ok(newest_first)
    }
}

struct MemoryPositions {
    position: Option<PositionInfo>,
}

#[async_trait]
impl PositionProvider for MemoryPositions {
    async fn get_open_position(
        &self,
        _pipeline_id: Uuid,
        _cancel: &CancellationToken,
    ) -> Result<Option<PositionInfo>> {
        Ok(self.position.clone())
    }
}

#[derive(Default)]
struct MemoryTrader {
    buys: Mutex<Vec<f64>>,
    sells: Mutex<Vec<f64>>,
}

#[async_trait]
impl TradeExecutor for MemoryTrader {
    async fn execute_buy(
        &self,
        mut ctx: TradingContext,
        quantity: f64,
        _cancel: &CancellationToken,
    ) -> Result<(TradingContext, String)> {
        self.buys.lock().unwrap().push(quantity);
        ctx.action = TradingAction::Hold;
        ctx.active_order_id = Some(Uuid::new_v4());
        ctx.buy_price = Some(ctx.current_price);
        ctx.quantity = Some(quantity);
        Ok((ctx, format!("bought {}", quantity)))
    }

    async fn execute_sell(
        &self,
        mut ctx: TradingContext,
        _cancel: &CancellationToken,
    ) -> Result<(TradingContext, String)> {
        let quantity = ctx.quantity.unwrap_or(0.0);
        self.sells.lock().unwrap().push(quantity);
        ctx.action = TradingAction::NoAction;
        ctx.active_order_id = None;
        ctx.buy_price = None;
        ctx.quantity = None;
        Ok((ctx, format!("sold {}", quantity)))
    }
}

#[derive(Default)]
struct MemorySink {
    records: Mutex<Vec<ExecutionLogRecord>>,
}

#[async_trait]
impl ExecutionLogSink for MemorySink {
    async fn append(&self, record: ExecutionLogRecord) -> Result<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

fn rising_candles(count: usize) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let close = 100.0 + i as f64 * 2.0;
            Candle {
                symbol: "BTC-USDT".to_string(),
                market: MarketType::Spot,
                timestamp: Utc::now() - Duration::minutes((count - i) as i64 * 60),
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 1_000.0,
            }
        })
        .collect()
}

fn step_config(key: &str, order: i32, params: &[(&str, &str)]) -> PipelineStepConfig {
    PipelineStepConfig {
        step_key: key.to_string(),
        order,
        is_enabled: true,
        parameters: params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

fn wire(candles: MemoryCandles, trader: Arc<MemoryTrader>) -> StepDeps {
    StepDeps {
        candles: Arc::new(candles),
        positions: Arc::new(MemoryPositions { position: None }),
        trader,
    }
}

fn ctx() -> TradingContext {
    let last_close = 100.0 + 39.0 * 2.0;
    TradingContext::new(Uuid::new_v4(), "BTC-USDT", MarketType::Spot, last_close)
}

#[tokio::test]
async fn test_full_buy_flow() {
    let trader = Arc::new(MemoryTrader::default());
    let deps = wire(
        MemoryCandles {
            candles: rising_candles(40),
            fail: false,
        },
        trader.clone(),
    );

    let configs = vec![
        step_config("check-position", 10, &[]),
        step_config("position-gate", 20, &[]),
        step_config(
            "ema-crossover",
            30,
            &[("fastPeriod", "3"), ("slowPeriod", "6"), ("signalWeight", "1.0")],
        ),
        step_config("entry", 40, &[("buyThreshold", "0.5"), ("tradeAmount", "2.0")]),
    ];

    let registry = default_registry();
    let steps = build_steps(&registry, &deps, &configs).unwrap();
    assert_eq!(steps.len(), 4);

    let sink = MemorySink::default();
    let result = run_pipeline(&steps, ctx(), &CancellationToken::new(), &sink).await;

    let StepResult::Continue(final_ctx, _) = result else {
        panic!("expected Continue, got {:?}", result.outcome());
    };
    assert_eq!(final_ctx.action, TradingAction::Hold);
    assert!(final_ctx.active_order_id.is_some());
    assert_eq!(*trader.buys.lock().unwrap(), vec![2.0]);

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.outcome == "continue"));
    let keys: Vec<&str> = records.iter().map(|r| r.step_key.as_str()).collect();
    assert_eq!(keys, vec!["check-position", "position-gate", "ema-crossover", "entry"]);
}

#[tokio::test]
async fn test_two_partial_signals_cross_the_buy_threshold() {
    // 0.3 + 0.3 = 0.6 > 0.5: two agreeing partial votes place a buy.
    let trader = Arc::new(MemoryTrader::default());
    let deps = wire(
        MemoryCandles {
            candles: rising_candles(40),
            fail: false,
        },
        trader.clone(),
    );

    let configs = vec![
        step_config("check-position", 10, &[]),
        step_config("position-gate", 20, &[]),
        step_config(
            "ema-crossover",
            30,
            &[("fastPeriod", "3"), ("slowPeriod", "6"), ("signalWeight", "0.3")],
        ),
        step_config(
            "trend-following",
            40,
            &[
                ("lookback", "10"),
                ("momentumThreshold", "5.0"),
                ("breadthPeriod", "5"),
                ("breadthConfirmation", "0.6"),
                ("signalWeight", "0.3"),
            ],
        ),
        step_config("entry", 50, &[("buyThreshold", "0.5"), ("tradeAmount", "1.0")]),
    ];

    let registry = default_registry();
    let steps = build_steps(&registry, &deps, &configs).unwrap();

    let sink = MemorySink::default();
    let result = run_pipeline(&steps, ctx(), &CancellationToken::new(), &sink).await;

    assert!(result.is_continue());
    assert_eq!(trader.buys.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_single_weak_signal_does_not_trade() {
    let trader = Arc::new(MemoryTrader::default());
    let deps = wire(
        MemoryCandles {
            candles: rising_candles(40),
            fail: false,
        },
        trader.clone(),
    );

    let configs = vec![
        step_config("check-position", 10, &[]),
        step_config("position-gate", 20, &[]),
        step_config(
            "ema-crossover",
            30,
            &[("fastPeriod", "3"), ("slowPeriod", "6"), ("signalWeight", "0.3")],
        ),
        step_config("entry", 40, &[("buyThreshold", "0.5")]),
    ];

    let registry = default_registry();
    let steps = build_steps(&registry, &deps, &configs).unwrap();

    let sink = MemorySink::default();
    let result = run_pipeline(&steps, ctx(), &CancellationToken::new(), &sink).await;

    let StepResult::Continue(_, message) = result else {
        panic!("expected Continue");
    };
    assert!(message.contains("no trade"));
    assert!(trader.buys.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_candle_store_failure_short_circuits_before_entry() {
    let trader = Arc::new(MemoryTrader::default());
    let deps = wire(
        MemoryCandles {
            candles: Vec::new(),
            fail: true,
        },
        trader.clone(),
    );

    let configs = vec![
        step_config("check-position", 10, &[]),
        step_config("position-gate", 20, &[]),
        step_config("ema-crossover", 30, &[]),
        step_config("entry", 40, &[]),
    ];

    let registry = default_registry();
    let steps = build_steps(&registry, &deps, &configs).unwrap();

    let sink = MemorySink::default();
    let result = run_pipeline(&steps, ctx(), &CancellationToken::new(), &sink).await;

    assert!(result.is_fail());
    assert!(trader.buys.lock().unwrap().is_empty());

    // check-position, position-gate and the failing signal step logged;
    // entry never ran.
    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].outcome, "fail");
}

#[tokio::test]
async fn test_insufficient_history_is_a_soft_continue() {
    let trader = Arc::new(MemoryTrader::default());
    let deps = wire(
        MemoryCandles {
            candles: rising_candles(3),
            fail: false,
        },
        trader.clone(),
    );

    let configs = vec![
        step_config("check-position", 10, &[]),
        step_config("position-gate", 20, &[]),
        step_config("ema-crossover", 30, &[]),
        step_config("entry", 40, &[]),
    ];

    let registry = default_registry();
    let steps = build_steps(&registry, &deps, &configs).unwrap();

    let sink = MemorySink::default();
    let result = run_pipeline(&steps, ctx(), &CancellationToken::new(), &sink).await;

    // The pipeline completes; the signal simply contributed no weight.
    let StepResult::Continue(final_ctx, _) = result else {
        panic!("expected Continue");
    };
    assert!(final_ctx.signal_weights.is_empty());
    assert!(trader.buys.lock().unwrap().is_empty());
    assert_eq!(sink.records.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_disabled_and_unknown_configs_are_skipped() {
    let trader = Arc::new(MemoryTrader::default());
    let deps = wire(
        MemoryCandles {
            candles: rising_candles(40),
            fail: false,
        },
        trader,
    );

    let mut disabled = step_config("entry", 40, &[]);
    disabled.is_enabled = false;

    let configs = vec![
        step_config("check-position", 10, &[]),
        step_config("retired-step", 20, &[]),
        disabled,
    ];

    let registry = default_registry();
    let steps = build_steps(&registry, &deps, &configs).unwrap();

    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].key(), "check-position");
}

#[tokio::test]
async fn test_holding_pipeline_sells_when_signals_turn() {
    // An open position flips check-position to Hold; a collapsing market
    // must still be able to close it.
    let trader = Arc::new(MemoryTrader::default());
    let falling: Vec<Candle> = rising_candles(40).into_iter().rev().collect();
    let falling: Vec<Candle> = falling
        .into_iter()
        .enumerate()
        .map(|(i, mut c)| {
            c.timestamp = Utc::now() - Duration::minutes((40 - i) as i64 * 60);
            c
        })
        .collect();

    let position = PositionInfo {
        position_id: Uuid::new_v4(),
        order_id: Uuid::new_v4(),
        symbol: "BTC-USDT".to_string(),
        entry_price: 170.0,
        quantity: 2.0,
    };
    let deps = StepDeps {
        candles: Arc::new(MemoryCandles {
            candles: falling,
            fail: false,
        }),
        positions: Arc::new(MemoryPositions {
            position: Some(position),
        }),
        trader: trader.clone(),
    };

    // No check-position step here: the pipeline stays flat-actioned so the
    // signal steps recompute, and the gate sees the active order.
    let configs = vec![
        step_config(
            "ema-crossover",
            10,
            &[("fastPeriod", "3"), ("slowPeriod", "6"), ("signalWeight", "1.0")],
        ),
        step_config("entry", 20, &[("sellThreshold", "-0.5")]),
    ];

    let registry = default_registry();
    let steps = build_steps(&registry, &deps, &configs).unwrap();

    let mut input = ctx();
    input.current_price = 100.0;
    input.active_order_id = Some(Uuid::new_v4());
    input.quantity = Some(2.0);

    let sink = MemorySink::default();
    let result = run_pipeline(&steps, input, &CancellationToken::new(), &sink).await;

    assert!(result.is_continue());
    assert_eq!(*trader.sells.lock().unwrap(), vec![2.0]);
}
