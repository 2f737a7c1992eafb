use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use uuid::Uuid;

use crate::models::{MarketType, TradingAction};
use crate::Result;

/// Typed key into the auxiliary context data slot.
///
/// The value type is fixed where the key is defined, so readers and writers
/// of the same key can never disagree on it.
pub struct DataKey<T> {
    pub name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DataKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }
}

/// Simulated "current time", set by the backtest driver instead of the
/// wall clock.
pub const SIMULATED_TIME: DataKey<DateTime<Utc>> = DataKey::new("simulated_time");

/// Open-ended auxiliary data carried through a pipeline execution.
///
/// Values are stored as JSON so the whole context stays serializable for
/// the execution log; access goes through [`DataKey`]s. An absent key
/// reads as `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContextData {
    #[serde(flatten)]
    entries: BTreeMap<String, serde_json::Value>,
}

impl ContextData {
    pub fn get<T: DeserializeOwned>(&self, key: &DataKey<T>) -> Option<T> {
        self.entries
            .get(key.name)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn insert<T: Serialize>(&mut self, key: &DataKey<T>, value: &T) -> Result<()> {
        let encoded = serde_json::to_value(value)?;
        self.entries.insert(key.name.to_string(), encoded);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The record threaded through every step of a pipeline execution.
///
/// Steps take the context by value and hand back a new one inside their
/// [`super::StepResult`], so the runner's per-step log snapshots stay
/// accurate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingContext {
    pub pipeline_id: Uuid,
    /// Short random token correlating all log lines of one execution.
    pub execution_id: String,
    pub symbol: String,
    pub market: MarketType,
    pub current_price: f64,
    pub action: TradingAction,
    pub buy_price: Option<f64>,
    pub quantity: Option<f64>,
    pub active_order_id: Option<Uuid>,
    /// Per-signal-step directional weight, upserted by step key.
    pub signal_weights: HashMap<String, f64>,
    pub data: ContextData,
}

impl TradingContext {
    pub fn new(pipeline_id: Uuid, symbol: &str, market: MarketType, current_price: f64) -> Self {
        Self {
            pipeline_id,
            execution_id: format!("{:08x}", rand::random::<u32>()),
            symbol: symbol.to_string(),
            market,
            current_price,
            action: TradingAction::NoAction,
            buy_price: None,
            quantity: None,
            active_order_id: None,
            signal_weights: HashMap::new(),
            data: ContextData::default(),
        }
    }

    pub fn set_signal_weight(&mut self, step_key: &str, weight: f64) {
        self.signal_weights.insert(step_key.to_string(), weight);
    }

    pub fn total_signal_weight(&self) -> f64 {
        self.signal_weights.values().sum()
    }
}
