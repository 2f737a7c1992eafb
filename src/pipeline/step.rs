use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::params::{ParameterDef, ValidatedParams};
use crate::pipeline::TradingContext;
use crate::ports::{CandleStore, PositionProvider, TradeExecutor};

/// Outcome of one step execution.
#[derive(Debug, Clone)]
pub enum StepResult {
    /// Proceed to the next step with the updated context.
    Continue(TradingContext, String),
    /// Halt the pipeline deliberately; not an error.
    Stop(String),
    /// Halt the pipeline; treated as an error.
    Fail(String),
}

impl StepResult {
    pub fn outcome(&self) -> &'static str {
        match self {
            StepResult::Continue(..) => "continue",
            StepResult::Stop(_) => "stop",
            StepResult::Fail(_) => "fail",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StepResult::Continue(_, message)
            | StepResult::Stop(message)
            | StepResult::Fail(message) => message,
        }
    }

    pub fn is_continue(&self) -> bool {
        matches!(self, StepResult::Continue(..))
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, StepResult::Fail(_))
    }
}

/// UI grouping for step kinds. No behavioral effect inside the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepCategory {
    Validation,
    Signal,
    Execution,
}

/// Ports handed to step factories at construction time.
#[derive(Clone)]
pub struct StepDeps {
    pub candles: Arc<dyn CandleStore>,
    pub positions: Arc<dyn PositionProvider>,
    pub trader: Arc<dyn TradeExecutor>,
}

/// A runtime-bound unit of pipeline logic, closed over its validated
/// parameters and injected ports.
#[async_trait]
pub trait TradingStep: Send + Sync {
    fn key(&self) -> &str;

    async fn execute(&self, ctx: TradingContext, cancel: &CancellationToken) -> StepResult;
}

type StepFactory = Box<dyn Fn(ValidatedParams, &StepDeps) -> Box<dyn TradingStep> + Send + Sync>;

/// Static metadata for a step kind, registered once at startup.
pub struct StepDefinition {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: StepCategory,
    pub icon: &'static str,
    pub parameters: Vec<ParameterDef>,
    factory: StepFactory,
}

impl StepDefinition {
    pub fn new<F>(
        key: &'static str,
        name: &'static str,
        description: &'static str,
        category: StepCategory,
        icon: &'static str,
        parameters: Vec<ParameterDef>,
        factory: F,
    ) -> Self
    where
        F: Fn(ValidatedParams, &StepDeps) -> Box<dyn TradingStep> + Send + Sync + 'static,
    {
        Self {
            key,
            name,
            description,
            category,
            icon,
            parameters,
            factory: Box::new(factory),
        }
    }

    pub fn build(&self, params: ValidatedParams, deps: &StepDeps) -> Box<dyn TradingStep> {
        (self.factory)(params, deps)
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("category", &self.category)
            .field("parameters", &self.parameters.len())
            .finish()
    }
}
