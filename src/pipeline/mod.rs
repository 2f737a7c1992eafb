// Pipeline execution engine
pub mod builder;
pub mod context;
pub mod registry;
pub mod runner;
pub mod step;

pub use builder::{build_steps, BuildError};
pub use context::{ContextData, DataKey, TradingContext, SIMULATED_TIME};
pub use registry::StepRegistry;
pub use runner::run_pipeline;
pub use step::{StepCategory, StepDefinition, StepDeps, StepResult, TradingStep};
