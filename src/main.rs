use clap::Parser;
use pipebot::config::Settings;
use pipebot::db::{PgExecutionLogSink, PgPositionProvider, PipelineRepository, RedisCandleStore};
use pipebot::execution::{LiveTradeExecutor, PaperOrderExecutor};
use pipebot::models::{Pipeline, Timeframe};
use pipebot::pipeline::{build_steps, run_pipeline, StepDeps, StepRegistry, StepResult, TradingContext};
use pipebot::ports::CandleStore;
use pipebot::steps;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Interval scheduler driving configured trading pipelines.
#[derive(Debug, Parser)]
#[command(name = "pipebot", about = "Pipeline trading engine")]
struct Args {
    /// Run a single tick and exit
    #[arg(long)]
    once: bool,

    /// Restrict execution to one pipeline id
    #[arg(long)]
    pipeline: Option<Uuid>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();
    let settings = Settings::load()?;

    tracing::info!("pipebot starting");
    tracing::info!("  poll interval: {}s", settings.poll_interval_secs);

    let pool = pipebot::db::connect(&settings.database_url).await?;
    let candles = Arc::new(RedisCandleStore::new(&settings.redis_url).await?);

    let deps = StepDeps {
        candles: candles.clone(),
        positions: Arc::new(PgPositionProvider::new(pool.clone())),
        trader: Arc::new(LiveTradeExecutor::new(
            pool.clone(),
            Arc::new(PaperOrderExecutor),
        )),
    };
    let registry = Arc::new(steps::default_registry());
    let sink = Arc::new(PgExecutionLogSink::new(pool.clone()));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received Ctrl+C, shutting down...");
                cancel.cancel();
            }
        });
    }

    let mut ticker = interval(Duration::from_secs(settings.poll_interval_secs.max(1)));
    let price_timeframe = settings.price_timeframe();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        run_tick(
            &pool,
            registry.clone(),
            &deps,
            sink.clone(),
            price_timeframe,
            args.pipeline,
            &cancel,
        )
        .await;

        if args.once {
            break;
        }
    }

    tracing::info!("pipebot stopped");
    Ok(())
}

fn setup_logging() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pipebot=info")),
        )
        .init();
}

/// One scheduler tick: every active pipeline is executed in its own task
/// with an independent context.
async fn run_tick(
    pool: &PgPool,
    registry: Arc<StepRegistry>,
    deps: &StepDeps,
    sink: Arc<PgExecutionLogSink>,
    price_timeframe: Timeframe,
    only: Option<Uuid>,
    cancel: &CancellationToken,
) {
    let pipelines = match PipelineRepository::list_active(pool).await {
        Ok(pipelines) => pipelines,
        Err(err) => {
            tracing::error!("failed to list pipelines: {}", err);
            return;
        }
    };

    let mut handles = Vec::new();
    for pipeline in pipelines {
        if only.is_some_and(|id| id != pipeline.id) {
            continue;
        }

        let pool = pool.clone();
        let registry = registry.clone();
        let deps = deps.clone();
        let sink = sink.clone();
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            run_one(pool, registry, deps, sink, price_timeframe, pipeline, cancel).await;
        }));
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!("pipeline task panicked: {}", err);
        }
    }
}

async fn run_one(
    pool: PgPool,
    registry: Arc<StepRegistry>,
    deps: StepDeps,
    sink: Arc<PgExecutionLogSink>,
    price_timeframe: Timeframe,
    pipeline: Pipeline,
    cancel: CancellationToken,
) {
    let configs = match PipelineRepository::step_configs(&pool, pipeline.id).await {
        Ok(configs) => configs,
        Err(err) => {
            tracing::error!(pipeline = %pipeline.name, "failed to load step configs: {}", err);
            return;
        }
    };

    let steps = match build_steps(&registry, &deps, &configs) {
        Ok(steps) => steps,
        Err(errors) => {
            for error in errors {
                tracing::error!(pipeline = %pipeline.name, "{}", error);
            }
            return;
        }
    };

    if steps.is_empty() {
        tracing::debug!(pipeline = %pipeline.name, "no enabled steps, skipping");
        return;
    }

    let price = match deps
        .candles
        .recent_candles(&pipeline.symbol, pipeline.market, price_timeframe, 1)
        .await
    {
        Ok(candles) if !candles.is_empty() => candles[0].close,
        Ok(_) => {
            tracing::warn!(
                pipeline = %pipeline.name,
                "no cached candles for {}, skipping tick",
                pipeline.symbol
            );
            return;
        }
        Err(err) => {
            tracing::error!(pipeline = %pipeline.name, "price lookup failed: {}", err);
            return;
        }
    };

    let ctx = TradingContext::new(pipeline.id, &pipeline.symbol, pipeline.market, price);
    let execution_id = ctx.execution_id.clone();

    match run_pipeline(&steps, ctx, &cancel, sink.as_ref()).await {
        StepResult::Continue(_, message) => {
            tracing::info!(pipeline = %pipeline.name, execution_id, "completed: {}", message);
        }
        StepResult::Stop(message) => {
            tracing::info!(pipeline = %pipeline.name, execution_id, "stopped: {}", message);
        }
        StepResult::Fail(message) => {
            tracing::error!(pipeline = %pipeline.name, execution_id, "failed: {}", message);
        }
    }
}
