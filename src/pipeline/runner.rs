use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::models::ExecutionLogRecord;
use crate::pipeline::{StepResult, TradingContext, TradingStep};
use crate::ports::ExecutionLogSink;

/// Execute an ordered step list against an initial context.
///
/// Steps run strictly in sequence. A cancellation observed before a step
/// starts forces `Stop("Cancelled")` without running it; once any step
/// returns `Stop` or `Fail`, the remaining steps are skipped. One audit
/// record is appended per step actually executed, capturing the pre-call
/// context snapshot. The return value is the last result produced, or the
/// initial `Continue` for an empty step list.
pub async fn run_pipeline(
    steps: &[Box<dyn TradingStep>],
    initial: TradingContext,
    cancel: &CancellationToken,
    sink: &dyn ExecutionLogSink,
) -> StepResult {
    let pipeline_id = initial.pipeline_id;
    let execution_id = initial.execution_id.clone();

    let mut result = StepResult::Continue(initial, "Started".to_string());

    for step in steps {
        if cancel.is_cancelled() {
            result = StepResult::Stop("Cancelled".to_string());
            break;
        }

        let ctx = match &result {
            StepResult::Continue(ctx, _) => ctx.clone(),
            _ => break,
        };

        let snapshot = serde_json::to_value(&ctx).unwrap_or(serde_json::Value::Null);
        let started_at = Utc::now();

        let next = step.execute(ctx, cancel).await;

        let finished_at = Utc::now();
        tracing::debug!(
            pipeline_id = %pipeline_id,
            execution_id = %execution_id,
            step = step.key(),
            outcome = next.outcome(),
            "step finished"
        );

        let record = ExecutionLogRecord {
            pipeline_id,
            execution_id: execution_id.clone(),
            step_key: step.key().to_string(),
            outcome: next.outcome().to_string(),
            message: next.message().to_string(),
            context: snapshot,
            started_at,
            finished_at,
        };

        // The audit trail is best-effort: a sink failure must not abort a
        // live trading run.
        if let Err(err) = sink.append(record).await {
            tracing::warn!(step = step.key(), "failed to append execution log: {}", err);
        }

        result = next;
    }

    result
}
