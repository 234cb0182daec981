// Batch drain: repeatedly issue a bounded hard-delete until a call removes
// fewer rows than the batch size. Every call is idempotent, so a pass that
// stops early simply leaves the rest for the next tick.

use crate::context::JobContext;
use polaris_error::PolarisError;
use polaris_types::StoreError;
use std::future::Future;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// The last call removed fewer rows than the batch size.
    Exhausted,
    /// A call failed; the pass was abandoned.
    Failed,
    /// Leadership was lost or shutdown began between calls.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    pub status: DrainStatus,
    pub calls: u32,
    pub rows: u64,
}

/// Drains `resource` by calling `clean(batch_size)` until it comes back short.
///
/// `clean` receives the batch size so the comparison that ends the loop and
/// the limit sent to storage can never disagree. The cutoff is fixed by the
/// caller for the whole pass.
pub async fn batch_drain<F, Fut>(
    ctx: &JobContext,
    resource: &str,
    batch_size: u32,
    mut clean: F,
) -> DrainOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<u32, StoreError>>,
{
    let batch_size = batch_size.max(1);
    let mut outcome = DrainOutcome {
        status: DrainStatus::Exhausted,
        calls: 0,
        rows: 0,
    };

    loop {
        if outcome.calls > 0 && ctx.should_stop().await {
            outcome.status = DrainStatus::Interrupted;
            break;
        }
        outcome.calls += 1;
        match clean(batch_size).await {
            Ok(affected) => {
                outcome.rows += affected as u64;
                if affected < batch_size {
                    break;
                }
            }
            Err(err) => {
                let code = err.code();
                tracing::error!(
                    job = %ctx.job_name(),
                    resource,
                    code = %code.name(),
                    transient = code.is_transient(),
                    error = %err,
                    "[Maintain][Job] batch clean failed"
                );
                outcome.status = DrainStatus::Failed;
                break;
            }
        }
    }

    ctx.metrics().record_rows_cleaned(resource, outcome.rows);
    if outcome.rows > 0 {
        tracing::info!(
            job = %ctx.job_name(),
            resource,
            rows = outcome.rows,
            calls = outcome.calls,
            "[Maintain][Job] cleaned soft-deleted rows"
        );
    }
    outcome
}
