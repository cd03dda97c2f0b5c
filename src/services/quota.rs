use crate::error::PipelineError;
use crate::models::{InputBatch, QuotaEstimate};
use crate::services::status::StatusReporter;

/// Pre-flight capacity check. Passing does not reserve anything: another
/// writer can still exhaust the space before the archive is written.
pub fn check_quota(
    batch: &InputBatch,
    estimate: QuotaEstimate,
    status: &StatusReporter,
) -> Result<(), PipelineError> {
    let total_bytes = batch.total_bytes();

    if total_bytes > estimate.quota_bytes {
        tracing::warn!(
            "Selection of {} bytes exceeds staging quota of {} bytes",
            total_bytes,
            estimate.quota_bytes
        );
        return Err(PipelineError::CapacityExceeded {
            total_bytes,
            quota_bytes: estimate.quota_bytes,
        });
    }

    status.report(format!(
        "Staging space in use: {:.3} GB",
        estimate.used_bytes as f64 / 1e9
    ));
    Ok(())
}
