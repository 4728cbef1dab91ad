use std::future::Future;

use crate::error::ReadinessError;

/// Run `attempt`; if it fails with an error `needs_remedy` accepts, run
/// `remedy` and then `attempt` exactly once more.
///
/// The retry is bounded to one so a remedy that reports success without
/// actually fixing anything cannot loop. A failing remedy's error is returned
/// in place of the original one.
pub async fn retry_once_after<T, A, AF, R, RF>(
    operation: &str,
    mut attempt: A,
    needs_remedy: fn(&ReadinessError) -> bool,
    remedy: R,
) -> Result<T, ReadinessError>
where
    A: FnMut() -> AF,
    AF: Future<Output = Result<T, ReadinessError>>,
    R: FnOnce() -> RF,
    RF: Future<Output = Result<(), ReadinessError>>,
{
    match attempt().await {
        Err(e) if needs_remedy(&e) => {
            tracing::warn!(operation, error = %e, "Attempt failed, remediating before one retry");
            remedy().await?;
            tracing::info!(operation, "Remediation succeeded, retrying");
            attempt().await
        }
        other => other,
    }
}
