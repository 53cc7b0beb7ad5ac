//! Fail-open helpers for side effects that must never sink a run
//!
//! Memory persistence and trace export are observability, not control flow.
//! When they break, the run carries on and the failure shows up in the log.
//!
//! DO NOT use fail-open for:
//! - Provider calls (an unreachable model is fatal)
//! - Sandbox calls (an unreachable sandbox is fatal)
//! - Anything whose result feeds the attempt loop's decisions

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Run `f`, logging and discarding its error
///
/// Returns `None` when the operation failed.
///
/// ```no_run
/// use kiln_core::fail_open::fail_open;
/// use kiln_core::Result;
///
/// async fn persist() -> Result<()> {
///     Ok(())
/// }
///
/// async fn record_run() {
///     let stored = fail_open("memory::persist", || persist()).await;
///     assert!(stored.is_some());
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}
