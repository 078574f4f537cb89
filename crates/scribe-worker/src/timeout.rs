//! Time limits around attempts and collaborator calls.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, timeout};

use crate::config::ExecutionLimits;
use crate::logging::JobLogger;

/// The hard limit elapsed and the attempt was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("hard time limit of {limit:?} exceeded")]
pub struct HardLimitExceeded {
    pub limit: Duration,
}

/// Run `fut` under the attempt limits.
///
/// Crossing the soft limit only logs a warning. Crossing the hard limit
/// drops the future.
pub async fn with_limits<F>(
    fut: F,
    limits: ExecutionLimits,
    logger: &JobLogger,
) -> Result<F::Output, HardLimitExceeded>
where
    F: Future,
{
    let soft = limits.soft.filter(|soft| *soft < limits.hard);
    let Some(soft) = soft else {
        return timeout(limits.hard, fut)
            .await
            .map_err(|_| HardLimitExceeded { limit: limits.hard });
    };

    let hard_deadline = sleep(limits.hard);
    let soft_deadline = sleep(soft);
    tokio::pin!(fut, hard_deadline, soft_deadline);
    let mut warned = false;

    loop {
        tokio::select! {
            out = &mut fut => return Ok(out),
            _ = &mut hard_deadline => return Err(HardLimitExceeded { limit: limits.hard }),
            _ = &mut soft_deadline, if !warned => {
                warned = true;
                logger.log_warning(&format!("soft time limit of {:?} exceeded", soft));
            }
        }
    }
}

/// Bound a fallible call, mapping expiry into the call's own error type.
pub async fn bounded<T, E, F>(limit: Duration, fut: F, on_timeout: impl FnOnce() -> E) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}
