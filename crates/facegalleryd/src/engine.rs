use facegallery_core::service::STATUS_INTERNAL;
use facegallery_core::{GalleryService, ServiceReply};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Status reported when a request outlives the configured timeout.
pub const STATUS_TIMEOUT: u16 = 504;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("worker task failed: {0}")]
    Join(String),
}

impl EngineError {
    fn status(&self) -> u16 {
        match self {
            EngineError::Timeout(_) => STATUS_TIMEOUT,
            EngineError::Join(_) => STATUS_INTERNAL,
        }
    }
}

/// Clone-safe handle that runs gallery operations off the async runtime.
///
/// Model inference and filesystem access block, so every call runs on the
/// blocking pool. A request that times out is reported to the caller while
/// its task runs to completion in the background; the store only ever
/// commits whole files.
#[derive(Clone)]
pub struct EngineHandle {
    service: Arc<GalleryService>,
    timeout: Duration,
}

impl EngineHandle {
    pub fn new(service: Arc<GalleryService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    /// Run `op` against the service and return its reply, or an error reply
    /// if the worker timed out or panicked.
    pub async fn call<F>(&self, name: &'static str, op: F) -> ServiceReply
    where
        F: FnOnce(&GalleryService) -> ServiceReply + Send + 'static,
    {
        let service = self.service.clone();
        match run_bounded(self.timeout, move || op(&service)).await {
            Ok(reply) => {
                tracing::debug!(op = name, status = reply.status, "request complete");
                reply
            }
            Err(e) => {
                tracing::warn!(op = name, error = %e, "request aborted");
                ServiceReply::error(e.status(), e.to_string())
            }
        }
    }
}

/// Run blocking `work` on the blocking pool, giving up after `timeout`.
async fn run_bounded<T, F>(timeout: Duration, work: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join)) => Err(EngineError::Join(join.to_string())),
        Err(_) => Err(EngineError::Timeout(timeout)),
    }
}
