//! Detached background execution of job runs.

use std::future::Future;
use std::pin::Pin;

use tracing::{Instrument, debug, info_span};

use mediaproc_core::JobId;

/// A job run ready to be scheduled.
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Schedules job runs off the request path.
///
/// Launches are fire-and-forget: callers observe progress by polling the
/// store, never through a handle.
pub trait TaskLauncher: Send + Sync {
    fn schedule(&self, job_id: JobId, task: TaskFuture);
}

/// Spawns each run on a tokio runtime and drops the join handle.
#[derive(Debug, Clone)]
pub struct TokioLauncher {
    handle: tokio::runtime::Handle,
}

impl TokioLauncher {
    /// Launcher bound to the runtime this is called from.
    ///
    /// Panics outside a tokio runtime, like [`tokio::runtime::Handle::current`].
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }

    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl TaskLauncher for TokioLauncher {
    fn schedule(&self, job_id: JobId, task: TaskFuture) {
        debug!(%job_id, "scheduling job run");
        let span = info_span!("job_task", %job_id);
        drop(self.handle.spawn(task.instrument(span)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn scheduled_task_runs_detached() {
        let launcher = TokioLauncher::current();
        let (tx, rx) = oneshot::channel();

        launcher.schedule(
            JobId::new(),
            Box::pin(async move {
                let _ = tx.send(42);
            }),
        );

        assert_eq!(rx.await.unwrap(), 42);
    }
}
