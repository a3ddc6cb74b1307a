use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;

use crate::error::CapabilityError;

type Loader<M> = Arc<dyn Fn() -> Result<M, CapabilityError> + Send + Sync>;

/// A heavyweight local model loaded on first use.
///
/// Owned by the client instance that holds it. Two clients never share a model,
/// so concurrent jobs each pay for their own copy.
pub struct LazyModel<M> {
    name: &'static str,
    cell: OnceCell<Arc<M>>,
    loader: Loader<M>,
}

impl<M: Send + Sync + 'static> LazyModel<M> {
    pub fn new<F>(name: &'static str, loader: F) -> Self
    where
        F: Fn() -> Result<M, CapabilityError> + Send + Sync + 'static,
    {
        Self {
            name,
            cell: OnceCell::new(),
            loader: Arc::new(loader),
        }
    }

    /// Wrap an already-constructed model.
    pub fn ready(name: &'static str, model: M) -> Self {
        Self {
            name,
            cell: OnceCell::new_with(Some(Arc::new(model))),
            loader: Arc::new(|| Err(CapabilityError::local_fault("model already provided"))),
        }
    }

    /// Get the model, loading it if this is the first call.
    ///
    /// The loader runs on the blocking pool. A failed load leaves the cell
    /// empty; the next call tries again.
    pub async fn get(&self) -> Result<Arc<M>, CapabilityError> {
        self.cell
            .get_or_try_init(|| async {
                info!(model = self.name, "loading local model");
                let loader = self.loader.clone();
                tokio::task::spawn_blocking(move || (*loader)().map(Arc::new))
                    .await
                    .map_err(|e| {
                        CapabilityError::local_fault(format!("loading {} failed: {e}", self.name))
                    })
                    .and_then(|loaded| loaded)
            })
            .await
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

impl<M> core::fmt::Debug for LazyModel<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LazyModel")
            .field("name", &self.name)
            .field("loaded", &self.cell.initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn loads_once_on_first_use() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let model = LazyModel::new("counter", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(42u32)
        });

        assert!(!model.is_loaded());
        assert_eq!(*model.get().await.unwrap(), 42);
        assert_eq!(*model.get().await.unwrap(), 42);
        assert!(model.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_is_retried_next_call() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let model = LazyModel::new("flaky", move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(CapabilityError::local_fault("weights missing"))
            } else {
                Ok("ok")
            }
        });

        assert!(model.get().await.is_err());
        assert!(!model.is_loaded());
        assert_eq!(*model.get().await.unwrap(), "ok");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn load_runs_off_the_async_worker() {
        let runtime_thread = std::thread::current().id();
        let model = LazyModel::new("weights", move || {
            Ok(std::thread::current().id() != runtime_thread)
        });
        assert!(*model.get().await.unwrap());
    }

    #[tokio::test]
    async fn panicking_loader_is_a_local_fault() {
        let model: LazyModel<u8> = LazyModel::new("broken", || panic!("bad weights"));
        let err = model.get().await.unwrap_err();
        assert_eq!(err.class, crate::error::FailureClass::LocalFault);
        assert!(!model.is_loaded());
    }

    #[tokio::test]
    async fn instances_do_not_share_state() {
        let a = LazyModel::new("a", || Ok(1u8));
        let b = LazyModel::new("b", || Ok(2u8));
        a.get().await.unwrap();
        assert!(a.is_loaded());
        assert!(!b.is_loaded());
    }
}
