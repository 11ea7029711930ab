//! Container registry and deferred teardown.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{CleanupAction, DockerContainer};
use crate::core::Flavor;
use crate::error::Result;
use crate::instance::{Instance, PoolRegistry};

/// Deferred teardown step run by [`Lifecycle::shutdown`].
pub type ShutdownCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

type ContainerCell = Arc<OnceCell<(DockerContainer, Instance)>>;

#[derive(Default)]
struct LifecycleState {
    containers: HashMap<String, ContainerCell>,
    cleanups_registered: HashSet<String>,
    callbacks: Vec<ShutdownCallback>,
}

/// Owns provisioned containers and the teardown callbacks for one run.
///
/// The state mutex is only held for map and list updates, never across
/// container or network calls.
#[derive(Default)]
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Lifecycle")
            .field("containers", &state.containers.keys().collect::<Vec<_>>())
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Container and instance for `flavor`, provisioned on first request.
    ///
    /// Concurrent requests for the same flavor wait on a single provisioning.
    pub async fn container_instance(
        &self,
        flavor: Flavor,
        registry: &Arc<PoolRegistry>,
    ) -> Result<(DockerContainer, Instance)> {
        let name = flavor.container_name();
        let cell = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.containers.entry(name).or_default().clone()
        };
        let entry = cell
            .get_or_try_init(|| async {
                let container = DockerContainer::ensure(flavor).await?;
                let instance = Instance::new(
                    "127.0.0.1",
                    container.port,
                    None,
                    "root",
                    "",
                    "",
                    registry.clone(),
                )?;
                instance.set_flavor(flavor);
                container.wait_ready(&instance).await?;
                Ok::<_, crate::error::PushError>((container, instance))
            })
            .await?;
        Ok(entry.clone())
    }

    /// Register a callback to run at shutdown.
    pub fn on_shutdown(&self, callback: ShutdownCallback) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.callbacks.push(callback);
    }

    /// Stop or remove `container` at shutdown; registered at most once per container.
    pub fn register_container_cleanup(&self, container: &DockerContainer, action: CleanupAction) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.cleanups_registered.insert(container.name.clone()) {
                return;
            }
        }
        let container = container.clone();
        self.on_shutdown(Box::new(move || {
            Box::pin(async move {
                let result = match action {
                    CleanupAction::StopContainer => container.stop().await,
                    CleanupAction::DestroyContainer => container.destroy().await,
                    _ => Ok(()),
                };
                if let Err(e) = result {
                    warn!("Container cleanup failed for {}: {}", container.name, e);
                }
            })
        }));
    }

    /// Run every registered callback exactly once, in registration order.
    pub async fn shutdown(&self) {
        let callbacks = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut state.callbacks)
        };
        debug!("Running {} shutdown callbacks", callbacks.len());
        for callback in callbacks {
            callback().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_shutdown_runs_callbacks_once() {
        let lifecycle = Lifecycle::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = count.clone();
            lifecycle.on_shutdown(Box::new(move || {
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            }));
        }
        lifecycle.shutdown().await;
        lifecycle.shutdown().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_container_cleanup_registered_once() {
        let lifecycle = Lifecycle::new();
        let container = DockerContainer {
            name: "mysql-schema-push-mysql-8.0".into(),
            image: "mysql:8.0".into(),
            port: 49153,
        };
        lifecycle.register_container_cleanup(&container, CleanupAction::StopContainer);
        lifecycle.register_container_cleanup(&container, CleanupAction::StopContainer);
        let state = lifecycle.state.lock().unwrap();
        assert_eq!(state.callbacks.len(), 1);
    }

    #[test]
    fn test_independent_lifecycles() {
        let a = Lifecycle::new();
        let b = Lifecycle::new();
        a.on_shutdown(Box::new(|| Box::pin(async {})));
        assert_eq!(a.state.lock().unwrap().callbacks.len(), 1);
        assert_eq!(b.state.lock().unwrap().callbacks.len(), 0);
    }
}
