//! Cancellation scopes for background loops.
//!
//! A `Lifecycle` is cancelled at most once and is also cancelled whenever any
//! ancestor is. The scheduler owns the root, every match gets a child, and
//! every loop a match starts (countdown, feed, bots) gets a grandchild, so no
//! loop can outlive the match that started it.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

struct Inner {
    tx: watch::Sender<bool>,
    parent: Option<Lifecycle>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle").field("cancelled", &self.is_cancelled()).finish()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { inner: Arc::new(Inner { tx, parent: None }) }
    }

    pub fn child(&self) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { inner: Arc::new(Inner { tx, parent: Some(self.clone()) }) }
    }

    /// Returns true only for the call that actually cancelled.
    pub fn cancel(&self) -> bool {
        !self.inner.tx.send_replace(true)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.tx.borrow() || self.inner.parent.as_ref().is_some_and(Lifecycle::is_cancelled)
    }

    /// Resolves once this scope or any ancestor is cancelled.
    pub fn cancelled(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.inner.tx.subscribe();
        let parent = self.inner.parent.clone();
        async move {
            let own = async move {
                // the sender lives as long as `Inner`, which this future does not hold;
                // a dropped sender means nobody can cancel us any more
                if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                    futures::future::pending::<()>().await;
                }
            };
            match parent {
                Some(parent) => {
                    tokio::select! {
                        _ = own => {}
                        _ = parent.cancelled() => {}
                    }
                }
                None => own.await,
            }
        }
        .boxed()
    }

    /// Sleep for `dur`, returning false if cancelled first.
    pub async fn sleep(&self, dur: std::time::Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(dur) => true,
            _ = self.cancelled() => false,
        }
    }
}

/// A spawned background loop with its own cancellation scope.
///
/// `stop` cancels the scope and waits for the loop to exit; calling it again
/// is a no-op. Dropping an unstopped handle cancels and aborts the task.
pub struct TaskHandle {
    name: &'static str,
    scope: Lifecycle,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn spawn<F, Fut>(name: &'static str, parent: &Lifecycle, f: F) -> Self
    where
        F: FnOnce(Lifecycle) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let scope = parent.child();
        let join = tokio::spawn(f(scope.clone()));
        debug!(task = name, "Started background task");
        Self { name, scope, join: Some(join) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub async fn stop(&mut self) {
        self.scope.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                if !e.is_cancelled() {
                    warn!(task = self.name, error = %e, "Background task panicked");
                }
            }
            debug!(task = self.name, "Stopped background task");
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            self.scope.cancel();
            join.abort();
        }
    }
}
