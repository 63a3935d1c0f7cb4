use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{HostError, LifecycleError};

type StopFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), HostError>> + Send>;

/// A named action run when the lifecycle stops.
pub struct Hook {
    name: String,
    on_stop: StopFn,
}

impl Hook {
    pub fn on_stop<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), HostError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            on_stop: Box::new(move || f().boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Application lifecycle: collects stop hooks and runs them once on shutdown.
pub struct Lifecycle {
    hooks: Mutex<Vec<Hook>>,
    stopped: AtomicBool,
    signal: watch::Sender<bool>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            hooks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            signal,
        }
    }

    /// Register a stop hook. Hooks run in reverse registration order.
    /// Once `stop` has begun the hook is refused and never runs; the caller
    /// is left to clean up whatever the hook would have.
    pub fn append(&self, hook: Hook) -> Result<(), LifecycleError> {
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        // `stop` flips the flag before draining under this lock.
        if self.stopped.load(Ordering::SeqCst) {
            warn!(hook = %hook.name, "lifecycle already stopped, refusing hook");
            return Err(LifecycleError::Stopped { hook: hook.name });
        }
        hooks.push(hook);
        Ok(())
    }

    /// Number of hooks waiting to run.
    pub fn hook_count(&self) -> usize {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn hook_names(&self) -> Vec<String> {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|h| h.name.clone())
            .collect()
    }

    /// A context that observes this lifecycle's stop signal.
    pub fn context(&self) -> LifecycleContext {
        LifecycleContext {
            rx: self.signal.subscribe(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Signal stop and run every hook once. Every hook runs even if an
    /// earlier one fails; the first failure is returned. Calls after the
    /// first are no-ops.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("lifecycle stop requested again, ignoring");
            return Ok(());
        }
        self.signal.send_replace(true);

        let hooks = std::mem::take(&mut *self.hooks.lock().unwrap_or_else(PoisonError::into_inner));
        let mut first_err = None;
        for hook in hooks.into_iter().rev() {
            debug!(hook = %hook.name, "running stop hook");
            if let Err(source) = (hook.on_stop)().await {
                warn!(hook = %hook.name, error = %source, "stop hook failed");
                if first_err.is_none() {
                    first_err = Some(LifecycleError::Hook {
                        hook: hook.name,
                        source,
                    });
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Read side of the lifecycle stop signal.
#[derive(Debug, Clone)]
pub struct LifecycleContext {
    rx: watch::Receiver<bool>,
}

impl LifecycleContext {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the lifecycle stops (or is dropped).
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}
