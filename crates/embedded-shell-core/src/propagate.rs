//! Cross-thread execution context propagation.
//!
//! A handler that moves work onto another thread (or tokio task) binds its
//! context there and later retrieves it with [`ContextPropagator::current`]
//! without threading it through every call frame. Bindings are scoped:
//! the returned [`ContextBinding`] guard restores the previous binding and
//! unregisters the invocation when dropped, including during unwinding.

use std::{
    cell::RefCell,
    collections::HashMap,
    future::Future,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, PoisonError, RwLock},
    thread,
};

use crate::{ExecutionContext, FailureReason, InvocationId};

thread_local! {
    static CURRENT: RefCell<Option<Arc<ExecutionContext>>> = const { RefCell::new(None) };
}

tokio::task_local! {
    static TASK_CURRENT: Arc<ExecutionContext>;
}

struct Registration {
    context: Arc<ExecutionContext>,
    bindings: usize,
}

/// Registration table of bound contexts, keyed by invocation.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone, Default)]
pub struct ContextPropagator {
    table: Arc<RwLock<HashMap<InvocationId, Registration>>>,
}

impl std::fmt::Debug for ContextPropagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPropagator")
            .field("registered", &self.registered_count())
            .finish()
    }
}

impl ContextPropagator {
    /// Create an empty propagator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `context` to the current thread until the guard is dropped.
    #[must_use = "the context is unbound as soon as the binding is dropped"]
    pub fn bind(&self, context: &Arc<ExecutionContext>) -> ContextBinding {
        let previous = CURRENT.with(|current| current.replace(Some(Arc::clone(context))));
        self.register(context);
        tracing::trace!(invocation_id = %context.invocation_id(), "context bound to thread");
        ContextBinding {
            propagator: self.clone(),
            invocation_id: context.invocation_id(),
            previous,
            _not_send: PhantomData,
        }
    }

    /// The context bound to the current thread of control.
    ///
    /// A task-local binding established by [`scope`](Self::scope) takes
    /// precedence over the thread-local one.
    #[must_use]
    pub fn current() -> Option<Arc<ExecutionContext>> {
        TASK_CURRENT
            .try_with(Arc::clone)
            .ok()
            .or_else(|| CURRENT.with(|current| current.borrow().clone()))
    }

    /// Drop the current thread's binding without waiting for its guard.
    ///
    /// The table entry is released when the guard itself is dropped.
    pub fn clear() {
        CURRENT.with(|current| current.borrow_mut().take());
    }

    /// Find a bound context by invocation id.
    #[must_use]
    pub fn lookup(&self, invocation_id: InvocationId) -> Option<Arc<ExecutionContext>> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&invocation_id)
            .map(|r| Arc::clone(&r.context))
    }

    /// Forcibly release an invocation's registration. Returns whether one existed.
    pub fn reclaim(&self, invocation_id: InvocationId) -> bool {
        let removed = self
            .table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&invocation_id)
            .is_some();
        if removed {
            tracing::debug!(%invocation_id, "reclaimed propagated context");
        }
        removed
    }

    /// Number of invocations with at least one live binding.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run `f` on a new thread with `context` bound for its whole duration.
    ///
    /// A panic in `f` fails the context with [`FailureReason::HandlerError`]
    /// before it propagates to the join handle.
    ///
    /// # Errors
    /// Returns error if the thread cannot be spawned.
    pub fn spawn_bound<F, T>(
        &self,
        context: &Arc<ExecutionContext>,
        f: F,
    ) -> std::io::Result<thread::JoinHandle<T>>
    where
        F: FnOnce(Arc<ExecutionContext>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let propagator = self.clone();
        let context = Arc::clone(context);
        thread::Builder::new()
            .name(format!("shell-worker-{}", context.invocation_id().simple()))
            .spawn(move || {
                let _binding = propagator.bind(&context);
                match panic::catch_unwind(AssertUnwindSafe(|| f(Arc::clone(&context)))) {
                    Ok(value) => value,
                    Err(payload) => {
                        let reason = FailureReason::panicked(payload.as_ref());
                        tracing::error!(invocation_id = %context.invocation_id(), panic = %reason, "delegated worker panicked");
                        context.fail(reason);
                        panic::resume_unwind(payload)
                    }
                }
            })
    }

    /// Run `future` with `context` bound as the task-local current context.
    pub async fn scope<F>(&self, context: &Arc<ExecutionContext>, future: F) -> F::Output
    where
        F: Future,
    {
        self.register(context);
        let _registration = Registered {
            propagator: self.clone(),
            invocation_id: context.invocation_id(),
        };
        TASK_CURRENT.scope(Arc::clone(context), future).await
    }

    fn register(&self, context: &Arc<ExecutionContext>) {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(context.invocation_id())
            .and_modify(|r| r.bindings += 1)
            .or_insert_with(|| Registration {
                context: Arc::clone(context),
                bindings: 1,
            });
    }

    fn unregister(&self, invocation_id: InvocationId) {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(registration) = table.get_mut(&invocation_id) {
            registration.bindings = registration.bindings.saturating_sub(1);
            if registration.bindings == 0 {
                table.remove(&invocation_id);
            }
        }
    }
}

/// Guard for a thread-local binding. Not `Send`: it must be dropped on the
/// thread that created it.
pub struct ContextBinding {
    propagator: ContextPropagator,
    invocation_id: InvocationId,
    previous: Option<Arc<ExecutionContext>>,
    _not_send: PhantomData<*const ()>,
}

impl ContextBinding {
    #[must_use]
    pub const fn invocation_id(&self) -> InvocationId {
        self.invocation_id
    }
}

impl Drop for ContextBinding {
    fn drop(&mut self) {
        let previous = self.previous.take();
        // Thread-local storage may already be gone during thread teardown.
        let _ = CURRENT.try_with(|current| *current.borrow_mut() = previous);
        self.propagator.unregister(self.invocation_id);
        tracing::trace!(invocation_id = %self.invocation_id, "context unbound from thread");
    }
}

struct Registered {
    propagator: ContextPropagator,
    invocation_id: InvocationId,
}

impl Drop for Registered {
    fn drop(&mut self) {
        self.propagator.unregister(self.invocation_id);
    }
}
