//! Command dispatch and invocation supervision.

use std::{collections::HashMap, sync::Arc, time::Duration};

use embedded_shell_core::{
    ContextPropagator, ExecutionContext, FailureReason, Frame, InvocationId, Outcome, Session,
    SessionStore, ShellConfig, StoreError, session::now_millis,
};
use embedded_shell_executor::{
    ArgumentBinder, BindError, CommandLine, CommandLineError, CommandNotFound, CommandRegistry,
    Invocation, render_help,
};
use futures::stream::BoxStream;
use tokio::{sync::RwLock, task::JoinHandle};

/// Dispatch error. Returned before any execution context exists.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Command line error: {0}")]
    CommandLine(#[from] CommandLineError),
    #[error(transparent)]
    CommandNotFound(#[from] CommandNotFound),
    #[error("Argument error: {0}")]
    Bind(#[from] BindError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Session expired: {0}")]
    SessionExpired(String),
}

impl DispatchError {
    /// Stable machine-readable code, used on the wire.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::CommandLine(_) => "command_line",
            Self::CommandNotFound(_) => "command_not_found",
            Self::Bind(BindError::MissingArgument(_)) => "missing_argument",
            Self::Bind(BindError::ArgumentFormat { .. }) => "argument_format",
            Self::Bind(BindError::UnknownOption(_)) => "unknown_option",
            Self::Store(_) => "store_unavailable",
            Self::SessionExpired(_) => "session_expired",
        }
    }
}

/// Result of one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Sessions newly marked expired.
    pub expired: usize,
    /// Expired sessions deleted from the store.
    pub removed: usize,
}

struct Inner {
    registry: CommandRegistry,
    store: Arc<dyn SessionStore>,
    propagator: ContextPropagator,
    config: ShellConfig,
    active: RwLock<HashMap<InvocationId, Arc<ExecutionContext>>>,
}

/// Routes command lines to handlers and supervises the resulting invocations.
///
/// Cheap to clone; clones share the registry, store and active table.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("commands", &self.inner.registry.len())
            .field("propagator", &self.inner.propagator)
            .finish_non_exhaustive()
    }
}

/// Handle on a running invocation.
#[derive(Debug, Clone)]
pub struct InvocationHandle {
    context: Arc<ExecutionContext>,
}

impl InvocationHandle {
    #[must_use]
    pub fn invocation_id(&self) -> InvocationId {
        self.context.invocation_id()
    }

    #[must_use]
    pub const fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    /// Every frame of this invocation, from the first, ending with the terminal one.
    #[must_use]
    pub fn frames(&self) -> BoxStream<'static, Frame> {
        self.context.frames().until_terminal_stream()
    }

    /// Wait for the invocation to finish.
    pub async fn wait(&self) -> Outcome {
        self.context.wait_terminal().await
    }
}

impl Dispatcher {
    /// Create a dispatcher. Must be called within a tokio runtime before dispatching.
    #[must_use]
    pub fn new(registry: CommandRegistry, store: Arc<dyn SessionStore>, config: ShellConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                store,
                propagator: ContextPropagator::new(),
                config,
                active: RwLock::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &CommandRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn propagator(&self) -> &ContextPropagator {
        &self.inner.propagator
    }

    #[must_use]
    pub fn config(&self) -> &ShellConfig {
        &self.inner.config
    }

    /// Open a session, creating it if needed. An expired session is replaced
    /// with a fresh one under the same id.
    ///
    /// # Errors
    /// Returns error if the store is unavailable.
    pub async fn open_session(&self, session_id: &str) -> Result<Session, DispatchError> {
        let store = &self.inner.store;
        if let Some(mut session) = store.get(session_id).await? {
            if session.is_active() {
                session.touch();
                store.put(&session).await?;
                return Ok(session);
            }
            tracing::info!(session_id, "reopening expired session");
            let session = Session::new(session_id);
            store.put(&session).await?;
            return Ok(session);
        }

        let session = Session::new(session_id);
        if store.put_if_absent(&session).await? {
            tracing::info!(session_id, "session opened");
            return Ok(session);
        }
        // Lost a creation race; the winner's record is authoritative.
        Ok(store.get(session_id).await?.unwrap_or(session))
    }

    /// Interrupt the session's running invocations and delete the session.
    /// Returns whether a stored session existed.
    ///
    /// # Errors
    /// Returns error if the store is unavailable.
    pub async fn close_session(&self, session_id: &str) -> Result<bool, DispatchError> {
        for context in self.active_invocations(session_id).await {
            context.request_interrupt();
        }
        let existed = self.inner.store.remove(session_id).await?;
        tracing::info!(session_id, existed, "session closed");
        Ok(existed)
    }

    /// Parse, bind and start one command line for `session_id`.
    ///
    /// The handler runs on a blocking worker with its context bound. A
    /// supervisor fails the invocation if it is not terminal within the
    /// configured timeout.
    ///
    /// # Errors
    /// Returns error if the session is expired, the store is unavailable, the
    /// line cannot be tokenized, the command is unknown or its arguments do not
    /// bind. No context is created in any of these cases.
    pub async fn dispatch(
        &self,
        session_id: &str,
        line: &str,
    ) -> Result<InvocationHandle, DispatchError> {
        self.touch_session(session_id).await?;

        let command_line = CommandLine::parse(line)?;
        let descriptor = self.inner.registry.lookup(&command_line.key)?;
        let args = ArgumentBinder::bind(&descriptor, &command_line.tokens)?;
        let context_kind = descriptor.context_kind();

        let context = Arc::new(ExecutionContext::with_history_limit(
            session_id,
            command_line.key.as_str(),
            descriptor.interruptible,
            self.inner.config.history_limit_bytes,
        ));
        let invocation_id = context.invocation_id();
        self.inner
            .active
            .write()
            .await
            .insert(invocation_id, Arc::clone(&context));
        context.start();
        tracing::debug!(%invocation_id, session_id, command = %command_line.key, "invocation started");

        let invocation = Invocation::new(
            args,
            Arc::clone(&context),
            context_kind,
            self.inner.propagator.clone(),
        );
        let propagator = self.inner.propagator.clone();
        let worker_context = Arc::clone(&context);
        let handler = tokio::task::spawn_blocking(move || {
            let _binding = propagator.bind(&worker_context);
            descriptor.handler.call(invocation)
        });

        let monitored = Arc::clone(&context);
        tokio::spawn(async move {
            match handler.await {
                Ok(Ok(())) => {
                    if context_kind.is_none() {
                        monitored.completed();
                    }
                }
                Ok(Err(e)) => {
                    let message = format!("{e:#}");
                    tracing::error!(invocation_id = %monitored.invocation_id(), command = %monitored.command(), error = %message, "handler failed");
                    monitored.fail(FailureReason::HandlerError(message));
                }
                Err(e) if e.is_panic() => {
                    let reason = FailureReason::panicked(e.into_panic().as_ref());
                    tracing::error!(invocation_id = %monitored.invocation_id(), command = %monitored.command(), panic = %reason, "handler panicked");
                    monitored.fail(reason);
                }
                Err(e) => {
                    tracing::error!(invocation_id = %monitored.invocation_id(), error = %e, "handler task cancelled");
                    monitored.fail(FailureReason::HandlerError(e.to_string()));
                }
            }
        });

        let supervisor = self.clone();
        let supervised = Arc::clone(&context);
        tokio::spawn(async move { supervisor.supervise(supervised).await });

        Ok(InvocationHandle { context })
    }

    /// Request an interrupt. Returns whether it was accepted.
    pub async fn interrupt(&self, invocation_id: InvocationId) -> bool {
        let Some(context) = self.context(invocation_id).await else {
            tracing::debug!(%invocation_id, "interrupt for unknown invocation");
            return false;
        };
        context.request_interrupt()
    }

    /// Context of a running invocation.
    pub async fn context(&self, invocation_id: InvocationId) -> Option<Arc<ExecutionContext>> {
        self.inner.active.read().await.get(&invocation_id).cloned()
    }

    /// Running invocations of one session.
    pub async fn active_invocations(&self, session_id: &str) -> Vec<Arc<ExecutionContext>> {
        self.inner
            .active
            .read()
            .await
            .values()
            .filter(|c| c.session_id() == session_id)
            .cloned()
            .collect()
    }

    /// Expire sessions idle for longer than the session TTL, and delete
    /// sessions that stayed expired for another TTL. Sessions with running
    /// invocations are left alone.
    ///
    /// # Errors
    /// Returns error if the store is unavailable.
    pub async fn reap_expired_sessions(&self) -> Result<ReapReport, DispatchError> {
        let ttl = self.inner.config.session_ttl();
        let now = now_millis();
        let busy: Vec<String> = self
            .inner
            .active
            .read()
            .await
            .values()
            .map(|c| c.session_id().to_string())
            .collect();

        let mut report = ReapReport::default();
        for mut session in self.inner.store.get_all().await? {
            if busy.contains(&session.id) {
                continue;
            }
            if session.is_active() {
                if session.is_idle_for(ttl, now) {
                    session.expire();
                    self.inner.store.put(&session).await?;
                    report.expired += 1;
                    tracing::debug!(session_id = %session.id, "session expired");
                }
            } else if session.is_idle_for(ttl.saturating_mul(2), now)
                && self.inner.store.remove(&session.id).await?
            {
                report.removed += 1;
                tracing::debug!(session_id = %session.id, "expired session removed");
            }
        }
        if report != ReapReport::default() {
            tracing::info!(expired = report.expired, removed = report.removed, "session reaper pass");
        }
        Ok(report)
    }

    /// Run [`reap_expired_sessions`](Self::reap_expired_sessions) every `period`.
    #[must_use]
    pub fn spawn_reaper(&self, period: Duration) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = dispatcher.reap_expired_sessions().await {
                    tracing::warn!(error = %e, "session reaper pass failed");
                }
            }
        })
    }

    /// Rendered help for every command, or for one.
    ///
    /// # Errors
    /// Returns error if `key` names no command.
    pub fn help(&self, key: Option<&str>) -> Result<String, DispatchError> {
        Ok(render_help(&self.inner.registry, key)?)
    }

    async fn touch_session(&self, session_id: &str) -> Result<(), DispatchError> {
        let store = &self.inner.store;
        match store.get(session_id).await? {
            Some(mut session) => {
                if !session.is_active() {
                    return Err(DispatchError::SessionExpired(session_id.to_string()));
                }
                session.touch();
                store.put(&session).await?;
            }
            None => {
                store.put_if_absent(&Session::new(session_id)).await?;
            }
        }
        Ok(())
    }

    async fn supervise(&self, context: Arc<ExecutionContext>) {
        let invocation_id = context.invocation_id();
        let deadline = self.inner.config.invocation_timeout();
        match tokio::time::timeout(deadline, context.wait_terminal()).await {
            Ok(outcome) => {
                tracing::debug!(%invocation_id, ?outcome, "invocation finished");
            }
            Err(_) => {
                if context.time_out() {
                    tracing::warn!(
                        %invocation_id,
                        session_id = %context.session_id(),
                        command = %context.command(),
                        timeout_ms = self.inner.config.invocation_timeout_ms,
                        "invocation timed out"
                    );
                }
            }
        }
        self.inner.propagator.reclaim(invocation_id);
        self.inner.active.write().await.remove(&invocation_id);
    }
}
