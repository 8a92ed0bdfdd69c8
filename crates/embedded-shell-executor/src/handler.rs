//! Handler contract.

use std::sync::Arc;

use embedded_shell_core::{ContextPropagator, ExecutionContext, ProgressContext};

use crate::{BoundArgs, ContextKind};

/// A command implementation.
///
/// Handlers run on a blocking worker thread. A handler that asked for a
/// context must eventually call `completed()` (possibly from a worker it
/// delegated to); returning without doing so leaves the invocation open until
/// the dispatcher's deadline fails it. Returning an error fails the invocation.
pub trait CommandHandler: Send + Sync {
    /// Run the command.
    ///
    /// # Errors
    /// Any error fails this invocation only.
    fn call(&self, invocation: Invocation) -> anyhow::Result<()>;
}

impl<F> CommandHandler for F
where
    F: Fn(Invocation) -> anyhow::Result<()> + Send + Sync,
{
    fn call(&self, invocation: Invocation) -> anyhow::Result<()> {
        self(invocation)
    }
}

/// Everything a handler receives for one call.
#[derive(Debug, Clone)]
pub struct Invocation {
    args: BoundArgs,
    context: Arc<ExecutionContext>,
    context_kind: Option<ContextKind>,
    propagator: ContextPropagator,
}

impl Invocation {
    #[must_use]
    pub const fn new(
        args: BoundArgs,
        context: Arc<ExecutionContext>,
        context_kind: Option<ContextKind>,
        propagator: ContextPropagator,
    ) -> Self {
        Self {
            args,
            context,
            context_kind,
            propagator,
        }
    }

    /// Bound arguments.
    #[must_use]
    pub const fn args(&self) -> &BoundArgs {
        &self.args
    }

    /// The execution context, if the handler declared one.
    #[must_use]
    pub fn context(&self) -> Option<&Arc<ExecutionContext>> {
        self.context_kind.map(|_| &self.context)
    }

    /// The progress view, if the handler declared a progress context.
    #[must_use]
    pub fn progress(&self) -> Option<ProgressContext> {
        match self.context_kind {
            Some(ContextKind::Progress) => Some(self.context.progress_view()),
            _ => None,
        }
    }

    /// Context declared by the handler, or an error naming the command.
    ///
    /// # Errors
    /// Returns error when the descriptor did not declare a context.
    pub fn require_context(&self) -> anyhow::Result<&Arc<ExecutionContext>> {
        self.context()
            .ok_or_else(|| anyhow::anyhow!("command '{}' declared no context", self.context.command()))
    }

    /// Progress view declared by the handler, or an error naming the command.
    ///
    /// # Errors
    /// Returns error when the descriptor did not declare a progress context.
    pub fn require_progress(&self) -> anyhow::Result<ProgressContext> {
        self.progress().ok_or_else(|| {
            anyhow::anyhow!(
                "command '{}' declared no progress context",
                self.context.command()
            )
        })
    }

    /// Propagator for handing the context to delegated workers.
    #[must_use]
    pub const fn propagator(&self) -> &ContextPropagator {
        &self.propagator
    }
}
