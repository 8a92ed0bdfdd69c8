//! Per-invocation execution context.
//!
//! A context moves `Created -> Running -> {Completed, Failed}`. Terminal
//! states are absorbing: once reached, output calls are dropped and repeated
//! completion calls do nothing. The interrupt flag is orthogonal to the state
//! and is only ever observed by the handler, never enforced.

use std::{
    any::Any,
    fmt,
    ops::Deref,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    Frame, FrameStore, InvocationId,
    frame::Progress,
    frame_store::DEFAULT_HISTORY_BYTES,
};

/// Lifecycle state of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    Created,
    Running,
    Completed,
    Failed,
}

impl ContextState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Whether a command honours client interrupt requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interruptible {
    /// Interrupt requests are ignored.
    #[default]
    None,
    /// Interrupt requests set the flag the handler polls.
    Allow,
}

/// Why an invocation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    /// The handler returned an error or panicked.
    HandlerError(String),
    /// No terminal transition happened before the deadline.
    TimedOut,
}

impl FailureReason {
    /// A handler failure carrying the message of a caught panic payload.
    #[must_use]
    pub fn panicked(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked".to_string());
        Self::HandlerError(message)
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::HandlerError(_) => "handler_error",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandlerError(message) => write!(f, "{message}"),
            Self::TimedOut => write!(f, "command timed out before completing"),
        }
    }
}

/// Final result of an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(Option<String>),
    Failed(FailureReason),
}

struct Lifecycle {
    state: ContextState,
    outcome: Option<Outcome>,
    progress: Option<Progress>,
}

/// Execution context handed to a command handler.
///
/// Shared as `Arc<ExecutionContext>` between the dispatcher, the handler, any
/// worker the handler delegates to, and the timeout supervisor. Every mutating
/// call takes the lifecycle lock, so state checks and frame emission happen
/// atomically with respect to each other.
pub struct ExecutionContext {
    invocation_id: InvocationId,
    session_id: String,
    command: String,
    interruptible: Interruptible,
    lifecycle: Mutex<Lifecycle>,
    interrupted: AtomicBool,
    late_write_warned: AtomicBool,
    frames: FrameStore,
    state_tx: watch::Sender<ContextState>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("invocation_id", &self.invocation_id)
            .field("session_id", &self.session_id)
            .field("command", &self.command)
            .field("state", &self.state())
            .field("interrupted", &self.is_interrupted())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Create a context in the `Created` state.
    pub fn new(
        session_id: impl Into<String>,
        command: impl Into<String>,
        interruptible: Interruptible,
    ) -> Self {
        Self::with_history_limit(session_id, command, interruptible, DEFAULT_HISTORY_BYTES)
    }

    /// Create a context whose retained output history is capped at `limit_bytes`.
    pub fn with_history_limit(
        session_id: impl Into<String>,
        command: impl Into<String>,
        interruptible: Interruptible,
        limit_bytes: usize,
    ) -> Self {
        let (state_tx, _) = watch::channel(ContextState::Created);
        Self {
            invocation_id: Uuid::new_v4(),
            session_id: session_id.into(),
            command: command.into(),
            interruptible,
            lifecycle: Mutex::new(Lifecycle {
                state: ContextState::Created,
                outcome: None,
                progress: None,
            }),
            interrupted: AtomicBool::new(false),
            late_write_warned: AtomicBool::new(false),
            frames: FrameStore::with_limit(limit_bytes),
            state_tx,
        }
    }

    #[must_use]
    pub const fn invocation_id(&self) -> InvocationId {
        self.invocation_id
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub const fn interruptible(&self) -> Interruptible {
        self.interruptible
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ContextState {
        self.lock().state
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Final outcome, once terminal.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome> {
        self.lock().outcome.clone()
    }

    /// Most recently reported progress.
    #[must_use]
    pub fn progress(&self) -> Option<Progress> {
        self.lock().progress
    }

    /// Outbound frames of this invocation.
    #[must_use]
    pub const fn frames(&self) -> &FrameStore {
        &self.frames
    }

    /// Plain text emitted so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.frames.lines()
    }

    /// Move `Created -> Running`. Returns whether the transition happened.
    pub fn start(&self) -> bool {
        let mut lifecycle = self.lock();
        if lifecycle.state != ContextState::Created {
            return false;
        }
        lifecycle.state = ContextState::Running;
        self.state_tx.send_replace(ContextState::Running);
        true
    }

    /// Emit one output line.
    ///
    /// Returns `false` when the context is already terminal; the line is
    /// dropped and a warning is logged the first time this happens.
    pub fn printf(&self, message: impl Into<String>) -> bool {
        self.emit(Frame::line(message), None)
    }

    /// Ask the handler to stop.
    ///
    /// Only honoured for interruptible commands that have not finished yet.
    /// Returns whether the flag was set by this request or already set.
    pub fn request_interrupt(&self) -> bool {
        if self.interruptible != Interruptible::Allow {
            tracing::debug!(invocation_id = %self.invocation_id, "ignoring interrupt for non-interruptible command");
            return false;
        }
        let lifecycle = self.lock();
        if lifecycle.state.is_terminal() {
            return false;
        }
        self.interrupted.store(true, Ordering::SeqCst);
        tracing::debug!(invocation_id = %self.invocation_id, "interrupt requested");
        true
    }

    /// Whether an interrupt has been requested. Handlers poll this.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Finish successfully without a final message.
    pub fn completed(&self) -> bool {
        self.finish(Outcome::Completed(None))
    }

    /// Finish successfully with a final message.
    pub fn completed_with(&self, message: impl Into<String>) -> bool {
        self.finish(Outcome::Completed(Some(message.into())))
    }

    /// Finish with a failure.
    pub fn fail(&self, reason: FailureReason) -> bool {
        self.finish(Outcome::Failed(reason))
    }

    /// Force a `TimedOut` failure. Used by the supervising timer.
    pub fn time_out(&self) -> bool {
        self.fail(FailureReason::TimedOut)
    }

    /// Wait until the context reaches a terminal state.
    pub async fn wait_terminal(&self) -> Outcome {
        let mut rx = self.state_tx.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| state.is_terminal()).await;
        self.outcome()
            .unwrap_or(Outcome::Failed(FailureReason::TimedOut))
    }

    /// Progress-reporting view of this context.
    #[must_use]
    pub fn progress_view(self: &Arc<Self>) -> ProgressContext {
        ProgressContext(Arc::clone(self))
    }

    fn emit(&self, frame: Frame, progress: Option<Progress>) -> bool {
        let mut lifecycle = self.lock();
        if lifecycle.state.is_terminal() {
            drop(lifecycle);
            if !self.late_write_warned.swap(true, Ordering::SeqCst) {
                tracing::warn!(
                    invocation_id = %self.invocation_id,
                    command = %self.command,
                    "discarding output written after the command finished"
                );
            }
            return false;
        }
        if lifecycle.state == ContextState::Created {
            lifecycle.state = ContextState::Running;
            self.state_tx.send_replace(ContextState::Running);
        }
        if progress.is_some() {
            lifecycle.progress = progress;
        }
        self.frames.push(frame);
        true
    }

    fn finish(&self, outcome: Outcome) -> bool {
        let mut lifecycle = self.lock();
        if lifecycle.state.is_terminal() {
            return false;
        }
        let (state, frame) = match &outcome {
            Outcome::Completed(message) => (
                ContextState::Completed,
                Frame::Completed {
                    message: message.clone(),
                },
            ),
            Outcome::Failed(reason) => (
                ContextState::Failed,
                Frame::Failed {
                    reason: reason.code().to_string(),
                    message: reason.to_string(),
                },
            ),
        };
        lifecycle.state = state;
        lifecycle.outcome = Some(outcome);
        self.frames.push(frame);
        self.state_tx.send_replace(state);
        tracing::debug!(invocation_id = %self.invocation_id, ?state, "invocation finished");
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Progress-reporting view of an [`ExecutionContext`].
///
/// Handlers that declare a progress context receive this instead of the plain
/// context. Monotonicity is not enforced; out-of-order reports are relayed as is.
#[derive(Debug, Clone)]
pub struct ProgressContext(Arc<ExecutionContext>);

impl ProgressContext {
    /// Emit a line with a completed fraction in `0.0..=1.0`.
    pub fn printf_progress(&self, message: impl Into<String>, fraction: f32) -> bool {
        let progress = Progress::fraction(fraction);
        self.0.emit(
            Frame::Progress {
                message: message.into(),
                progress,
            },
            Some(progress),
        )
    }

    /// Emit a line with `current` out of `total` steps done.
    pub fn printf_counted(&self, message: impl Into<String>, total: u64, current: u64) -> bool {
        let progress = Progress::counted(total, current);
        self.0.emit(
            Frame::Progress {
                message: message.into(),
                progress,
            },
            Some(progress),
        )
    }

    /// The underlying shared context.
    #[must_use]
    pub const fn context(&self) -> &Arc<ExecutionContext> {
        &self.0
    }
}

impl Deref for ProgressContext {
    type Target = ExecutionContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    fn context(interruptible: Interruptible) -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::new("s-1", "task", interruptible))
    }

    #[test]
    fn test_panic_payload_messages() {
        let reason = |payload: Box<dyn Any + Send>| FailureReason::panicked(payload.as_ref());
        assert_eq!(reason(Box::new("static")), FailureReason::HandlerError("static".into()));
        assert_eq!(
            reason(Box::new(String::from("owned"))),
            FailureReason::HandlerError("owned".into())
        );
        assert_eq!(
            reason(Box::new(42_u8)),
            FailureReason::HandlerError("handler panicked".into())
        );
    }

    #[test]
    fn test_first_output_starts_context() {
        let ctx = context(Interruptible::None);
        assert_eq!(ctx.state(), ContextState::Created);
        assert!(ctx.printf("hello"));
        assert_eq!(ctx.state(), ContextState::Running);
        assert_eq!(ctx.lines(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_explicit_start_only_once() {
        let ctx = context(Interruptible::None);
        assert!(ctx.start());
        assert!(!ctx.start());
    }

    #[test]
    fn test_completed_is_idempotent() {
        let ctx = context(Interruptible::None);
        ctx.start();
        assert!(ctx.completed_with("first"));
        assert!(!ctx.completed_with("second"));
        assert!(!ctx.completed());
        assert_eq!(ctx.state(), ContextState::Completed);
        assert_eq!(ctx.outcome(), Some(Outcome::Completed(Some("first".into()))));

        let terminal: Vec<Frame> = ctx
            .frames()
            .get_history()
            .into_iter()
            .filter(Frame::is_terminal)
            .collect();
        assert_eq!(terminal.len(), 1);
    }

    #[test]
    fn test_output_after_terminal_is_dropped() {
        let ctx = context(Interruptible::None);
        ctx.printf("before");
        ctx.completed();
        assert!(!ctx.printf("after"));
        assert!(!ctx.printf("after again"));
        assert_eq!(ctx.lines(), vec!["before".to_string()]);
    }

    #[test]
    fn test_non_interruptible_ignores_interrupt() {
        let ctx = context(Interruptible::None);
        ctx.start();
        assert!(!ctx.request_interrupt());
        assert!(!ctx.is_interrupted());
        ctx.printf("still running");
        assert!(!ctx.is_interrupted());
    }

    #[test]
    fn test_interruptible_sets_flag() {
        let ctx = context(Interruptible::Allow);
        assert!(ctx.request_interrupt());
        assert!(ctx.is_interrupted());
        // Interruption is cooperative: the state is untouched.
        assert_eq!(ctx.state(), ContextState::Created);
    }

    #[test]
    fn test_interrupt_after_terminal_is_ignored() {
        let ctx = context(Interruptible::Allow);
        ctx.completed();
        assert!(!ctx.request_interrupt());
        assert!(!ctx.is_interrupted());
    }

    #[test]
    fn test_fail_is_absorbing() {
        let ctx = context(Interruptible::None);
        ctx.start();
        assert!(ctx.fail(FailureReason::HandlerError("boom".into())));
        assert!(!ctx.completed());
        assert!(!ctx.time_out());
        assert_eq!(
            ctx.outcome(),
            Some(Outcome::Failed(FailureReason::HandlerError("boom".into())))
        );
    }

    #[test]
    fn test_progress_view_records_progress() {
        let ctx = context(Interruptible::Allow);
        let progress = ctx.progress_view();
        assert!(progress.printf_progress("warming up", 0.05));
        assert!(progress.printf_counted("step", 10, 4));
        // Out-of-order progress is relayed, not rejected.
        assert!(progress.printf_counted("step", 10, 2));
        let latest = ctx.progress().unwrap();
        assert_eq!(latest.current, Some(2));
        assert_eq!(ctx.lines().len(), 3);
    }

    #[test]
    fn test_concurrent_writers_single_terminal_frame() {
        let ctx = context(Interruptible::None);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ctx = Arc::clone(&ctx);
                thread::spawn(move || {
                    for n in 0..50 {
                        ctx.printf(format!("{i}:{n}"));
                    }
                    ctx.completed_with(format!("writer {i}"));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let history = ctx.frames().get_history();
        let terminal_count = history.iter().filter(|f| f.is_terminal()).count();
        assert_eq!(terminal_count, 1);
        assert!(history.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_wait_terminal_resolves_on_completion() {
        let ctx = context(Interruptible::None);
        let worker = Arc::clone(&ctx);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            worker.completed_with("done");
        });
        let outcome = ctx.wait_terminal().await;
        assert_eq!(outcome, Outcome::Completed(Some("done".into())));
    }
}
