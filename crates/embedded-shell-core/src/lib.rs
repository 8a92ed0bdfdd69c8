//! Core abstractions for the embedded shell engine.
//!
//! This crate provides the fundamental building blocks:
//! - `ExecutionContext` - Per-invocation state machine (output, progress, interrupt, completion)
//! - `FrameStore` - Broadcast + history of emitted frames
//! - `ContextPropagator` - Cross-thread context binding
//! - `SessionStore` / `KvClient` traits and the `Session` record
//! - `ShellConfig` - Engine configuration

pub mod config;
pub mod context;
pub mod frame;
pub mod frame_store;
pub mod propagate;
pub mod session;
pub mod traits;

pub use config::ShellConfig;
pub use context::{
    ContextState, ExecutionContext, FailureReason, Interruptible, Outcome, ProgressContext,
};
pub use frame::{Frame, Progress};
pub use frame_store::FrameStore;
pub use propagate::{ContextBinding, ContextPropagator};
pub use session::{Session, SessionState};
pub use traits::{InvocationId, KvClient, SessionStore, StoreError};
