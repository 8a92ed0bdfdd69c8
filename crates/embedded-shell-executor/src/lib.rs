//! Command dispatch building blocks for the embedded shell.
//!
//! Provides:
//! - Command descriptors and parameter specifications
//! - `CommandRegistry` - validated, read-only command table
//! - `ArgumentBinder` - raw option tokens to typed values
//! - Command line tokenizing
//! - Handler trait and per-call `Invocation`
//! - Help rendering

pub mod binder;
pub mod command;
pub mod descriptor;
pub mod handler;
pub mod help;
pub mod registry;

pub use binder::{ArgAccessError, ArgValue, ArgumentBinder, BindError, BoundArgs};
pub use command::{CommandLine, CommandLineError};
pub use descriptor::{CommandDescriptor, ContextKind, ParamKind, ParamSpec, ScalarType, ValueType};
pub use handler::{CommandHandler, Invocation};
pub use help::{HelpEntry, ParamHelp, render_help};
pub use registry::{CommandNotFound, CommandRegistry, RegistryError};
