//! Wire protocol for client-server communication.

use embedded_shell_core::{Frame, InvocationId, Progress};
use embedded_shell_session::DispatchError;
use serde::{Deserialize, Serialize};

/// Message from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Attach this connection to a session, creating it if needed.
    OpenSession { session_id: String },
    /// Run one command line in the attached session.
    Execute { line: String },
    /// Ask a running invocation to stop.
    Interrupt { invocation_id: InvocationId },
    /// Ping for keepalive.
    Ping,
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection is attached to a session.
    SessionOpened { session_id: String },
    /// A command line was accepted and is running.
    Started {
        invocation_id: InvocationId,
        command: String,
    },
    /// Output line.
    Line {
        invocation_id: InvocationId,
        text: String,
    },
    /// Output line with a progress update.
    Progress {
        invocation_id: InvocationId,
        message: String,
        progress: Progress,
    },
    /// Invocation finished successfully.
    Completed {
        invocation_id: InvocationId,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Invocation failed.
    Failed {
        invocation_id: InvocationId,
        reason: String,
        message: String,
    },
    /// Request rejected before anything ran.
    Error { code: String, message: String },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Wrap an invocation frame for the wire.
    #[must_use]
    pub fn from_frame(invocation_id: InvocationId, frame: Frame) -> Self {
        match frame {
            Frame::Line(line) => Self::Line {
                invocation_id,
                text: line.text,
            },
            Frame::Progress { message, progress } => Self::Progress {
                invocation_id,
                message,
                progress,
            },
            Frame::Completed { message } => Self::Completed {
                invocation_id,
                message,
            },
            Frame::Failed { reason, message } => Self::Failed {
                invocation_id,
                reason,
                message,
            },
        }
    }

    /// Error reply for a rejected command line.
    #[must_use]
    pub fn from_dispatch_error(err: &DispatchError) -> Self {
        Self::error(err.code(), err.to_string())
    }

    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether this message ends an invocation's stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}
