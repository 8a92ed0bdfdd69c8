//! Typed output frames emitted by an execution context.

use serde::{Deserialize, Serialize};

/// Progress snapshot attached to a progress frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Progress {
    /// Completed fraction in `0.0..=1.0`, when reported as a fraction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraction: Option<f32>,
    /// Current step, when reported as counters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    /// Total steps, when reported as counters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl Progress {
    /// Progress reported as a fraction. Values are clamped into `0.0..=1.0`.
    #[must_use]
    pub fn fraction(fraction: f32) -> Self {
        Self {
            fraction: Some(fraction.clamp(0.0, 1.0)),
            current: None,
            total: None,
        }
    }

    /// Progress reported as `current` out of `total`.
    #[must_use]
    pub fn counted(total: u64, current: u64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let fraction = if total == 0 {
            None
        } else {
            Some((current as f32 / total as f32).clamp(0.0, 1.0))
        };
        Self {
            fraction,
            current: Some(current),
            total: Some(total),
        }
    }
}

/// A single unit of output relayed from a context to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// Plain output line.
    Line(LineFrame),
    /// Output line carrying a progress update.
    Progress {
        message: String,
        progress: Progress,
    },
    /// Terminal frame: invocation completed.
    Completed {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Terminal frame: invocation failed.
    Failed {
        reason: String,
        message: String,
    },
}

/// Payload of a plain output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineFrame {
    pub text: String,
}

impl Frame {
    /// Plain line frame.
    pub fn line(text: impl Into<String>) -> Self {
        Self::Line(LineFrame { text: text.into() })
    }

    /// Whether this frame ends the invocation's stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// Rough size used for history accounting.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 16;
        OVERHEAD
            + match self {
                Self::Line(line) => line.text.len(),
                Self::Progress { message, .. } => message.len() + 24,
                Self::Completed { message } => message.as_ref().map_or(0, String::len),
                Self::Failed { reason, message } => reason.len() + message.len(),
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counted_progress_fraction() {
        let p = Progress::counted(20, 5);
        assert_eq!(p.fraction, Some(0.25));
        assert_eq!(p.current, Some(5));
        assert_eq!(p.total, Some(20));
    }

    #[test]
    fn test_counted_progress_zero_total() {
        let p = Progress::counted(0, 3);
        assert_eq!(p.fraction, None);
    }

    #[test]
    fn test_fraction_is_clamped() {
        assert_eq!(Progress::fraction(1.7).fraction, Some(1.0));
        assert_eq!(Progress::fraction(-0.2).fraction, Some(0.0));
    }

    #[test]
    fn test_terminal_frames() {
        assert!(Frame::Completed { message: None }.is_terminal());
        assert!(
            Frame::Failed {
                reason: "timed_out".into(),
                message: "x".into()
            }
            .is_terminal()
        );
        assert!(!Frame::line("hi").is_terminal());
    }

    #[test]
    fn test_frame_serialization_tag() {
        let json = serde_json::to_string(&Frame::line("hello")).unwrap();
        assert!(json.contains("\"kind\":\"line\""));
        assert!(json.contains("hello"));
    }
}
