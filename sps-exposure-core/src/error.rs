//! Typed failure taxonomy shared by every remote-actor interaction.
//!
//! Every variant carries the subsystem that raised it and a short reason;
//! `Display` renders `<Kind>(<subsystem> with <reason>)`, matching the
//! user-visible format failures must take.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExposureError {
    #[error("WipeFailed({subsystem} with {reason})")]
    WipeFailed { subsystem: String, reason: String },

    #[error("ReadFailed({subsystem} with {reason})")]
    ReadFailed { subsystem: String, reason: String },

    #[error("ShuttersFailed({subsystem} with {reason})")]
    ShuttersFailed { subsystem: String, reason: String },

    #[error("LampsFailed({subsystem} with {reason})")]
    LampsFailed { subsystem: String, reason: String },

    #[error("HxRampFailed({subsystem} with {reason})")]
    HxRampFailed { subsystem: String, reason: String },

    #[error("SlitMoveFailed({subsystem} with {reason})")]
    SlitMoveFailed { subsystem: String, reason: String },

    #[error("SlitStartFailed({subsystem} with {reason})")]
    SlitStartFailed { subsystem: String, reason: String },

    #[error("SlitStopFailed({subsystem} with {reason})")]
    SlitStopFailed { subsystem: String, reason: String },

    #[error("BiaFailed({subsystem} with {reason})")]
    BiaFailed { subsystem: String, reason: String },

    #[error("IisFailed({subsystem} with {reason})")]
    IisFailed { subsystem: String, reason: String },

    #[error("MotorsFailed({subsystem} with {reason})")]
    MotorsFailed { subsystem: String, reason: String },

    #[error("EraseFailed({subsystem} with {reason})")]
    EraseFailed { subsystem: String, reason: String },

    #[error("ExposureAborted({subsystem} with {reason})")]
    ExposureAborted { subsystem: String, reason: String },

    #[error("EarlyFinish({subsystem} with {reason})")]
    EarlyFinish { subsystem: String, reason: String },

    #[error("Timeout({subsystem} with {reason})")]
    Timeout { subsystem: String, reason: String },

    #[error("PreconditionFailed({subsystem} with {reason})")]
    PreconditionFailed { subsystem: String, reason: String },
}

impl ExposureError {
    /// The subsystem name this failure is attributed to, regardless of kind.
    pub fn subsystem(&self) -> &str {
        match self {
            Self::WipeFailed { subsystem, .. }
            | Self::ReadFailed { subsystem, .. }
            | Self::ShuttersFailed { subsystem, .. }
            | Self::LampsFailed { subsystem, .. }
            | Self::HxRampFailed { subsystem, .. }
            | Self::SlitMoveFailed { subsystem, .. }
            | Self::SlitStartFailed { subsystem, .. }
            | Self::SlitStopFailed { subsystem, .. }
            | Self::BiaFailed { subsystem, .. }
            | Self::IisFailed { subsystem, .. }
            | Self::MotorsFailed { subsystem, .. }
            | Self::EraseFailed { subsystem, .. }
            | Self::ExposureAborted { subsystem, .. }
            | Self::EarlyFinish { subsystem, .. }
            | Self::Timeout { subsystem, .. }
            | Self::PreconditionFailed { subsystem, .. } => subsystem,
        }
    }

    /// `true` for the two kinds that signal cooperative cancellation rather
    /// than an actual remote-actor fault.
    pub fn is_control_flow(&self) -> bool {
        matches!(self, Self::ExposureAborted { .. } | Self::EarlyFinish { .. })
    }

    pub fn aborted(subsystem: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExposureAborted {
            subsystem: subsystem.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(subsystem: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Timeout {
            subsystem: subsystem.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_as_kind_subsystem_with_reason() {
        let err = ExposureError::ShuttersFailed {
            subsystem: "enu_sm1".into(),
            reason: "timeout waiting for open".into(),
        };
        assert_eq!(
            err.to_string(),
            "ShuttersFailed(enu_sm1 with timeout waiting for open)"
        );
    }

    #[test]
    fn aborted_and_early_finish_are_control_flow() {
        assert!(ExposureError::aborted("x", "y").is_control_flow());
        assert!(!ExposureError::timeout("x", "y").is_control_flow());
    }
}
