mod countdown;
mod machine;
pub mod reconcile;
pub mod view;


use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::schemas::{AnswerError, IntegrityError};
use crate::transport::TransportError;

pub use machine::{ExamSession, TickOutcome};
pub use reconcile::{reconcile, Reconciled};
pub use view::{render_text, ExamView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Loading,
    NotStarted,
    Resuming,
    InProgress,
    /// Time ran out and the automatic submission is in flight.
    Expired,
    Result,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::NotStarted => "not started",
            Self::Resuming => "resuming",
            Self::InProgress => "in progress",
            Self::Expired => "expired",
            Self::Result => "showing results",
            Self::Error => "in an error state",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Result | Self::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),
    #[error("exam data is invalid: {0}")]
    Integrity(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("the exam connection is offline")]
    Disconnected,
    #[error("cannot {action} while the exam is {phase}")]
    InvalidState { action: &'static str, phase: Phase },
}

impl From<AnswerError> for SessionError {
    fn from(err: AnswerError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<IntegrityError> for SessionError {
    fn from(err: IntegrityError) -> Self {
        Self::Integrity(err.0)
    }
}
