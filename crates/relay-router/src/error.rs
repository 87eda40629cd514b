//! Error types for routing and dispatch.

use crate::config::ConfigError;
use crate::types::BackendId;
use relay_abstraction::BackendError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why a single dispatch attempt did not produce output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptError {
    /// The backend did not answer within the per-call timeout.
    Timeout { after_ms: u64 },
    /// The backend answered with an error.
    Backend { error: BackendError },
    /// The backend crossed its capacity buffer before the call could be reserved.
    CapacityExceeded,
    /// No live connection is registered for the backend.
    NotConnected,
    /// The backend disappeared from the registry after the decision was made.
    NotRegistered,
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { after_ms } => write!(f, "timed out after {}ms", after_ms),
            Self::Backend { error } => write!(f, "{}", error),
            Self::CapacityExceeded => write!(f, "capacity exceeded"),
            Self::NotConnected => write!(f, "no backend connection registered"),
            Self::NotRegistered => write!(f, "not in the registry"),
        }
    }
}

/// A failed attempt against one backend, in dispatch order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptFailure {
    pub backend_id: BackendId,
    pub error: AttemptError,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend_id, self.error)
    }
}

/// Error returned when a backend id has no registry entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Backend '{0}' is not in the registry")]
pub struct UnknownBackend(pub BackendId);

/// Errors surfaced by `BackendRouter`.
#[derive(Error, Debug)]
pub enum RouterError {
    /// Configuration could not be loaded or applied.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Every backend in the fallback chain failed.
    #[error("All backends failed: {}", format_attempts(.attempts))]
    AllBackendsFailed { attempts: Vec<AttemptFailure> },

    /// The caller cancelled the request.
    #[error("Request cancelled after {} failed attempt(s)", .attempts.len())]
    Cancelled { attempts: Vec<AttemptFailure> },

    /// The caller's deadline passed before any backend answered.
    #[error("Deadline exceeded after {} failed attempt(s)", .attempts.len())]
    DeadlineExceeded { attempts: Vec<AttemptFailure> },
}

impl RouterError {
    /// Failed attempts recorded before the error, if any.
    pub fn attempts(&self) -> &[AttemptFailure] {
        match self {
            Self::Configuration(_) => &[],
            Self::AllBackendsFailed { attempts }
            | Self::Cancelled { attempts }
            | Self::DeadlineExceeded { attempts } => attempts,
        }
    }
}

fn format_attempts(attempts: &[AttemptFailure]) -> String {
    if attempts.is_empty() {
        return "no backend was attempted".to_string();
    }
    attempts.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
