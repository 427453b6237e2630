//! Unified error type for the voting core.
//!
//! One enum covers every component; each variant carries the
//! structured fields the external error envelope needs, plus
//! `http_status()` / `severity()` so the transport layer never has to
//! pattern-match on the error itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// The tagged error envelope the ingress layer serializes back to callers.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed or out-of-range input. Never retried.
    #[error("validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Referenced event, queue item, or device does not exist.
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// Overlapping event, duplicate active event for a venue, or a
    /// unique-constraint violation surfaced by the repository.
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// A queue/playback operation was attempted against an event that
    /// is not ACTIVE.
    #[error("event {event_id} is not active (status: {status})")]
    EventNotActive { event_id: String, status: String },

    /// Vote admission rejected the vote.
    #[error("vote denied: {reason}")]
    VoteDenied {
        reason: VoteDenialReason,
        retry_after_secs: Option<u64>,
    },

    /// Playback not initialized for an event, or an invalid state
    /// transition was requested (e.g. resume while already playing).
    #[error("invalid playback state: {reason}")]
    InvalidPlaybackState { reason: String },

    /// The external music provider rejected or failed a call.
    #[error("provider error during {operation}: {reason}")]
    ProviderError { operation: String, reason: String },

    /// Repository (database) failure.
    #[error("repository error during {operation}")]
    Repository {
        operation: String,
        #[source]
        source: sqlx::Error,
    },

    /// Configuration is invalid or incomplete at startup.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Catch-all for invariants that should be unreachable.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::EventNotActive { .. } | Self::InvalidPlaybackState { .. } => 400,
            Self::VoteDenied { .. } => 429,
            Self::ProviderError { .. } => 502,
            Self::Repository { .. } | Self::Internal { .. } | Self::Configuration { .. } => 500,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Validation { .. } | Self::VoteDenied { .. } | Self::NotFound { .. } => {
                ErrorSeverity::Low
            }
            Self::Conflict { .. } | Self::EventNotActive { .. } | Self::InvalidPlaybackState { .. } => {
                ErrorSeverity::Medium
            }
            Self::ProviderError { .. } => ErrorSeverity::High,
            Self::Repository { .. } | Self::Internal { .. } | Self::Configuration { .. } => {
                ErrorSeverity::Critical
            }
        }
    }

    /// Short machine-readable tag for the error envelope.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::EventNotActive { .. } => "EVENT_NOT_ACTIVE",
            Self::VoteDenied { .. } => "VOTE_DENIED",
            Self::InvalidPlaybackState { .. } => "EVENT_NOT_ACTIVE",
            Self::ProviderError { .. } => "PROVIDER_ERROR",
            Self::Repository { .. } | Self::Internal { .. } | Self::Configuration { .. } => {
                "INTERNAL"
            }
        }
    }

    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn event_not_active(event_id: impl fmt::Display, status: impl fmt::Display) -> Self {
        Self::EventNotActive {
            event_id: event_id.to_string(),
            status: status.to_string(),
        }
    }

    pub fn provider(operation: &str, reason: impl Into<String>) -> Self {
        Self::ProviderError {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn repository(operation: &str, source: sqlx::Error) -> Self {
        Self::Repository {
            operation: operation.to_string(),
            source,
        }
    }
}

/// Reasons the vote admission component can deny a vote. Carried on
/// the wire so clients can show a meaningful message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDenialReason {
    SessionCooldown,
    SessionHourlyCap,
    SameTrack,
    NetworkCap,
}

impl fmt::Display for VoteDenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SessionCooldown => "session-cooldown",
            Self::SessionHourlyCap => "session-hourly-cap",
            Self::SameTrack => "same-track",
            Self::NetworkCap => "network-cap",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::repository("query", err)
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}
