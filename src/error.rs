//! Errors surfaced by reads and mutations.

use thiserror::Error;

use crate::cache::QueryKey;
use crate::transport::TransportError;

/// A failed read or write, tagged with the query it belonged to.
///
/// `Clone` because one in-flight fetch may settle many waiting readers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("transport failure for {key}: {source}")]
    Transport {
        key: QueryKey,
        #[source]
        source: TransportError,
    },
    /// The response could not be mapped to a record or a page.
    #[error("unrecognized response shape for {key}: {detail}")]
    NormalizationMismatch { key: QueryKey, detail: String },
}

impl FetchError {
    pub fn transport(key: QueryKey, source: TransportError) -> Self {
        Self::Transport { key, source }
    }

    pub fn mismatch(key: QueryKey, detail: impl Into<String>) -> Self {
        Self::NormalizationMismatch {
            key,
            detail: detail.into(),
        }
    }

    pub fn key(&self) -> &QueryKey {
        match self {
            Self::Transport { key, .. } | Self::NormalizationMismatch { key, .. } => key,
        }
    }

    /// The untouched transport error, if that is what failed.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Transport { source, .. } => Some(source),
            Self::NormalizationMismatch { .. } => None,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        self.transport_error().and_then(|err| err.status)
    }
}

/// What happened to the cache when a mutation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The pre-mutation value was put back.
    Restored,
    /// A newer write landed meanwhile; it was kept.
    Skipped,
    /// Nothing was snapshotted (create, or nothing cached).
    NotApplicable,
}

impl RollbackOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restored => "restored",
            Self::Skipped => "skipped",
            Self::NotApplicable => "not_applicable",
        }
    }
}

/// A failed mutation plus the state the cache was left in.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error} (rollback {})", .rollback.as_str())]
pub struct MutationError {
    #[source]
    pub error: FetchError,
    pub rollback: RollbackOutcome,
}

impl MutationError {
    pub fn key(&self) -> &QueryKey {
        self.error.key()
    }

    pub fn http_status(&self) -> Option<u16> {
        self.error.http_status()
    }
}
