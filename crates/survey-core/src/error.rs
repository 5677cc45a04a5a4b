use thiserror::Error;

use crate::model::EntityKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurveyError {
    #[error("local store unavailable: {0}")]
    StorageUnavailable(String),
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("remote service rejected the request with status {status}: {body}")]
    RemoteRejected { status: u16, body: String },
    #[error("remote request failed: {0}")]
    RequestFailed(String),
    #[error("remote request timed out after {seconds}s")]
    RequestTimedOut { seconds: u64 },
    #[error("no server id recorded for local {kind} id '{local_id}'")]
    MappingMissing { kind: EntityKind, local_id: String },
    #[error("a sync run is already in progress")]
    SyncInProgress,
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(
        "unsupported local store schema version {found}; this binary supports up to {supported}. Please upgrade tree-survey."
    )]
    UnsupportedSchemaVersion { supported: u32, found: u32 },
}

impl SurveyError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::StorageUnavailable(err.to_string())
    }

    /// Short machine-readable label, used in reports and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::NetworkUnreachable(_) => "network_unreachable",
            Self::RemoteRejected { .. } => "remote_rejected",
            Self::RequestFailed(_) => "request_failed",
            Self::RequestTimedOut { .. } => "request_timed_out",
            Self::MappingMissing { .. } => "mapping_missing",
            Self::SyncInProgress => "sync_in_progress",
            Self::InvalidRecord(_) => "invalid_record",
            Self::NotFound { .. } => "not_found",
            Self::Configuration(_) => "configuration",
            Self::UnsupportedSchemaVersion { .. } => "unsupported_schema_version",
        }
    }
}

