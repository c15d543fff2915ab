use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The kind of entity an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Agent,
    Task,
    FileClaim,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Entity::Agent => "agent",
            Entity::Task => "task",
            Entity::FileClaim => "file claim",
        };
        write!(f, "{label}")
    }
}

/// Errors returned by mesh operations
///
/// Every variant is produced inside a single document transaction; when an
/// operation returns one of these the persisted document is left untouched.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: Entity, id: String },

    #[error("{resource} is held by {holder}: {reason}")]
    Conflict {
        resource: String,
        holder: String,
        reason: String,
    },

    /// A stale lease that is still present. Callers see the reclamation as a
    /// success, so this never leaves the transaction layer.
    #[error("lease of {holder} on {resource} expired at {expired_at}")]
    Expired {
        resource: String,
        holder: String,
        expired_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("timed out after {waited_ms}ms waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("{resource}: {reason}")]
    InvalidState { resource: String, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Machine-readable error classification for `--json` output and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Expired,
    LockTimeout,
    InvalidState,
    InvalidInput,
    Storage,
}

impl MeshError {
    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        MeshError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(
        resource: impl Into<String>,
        holder: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        MeshError::Conflict {
            resource: resource.into(),
            holder: holder.into(),
            reason: reason.into(),
        }
    }

    pub fn expired(
        resource: impl Into<String>,
        holder: impl Into<String>,
        expired_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        MeshError::Expired {
            resource: resource.into(),
            holder: holder.into(),
            expired_at,
        }
    }

    pub fn invalid_state(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        MeshError::InvalidState {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MeshError::NotFound { .. } => ErrorKind::NotFound,
            MeshError::Conflict { .. } => ErrorKind::Conflict,
            MeshError::Expired { .. } => ErrorKind::Expired,
            MeshError::LockTimeout { .. } => ErrorKind::LockTimeout,
            MeshError::InvalidState { .. } => ErrorKind::InvalidState,
            MeshError::InvalidInput(_) => ErrorKind::InvalidInput,
            MeshError::Io(_) | MeshError::Serialization(_) => ErrorKind::Storage,
        }
    }

    /// Only lock contention is worth retrying; everything else needs different input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MeshError::LockTimeout { .. })
    }
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Storage => 1,
            ErrorKind::NotFound => 3,
            ErrorKind::Conflict => 4,
            ErrorKind::LockTimeout => 5,
            ErrorKind::InvalidState | ErrorKind::Expired => 6,
            ErrorKind::InvalidInput => 7,
        }
    }
}

/// Reject blank identifiers before they reach the document.
pub(crate) fn require_id(label: &str, value: &str) -> Result<(), MeshError> {
    if value.trim().is_empty() {
        return Err(MeshError::InvalidInput(format!("{label} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_and_exit_codes() {
        let err = MeshError::not_found(Entity::Task, "t1");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.kind().exit_code(), 3);
        assert_eq!(err.to_string(), "task 't1' not found");

        let err = MeshError::conflict("task 't1'", "a1", "claim is still live");
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.kind().exit_code(), 4);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_only_lock_timeout_is_retryable() {
        let err = MeshError::LockTimeout {
            path: PathBuf::from("state.json.lock"),
            waited_ms: 100,
        };
        assert!(err.is_retryable());
        assert_eq!(err.kind().exit_code(), 5);
        assert!(!MeshError::InvalidInput("x".into()).is_retryable());
    }

    #[test]
    fn test_expired_lease_maps_to_invalid_state_exit() {
        let at = chrono::Utc::now();
        let err = MeshError::expired(format!("{} 'x.py'", Entity::FileClaim), "a1", at);
        assert_eq!(err.kind(), ErrorKind::Expired);
        assert_eq!(err.kind().exit_code(), 6);
        assert!(err.to_string().starts_with("lease of a1 on file claim 'x.py'"));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::LockTimeout).unwrap();
        assert_eq!(json, "\"lock_timeout\"");
    }

    #[test]
    fn test_require_id_rejects_blank() {
        assert!(require_id("agent id", "  ").is_err());
        assert!(require_id("agent id", "a1").is_ok());
    }
}
