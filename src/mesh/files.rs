use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

use super::agents::ttl_secs;
use super::document::{AuditEvent, CoordinationDocument, FileClaim};
use crate::error::{require_id, MeshError};

/// Normalize a path into the claim-table key
///
/// Backslashes become `/`, empty and `.` segments are dropped, `..` is
/// resolved lexically and a leading `/` is kept. Nothing touches the disk.
pub fn normalize_path(raw: &str) -> Result<String, MeshError> {
    let unified = raw.trim().replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(last) if *last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Err(MeshError::InvalidInput(format!("'{raw}' is not a file path")));
    }
    let joined = segments.join("/");
    Ok(if absolute { format!("/{joined}") } else { joined })
}

#[derive(Debug, Clone)]
pub struct ClaimFiles {
    pub agent_id: String,
    pub files: Vec<String>,
    pub task_id: Option<String>,
    pub ttl: Duration,
    pub force: bool,
}

impl ClaimFiles {
    pub fn new<I, S>(agent_id: impl Into<String>, files: I, ttl: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agent_id: agent_id.into(),
            files: files.into_iter().map(Into::into).collect(),
            task_id: None,
            ttl,
            force: false,
        }
    }

    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// A live claim that blocked (or was overridden for) a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileConflict {
    pub file: String,
    pub held_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl From<&FileClaim> for FileConflict {
    fn from(claim: &FileClaim) -> Self {
        Self {
            file: claim.file.clone(),
            held_by: claim.agent_id.clone(),
            task_id: claim.task_id.clone(),
            expires_at: claim.expires_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedPath {
    pub file: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClaimFilesOutcome {
    pub claimed: Vec<FileClaim>,
    pub conflicts: Vec<FileConflict>,
    /// Live claims of other agents transferred by `force`
    pub forced: Vec<FileConflict>,
    /// Paths whose previous claim had lapsed and was taken over
    pub reclaimed: Vec<String>,
    pub rejected: Vec<RejectedPath>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotClaimed,
    OwnedByOther,
    InvalidPath,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRelease {
    pub file: String,
    pub reason: SkipReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseFilesOutcome {
    pub released: Vec<String>,
    pub skipped: Vec<SkippedRelease>,
}

impl CoordinationDocument {
    /// Claim a batch of files. Each path succeeds or conflicts on its own;
    /// the batch as a whole never fails because of a single path.
    pub fn claim_files(&mut self, req: ClaimFiles, now: DateTime<Utc>) -> Result<ClaimFilesOutcome, MeshError> {
        require_id("agent id", &req.agent_id)?;
        ttl_secs(req.ttl)?;
        let mut outcome = ClaimFilesOutcome::default();
        let mut paths = BTreeSet::new();
        for raw in &req.files {
            match normalize_path(raw) {
                Ok(path) => {
                    paths.insert(path);
                }
                Err(err) => outcome.rejected.push(RejectedPath {
                    file: raw.clone(),
                    reason: err.to_string(),
                }),
            }
        }

        for path in paths {
            if let Some(existing) = self.claims.get(&path).cloned() {
                match existing.check_takeover(&req.agent_id, now) {
                    Ok(()) => {}
                    Err(MeshError::Expired { holder, .. }) => {
                        let detail = format!("expired claim of {holder} reclaimed");
                        outcome.reclaimed.push(path.clone());
                        self.record(now, AuditEvent::FileReclaimed, Some(req.agent_id.as_str()), path.as_str(), detail);
                    }
                    Err(MeshError::Conflict { holder, .. }) if req.force => {
                        warn!(
                            file = %path,
                            agent.id = %req.agent_id,
                            previous = %holder,
                            "Forcing file claim away from live owner"
                        );
                        let detail = format!("forced away from {holder}");
                        outcome.forced.push(FileConflict::from(&existing));
                        self.record(now, AuditEvent::FileForced, Some(req.agent_id.as_str()), path.as_str(), detail);
                    }
                    Err(MeshError::Conflict { .. }) => {
                        outcome.conflicts.push(FileConflict::from(&existing));
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            let claimed_at = self
                .claims
                .get(&path)
                .filter(|existing| existing.agent_id == req.agent_id && !existing.is_expired(now))
                .map(|existing| existing.claimed_at)
                .unwrap_or(now);
            let claim = FileClaim {
                file: path.clone(),
                agent_id: req.agent_id.clone(),
                task_id: req.task_id.clone(),
                claimed_at,
                expires_at: now + req.ttl,
            };
            self.claims.insert(path, claim.clone());
            outcome.claimed.push(claim);
        }

        info!(
            agent.id = %req.agent_id,
            claimed = outcome.claimed.len(),
            conflicts = outcome.conflicts.len(),
            forced = outcome.forced.len(),
            "File claims processed"
        );
        Ok(outcome)
    }

    /// Release the caller's own claims; other paths are reported, not errors
    pub fn release_files(
        &mut self,
        agent_id: &str,
        files: &[String],
        reason: Option<&str>,
    ) -> Result<ReleaseFilesOutcome, MeshError> {
        require_id("agent id", agent_id)?;
        let mut outcome = ReleaseFilesOutcome::default();
        for raw in files {
            let path = match normalize_path(raw) {
                Ok(path) => path,
                Err(_) => {
                    outcome.skipped.push(SkippedRelease {
                        file: raw.clone(),
                        reason: SkipReason::InvalidPath,
                        held_by: None,
                    });
                    continue;
                }
            };
            match self.claims.get(&path) {
                None => outcome.skipped.push(SkippedRelease {
                    file: path,
                    reason: SkipReason::NotClaimed,
                    held_by: None,
                }),
                Some(claim) if claim.agent_id != agent_id => outcome.skipped.push(SkippedRelease {
                    file: path,
                    reason: SkipReason::OwnedByOther,
                    held_by: Some(claim.agent_id.clone()),
                }),
                Some(_) => {
                    self.claims.remove(&path);
                    outcome.released.push(path);
                }
            }
        }
        info!(
            agent.id = %agent_id,
            released = outcome.released.len(),
            skipped = outcome.skipped.len(),
            reason = reason.unwrap_or(""),
            "File claims released"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("x.py").unwrap(), "x.py");
        assert_eq!(normalize_path("./src//lib.rs").unwrap(), "src/lib.rs");
        assert_eq!(normalize_path("src\\mesh\\store.rs").unwrap(), "src/mesh/store.rs");
        assert_eq!(normalize_path("src/a/../b.rs").unwrap(), "src/b.rs");
        assert_eq!(normalize_path("../shared/x.rs").unwrap(), "../shared/x.rs");
        assert_eq!(normalize_path("/abs/../etc/x").unwrap(), "/etc/x");
        assert_eq!(normalize_path("dir/").unwrap(), "dir");
        assert!(normalize_path("  ").is_err());
        assert!(normalize_path("./").is_err());
    }

    #[test]
    fn test_conflict_without_force_keeps_owner() {
        let now = Utc::now();
        let mut doc = CoordinationDocument::default();
        doc.claim_files(ClaimFiles::new("a1", ["x.py"], Duration::seconds(30)), now)
            .unwrap();

        let outcome = doc
            .claim_files(ClaimFiles::new("a2", ["x.py"], Duration::seconds(30)), now)
            .unwrap();
        assert!(outcome.claimed.is_empty());
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].held_by, "a1");
        assert_eq!(doc.claims["x.py"].agent_id, "a1");
    }

    #[test]
    fn test_force_transfers_and_audits() {
        let now = Utc::now();
        let mut doc = CoordinationDocument::default();
        doc.claim_files(ClaimFiles::new("a1", ["x.py"], Duration::seconds(30)), now)
            .unwrap();

        let outcome = doc
            .claim_files(ClaimFiles::new("a2", ["x.py"], Duration::seconds(30)).forced(), now)
            .unwrap();
        assert_eq!(outcome.claimed.len(), 1);
        assert_eq!(outcome.forced[0].held_by, "a1");
        assert_eq!(doc.claims.len(), 1);
        assert_eq!(doc.claims["x.py"].agent_id, "a2");
        assert!(doc.audit.iter().any(|e| e.event == AuditEvent::FileForced && e.subject == "x.py"));
    }

    #[test]
    fn test_expired_claim_is_reclaimed_without_force() {
        let now = Utc::now();
        let mut doc = CoordinationDocument::default();
        doc.claim_files(ClaimFiles::new("a1", ["x.py"], Duration::seconds(30)), now)
            .unwrap();

        let later = now + Duration::seconds(30);
        let outcome = doc
            .claim_files(ClaimFiles::new("a2", ["x.py"], Duration::seconds(30)), later)
            .unwrap();
        assert_eq!(outcome.reclaimed, vec!["x.py".to_string()]);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(doc.claims["x.py"].agent_id, "a2");
    }

    #[test]
    fn test_batch_mixes_claims_conflicts_and_rejections() {
        let now = Utc::now();
        let mut doc = CoordinationDocument::default();
        doc.claim_files(ClaimFiles::new("a1", ["b.rs"], Duration::seconds(30)), now)
            .unwrap();

        let outcome = doc
            .claim_files(
                ClaimFiles::new("a2", ["a.rs", "./a.rs", "b.rs", ""], Duration::seconds(30))
                    .for_task("t1"),
                now,
            )
            .unwrap();
        assert_eq!(outcome.claimed.len(), 1);
        assert_eq!(outcome.claimed[0].task_id.as_deref(), Some("t1"));
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.rejected.len(), 1);
    }

    #[test]
    fn test_owner_reclaim_extends_and_keeps_claimed_at() {
        let now = Utc::now();
        let mut doc = CoordinationDocument::default();
        doc.claim_files(ClaimFiles::new("a1", ["x.py"], Duration::seconds(30)), now)
            .unwrap();
        let later = now + Duration::seconds(10);
        let outcome = doc
            .claim_files(ClaimFiles::new("a1", ["x.py"], Duration::seconds(30)), later)
            .unwrap();
        assert_eq!(outcome.claimed[0].claimed_at, now);
        assert_eq!(outcome.claimed[0].expires_at, later + Duration::seconds(30));
    }

    #[test]
    fn test_release_only_own_claims() {
        let now = Utc::now();
        let mut doc = CoordinationDocument::default();
        doc.claim_files(ClaimFiles::new("a1", ["a.rs"], Duration::seconds(30)), now)
            .unwrap();
        doc.claim_files(ClaimFiles::new("a2", ["b.rs"], Duration::seconds(30)), now)
            .unwrap();

        let files = vec!["a.rs".to_string(), "b.rs".to_string(), "c.rs".to_string()];
        let outcome = doc.release_files("a1", &files, Some("done")).unwrap();
        assert_eq!(outcome.released, vec!["a.rs".to_string()]);
        assert_eq!(outcome.skipped.len(), 2);
        assert_eq!(outcome.skipped[0].reason, SkipReason::OwnedByOther);
        assert_eq!(outcome.skipped[0].held_by.as_deref(), Some("a2"));
        assert_eq!(outcome.skipped[1].reason, SkipReason::NotClaimed);
        assert!(doc.claims.contains_key("b.rs"));
        assert!(!doc.claims.contains_key("a.rs"));
    }
}
