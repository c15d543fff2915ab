use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Entity, MeshError};

pub const DOCUMENT_VERSION: u32 = 1;

fn default_version() -> u32 {
    DOCUMENT_VERSION
}

/// The single persisted aggregate shared by every agent process
///
/// Ordered maps and sets keep the serialized form deterministic, so loading an
/// exported document reproduces it exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub agents: BTreeMap<String, Agent>,
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,
    /// Keyed by normalized file path; a path has at most one claim
    #[serde(default)]
    pub claims: BTreeMap<String, FileClaim>,
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for CoordinationDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            agents: BTreeMap::new(),
            tasks: BTreeMap::new(),
            claims: BTreeMap::new(),
            audit: Vec::new(),
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Busy,
    Expired,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentStatus::Active => "active",
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Expired => "expired",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub status: AgentStatus,
    /// Lookup convenience only; the task map is authoritative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub ttl_secs: u64,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
}

impl Agent {
    /// Logically expired: swept already, or the lease ran out and nobody swept yet
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == AgentStatus::Expired || now >= self.lease_expires_at
    }

    /// Status as seen by schedulers at `now`
    pub fn effective_status(&self, now: DateTime<Utc>) -> AgentStatus {
        if self.is_expired(now) {
            AgentStatus::Expired
        } else {
            self.status
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Abandoned,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Abandoned => "abandoned",
        };
        write!(f, "{label}")
    }
}

/// How an agent hands a claimed task back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed,
    Abandoned,
    Queued,
}

impl TaskOutcome {
    pub fn status(self) -> TaskStatus {
        match self {
            TaskOutcome::Completed => TaskStatus::Completed,
            TaskOutcome::Failed => TaskStatus::Failed,
            TaskOutcome::Abandoned => TaskStatus::Abandoned,
            TaskOutcome::Queued => TaskStatus::Queued,
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNote {
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Higher number is more urgent
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub files: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub status: TaskStatus,
    /// Set iff `status == InProgress`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub claim_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<TaskNote>,
}

impl Task {
    pub fn claim_is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.claim_expires_at {
            Some(expires_at) => now >= expires_at,
            None => true,
        }
    }

    /// The agent holding a live claim at `now`, if any
    pub fn live_holder(&self, now: DateTime<Utc>) -> Option<&str> {
        if self.status != TaskStatus::InProgress || self.claim_is_expired(now) {
            return None;
        }
        self.claimed_by.as_deref()
    }

    /// Whether `agent_id` may take the claim over
    ///
    /// `Ok` when nobody else holds it, `Expired` when another agent's claim
    /// lapsed, `Conflict` while that claim is live.
    pub fn check_takeover(&self, agent_id: &str, now: DateTime<Utc>) -> Result<(), MeshError> {
        let holder = match self.claimed_by.as_deref() {
            Some(holder) if self.status == TaskStatus::InProgress && holder != agent_id => holder,
            _ => return Ok(()),
        };
        let resource = format!("{} '{}'", Entity::Task, self.task_id);
        match self.claim_expires_at {
            Some(expires_at) if now < expires_at => Err(MeshError::conflict(
                resource,
                holder,
                format!("claim is live until {}", expires_at.to_rfc3339()),
            )),
            expires_at => Err(MeshError::expired(resource, holder, expires_at.unwrap_or(now))),
        }
    }

    /// Queued, or in progress under a claim that has already lapsed
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            TaskStatus::Queued => true,
            TaskStatus::InProgress => self.live_holder(now).is_none(),
            _ => false,
        }
    }

    pub(crate) fn clear_claim(&mut self) {
        self.claimed_by = None;
        self.claimed_at = None;
        self.claim_expires_at = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileClaim {
    pub file: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FileClaim {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Same contract as [`Task::check_takeover`], for one path
    pub fn check_takeover(&self, agent_id: &str, now: DateTime<Utc>) -> Result<(), MeshError> {
        if self.agent_id == agent_id {
            return Ok(());
        }
        let resource = format!("{} '{}'", Entity::FileClaim, self.file);
        if self.is_expired(now) {
            Err(MeshError::expired(resource, &self.agent_id, self.expires_at))
        } else {
            Err(MeshError::conflict(
                resource,
                &self.agent_id,
                format!("claimed until {}", self.expires_at.to_rfc3339()),
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    AgentRegistered,
    AgentUnregistered,
    AgentExpired,
    AgentPurged,
    TaskClaimed,
    TaskTakenOver,
    TaskReleased,
    TaskRequeued,
    FileReclaimed,
    FileForced,
    FileExpired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub event: AuditEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub subject: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl CoordinationDocument {
    pub(crate) fn record(
        &mut self,
        at: DateTime<Utc>,
        event: AuditEvent,
        agent_id: Option<&str>,
        subject: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.audit.push(AuditEntry {
            at,
            event,
            agent_id: agent_id.map(str::to_string),
            subject: subject.into(),
            detail: detail.into(),
        });
    }

    /// Drop the oldest audit entries beyond `limit`
    pub fn trim_audit(&mut self, limit: usize) {
        if self.audit.len() > limit {
            let excess = self.audit.len() - limit;
            self.audit.drain(..excess);
        }
    }

    /// Clear an agent's back-reference if it still points at `task_id`
    pub(crate) fn detach_task_from_agent(&mut self, agent_id: &str, task_id: &str, now: DateTime<Utc>) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            if agent.current_task_id.as_deref() == Some(task_id) {
                agent.current_task_id = None;
                if !agent.is_expired(now) {
                    agent.status = AgentStatus::Idle;
                }
            }
        }
    }

    /// Tasks currently held (live claim) by `agent_id`, read from the task map
    pub fn tasks_held_by(&self, agent_id: &str, now: DateTime<Utc>) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|task| task.live_holder(now) == Some(agent_id))
            .collect()
    }

    /// An agent's `current_task_id`, but only while the task map confirms the
    /// agent holds that task under a live claim
    pub fn verified_current_task<'a>(&self, agent: &'a Agent, now: DateTime<Utc>) -> Option<&'a str> {
        let task_id = agent.current_task_id.as_deref()?;
        let task = self.tasks.get(task_id)?;
        (task.live_holder(now) == Some(agent.agent_id.as_str())).then_some(task_id)
    }

    /// Live file claims held by `agent_id`
    pub fn claims_held_by(&self, agent_id: &str, now: DateTime<Utc>) -> Vec<&FileClaim> {
        self.claims
            .values()
            .filter(|claim| claim.agent_id == agent_id && !claim.is_expired(now))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_task(now: DateTime<Utc>) -> Task {
        Task {
            task_id: "t1".to_string(),
            title: "Write parser".to_string(),
            description: String::new(),
            priority: 5,
            files: BTreeSet::new(),
            tags: BTreeSet::new(),
            created_by: None,
            status: TaskStatus::InProgress,
            claimed_by: Some("a1".to_string()),
            claimed_at: Some(now),
            claim_expires_at: Some(now + Duration::seconds(60)),
            claim_count: 1,
            created_at: now,
            updated_at: now,
            notes: Vec::new(),
        }
    }

    #[test]
    fn test_live_holder_respects_expiry() {
        let now = Utc::now();
        let task = sample_task(now);
        assert_eq!(task.live_holder(now), Some("a1"));
        assert!(!task.is_claimable(now));

        let later = now + Duration::seconds(60);
        assert_eq!(task.live_holder(later), None);
        assert!(task.is_claimable(later));
    }

    #[test]
    fn test_check_takeover_tells_live_from_lapsed_claims() {
        let now = Utc::now();
        let task = sample_task(now);
        assert!(task.check_takeover("a1", now).is_ok());
        assert!(matches!(
            task.check_takeover("a2", now),
            Err(MeshError::Conflict { ref holder, .. }) if holder == "a1"
        ));
        assert!(matches!(
            task.check_takeover("a2", now + Duration::seconds(60)),
            Err(MeshError::Expired { ref holder, .. }) if holder == "a1"
        ));

        let claim = FileClaim {
            file: "x.py".to_string(),
            agent_id: "a1".to_string(),
            task_id: None,
            claimed_at: now,
            expires_at: now + Duration::seconds(30),
        };
        assert!(claim.check_takeover("a1", now).is_ok());
        assert!(matches!(claim.check_takeover("a2", now), Err(MeshError::Conflict { .. })));
        assert!(matches!(
            claim.check_takeover("a2", now + Duration::seconds(30)),
            Err(MeshError::Expired { .. })
        ));
    }

    #[test]
    fn test_terminal_tasks_are_not_claimable() {
        let now = Utc::now();
        let mut task = sample_task(now);
        task.status = TaskStatus::Completed;
        task.clear_claim();
        assert!(!task.is_claimable(now));
    }

    #[test]
    fn test_task_status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        assert_eq!(TaskOutcome::Abandoned.status(), TaskStatus::Abandoned);
    }

    #[test]
    fn test_trim_audit_keeps_newest() {
        let now = Utc::now();
        let mut doc = CoordinationDocument::default();
        for i in 0..5 {
            doc.record(now, AuditEvent::TaskClaimed, Some("a1"), format!("t{i}"), "");
        }
        doc.trim_audit(2);
        let subjects: Vec<_> = doc.audit.iter().map(|e| e.subject.as_str()).collect();
        assert_eq!(subjects, vec!["t3", "t4"]);
    }

    #[test]
    fn test_empty_json_object_loads_as_default_document() {
        let doc: CoordinationDocument = serde_json::from_str("{}").unwrap();
        assert_eq!(doc, CoordinationDocument::default());
    }
}
