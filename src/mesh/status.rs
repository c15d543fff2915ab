use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::advisor::Recommendation;
use super::document::{Agent, AgentStatus, CoordinationDocument, FileClaim, Task, TaskStatus};

pub const BINARY_NAME: &str = "agent-mesh";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentCounts {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub busy: usize,
    pub expired: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub total: usize,
    pub queued: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub abandoned: usize,
    /// In progress, but the claim lapsed and awaits a sweep
    pub stale_claims: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClaimCounts {
    pub active: usize,
    pub expired: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Status with lease expiry applied
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    pub lease_expires_at: DateTime<Utc>,
    pub lease_remaining_secs: i64,
}

impl AgentSummary {
    /// `current_task_id` is reported only when the task map backs it up
    pub fn from_agent(doc: &CoordinationDocument, agent: &Agent, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent.agent_id.clone(),
            role: agent.role.clone(),
            branch: agent.branch.clone(),
            status: agent.effective_status(now),
            current_task_id: doc.verified_current_task(agent, now).map(str::to_string),
            lease_expires_at: agent.lease_expires_at,
            lease_remaining_secs: (agent.lease_expires_at - now).num_seconds().max(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub title: String,
    pub priority: i64,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub claim_expired: bool,
}

impl TaskSummary {
    pub fn from_task(task: &Task, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task.task_id.clone(),
            title: task.title.clone(),
            priority: task.priority,
            status: task.status,
            claimed_by: task.claimed_by.clone(),
            claim_expires_at: task.claim_expires_at,
            claim_expired: task.status == TaskStatus::InProgress && task.claim_is_expired(now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimSummary {
    pub file: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
}

impl ClaimSummary {
    pub fn from_claim(claim: &FileClaim, now: DateTime<Utc>) -> Self {
        Self {
            file: claim.file.clone(),
            agent_id: claim.agent_id.clone(),
            task_id: claim.task_id.clone(),
            expires_at: claim.expires_at,
            expired: claim.is_expired(now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub agent_counts: AgentCounts,
    pub task_counts: TaskCounts,
    pub claim_counts: ClaimCounts,
    pub agents: Vec<AgentSummary>,
    pub tasks: Vec<TaskSummary>,
    pub claims: Vec<ClaimSummary>,
}

/// Aggregate view of the document at `now`
pub fn status_report(doc: &CoordinationDocument, now: DateTime<Utc>) -> StatusReport {
    let agents: Vec<_> = doc.agents.values().map(|a| AgentSummary::from_agent(doc, a, now)).collect();
    let mut agent_counts = AgentCounts {
        total: agents.len(),
        ..AgentCounts::default()
    };
    for agent in &agents {
        match agent.status {
            AgentStatus::Active => agent_counts.active += 1,
            AgentStatus::Idle => agent_counts.idle += 1,
            AgentStatus::Busy => agent_counts.busy += 1,
            AgentStatus::Expired => agent_counts.expired += 1,
        }
    }

    let mut tasks: Vec<_> = doc.tasks.values().map(|t| TaskSummary::from_task(t, now)).collect();
    tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.task_id.cmp(&b.task_id)));
    let mut task_counts = TaskCounts {
        total: tasks.len(),
        ..TaskCounts::default()
    };
    for task in &tasks {
        match task.status {
            TaskStatus::Queued => task_counts.queued += 1,
            TaskStatus::InProgress => task_counts.in_progress += 1,
            TaskStatus::Completed => task_counts.completed += 1,
            TaskStatus::Failed => task_counts.failed += 1,
            TaskStatus::Abandoned => task_counts.abandoned += 1,
        }
        if task.claim_expired {
            task_counts.stale_claims += 1;
        }
    }

    let claims: Vec<_> = doc.claims.values().map(|c| ClaimSummary::from_claim(c, now)).collect();
    let expired_claims = claims.iter().filter(|c| c.expired).count();
    let claim_counts = ClaimCounts {
        active: claims.len() - expired_claims,
        expired: expired_claims,
    };

    StatusReport {
        generated_at: now,
        updated_at: doc.updated_at,
        agent_counts,
        task_counts,
        claim_counts,
        agents,
        tasks,
        claims,
    }
}

/// Everything one agent needs to decide what to do next
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentGuide {
    pub agent_id: String,
    pub registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentSummary>,
    pub held_tasks: Vec<TaskSummary>,
    pub held_files: Vec<ClaimSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
    pub next_steps: Vec<String>,
}

/// Leases this close to running out get a heartbeat reminder
const LEASE_WARNING: i64 = 60;

pub fn agent_guide(
    doc: &CoordinationDocument,
    agent_id: &str,
    recommendation: Option<Recommendation>,
    now: DateTime<Utc>,
) -> AgentGuide {
    let agent = doc.agents.get(agent_id).map(|a| AgentSummary::from_agent(doc, a, now));
    let held_tasks: Vec<_> = doc
        .tasks_held_by(agent_id, now)
        .into_iter()
        .map(|t| TaskSummary::from_task(t, now))
        .collect();
    let held_files: Vec<_> = doc
        .claims_held_by(agent_id, now)
        .into_iter()
        .map(|c| ClaimSummary::from_claim(c, now))
        .collect();

    let mut next_steps = Vec::new();
    match &agent {
        None => next_steps.push(format!(
            "{BINARY_NAME} register --agent {agent_id} --role <role>"
        )),
        Some(summary) if summary.status == AgentStatus::Expired => next_steps.push(format!(
            "{BINARY_NAME} register --agent {agent_id} --role {}  # lease expired, re-register",
            summary.role
        )),
        Some(summary) if summary.lease_expires_at - now <= Duration::seconds(LEASE_WARNING) => {
            next_steps.push(format!("{BINARY_NAME} heartbeat --agent {agent_id}"))
        }
        Some(_) => {}
    }
    for task in &held_tasks {
        next_steps.push(format!(
            "{BINARY_NAME} release-task --agent {agent_id} --task-id {} --outcome completed",
            task.task_id
        ));
    }
    if held_tasks.is_empty() {
        if let Some(rec) = &recommendation {
            next_steps.push(format!(
                "{BINARY_NAME} claim-task --agent {agent_id} --task-id {}",
                rec.task.task_id
            ));
            if !rec.task.files.is_empty() && rec.blocked_files.is_empty() {
                let files: Vec<_> = rec.task.files.iter().map(|f| format!("--file {f}")).collect();
                next_steps.push(format!(
                    "{BINARY_NAME} claim-files --agent {agent_id} --task-id {} {}",
                    rec.task.task_id,
                    files.join(" ")
                ));
            }
        }
    }
    if !held_files.is_empty() && held_tasks.is_empty() {
        let files: Vec<_> = held_files.iter().map(|c| format!("--file {}", c.file)).collect();
        next_steps.push(format!(
            "{BINARY_NAME} release-files --agent {agent_id} {}",
            files.join(" ")
        ));
    }

    AgentGuide {
        agent_id: agent_id.to_string(),
        registered: agent.is_some(),
        agent,
        held_tasks,
        held_files,
        recommendation,
        next_steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::agents::RegisterAgent;
    use crate::mesh::files::ClaimFiles;
    use crate::mesh::tasks::NewTask;

    #[test]
    fn test_status_counts_apply_lease_expiry() {
        let now = Utc::now();
        let mut doc = CoordinationDocument::default();
        doc.register_agent(RegisterAgent::new("a1", "coder", Duration::seconds(10)), now)
            .unwrap();
        doc.register_agent(RegisterAgent::new("a2", "coder", Duration::seconds(600)), now)
            .unwrap();
        doc.add_task(NewTask::new("t1", "One").with_priority(1), now).unwrap();
        doc.add_task(NewTask::new("t2", "Two").with_priority(8), now).unwrap();
        doc.claim_task("a2", "t1", Duration::seconds(5), now).unwrap();
        doc.claim_files(ClaimFiles::new("a2", ["x.py", "y.py"], Duration::seconds(5)), now)
            .unwrap();

        let report = status_report(&doc, now + Duration::seconds(20));
        assert_eq!(report.agent_counts.total, 2);
        assert_eq!(report.agent_counts.expired, 1);
        assert_eq!(report.agent_counts.busy, 1);
        assert_eq!(report.task_counts.in_progress, 1);
        assert_eq!(report.task_counts.stale_claims, 1);
        assert_eq!(report.claim_counts.expired, 2);
        assert_eq!(report.tasks[0].task_id, "t2");
    }

    #[test]
    fn test_status_ignores_back_reference_to_task_held_by_another_agent() {
        let now = Utc::now();
        let mut doc = CoordinationDocument::default();
        for agent_id in ["a1", "a2"] {
            doc.register_agent(RegisterAgent::new(agent_id, "coder", Duration::seconds(600)), now)
                .unwrap();
        }
        doc.add_task(NewTask::new("t1", "One"), now).unwrap();
        doc.claim_task("a2", "t1", Duration::seconds(60), now).unwrap();
        // a stale pointer as left behind by an older build or a hand edit
        doc.agents.get_mut("a1").unwrap().current_task_id = Some("t1".to_string());

        let report = status_report(&doc, now);
        let a1 = report.agents.iter().find(|a| a.agent_id == "a1").unwrap();
        let a2 = report.agents.iter().find(|a| a.agent_id == "a2").unwrap();
        assert_eq!(a1.current_task_id, None);
        assert_eq!(a2.current_task_id.as_deref(), Some("t1"));

        let guide = agent_guide(&doc, "a1", None, now);
        assert_eq!(guide.agent.unwrap().current_task_id, None);

        // once the claim lapses the holder's pointer is no longer reported either
        let report = status_report(&doc, now + Duration::seconds(61));
        let a2 = report.agents.iter().find(|a| a.agent_id == "a2").unwrap();
        assert_eq!(a2.current_task_id, None);
    }

    #[test]
    fn test_guide_for_unknown_agent_suggests_register() {
        let doc = CoordinationDocument::default();
        let guide = agent_guide(&doc, "a9", None, Utc::now());
        assert!(!guide.registered);
        assert!(guide.next_steps[0].contains("register --agent a9"));
    }

    #[test]
    fn test_guide_lists_holdings() {
        let now = Utc::now();
        let mut doc = CoordinationDocument::default();
        doc.register_agent(RegisterAgent::new("a1", "coder", Duration::seconds(600)), now)
            .unwrap();
        doc.add_task(NewTask::new("t1", "One"), now).unwrap();
        doc.claim_task("a1", "t1", Duration::seconds(60), now).unwrap();
        doc.claim_files(ClaimFiles::new("a1", ["x.py"], Duration::seconds(60)).for_task("t1"), now)
            .unwrap();

        let guide = agent_guide(&doc, "a1", None, now);
        assert!(guide.registered);
        assert_eq!(guide.held_tasks.len(), 1);
        assert_eq!(guide.held_files[0].file, "x.py");
        assert!(guide
            .next_steps
            .iter()
            .any(|step| step.contains("release-task --agent a1 --task-id t1")));
    }
}
