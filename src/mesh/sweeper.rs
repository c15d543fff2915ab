use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use super::document::{AgentStatus, AuditEvent, CoordinationDocument, TaskNote, TaskStatus};

/// What one sweep pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub agents_expired: Vec<String>,
    /// Expired agents dropped after the retention window
    pub agents_removed: Vec<String>,
    pub claims_reclaimed: Vec<String>,
    pub tasks_requeued: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.agents_expired.is_empty()
            && self.agents_removed.is_empty()
            && self.claims_reclaimed.is_empty()
            && self.tasks_requeued.is_empty()
    }
}

impl CoordinationDocument {
    /// Reclaim every lease that lapsed before `now`
    ///
    /// Only timed-out `in_progress` tasks are requeued; tasks released as
    /// `failed` or `abandoned` stay where their owner put them. Running the
    /// pass twice at the same instant changes nothing the second time.
    pub fn sweep_stale(&mut self, now: DateTime<Utc>, expired_agent_retention: Option<Duration>) -> SweepReport {
        let mut report = SweepReport::default();

        for agent in self.agents.values_mut() {
            if agent.status != AgentStatus::Expired && now >= agent.lease_expires_at {
                agent.status = AgentStatus::Expired;
                agent.current_task_id = None;
                report.agents_expired.push(agent.agent_id.clone());
            }
        }
        if let Some(retention) = expired_agent_retention {
            self.agents.retain(|agent_id, agent| {
                let purge = agent.status == AgentStatus::Expired && now >= agent.lease_expires_at + retention;
                if purge {
                    report.agents_removed.push(agent_id.clone());
                }
                !purge
            });
        }

        self.claims.retain(|file, claim| {
            let expired = claim.is_expired(now);
            if expired {
                report.claims_reclaimed.push(file.clone());
            }
            !expired
        });

        let mut requeued = Vec::new();
        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::InProgress && task.claim_is_expired(now) {
                let holder = task.claimed_by.clone();
                task.status = TaskStatus::Queued;
                task.clear_claim();
                task.updated_at = now;
                task.notes.push(TaskNote {
                    at: now,
                    agent_id: holder.clone(),
                    text: "claim expired; requeued".to_string(),
                });
                requeued.push((task.task_id.clone(), holder));
            }
        }
        for (task_id, holder) in requeued {
            if let Some(holder) = holder.as_deref() {
                self.detach_task_from_agent(holder, &task_id, now);
            }
            self.record(now, AuditEvent::TaskRequeued, holder.as_deref(), task_id.as_str(), "claim expired");
            report.tasks_requeued.push(task_id);
        }

        for agent_id in &report.agents_expired {
            self.record(now, AuditEvent::AgentExpired, Some(agent_id.as_str()), agent_id.as_str(), "");
        }
        for agent_id in &report.agents_removed {
            self.record(now, AuditEvent::AgentPurged, Some(agent_id.as_str()), agent_id.as_str(), "");
        }
        for file in &report.claims_reclaimed {
            self.record(now, AuditEvent::FileExpired, None, file.as_str(), "");
        }

        if !report.is_empty() {
            info!(
                agents_expired = report.agents_expired.len(),
                agents_removed = report.agents_removed.len(),
                claims_reclaimed = report.claims_reclaimed.len(),
                tasks_requeued = report.tasks_requeued.len(),
                "Swept stale leases"
            );
        }
        report
    }
}
