use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use tracing::{info, warn};

use super::agents::ttl_secs;
use super::document::{AgentStatus, AuditEvent, CoordinationDocument, Task, TaskNote, TaskOutcome, TaskStatus};
use super::files::normalize_path;
use crate::error::{require_id, Entity, MeshError};

/// Fields for creating or editing a task
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub priority: i64,
    pub files: Vec<String>,
    pub tags: Vec<String>,
    pub created_by: Option<String>,
}

impl NewTask {
    pub fn new(task_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

fn clean_set(values: &[String]) -> BTreeSet<String> {
    values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

impl CoordinationDocument {
    /// Upsert a task
    ///
    /// Editing keeps claim ownership as is. Re-adding a failed or abandoned
    /// task puts it back in the queue.
    pub fn add_task(&mut self, new: NewTask, now: DateTime<Utc>) -> Result<Task, MeshError> {
        require_id("task id", &new.task_id)?;
        let files = new
            .files
            .iter()
            .map(|file| normalize_path(file))
            .collect::<Result<BTreeSet<_>, _>>()?;
        let tags = clean_set(&new.tags);

        let task = match self.tasks.get_mut(&new.task_id) {
            Some(existing) => {
                existing.title = new.title;
                existing.description = new.description;
                existing.priority = new.priority;
                existing.files = files;
                existing.tags = tags;
                if new.created_by.is_some() {
                    existing.created_by = new.created_by;
                }
                if matches!(existing.status, TaskStatus::Failed | TaskStatus::Abandoned) {
                    existing.status = TaskStatus::Queued;
                    existing.clear_claim();
                }
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let task = Task {
                    task_id: new.task_id.clone(),
                    title: new.title,
                    description: new.description,
                    priority: new.priority,
                    files,
                    tags,
                    created_by: new.created_by,
                    status: TaskStatus::Queued,
                    claimed_by: None,
                    claimed_at: None,
                    claim_expires_at: None,
                    claim_count: 0,
                    created_at: now,
                    updated_at: now,
                    notes: Vec::new(),
                };
                self.tasks.insert(task.task_id.clone(), task.clone());
                task
            }
        };
        info!(task.id = %task.task_id, priority = task.priority, status = %task.status, "Task saved");
        Ok(task)
    }

    /// Claim a task for `agent_id` until `now + ttl`
    ///
    /// A live claim held by another agent is a conflict; a lapsed one is taken
    /// over. Claiming a task the caller already holds renews the lease.
    pub fn claim_task(
        &mut self,
        agent_id: &str,
        task_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Task, MeshError> {
        require_id("agent id", agent_id)?;
        ttl_secs(ttl)?;
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| MeshError::not_found(Entity::Task, task_id))?;

        let mut previous_holder = None;
        match task.status {
            TaskStatus::Queued => {}
            TaskStatus::InProgress => match task.check_takeover(agent_id, now) {
                Ok(()) => {}
                Err(MeshError::Expired { holder, .. }) => previous_holder = Some(holder),
                Err(err) => return Err(err),
            },
            status => {
                return Err(MeshError::invalid_state(
                    format!("task '{task_id}'"),
                    format!("cannot claim a {status} task; re-add it to queue it again"),
                ));
            }
        }

        let renewal = task.status == TaskStatus::InProgress
            && previous_holder.is_none()
            && task.claimed_by.as_deref() == Some(agent_id);
        if !renewal {
            task.claimed_at = Some(now);
            task.claim_count += 1;
        }
        task.status = TaskStatus::InProgress;
        task.claimed_by = Some(agent_id.to_string());
        task.claim_expires_at = Some(now + ttl);
        task.updated_at = now;
        let task = task.clone();

        if let Some(previous) = previous_holder.as_deref() {
            self.detach_task_from_agent(previous, task_id, now);
            self.record(
                now,
                AuditEvent::TaskTakenOver,
                Some(agent_id),
                task_id,
                format!("expired claim of {previous} taken over"),
            );
            warn!(task.id = %task_id, agent.id = %agent_id, previous = %previous, "Took over expired task claim");
        } else if !renewal {
            self.record(now, AuditEvent::TaskClaimed, Some(agent_id), task_id, "");
        }

        if let Some(agent) = self.agents.get_mut(agent_id) {
            if !agent.is_expired(now) {
                agent.current_task_id = Some(task_id.to_string());
                agent.status = AgentStatus::Busy;
            }
        }
        info!(task.id = %task_id, agent.id = %agent_id, "Task claimed");
        Ok(task)
    }

    /// Hand a claimed task back with an outcome
    pub fn release_task(
        &mut self,
        agent_id: &str,
        task_id: &str,
        outcome: TaskOutcome,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Task, MeshError> {
        require_id("agent id", agent_id)?;
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| MeshError::not_found(Entity::Task, task_id))?;

        if task.status != TaskStatus::InProgress {
            return Err(MeshError::invalid_state(
                format!("task '{task_id}'"),
                format!("task is {}, not in_progress", task.status),
            ));
        }
        match task.claimed_by.as_deref() {
            Some(holder) if holder == agent_id => {}
            holder => {
                return Err(MeshError::conflict(
                    format!("task '{task_id}'"),
                    holder.unwrap_or("nobody"),
                    format!("{agent_id} does not own this claim"),
                ));
            }
        }

        task.status = outcome.status();
        task.clear_claim();
        task.updated_at = now;
        if let Some(text) = note {
            task.notes.push(TaskNote {
                at: now,
                agent_id: Some(agent_id.to_string()),
                text,
            });
        }
        let task = task.clone();

        self.detach_task_from_agent(agent_id, task_id, now);
        self.record(
            now,
            AuditEvent::TaskReleased,
            Some(agent_id),
            task_id,
            format!("outcome={outcome}"),
        );
        info!(task.id = %task_id, agent.id = %agent_id, %outcome, "Task released");
        Ok(task)
    }
}
