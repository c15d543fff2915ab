use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

use super::document::{Agent, AgentStatus, CoordinationDocument, Task};

/// Agent/task affinity used to break ties between equally urgent tasks
///
/// Priority always dominates; affinity only orders tasks that share a
/// priority, ahead of age. Swap the implementation to change the weighting.
pub trait AffinityScorer: Send + Sync {
    fn score(&self, agent: &Agent, task: &Task) -> u32;
}

/// Counts task tags the agent lists as capabilities, plus one when the task
/// is tagged with the agent's branch
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityAffinity;

impl AffinityScorer for CapabilityAffinity {
    fn score(&self, agent: &Agent, task: &Task) -> u32 {
        let overlap = task.tags.intersection(&agent.capabilities).count() as u32;
        let branch = agent
            .branch
            .as_ref()
            .is_some_and(|branch| task.tags.contains(branch)) as u32;
        overlap + branch
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedFile {
    pub file: String,
    pub held_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub task: Task,
    pub affinity: u32,
    /// Files of the task currently claimed by other agents
    pub blocked_files: Vec<BlockedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentSuggestion {
    pub agent_id: String,
    pub task_id: String,
    pub title: String,
    pub priority: i64,
    pub affinity: u32,
}

/// Read-only planner over a loaded document
pub struct AssignmentAdvisor<'a> {
    doc: &'a CoordinationDocument,
    scorer: &'a dyn AffinityScorer,
    now: DateTime<Utc>,
}

/// Baseline order: priority (high first), then age (old first), then id
fn baseline(a: &Task, b: &Task) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.task_id.cmp(&b.task_id))
}

impl<'a> AssignmentAdvisor<'a> {
    pub fn new(doc: &'a CoordinationDocument, scorer: &'a dyn AffinityScorer, now: DateTime<Utc>) -> Self {
        Self { doc, scorer, now }
    }

    /// Claimable tasks in baseline order
    pub fn candidates(&self) -> Vec<&'a Task> {
        let mut tasks: Vec<&Task> = self
            .doc
            .tasks
            .values()
            .filter(|task| task.is_claimable(self.now))
            .collect();
        tasks.sort_by(|a, b| baseline(a, b));
        tasks
    }

    fn affinity(&self, agent: Option<&Agent>, task: &Task) -> u32 {
        agent.map(|agent| self.scorer.score(agent, task)).unwrap_or(0)
    }

    /// Pick the best of `tasks` for `agent`: priority, then affinity, then age
    fn best_for<'t>(&self, agent: Option<&Agent>, tasks: &[&'t Task]) -> Option<(&'t Task, u32)> {
        tasks
            .iter()
            .map(|task| (*task, self.affinity(agent, task)))
            .min_by(|(a, score_a), (b, score_b)| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| score_b.cmp(score_a))
                    .then_with(|| baseline(a, b))
            })
    }

    fn blocked_files(&self, agent_id: &str, task: &Task) -> Vec<BlockedFile> {
        task.files
            .iter()
            .filter_map(|file| self.doc.claims.get(file))
            .filter(|claim| claim.agent_id != agent_id && !claim.is_expired(self.now))
            .map(|claim| BlockedFile {
                file: claim.file.clone(),
                held_by: claim.agent_id.clone(),
            })
            .collect()
    }

    /// Next task for `agent_id`. Unknown or expired agents get the plain
    /// priority-then-age ranking without affinity.
    pub fn recommend(&self, agent_id: &str) -> Option<Recommendation> {
        let agent = self
            .doc
            .agents
            .get(agent_id)
            .filter(|agent| !agent.is_expired(self.now));
        let candidates = self.candidates();
        let (task, affinity) = self.best_for(agent, &candidates)?;
        Some(Recommendation {
            task: task.clone(),
            affinity,
            blocked_files: self.blocked_files(agent_id, task),
        })
    }

    /// Dry-run pairing of available agents with the top `max` claimable tasks
    pub fn suggest(&self, max: usize) -> Vec<AssignmentSuggestion> {
        let mut pool: Vec<&Task> = self.candidates().into_iter().take(max).collect();
        let agents = self.doc.agents.values().filter(|agent| self.is_available(agent));

        let mut suggestions = Vec::new();
        for agent in agents {
            let Some((task, affinity)) = self.best_for(Some(agent), &pool) else {
                break;
            };
            pool.retain(|candidate| candidate.task_id != task.task_id);
            suggestions.push(AssignmentSuggestion {
                agent_id: agent.agent_id.clone(),
                task_id: task.task_id.clone(),
                title: task.title.clone(),
                priority: task.priority,
                affinity,
            });
        }
        suggestions
    }

    /// Live, not busy, and not holding a live task claim
    fn is_available(&self, agent: &Agent) -> bool {
        matches!(agent.effective_status(self.now), AgentStatus::Active | AgentStatus::Idle)
            && self.doc.tasks_held_by(&agent.agent_id, self.now).is_empty()
    }
}
