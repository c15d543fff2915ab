use super::{Command, Context};
use crate::error::MeshError;
use crate::mesh::{lease, NewTask, Task, TaskOutcome};

pub struct AddTaskCommand {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub priority: i64,
    pub files: Vec<String>,
    pub tags: Vec<String>,
    pub created_by: Option<String>,
}

impl Command for AddTaskCommand {
    type Output = Task;

    async fn execute(&self, ctx: &Context) -> Result<Task, MeshError> {
        let new = NewTask {
            task_id: self.task_id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            priority: self.priority,
            files: self.files.clone(),
            tags: self.tags.clone(),
            created_by: self.created_by.clone(),
        };
        ctx.mesh.add_task(new).await
    }

    fn render(&self, task: &Task) -> String {
        let mut out = format!(
            "📋 Task {} [{}] priority {}: {}",
            task.task_id, task.status, task.priority, task.title
        );
        if !task.files.is_empty() {
            let files: Vec<_> = task.files.iter().map(String::as_str).collect();
            out.push_str(&format!("\n   📁 Files: {}", files.join(", ")));
        }
        out
    }
}

pub struct ClaimTaskCommand {
    pub agent_id: String,
    pub task_id: String,
    pub ttl_secs: Option<u64>,
}

impl Command for ClaimTaskCommand {
    type Output = Task;

    async fn execute(&self, ctx: &Context) -> Result<Task, MeshError> {
        let ttl = lease(self.ttl_secs.unwrap_or(ctx.config.default_task_ttl_secs))?;
        ctx.mesh.claim_task(&self.agent_id, &self.task_id, ttl).await
    }

    fn render(&self, task: &Task) -> String {
        let expires = task
            .claim_expires_at
            .map(|at| at.format("%H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        format!(
            "✅ {} claimed {}: {}\n   ⏰ Claim expires {expires}",
            self.agent_id, task.task_id, task.title
        )
    }
}

pub struct ReleaseTaskCommand {
    pub agent_id: String,
    pub task_id: String,
    pub outcome: TaskOutcome,
    pub note: Option<String>,
}

impl Command for ReleaseTaskCommand {
    type Output = Task;

    async fn execute(&self, ctx: &Context) -> Result<Task, MeshError> {
        ctx.mesh
            .release_task(&self.agent_id, &self.task_id, self.outcome, self.note.clone())
            .await
    }

    fn render(&self, task: &Task) -> String {
        let icon = match self.outcome {
            TaskOutcome::Completed => "🎉",
            TaskOutcome::Failed => "💥",
            TaskOutcome::Abandoned => "🚪",
            TaskOutcome::Queued => "🔄",
        };
        format!("{icon} {} released {} as {}", self.agent_id, task.task_id, task.status)
    }
}
