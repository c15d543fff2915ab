use super::{Command, Context};
use crate::error::MeshError;
use crate::mesh::status::StatusReport;
use crate::mesh::{AgentStatus, CoordinationDocument, TaskStatus};

pub struct StatusCommand;

impl Command for StatusCommand {
    type Output = StatusReport;

    async fn execute(&self, ctx: &Context) -> Result<StatusReport, MeshError> {
        ctx.mesh.status().await
    }

    fn render(&self, report: &StatusReport) -> String {
        let mut out = Vec::new();
        out.push("🤖 AGENT MESH STATUS".to_string());
        out.push("====================".to_string());
        out.push(String::new());

        let agents = &report.agent_counts;
        out.push(format!(
            "📊 AGENTS: {} total | 🟢 {} active | 💤 {} idle | 🔴 {} busy | ⚫ {} expired",
            agents.total, agents.active, agents.idle, agents.busy, agents.expired
        ));
        for agent in &report.agents {
            let icon = match agent.status {
                AgentStatus::Active => "🟢",
                AgentStatus::Idle => "💤",
                AgentStatus::Busy => "🔴",
                AgentStatus::Expired => "⚫",
            };
            let task = agent
                .current_task_id
                .as_deref()
                .map(|id| format!(" on {id}"))
                .unwrap_or_default();
            out.push(format!(
                "   {icon} {} ({}){task}, lease {}s",
                agent.agent_id, agent.role, agent.lease_remaining_secs
            ));
        }
        out.push(String::new());

        let tasks = &report.task_counts;
        out.push(format!(
            "📋 TASKS: {} total | ⏳ {} queued | 🔨 {} in progress | ✅ {} completed | 💥 {} failed | 🚪 {} abandoned",
            tasks.total, tasks.queued, tasks.in_progress, tasks.completed, tasks.failed, tasks.abandoned
        ));
        for task in &report.tasks {
            let holder = match (&task.claimed_by, task.claim_expired) {
                (Some(agent), false) => format!(" by {agent}"),
                (Some(agent), true) => format!(" by {agent} (claim expired)"),
                (None, _) => String::new(),
            };
            let icon = if task.status == TaskStatus::InProgress { "🔨" } else { "•" };
            out.push(format!(
                "   {icon} [{}] {} p{}: {}{holder}",
                task.status, task.task_id, task.priority, task.title
            ));
        }
        out.push(String::new());

        out.push(format!(
            "🔒 FILE CLAIMS: {} active | {} expired",
            report.claim_counts.active, report.claim_counts.expired
        ));
        for claim in &report.claims {
            let suffix = if claim.expired { " (expired)" } else { "" };
            out.push(format!("   {} → {}{suffix}", claim.file, claim.agent_id));
        }

        if let Some(updated) = report.updated_at {
            out.push(String::new());
            out.push(format!("🕒 Last change: {}", updated.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        out.join("\n")
    }
}

pub struct ShowCommand;

impl Command for ShowCommand {
    type Output = CoordinationDocument;

    async fn execute(&self, ctx: &Context) -> Result<CoordinationDocument, MeshError> {
        ctx.mesh.export_state().await
    }

    fn render(&self, doc: &CoordinationDocument) -> String {
        serde_json::to_string_pretty(doc).unwrap_or_else(|err| format!("❌ Failed to render document: {err}"))
    }
}
