use super::{Command, Context};
use crate::error::MeshError;
use crate::mesh::{AgentGuide, AssignmentSuggestion, Recommendation};

pub struct RecommendCommand {
    pub agent_id: String,
}

impl Command for RecommendCommand {
    type Output = Option<Recommendation>;

    async fn execute(&self, ctx: &Context) -> Result<Option<Recommendation>, MeshError> {
        ctx.mesh.recommend(&self.agent_id).await
    }

    fn render(&self, recommendation: &Option<Recommendation>) -> String {
        let Some(rec) = recommendation else {
            return "📋 No claimable tasks right now".to_string();
        };
        let mut out = format!(
            "🎯 Next for {}: {} (priority {}) {}",
            self.agent_id, rec.task.task_id, rec.task.priority, rec.task.title
        );
        if rec.affinity > 0 {
            out.push_str(&format!("\n   🧲 Affinity {}", rec.affinity));
        }
        for blocked in &rec.blocked_files {
            out.push_str(&format!("\n   ⚠️  {} is claimed by {}", blocked.file, blocked.held_by));
        }
        out
    }
}

pub struct AssignmentsCommand {
    pub max: usize,
}

impl Command for AssignmentsCommand {
    type Output = Vec<AssignmentSuggestion>;

    async fn execute(&self, ctx: &Context) -> Result<Vec<AssignmentSuggestion>, MeshError> {
        ctx.mesh.suggest_assignments(self.max).await
    }

    fn render(&self, suggestions: &Vec<AssignmentSuggestion>) -> String {
        if suggestions.is_empty() {
            return "🔀 No assignments possible (no available agents or no claimable tasks)".to_string();
        }
        let mut lines = vec!["🔀 Suggested assignments (dry run):".to_string()];
        for s in suggestions {
            lines.push(format!(
                "   {} ← {} (priority {}) {}",
                s.agent_id, s.task_id, s.priority, s.title
            ));
        }
        lines.join("\n")
    }
}

pub struct GuideCommand {
    pub agent_id: String,
}

impl Command for GuideCommand {
    type Output = AgentGuide;

    async fn execute(&self, ctx: &Context) -> Result<AgentGuide, MeshError> {
        ctx.mesh.guide(&self.agent_id).await
    }

    fn render(&self, guide: &AgentGuide) -> String {
        let mut out = Vec::new();
        out.push(format!("🧭 Guide for {}", guide.agent_id));
        match &guide.agent {
            Some(agent) => out.push(format!(
                "   {} as {}, lease {}s remaining",
                agent.status, agent.role, agent.lease_remaining_secs
            )),
            None => out.push("   Not registered".to_string()),
        }
        for task in &guide.held_tasks {
            out.push(format!("   🔨 Holding task {}: {}", task.task_id, task.title));
        }
        for claim in &guide.held_files {
            out.push(format!("   🔒 Holding file {}", claim.file));
        }
        if let Some(rec) = &guide.recommendation {
            out.push(format!(
                "   🎯 Recommended: {} (priority {}) {}",
                rec.task.task_id, rec.task.priority, rec.task.title
            ));
        }
        if !guide.next_steps.is_empty() {
            out.push(String::new());
            out.push("💡 Next steps:".to_string());
            for step in &guide.next_steps {
                out.push(format!("   {step}"));
            }
        }
        out.join("\n")
    }
}
