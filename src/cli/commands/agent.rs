use chrono::Utc;

use super::{Command, Context};
use crate::error::MeshError;
use crate::mesh::{lease, Agent, AgentStatus, Heartbeat, RegisterAgent, UnregisterAck};

pub struct RegisterCommand {
    pub agent_id: String,
    pub role: String,
    pub branch: Option<String>,
    pub capabilities: Vec<String>,
    pub ttl_secs: Option<u64>,
}

impl Command for RegisterCommand {
    type Output = Agent;

    async fn execute(&self, ctx: &Context) -> Result<Agent, MeshError> {
        let ttl = lease(self.ttl_secs.unwrap_or(ctx.config.default_agent_ttl_secs))?;
        let mut req = RegisterAgent::new(&self.agent_id, &self.role, ttl).with_capabilities(&self.capabilities);
        req.branch = self.branch.clone();
        ctx.mesh.register(req).await
    }

    fn render(&self, agent: &Agent) -> String {
        let mut out = format!(
            "✅ Registered {} as {} (lease {}s, expires {})",
            agent.agent_id,
            agent.role,
            agent.ttl_secs,
            agent.lease_expires_at.format("%H:%M:%S UTC")
        );
        if let Some(branch) = &agent.branch {
            out.push_str(&format!("\n   🌿 Branch: {branch}"));
        }
        if !agent.capabilities.is_empty() {
            let caps: Vec<_> = agent.capabilities.iter().map(String::as_str).collect();
            out.push_str(&format!("\n   🧰 Capabilities: {}", caps.join(", ")));
        }
        out
    }
}

pub struct UnregisterCommand {
    pub agent_id: String,
    pub reason: Option<String>,
}

impl Command for UnregisterCommand {
    type Output = UnregisterAck;

    async fn execute(&self, ctx: &Context) -> Result<UnregisterAck, MeshError> {
        ctx.mesh.unregister(&self.agent_id, self.reason.clone()).await
    }

    fn render(&self, ack: &UnregisterAck) -> String {
        let mut out = if ack.removed {
            format!("👋 Unregistered {}", ack.agent_id)
        } else {
            format!("ℹ️  {} was not registered; nothing to do", ack.agent_id)
        };
        if !ack.still_holds_tasks.is_empty() {
            out.push_str(&format!(
                "\n   ⚠️  Still claimed until expiry: tasks {}",
                ack.still_holds_tasks.join(", ")
            ));
        }
        if !ack.still_holds_files.is_empty() {
            out.push_str(&format!(
                "\n   ⚠️  Still claimed until expiry: files {}",
                ack.still_holds_files.join(", ")
            ));
        }
        out
    }
}

pub struct HeartbeatCommand {
    pub agent_id: String,
    pub status: Option<AgentStatus>,
    pub note: Option<String>,
    pub task_id: Option<String>,
    pub ttl_secs: Option<u64>,
}

impl Command for HeartbeatCommand {
    type Output = Agent;

    async fn execute(&self, ctx: &Context) -> Result<Agent, MeshError> {
        let req = Heartbeat {
            agent_id: self.agent_id.clone(),
            status: self.status,
            note: self.note.clone(),
            current_task_id: self.task_id.clone(),
            ttl: self.ttl_secs.map(lease).transpose()?,
        };
        ctx.mesh.heartbeat(req).await
    }

    fn render(&self, agent: &Agent) -> String {
        let remaining = (agent.lease_expires_at - Utc::now()).num_seconds().max(0);
        let mut out = format!("💓 {} is {} (lease {remaining}s left)", agent.agent_id, agent.status);
        if let Some(task_id) = &agent.current_task_id {
            out.push_str(&format!("\n   🎯 Working on {task_id}"));
        }
        out
    }
}
