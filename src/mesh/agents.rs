use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use super::document::{Agent, AgentStatus, AuditEvent, CoordinationDocument};
use crate::error::{require_id, Entity, MeshError};

/// Registration (or re-registration) of an agent identity
#[derive(Debug, Clone)]
pub struct RegisterAgent {
    pub agent_id: String,
    pub role: String,
    pub branch: Option<String>,
    pub capabilities: Vec<String>,
    pub ttl: Duration,
}

impl RegisterAgent {
    pub fn new(agent_id: impl Into<String>, role: impl Into<String>, ttl: Duration) -> Self {
        Self {
            agent_id: agent_id.into(),
            role: role.into(),
            branch: None,
            capabilities: Vec::new(),
            ttl,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

/// Liveness ping, optionally carrying a status change
#[derive(Debug, Clone, Default)]
pub struct Heartbeat {
    pub agent_id: String,
    pub status: Option<AgentStatus>,
    pub note: Option<String>,
    /// `Some("")` clears the pointer
    pub current_task_id: Option<String>,
    /// Overrides the TTL the agent registered with
    pub ttl: Option<Duration>,
}

impl Heartbeat {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnregisterAck {
    pub agent_id: String,
    pub removed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Claims left in place for the sweeper to reclaim
    pub still_holds_tasks: Vec<String>,
    pub still_holds_files: Vec<String>,
}

/// Longest lease the mesh hands out (ten years)
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

pub(crate) fn ttl_secs(ttl: Duration) -> Result<u64, MeshError> {
    let secs = u64::try_from(ttl.num_seconds())
        .map_err(|_| MeshError::InvalidInput(format!("ttl must not be negative (got {}s)", ttl.num_seconds())))?;
    if secs > MAX_TTL_SECS {
        return Err(MeshError::InvalidInput(format!(
            "ttl of {secs}s exceeds the maximum of {MAX_TTL_SECS}s"
        )));
    }
    Ok(secs)
}

/// Lease length from whole seconds, as taken on the command line
pub fn lease(secs: u64) -> Result<Duration, MeshError> {
    if secs > MAX_TTL_SECS {
        return Err(MeshError::InvalidInput(format!(
            "ttl of {secs}s exceeds the maximum of {MAX_TTL_SECS}s"
        )));
    }
    Ok(Duration::seconds(secs as i64))
}

impl CoordinationDocument {
    /// Create or refresh an agent. Re-registering resets the lease and revives
    /// an expired entry, so agents may use it as a heartbeat.
    pub fn register_agent(&mut self, req: RegisterAgent, now: DateTime<Utc>) -> Result<Agent, MeshError> {
        require_id("agent id", &req.agent_id)?;
        let ttl_secs = ttl_secs(req.ttl)?;
        let lease_expires_at = now + req.ttl;
        let capabilities = req
            .capabilities
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let agent = match self.agents.get_mut(&req.agent_id) {
            Some(existing) => {
                existing.role = req.role;
                existing.branch = req.branch;
                existing.capabilities = capabilities;
                existing.ttl_secs = ttl_secs;
                existing.last_heartbeat_at = now;
                existing.lease_expires_at = lease_expires_at;
                if existing.status == AgentStatus::Expired {
                    existing.status = AgentStatus::Active;
                }
                existing.clone()
            }
            None => {
                let agent = Agent {
                    agent_id: req.agent_id.clone(),
                    role: req.role,
                    branch: req.branch,
                    capabilities,
                    status: AgentStatus::Active,
                    current_task_id: None,
                    note: None,
                    ttl_secs,
                    registered_at: now,
                    last_heartbeat_at: now,
                    lease_expires_at,
                };
                self.agents.insert(agent.agent_id.clone(), agent.clone());
                agent
            }
        };

        self.record(
            now,
            AuditEvent::AgentRegistered,
            Some(agent.agent_id.as_str()),
            agent.agent_id.as_str(),
            format!("role={} ttl={}s", agent.role, agent.ttl_secs),
        );
        info!(agent.id = %agent.agent_id, role = %agent.role, "Agent registered");
        Ok(agent)
    }

    /// Extend a live agent's lease; the lease never moves backward
    pub fn heartbeat_agent(&mut self, req: Heartbeat, now: DateTime<Utc>) -> Result<Agent, MeshError> {
        require_id("agent id", &req.agent_id)?;
        if req.status == Some(AgentStatus::Expired) {
            return Err(MeshError::InvalidInput(
                "agents cannot mark themselves expired; use unregister".to_string(),
            ));
        }
        let pointed_task = req
            .current_task_id
            .as_deref()
            .filter(|task_id| !task_id.trim().is_empty())
            .and_then(|task_id| self.tasks.get(task_id));
        if let Some(task) = pointed_task {
            match task.check_takeover(&req.agent_id, now) {
                Ok(()) | Err(MeshError::Expired { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        let agent = self
            .agents
            .get_mut(&req.agent_id)
            .filter(|agent| !agent.is_expired(now))
            .ok_or_else(|| MeshError::not_found(Entity::Agent, &req.agent_id))?;

        let ttl = match req.ttl {
            Some(ttl) => {
                ttl_secs(ttl)?;
                ttl
            }
            None => lease(agent.ttl_secs)?,
        };
        agent.last_heartbeat_at = now;
        agent.lease_expires_at = agent.lease_expires_at.max(now + ttl);
        if let Some(status) = req.status {
            agent.status = status;
        }
        if let Some(note) = req.note {
            agent.note = Some(note);
        }
        if let Some(task_id) = req.current_task_id {
            agent.current_task_id = if task_id.trim().is_empty() { None } else { Some(task_id) };
        }
        Ok(agent.clone())
    }

    /// Remove an agent entry. Task and file claims it still holds are left for
    /// the sweeper; the acknowledgement lists them.
    pub fn unregister_agent(
        &mut self,
        agent_id: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<UnregisterAck, MeshError> {
        require_id("agent id", agent_id)?;
        let removed = self.agents.remove(agent_id).is_some();
        let still_holds_tasks = self
            .tasks_held_by(agent_id, now)
            .into_iter()
            .map(|task| task.task_id.clone())
            .collect();
        let still_holds_files = self
            .claims_held_by(agent_id, now)
            .into_iter()
            .map(|claim| claim.file.clone())
            .collect();

        if removed {
            self.record(
                now,
                AuditEvent::AgentUnregistered,
                Some(agent_id),
                agent_id,
                reason.clone().unwrap_or_default(),
            );
            info!(agent.id = %agent_id, "Agent unregistered");
        }

        Ok(UnregisterAck {
            agent_id: agent_id.to_string(),
            removed,
            reason,
            still_holds_tasks,
            still_holds_files,
        })
    }
}
