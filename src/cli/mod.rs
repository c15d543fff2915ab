use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::MeshConfig;
use crate::mesh::{AgentStatus, TaskOutcome};

pub mod commands;

#[derive(Parser, Debug)]
#[command(name = "agent-mesh", version)]
#[command(about = "Coordinate concurrent agent processes through a shared, locked state file")]
#[command(long_about = "agent-mesh keeps a registry of agents, tasks and file claims in one JSON document. \
                       Every command is a short transaction under an OS file lock, so independent agent \
                       processes can claim work without stepping on each other. Start with \
                       'agent-mesh register' and 'agent-mesh guide'.")]
pub struct Cli {
    /// Emit a JSON envelope on stdout instead of text
    #[arg(long, global = true, help = "Machine-readable JSON output")]
    pub json: bool,
    /// Coordination document location
    #[arg(long, global = true, value_name = "PATH", help = "Path of the coordination state file")]
    pub state: Option<PathBuf>,
    /// Configuration file
    #[arg(long, global = true, value_name = "FILE", help = "Configuration file (default: ./agent-mesh.toml)")]
    pub config: Option<PathBuf>,
    /// Lock acquisition bound
    #[arg(long, global = true, value_name = "MS", help = "Give up waiting for the state lock after this many milliseconds")]
    pub lock_timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Global flags win over file and environment configuration
    pub fn apply_overrides(&self, config: &mut MeshConfig) {
        if let Some(state) = &self.state {
            config.state_path = state.clone();
        }
        if let Some(timeout) = self.lock_timeout_ms {
            config.lock_timeout_ms = timeout;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register an agent, or refresh an existing registration
    Register {
        #[arg(long, help = "Stable agent identifier")]
        agent: String,
        #[arg(long, help = "Free-form role label, e.g. coder or reviewer")]
        role: String,
        #[arg(long, help = "Branch the agent works on")]
        branch: Option<String>,
        #[arg(long = "capability", value_name = "CAPABILITY", help = "Declared capability (repeatable)")]
        capabilities: Vec<String>,
        #[arg(long, value_name = "SECS", help = "Lease length in seconds")]
        ttl: Option<u64>,
    },
    /// Remove an agent; its claims stay until they expire
    Unregister {
        #[arg(long, help = "Agent identifier")]
        agent: String,
        #[arg(long, help = "Why the agent is leaving")]
        reason: Option<String>,
    },
    /// Extend an agent's lease
    Heartbeat {
        #[arg(long, help = "Agent identifier")]
        agent: String,
        #[arg(long, value_enum, help = "Report a new status")]
        status: Option<HeartbeatStatus>,
        #[arg(long, help = "Free-form progress note")]
        note: Option<String>,
        #[arg(long = "task-id", help = "Task the agent is working on (empty string clears it)")]
        task_id: Option<String>,
        #[arg(long, value_name = "SECS", help = "Lease length in seconds (default: the registered TTL)")]
        ttl: Option<u64>,
    },
    /// Create a task, or update an existing one
    AddTask {
        #[arg(long = "task-id", help = "Unique task identifier")]
        task_id: String,
        #[arg(long, help = "Short title")]
        title: String,
        #[arg(long, default_value = "", help = "Longer description")]
        description: String,
        #[arg(long, default_value = "0", allow_negative_numbers = true, help = "Higher numbers are more urgent")]
        priority: i64,
        #[arg(long = "file", value_name = "PATH", help = "File the task touches (repeatable)")]
        files: Vec<String>,
        #[arg(long = "tag", value_name = "TAG", help = "Tag (repeatable)")]
        tags: Vec<String>,
        #[arg(long = "created-by", value_name = "AGENT", help = "Agent that created the task")]
        created_by: Option<String>,
    },
    /// Claim a queued task (or one whose claim expired)
    ClaimTask {
        #[arg(long, help = "Agent identifier")]
        agent: String,
        #[arg(long = "task-id", help = "Task identifier")]
        task_id: String,
        #[arg(long, value_name = "SECS", help = "Claim length in seconds")]
        ttl: Option<u64>,
    },
    /// Hand a claimed task back with an outcome
    ReleaseTask {
        #[arg(long, help = "Agent identifier")]
        agent: String,
        #[arg(long = "task-id", help = "Task identifier")]
        task_id: String,
        #[arg(long, value_enum, default_value = "completed", help = "Resulting task status")]
        outcome: Outcome,
        #[arg(long, help = "Note stored on the task")]
        note: Option<String>,
    },
    /// Claim exclusive ownership of files
    ClaimFiles {
        #[arg(long, help = "Agent identifier")]
        agent: String,
        #[arg(long = "file", value_name = "PATH", required = true, help = "File to claim (repeatable)")]
        files: Vec<String>,
        #[arg(long = "task-id", help = "Task the claim belongs to")]
        task_id: Option<String>,
        #[arg(long, value_name = "SECS", help = "Claim length in seconds")]
        ttl: Option<u64>,
        #[arg(long, help = "Take files over even when another agent holds them")]
        force: bool,
    },
    /// Release files the agent holds
    ReleaseFiles {
        #[arg(long, help = "Agent identifier")]
        agent: String,
        #[arg(long = "file", value_name = "PATH", required = true, help = "File to release (repeatable)")]
        files: Vec<String>,
        #[arg(long, help = "Why the files are released")]
        reason: Option<String>,
    },
    /// Expire agents, reclaim file claims and requeue timed-out tasks
    Sweep,
    /// Display agents, tasks and claims
    Status,
    /// Print the full coordination document
    Show,
    /// Preview the next task for an agent without claiming it
    Recommend {
        #[arg(long, help = "Agent identifier")]
        agent: String,
    },
    /// Dry-run pairing of available agents with queued tasks
    Assignments {
        #[arg(long, default_value = "5", help = "Consider at most this many tasks")]
        max: usize,
    },
    /// Briefing for one agent: holdings, lease and suggested next commands
    Guide {
        #[arg(long, help = "Agent identifier")]
        agent: String,
    },
    /// Print the effective configuration
    Config,
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Register { .. } => "register",
            Commands::Unregister { .. } => "unregister",
            Commands::Heartbeat { .. } => "heartbeat",
            Commands::AddTask { .. } => "add-task",
            Commands::ClaimTask { .. } => "claim-task",
            Commands::ReleaseTask { .. } => "release-task",
            Commands::ClaimFiles { .. } => "claim-files",
            Commands::ReleaseFiles { .. } => "release-files",
            Commands::Sweep => "sweep",
            Commands::Status => "status",
            Commands::Show => "show",
            Commands::Recommend { .. } => "recommend",
            Commands::Assignments { .. } => "assignments",
            Commands::Guide { .. } => "guide",
            Commands::Config => "config",
        }
    }
}

/// Statuses an agent may report about itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HeartbeatStatus {
    Active,
    Idle,
    Busy,
}

impl From<HeartbeatStatus> for AgentStatus {
    fn from(status: HeartbeatStatus) -> Self {
        match status {
            HeartbeatStatus::Active => AgentStatus::Active,
            HeartbeatStatus::Idle => AgentStatus::Idle,
            HeartbeatStatus::Busy => AgentStatus::Busy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Outcome {
    Completed,
    Failed,
    Abandoned,
    Queued,
}

impl From<Outcome> for TaskOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Completed => TaskOutcome::Completed,
            Outcome::Failed => TaskOutcome::Failed,
            Outcome::Abandoned => TaskOutcome::Abandoned,
            Outcome::Queued => TaskOutcome::Queued,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_override_config() {
        let cli = Cli::parse_from([
            "agent-mesh",
            "status",
            "--state",
            "/tmp/mesh.json",
            "--lock-timeout-ms",
            "100",
        ]);
        let mut config = MeshConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.state_path, PathBuf::from("/tmp/mesh.json"));
        assert_eq!(config.lock_timeout_ms, 100);
        assert_eq!(cli.command.name(), "status");
    }

    #[test]
    fn test_repeatable_flags() {
        let cli = Cli::parse_from([
            "agent-mesh",
            "claim-files",
            "--agent",
            "a1",
            "--file",
            "x.py",
            "--file",
            "y.py",
            "--force",
        ]);
        match cli.command {
            Commands::ClaimFiles { files, force, .. } => {
                assert_eq!(files, vec!["x.py", "y.py"]);
                assert!(force);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
