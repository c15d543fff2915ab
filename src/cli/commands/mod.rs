use serde::Serialize;
use std::process::ExitCode;

use crate::cli::Commands;
use crate::config::MeshConfig;
use crate::error::{ErrorKind, MeshError};
use crate::mesh::Mesh;

pub mod advisor;
pub mod agent;
pub mod config;
pub mod files;
pub mod status;
pub mod sweep;
pub mod task;

/// What every command gets to work with
pub struct Context {
    pub mesh: Mesh,
    pub config: MeshConfig,
}

impl Context {
    pub fn new(config: MeshConfig) -> Self {
        Self {
            mesh: Mesh::from_config(&config),
            config,
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait Command {
    type Output: Serialize;

    async fn execute(&self, ctx: &Context) -> Result<Self::Output, MeshError>;

    /// Human-readable rendering for text mode
    fn render(&self, output: &Self::Output) -> String;
}

/// Output mode selected by `--json`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

/// `{"ok":…,"command":…,"data"|"error":…}` written to stdout in JSON mode
#[derive(Debug, Serialize)]
pub struct Envelope<'a, T: Serialize> {
    pub ok: bool,
    pub command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

/// Execute one command and print its result; returns the process exit code
pub async fn run<C: Command>(name: &str, command: &C, ctx: &Context, mode: OutputMode) -> ExitCode {
    match command.execute(ctx).await {
        Ok(output) => match mode {
            OutputMode::Json => {
                print_json(&Envelope {
                    ok: true,
                    command: name,
                    data: Some(output),
                    error: None,
                });
                ExitCode::SUCCESS
            }
            OutputMode::Text => {
                println!("{}", command.render(&output));
                ExitCode::SUCCESS
            }
        },
        Err(err) => report_error(name, &err, mode),
    }
}

pub fn report_error(name: &str, err: &MeshError, mode: OutputMode) -> ExitCode {
    let kind = err.kind();
    tracing::debug!(command = name, ?kind, "Command failed: {err}");
    match mode {
        OutputMode::Json => print_json(&Envelope::<()> {
            ok: false,
            command: name,
            data: None,
            error: Some(ErrorBody {
                kind,
                message: err.to_string(),
                retryable: err.is_retryable(),
            }),
        }),
        OutputMode::Text => {
            eprintln!("❌ {name} failed: {err}");
            if err.is_retryable() {
                eprintln!("   💡 Another agent holds the state lock; retry shortly");
            }
        }
    }
    ExitCode::from(kind.exit_code())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("❌ Failed to render JSON output: {err}"),
    }
}

/// Route a parsed subcommand to its implementation
pub async fn dispatch(command: &Commands, ctx: &Context, mode: OutputMode) -> ExitCode {
    let name = command.name();
    match command {
        Commands::Register {
            agent: agent_id,
            role,
            branch,
            capabilities,
            ttl,
        } => {
            let cmd = agent::RegisterCommand {
                agent_id: agent_id.clone(),
                role: role.clone(),
                branch: branch.clone(),
                capabilities: capabilities.clone(),
                ttl_secs: *ttl,
            };
            run(name, &cmd, ctx, mode).await
        }
        Commands::Unregister { agent: agent_id, reason } => {
            let cmd = agent::UnregisterCommand {
                agent_id: agent_id.clone(),
                reason: reason.clone(),
            };
            run(name, &cmd, ctx, mode).await
        }
        Commands::Heartbeat {
            agent: agent_id,
            status,
            note,
            task_id,
            ttl,
        } => {
            let cmd = agent::HeartbeatCommand {
                agent_id: agent_id.clone(),
                status: status.map(Into::into),
                note: note.clone(),
                task_id: task_id.clone(),
                ttl_secs: *ttl,
            };
            run(name, &cmd, ctx, mode).await
        }
        Commands::AddTask {
            task_id,
            title,
            description,
            priority,
            files,
            tags,
            created_by,
        } => {
            let cmd = task::AddTaskCommand {
                task_id: task_id.clone(),
                title: title.clone(),
                description: description.clone(),
                priority: *priority,
                files: files.clone(),
                tags: tags.clone(),
                created_by: created_by.clone(),
            };
            run(name, &cmd, ctx, mode).await
        }
        Commands::ClaimTask {
            agent: agent_id,
            task_id,
            ttl,
        } => {
            let cmd = task::ClaimTaskCommand {
                agent_id: agent_id.clone(),
                task_id: task_id.clone(),
                ttl_secs: *ttl,
            };
            run(name, &cmd, ctx, mode).await
        }
        Commands::ReleaseTask {
            agent: agent_id,
            task_id,
            outcome,
            note,
        } => {
            let cmd = task::ReleaseTaskCommand {
                agent_id: agent_id.clone(),
                task_id: task_id.clone(),
                outcome: (*outcome).into(),
                note: note.clone(),
            };
            run(name, &cmd, ctx, mode).await
        }
        Commands::ClaimFiles {
            agent: agent_id,
            files: paths,
            task_id,
            ttl,
            force,
        } => {
            let cmd = files::ClaimFilesCommand {
                agent_id: agent_id.clone(),
                files: paths.clone(),
                task_id: task_id.clone(),
                ttl_secs: *ttl,
                force: *force,
            };
            run(name, &cmd, ctx, mode).await
        }
        Commands::ReleaseFiles {
            agent: agent_id,
            files: paths,
            reason,
        } => {
            let cmd = files::ReleaseFilesCommand {
                agent_id: agent_id.clone(),
                files: paths.clone(),
                reason: reason.clone(),
            };
            run(name, &cmd, ctx, mode).await
        }
        Commands::Sweep => run(name, &sweep::SweepCommand, ctx, mode).await,
        Commands::Status => run(name, &status::StatusCommand, ctx, mode).await,
        Commands::Show => run(name, &status::ShowCommand, ctx, mode).await,
        Commands::Recommend { agent: agent_id } => {
            let cmd = advisor::RecommendCommand {
                agent_id: agent_id.clone(),
            };
            run(name, &cmd, ctx, mode).await
        }
        Commands::Assignments { max } => run(name, &advisor::AssignmentsCommand { max: *max }, ctx, mode).await,
        Commands::Guide { agent: agent_id } => {
            let cmd = advisor::GuideCommand {
                agent_id: agent_id.clone(),
            };
            run(name, &cmd, ctx, mode).await
        }
        Commands::Config => run(name, &config::ConfigCommand, ctx, mode).await,
    }
}
