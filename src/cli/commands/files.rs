use super::{Command, Context};
use crate::error::MeshError;
use crate::mesh::{lease, ClaimFiles, ClaimFilesOutcome, ReleaseFilesOutcome, SkipReason};

pub struct ClaimFilesCommand {
    pub agent_id: String,
    pub files: Vec<String>,
    pub task_id: Option<String>,
    pub ttl_secs: Option<u64>,
    pub force: bool,
}

impl Command for ClaimFilesCommand {
    type Output = ClaimFilesOutcome;

    async fn execute(&self, ctx: &Context) -> Result<ClaimFilesOutcome, MeshError> {
        let ttl = lease(self.ttl_secs.unwrap_or(ctx.config.default_file_ttl_secs))?;
        let mut req = ClaimFiles::new(&self.agent_id, &self.files, ttl);
        req.task_id = self.task_id.clone();
        req.force = self.force;
        ctx.mesh.claim_files(req).await
    }

    fn render(&self, outcome: &ClaimFilesOutcome) -> String {
        let mut lines = Vec::new();
        for claim in &outcome.claimed {
            lines.push(format!("🔒 {} → {}", claim.file, claim.agent_id));
        }
        for forced in &outcome.forced {
            lines.push(format!("⚡ {} forcibly taken from {}", forced.file, forced.held_by));
        }
        for file in &outcome.reclaimed {
            lines.push(format!("♻️  {file} had an expired claim and was reclaimed"));
        }
        for conflict in &outcome.conflicts {
            lines.push(format!(
                "❌ {} held by {} until {} (use --force to override)",
                conflict.file,
                conflict.held_by,
                conflict.expires_at.format("%H:%M:%S UTC")
            ));
        }
        for rejected in &outcome.rejected {
            lines.push(format!("⚠️  '{}' rejected: {}", rejected.file, rejected.reason));
        }
        if lines.is_empty() {
            lines.push("ℹ️  No files requested".to_string());
        }
        lines.join("\n")
    }
}

pub struct ReleaseFilesCommand {
    pub agent_id: String,
    pub files: Vec<String>,
    pub reason: Option<String>,
}

impl Command for ReleaseFilesCommand {
    type Output = ReleaseFilesOutcome;

    async fn execute(&self, ctx: &Context) -> Result<ReleaseFilesOutcome, MeshError> {
        ctx.mesh
            .release_files(&self.agent_id, &self.files, self.reason.as_deref())
            .await
    }

    fn render(&self, outcome: &ReleaseFilesOutcome) -> String {
        let mut lines: Vec<String> = outcome.released.iter().map(|file| format!("🔓 {file}")).collect();
        for skipped in &outcome.skipped {
            let why = match (skipped.reason, skipped.held_by.as_deref()) {
                (SkipReason::OwnedByOther, Some(holder)) => format!("held by {holder}"),
                (SkipReason::OwnedByOther, None) => "held by another agent".to_string(),
                (SkipReason::NotClaimed, _) => "not claimed".to_string(),
                (SkipReason::InvalidPath, _) => "invalid path".to_string(),
            };
            lines.push(format!("⏭️  {} skipped ({why})", skipped.file));
        }
        lines.join("\n")
    }
}
