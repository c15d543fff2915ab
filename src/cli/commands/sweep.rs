use super::{Command, Context};
use crate::error::MeshError;
use crate::mesh::SweepReport;

pub struct SweepCommand;

impl Command for SweepCommand {
    type Output = SweepReport;

    async fn execute(&self, ctx: &Context) -> Result<SweepReport, MeshError> {
        ctx.mesh.sweep().await
    }

    fn render(&self, report: &SweepReport) -> String {
        if report.is_empty() {
            return "🧹 Nothing stale to sweep".to_string();
        }
        let mut lines = vec!["🧹 Sweep complete".to_string()];
        let sections = [
            ("💤 Agents expired", &report.agents_expired),
            ("🗑️  Agents purged", &report.agents_removed),
            ("🔓 File claims reclaimed", &report.claims_reclaimed),
            ("🔄 Tasks requeued", &report.tasks_requeued),
        ];
        for (label, items) in sections {
            if !items.is_empty() {
                lines.push(format!("   {label}: {}", items.join(", ")));
            }
        }
        lines.join("\n")
    }
}
