//! The coordination mesh: agents, tasks and file claims shared by independent
//! processes through one locked document.
//!
//! Every public operation on [`Mesh`] is a single transaction against the
//! [`StateStore`]: lock, load, validate, mutate, persist, unlock. Mutating
//! operations take the exclusive lock and (unless disabled) sweep stale leases
//! first; read operations take the shared lock and never write.

pub mod advisor;
pub mod agents;
pub mod document;
pub mod files;
pub mod status;
pub mod store;
pub mod sweeper;
pub mod tasks;

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, Instrument};

pub use advisor::{
    AffinityScorer, AssignmentAdvisor, AssignmentSuggestion, BlockedFile, CapabilityAffinity, Recommendation,
};
pub use agents::{lease, Heartbeat, RegisterAgent, UnregisterAck, MAX_TTL_SECS};
pub use document::{
    Agent, AgentStatus, AuditEntry, AuditEvent, CoordinationDocument, FileClaim, Task, TaskNote, TaskOutcome,
    TaskStatus, DOCUMENT_VERSION,
};
pub use files::{
    normalize_path, ClaimFiles, ClaimFilesOutcome, FileConflict, RejectedPath, ReleaseFilesOutcome, SkipReason,
    SkippedRelease,
};
pub use status::{AgentGuide, StatusReport};
pub use store::StateStore;
pub use sweeper::SweepReport;
pub use tasks::NewTask;

use crate::config::MeshConfig;
use crate::error::MeshError;
use crate::telemetry::{create_mesh_span, generate_correlation_id};

/// Source of "now" for lease arithmetic
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Behavior knobs that apply to every transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshSettings {
    pub auto_sweep: bool,
    pub audit_log_limit: usize,
    /// `None` keeps expired agents forever
    pub expired_agent_retention: Option<Duration>,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            auto_sweep: true,
            audit_log_limit: 500,
            expired_agent_retention: Some(Duration::days(1)),
        }
    }
}

pub struct Mesh {
    store: StateStore,
    clock: Arc<dyn Clock>,
    scorer: Arc<dyn AffinityScorer>,
    settings: MeshSettings,
}

impl fmt::Debug for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mesh")
            .field("store", &self.store)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Mesh {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            store: StateStore::new(state_path),
            clock: Arc::new(SystemClock),
            scorer: Arc::new(CapabilityAffinity),
            settings: MeshSettings::default(),
        }
    }

    pub fn from_config(config: &MeshConfig) -> Self {
        let store = StateStore::new(&config.state_path)
            .with_lock_timeout(std::time::Duration::from_millis(config.lock_timeout_ms))
            .with_retry_interval(std::time::Duration::from_millis(config.lock_retry_interval_ms.max(1)));
        let retention = Duration::seconds(config.expired_agent_retention_secs.min(MAX_TTL_SECS) as i64);
        Self::new(&config.state_path).with_store(store).with_settings(MeshSettings {
            auto_sweep: config.auto_sweep,
            audit_log_limit: config.audit_log_limit,
            expired_agent_retention: Some(retention),
        })
    }

    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn AffinityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_settings(mut self, settings: MeshSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// One exclusive transaction: optional sweep, the operation, bookkeeping
    async fn mutate<T, F>(&self, operation: &'static str, agent_id: Option<&str>, f: F) -> Result<T, MeshError>
    where
        F: FnOnce(&mut CoordinationDocument, DateTime<Utc>) -> Result<T, MeshError>,
    {
        let correlation_id = generate_correlation_id();
        let span = create_mesh_span(operation, agent_id, &correlation_id);
        let settings = &self.settings;
        let clock = &self.clock;
        self.store
            .write(move |doc| {
                let now = clock.now();
                let before = doc.clone();
                if settings.auto_sweep {
                    doc.sweep_stale(now, settings.expired_agent_retention);
                }
                let result = f(doc, now)?;
                if *doc != before {
                    doc.trim_audit(settings.audit_log_limit);
                    doc.updated_at = Some(now);
                } else {
                    debug!("No changes to persist");
                }
                Ok(result)
            })
            .instrument(span)
            .await
    }

    async fn inspect<T, F>(&self, operation: &'static str, agent_id: Option<&str>, f: F) -> Result<T, MeshError>
    where
        F: FnOnce(&CoordinationDocument, DateTime<Utc>) -> Result<T, MeshError>,
    {
        let correlation_id = generate_correlation_id();
        let span = create_mesh_span(operation, agent_id, &correlation_id);
        let clock = &self.clock;
        self.store
            .read(move |doc| f(doc, clock.now()))
            .instrument(span)
            .await
    }

    pub async fn register(&self, req: RegisterAgent) -> Result<Agent, MeshError> {
        let agent_id = req.agent_id.clone();
        self.mutate("register", Some(&agent_id), |doc, now| doc.register_agent(req, now))
            .await
    }

    pub async fn heartbeat(&self, req: Heartbeat) -> Result<Agent, MeshError> {
        let agent_id = req.agent_id.clone();
        self.mutate("heartbeat", Some(&agent_id), |doc, now| doc.heartbeat_agent(req, now))
            .await
    }

    pub async fn unregister(&self, agent_id: &str, reason: Option<String>) -> Result<UnregisterAck, MeshError> {
        self.mutate("unregister", Some(agent_id), |doc, now| {
            doc.unregister_agent(agent_id, reason, now)
        })
        .await
    }

    pub async fn add_task(&self, new: NewTask) -> Result<Task, MeshError> {
        let created_by = new.created_by.clone();
        self.mutate("add_task", created_by.as_deref(), |doc, now| doc.add_task(new, now))
            .await
    }

    pub async fn claim_task(&self, agent_id: &str, task_id: &str, ttl: Duration) -> Result<Task, MeshError> {
        self.mutate("claim_task", Some(agent_id), |doc, now| {
            doc.claim_task(agent_id, task_id, ttl, now)
        })
        .await
    }

    pub async fn release_task(
        &self,
        agent_id: &str,
        task_id: &str,
        outcome: TaskOutcome,
        note: Option<String>,
    ) -> Result<Task, MeshError> {
        self.mutate("release_task", Some(agent_id), |doc, now| {
            doc.release_task(agent_id, task_id, outcome, note, now)
        })
        .await
    }

    pub async fn claim_files(&self, req: ClaimFiles) -> Result<ClaimFilesOutcome, MeshError> {
        let agent_id = req.agent_id.clone();
        self.mutate("claim_files", Some(&agent_id), |doc, now| doc.claim_files(req, now))
            .await
    }

    pub async fn release_files(
        &self,
        agent_id: &str,
        files: &[String],
        reason: Option<&str>,
    ) -> Result<ReleaseFilesOutcome, MeshError> {
        self.mutate("release_files", Some(agent_id), |doc, _now| {
            doc.release_files(agent_id, files, reason)
        })
        .await
    }

    /// Explicit sweep; runs even when auto-sweep is off
    pub async fn sweep(&self) -> Result<SweepReport, MeshError> {
        let retention = self.settings.expired_agent_retention;
        let limit = self.settings.audit_log_limit;
        let clock = &self.clock;
        let span = create_mesh_span("sweep", None, &generate_correlation_id());
        self.store
            .write(move |doc| {
                let now = clock.now();
                let report = doc.sweep_stale(now, retention);
                if !report.is_empty() {
                    doc.trim_audit(limit);
                    doc.updated_at = Some(now);
                }
                Ok(report)
            })
            .instrument(span)
            .await
    }

    pub async fn status(&self) -> Result<StatusReport, MeshError> {
        self.inspect("status", None, |doc, now| Ok(status::status_report(doc, now)))
            .await
    }

    /// Full snapshot of the persisted document
    pub async fn export_state(&self) -> Result<CoordinationDocument, MeshError> {
        self.inspect("show", None, |doc, _now| Ok(doc.clone())).await
    }

    pub async fn recommend(&self, agent_id: &str) -> Result<Option<Recommendation>, MeshError> {
        let scorer = self.scorer.as_ref();
        self.inspect("recommend", Some(agent_id), |doc, now| {
            Ok(AssignmentAdvisor::new(doc, scorer, now).recommend(agent_id))
        })
        .await
    }

    pub async fn suggest_assignments(&self, max: usize) -> Result<Vec<AssignmentSuggestion>, MeshError> {
        let scorer = self.scorer.as_ref();
        self.inspect("assignments", None, |doc, now| {
            Ok(AssignmentAdvisor::new(doc, scorer, now).suggest(max))
        })
        .await
    }

    pub async fn guide(&self, agent_id: &str) -> Result<AgentGuide, MeshError> {
        let scorer = self.scorer.as_ref();
        self.inspect("guide", Some(agent_id), |doc, now| {
            let recommendation = AssignmentAdvisor::new(doc, scorer, now).recommend(agent_id);
            Ok(status::agent_guide(doc, agent_id, recommendation, now))
        })
        .await
    }
}
