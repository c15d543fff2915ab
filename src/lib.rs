// agent-mesh library - coordination of concurrent agent processes
// This exposes the core components for the binary, tests and embedding

pub mod cli;
pub mod config;
pub mod error;
pub mod fs;
pub mod mesh;
pub mod telemetry;

// Re-export key types for easy access
pub use config::{LogFormat, MeshConfig, ObservabilityConfig};
pub use error::{Entity, ErrorKind, MeshError};
pub use mesh::{
    AffinityScorer, Agent, AgentStatus, ClaimFiles, Clock, CoordinationDocument, FileClaim, Heartbeat, ManualClock,
    Mesh, MeshSettings, NewTask, RegisterAgent, StateStore, SystemClock, Task, TaskOutcome, TaskStatus,
};
pub use telemetry::{create_mesh_span, generate_correlation_id, init_telemetry};
