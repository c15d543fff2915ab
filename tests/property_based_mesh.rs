// Property-Based Testing for the coordination mesh
// Drives random operation sequences through the document and checks ownership
// invariants, sweep idempotence and lossless serialization after every step.

use agent_mesh::mesh::{Heartbeat, SweepReport};
use agent_mesh::{ClaimFiles, CoordinationDocument, MeshError, NewTask, RegisterAgent, TaskOutcome, TaskStatus};
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

const AGENTS: [&str; 3] = ["agent001", "agent002", "agent003"];
const TASKS: [&str; 4] = ["t1", "t2", "t3", "t4"];
const FILES: [&str; 4] = ["src/lib.rs", "src/main.rs", "README.md", "docs/guide.md"];

#[derive(Debug, Clone)]
enum Op {
    Register { agent: usize, ttl: i64 },
    Heartbeat { agent: usize, ttl: Option<i64> },
    Unregister { agent: usize },
    AddTask { task: usize, priority: i64 },
    ClaimTask { agent: usize, task: usize, ttl: i64 },
    ReleaseTask { agent: usize, task: usize, outcome: usize },
    ClaimFiles { agent: usize, files: Vec<usize>, force: bool, ttl: i64 },
    ReleaseFiles { agent: usize, files: Vec<usize> },
    Sweep,
    Advance { secs: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let agent = 0..AGENTS.len();
    let task = 0..TASKS.len();
    let files = prop::collection::vec(0..FILES.len(), 1..4);
    prop_oneof![
        (agent.clone(), 0i64..120).prop_map(|(agent, ttl)| Op::Register { agent, ttl }),
        (agent.clone(), prop::option::of(0i64..120)).prop_map(|(agent, ttl)| Op::Heartbeat { agent, ttl }),
        agent.clone().prop_map(|agent| Op::Unregister { agent }),
        (task.clone(), -5i64..10).prop_map(|(task, priority)| Op::AddTask { task, priority }),
        (agent.clone(), task.clone(), 0i64..120).prop_map(|(agent, task, ttl)| Op::ClaimTask { agent, task, ttl }),
        (agent.clone(), task, 0..4usize).prop_map(|(agent, task, outcome)| Op::ReleaseTask {
            agent,
            task,
            outcome
        }),
        (agent.clone(), files.clone(), any::<bool>(), 0i64..120).prop_map(|(agent, files, force, ttl)| {
            Op::ClaimFiles {
                agent,
                files,
                force,
                ttl,
            }
        }),
        (agent, files).prop_map(|(agent, files)| Op::ReleaseFiles { agent, files }),
        Just(Op::Sweep),
        (1i64..90).prop_map(|secs| Op::Advance { secs }),
    ]
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
}

const OUTCOMES: [TaskOutcome; 4] = [
    TaskOutcome::Completed,
    TaskOutcome::Failed,
    TaskOutcome::Abandoned,
    TaskOutcome::Queued,
];

/// Apply one operation transactionally: a failed operation leaves `doc` as it was
fn apply(doc: &mut CoordinationDocument, op: &Op, now: DateTime<Utc>) -> Result<(), MeshError> {
    let mut next = doc.clone();
    match op {
        Op::Register { agent, ttl } => {
            next.register_agent(RegisterAgent::new(AGENTS[*agent], "coder", Duration::seconds(*ttl)), now)?;
        }
        Op::Heartbeat { agent, ttl } => {
            let mut beat = Heartbeat::new(AGENTS[*agent]);
            beat.ttl = ttl.map(Duration::seconds);
            next.heartbeat_agent(beat, now)?;
        }
        Op::Unregister { agent } => {
            next.unregister_agent(AGENTS[*agent], None, now)?;
        }
        Op::AddTask { task, priority } => {
            next.add_task(NewTask::new(TASKS[*task], "generated").with_priority(*priority), now)?;
        }
        Op::ClaimTask { agent, task, ttl } => {
            next.claim_task(AGENTS[*agent], TASKS[*task], Duration::seconds(*ttl), now)?;
        }
        Op::ReleaseTask { agent, task, outcome } => {
            next.release_task(AGENTS[*agent], TASKS[*task], OUTCOMES[*outcome], None, now)?;
        }
        Op::ClaimFiles {
            agent,
            files,
            force,
            ttl,
        } => {
            let mut req = ClaimFiles::new(
                AGENTS[*agent],
                files.iter().map(|i| FILES[*i]),
                Duration::seconds(*ttl),
            );
            req.force = *force;
            next.claim_files(req, now)?;
        }
        Op::ReleaseFiles { agent, files } => {
            let files: Vec<String> = files.iter().map(|i| FILES[*i].to_string()).collect();
            next.release_files(AGENTS[*agent], &files, None)?;
        }
        Op::Sweep => {
            next.sweep_stale(now, Some(Duration::seconds(600)));
        }
        Op::Advance { .. } => {}
    }
    *doc = next;
    Ok(())
}

fn check_invariants(doc: &CoordinationDocument, now: DateTime<Utc>) {
    for (task_id, task) in &doc.tasks {
        assert_eq!(&task.task_id, task_id);
        let in_progress = task.status == TaskStatus::InProgress;
        assert_eq!(task.claimed_by.is_some(), in_progress, "task {task_id}: {task:?}");
        assert_eq!(task.claim_expires_at.is_some(), in_progress, "task {task_id}: {task:?}");
    }
    for (file, claim) in &doc.claims {
        assert_eq!(&claim.file, file);
    }
    for agent in doc.agents.values() {
        if let Some(task_id) = &agent.current_task_id {
            // a back-reference may go stale, but never points at a task held by someone else live
            if let Some(task) = doc.tasks.get(task_id) {
                if let Some(holder) = task.live_holder(now) {
                    assert_eq!(holder, agent.agent_id, "agent {} points at {task_id}", agent.agent_id);
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn prop_ownership_invariants_hold(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut doc = CoordinationDocument::default();
        let mut now = start();

        for op in &ops {
            if let Op::Advance { secs } = op {
                now += Duration::seconds(*secs);
                continue;
            }
            let before = doc.clone();
            let result = apply(&mut doc, op, now);

            match op {
                Op::ClaimTask { agent, task, .. } => {
                    let live_other = before
                        .tasks
                        .get(TASKS[*task])
                        .and_then(|t| t.live_holder(now))
                        .filter(|holder| *holder != AGENTS[*agent]);
                    if live_other.is_some() {
                        prop_assert!(
                            matches!(result, Err(MeshError::Conflict { .. })),
                            "expected a conflict, got {:?}",
                            result
                        );
                    }
                    if result.is_ok() {
                        prop_assert_eq!(doc.tasks[TASKS[*task]].claimed_by.as_deref(), Some(AGENTS[*agent]));
                    }
                }
                Op::ClaimFiles { agent, files, force: false, .. } => {
                    for i in files {
                        if let Some(prev) = before.claims.get(FILES[*i]) {
                            if !prev.is_expired(now) && prev.agent_id != AGENTS[*agent] {
                                prop_assert_eq!(&doc.claims[FILES[*i]].agent_id, &prev.agent_id);
                            }
                        }
                    }
                }
                Op::Heartbeat { agent, .. } if result.is_ok() => {
                    let old = before.agents[AGENTS[*agent]].lease_expires_at;
                    prop_assert!(doc.agents[AGENTS[*agent]].lease_expires_at >= old);
                }
                _ => {}
            }
            if result.is_err() {
                prop_assert_eq!(&doc, &before);
            }
            check_invariants(&doc, now);
        }
    }

    #[test]
    fn prop_sweep_is_idempotent(ops in prop::collection::vec(op_strategy(), 1..40), later in 0i64..600) {
        let mut doc = CoordinationDocument::default();
        let mut now = start();
        for op in &ops {
            if let Op::Advance { secs } = op {
                now += Duration::seconds(*secs);
            } else {
                let _ = apply(&mut doc, op, now);
            }
        }

        let at = now + Duration::seconds(later);
        doc.sweep_stale(at, Some(Duration::seconds(300)));
        let snapshot = doc.clone();
        let second: SweepReport = doc.sweep_stale(at, Some(Duration::seconds(300)));
        prop_assert!(second.is_empty(), "second sweep changed {:?}", second);
        prop_assert_eq!(&doc, &snapshot);

        for task in doc.tasks.values() {
            if task.status == TaskStatus::InProgress {
                prop_assert!(!task.claim_is_expired(at));
            }
        }
        prop_assert!(doc.claims.values().all(|claim| !claim.is_expired(at)));
    }

    #[test]
    fn prop_document_round_trips_losslessly(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut doc = CoordinationDocument::default();
        let mut now = start();
        for op in &ops {
            if let Op::Advance { secs } = op {
                now += Duration::seconds(*secs);
            } else {
                let _ = apply(&mut doc, op, now);
            }
        }
        doc.updated_at = Some(now);

        let json = serde_json::to_string_pretty(&doc).unwrap();
        let loaded: CoordinationDocument = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(&loaded, &doc);
        prop_assert_eq!(serde_json::to_string_pretty(&loaded).unwrap(), json);
    }
}
