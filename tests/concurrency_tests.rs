//! Many writers, one state file
//!
//! Each writer builds its own `Mesh`, so every transaction opens its own lock
//! descriptor exactly as separate agent processes would.

use agent_mesh::{ClaimFiles, Mesh, MeshError, NewTask, RegisterAgent, StateStore};
use chrono::Duration;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

const WRITERS: usize = 16;

fn writer(path: &Path) -> Mesh {
    Mesh::new(path).with_store(StateStore::new(path).with_lock_timeout(std::time::Duration::from_secs(30)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_lose_no_updates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let path = path.clone();
            tokio::spawn(async move {
                let mesh = writer(&path);
                mesh.register(RegisterAgent::new(format!("agent-{i}"), "coder", Duration::seconds(300)))
                    .await
                    .unwrap();
                mesh.add_task(NewTask::new(format!("task-{i}"), "Parallel").with_priority(i as i64))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let doc = writer(&path).export_state().await.unwrap();
    assert_eq!(doc.agents.len(), WRITERS);
    assert_eq!(doc.tasks.len(), WRITERS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_claims_have_exactly_one_winner() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    writer(&path).add_task(NewTask::new("t1", "Contended")).await.unwrap();

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let path = path.clone();
            tokio::spawn(async move {
                let agent_id = format!("agent-{i}");
                let result = writer(&path).claim_task(&agent_id, "t1", Duration::seconds(300)).await;
                (agent_id, result)
            })
        })
        .collect();

    let mut winners = Vec::new();
    for handle in handles {
        let (agent_id, result) = handle.await.unwrap();
        match result {
            Ok(_) => winners.push(agent_id),
            Err(MeshError::Conflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners.len(), 1);

    let doc = writer(&path).export_state().await.unwrap();
    assert_eq!(doc.tasks["t1"].claimed_by.as_deref(), Some(winners[0].as_str()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_file_batches_leave_one_owner_per_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    let files = ["src/a.rs", "src/b.rs", "src/c.rs"];

    // overlapping pairs: agent-i wants files i and i+1 (mod 3)
    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let path = path.clone();
            tokio::spawn(async move {
                let agent_id = format!("agent-{i}");
                let wanted = [files[i % 3], files[(i + 1) % 3]];
                let req = ClaimFiles::new(agent_id.clone(), wanted, Duration::seconds(300));
                (agent_id, writer(&path).claim_files(req).await)
            })
        })
        .collect();

    let mut granted = BTreeMap::new();
    for handle in handles {
        let (agent_id, outcome) = handle.await.unwrap();
        let outcome = outcome.unwrap();
        assert_eq!(outcome.claimed.len() + outcome.conflicts.len(), 2, "{outcome:?}");
        for claim in outcome.claimed {
            let previous = granted.insert(claim.file.clone(), agent_id.clone());
            assert!(previous.is_none(), "{} granted twice", claim.file);
        }
    }
    assert_eq!(granted.len(), 3);

    let doc = writer(&path).export_state().await.unwrap();
    assert_eq!(doc.claims.len(), 3);
    for (file, claim) in &doc.claims {
        assert_eq!(granted.get(file), Some(&claim.agent_id));
    }
}

#[test]
fn test_separate_processes_race_for_one_task() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state.json");
    let bin: PathBuf = assert_cmd::cargo::cargo_bin("agent-mesh");

    let status = Command::new(&bin)
        .current_dir(dir.path())
        .arg("--state")
        .arg(&state)
        .args(["add-task", "--task-id", "t1", "--title", "Contended"])
        .status()
        .unwrap();
    assert!(status.success());

    let children: Vec<_> = (0..8)
        .map(|i| {
            Command::new(&bin)
                .current_dir(dir.path())
                .arg("--state")
                .arg(&state)
                .args(["--lock-timeout-ms", "30000", "claim-task", "--task-id", "t1", "--agent"])
                .arg(format!("agent-{i}"))
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .unwrap()
        })
        .collect();

    let codes: Vec<i32> = children
        .into_iter()
        .map(|mut child| child.wait().unwrap().code().unwrap_or(-1))
        .collect();
    assert_eq!(codes.iter().filter(|&&code| code == 0).count(), 1, "{codes:?}");
    assert_eq!(codes.iter().filter(|&&code| code == 4).count(), 7, "{codes:?}");
}
