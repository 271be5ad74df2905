//! TaskBoard scenarios across independent file-backed instances, the way
//! separate agent processes see the board.

use std::time::Duration;

use agentpool::{PoolError, TaskBoard, TaskStatus};

fn sleep_ms(ms: u64) {
    std::thread::sleep(Duration::from_millis(ms));
}

#[test]
fn test_priority_ordering_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let board = TaskBoard::at_dir(dir.path()).unwrap();

    let a = board.add("a", &[], 1).unwrap();
    sleep_ms(2);
    let b = board.add("b", &[], 5).unwrap();
    sleep_ms(2);
    let c = board.add("c", &[], 5).unwrap();

    // Each worker is a separate instance over the same directory.
    let w1 = TaskBoard::at_dir(dir.path()).unwrap();
    let w2 = TaskBoard::at_dir(dir.path()).unwrap();
    let w3 = TaskBoard::at_dir(dir.path()).unwrap();
    let w4 = TaskBoard::at_dir(dir.path()).unwrap();

    assert_eq!(w1.claim("w1").unwrap().unwrap().id, b);
    assert_eq!(w2.claim("w2").unwrap().unwrap().id, c);
    assert_eq!(w3.claim("w3").unwrap().unwrap().id, a);
    assert!(w4.claim("w4").unwrap().is_none());
}

#[test]
fn test_dependency_gating_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let board = TaskBoard::at_dir(dir.path()).unwrap();
    let t1 = board.add("t1", &[], 0).unwrap();
    let t2 = board.add("t2", &[t1.clone()], 0).unwrap();

    let worker = TaskBoard::at_dir(dir.path()).unwrap();
    assert_eq!(worker.claim("w1").unwrap().unwrap().id, t1);
    assert!(worker.claim("w1").unwrap().is_none());

    worker.complete(&t1, None).unwrap();
    assert_eq!(worker.claim("w1").unwrap().unwrap().id, t2);
}

#[test]
fn test_stale_recovery_and_completion_policy() {
    let dir = tempfile::tempdir().unwrap();
    let board = TaskBoard::at_dir(dir.path())
        .unwrap()
        .with_stale_timeout(Duration::from_millis(100));
    let t1 = board.add("t1", &[], 0).unwrap();

    let first = board.claim("w1").unwrap().unwrap();
    assert_eq!(first.assigned_to.as_deref(), Some("w1"));

    sleep_ms(200);

    let second = board.claim("w2").unwrap().unwrap();
    assert_eq!(second.id, t1);
    assert_eq!(second.assigned_to.as_deref(), Some("w2"));

    // w2 completes; the board shows completed with no assignee.
    board.complete(&t1, Some("done".to_string())).unwrap();
    let snapshot = board.status().unwrap();
    assert_eq!(snapshot[0].status, TaskStatus::Completed);
    assert!(snapshot[0].assigned_to.is_none());

    // w1's late completion attempt is rejected: the task is no longer
    // in progress.
    let late = board.complete(&t1, Some("late".to_string()));
    assert!(matches!(late, Err(PoolError::InvalidTaskState { .. })));
}

#[test]
fn test_on_disk_format() {
    let dir = tempfile::tempdir().unwrap();
    let board = TaskBoard::at_dir(dir.path()).unwrap();
    let id = board.add("check the wire format", &[], 2).unwrap();
    board.claim("w1").unwrap().unwrap();

    let raw = std::fs::read_to_string(dir.path().join("taskboard.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let tasks = parsed["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);

    let task = &tasks[0];
    assert_eq!(task["id"].as_str().unwrap(), id);
    assert_eq!(task["status"], "in_progress");
    assert_eq!(task["assigned_to"], "w1");
    assert_eq!(task["priority"], 2);
    assert!(task["created_at"].as_f64().unwrap() > 0.0);
    assert!(task["claimed_at"].as_f64().is_some());
    assert!(task["completed_at"].is_null());
    assert!(task["depends_on"].as_array().unwrap().is_empty());

    // The lock peer exists and stays empty.
    let lock = std::fs::metadata(dir.path().join("taskboard.lock")).unwrap();
    assert_eq!(lock.len(), 0);
}

#[test]
fn test_concurrent_claims_from_threads_never_collide() {
    let dir = tempfile::tempdir().unwrap();
    let board = TaskBoard::at_dir(dir.path()).unwrap();
    for i in 0..8 {
        board.add(&format!("task {i}"), &[], 0).unwrap();
    }

    let dir_path = dir.path().to_path_buf();
    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let dir_path = dir_path.clone();
            std::thread::spawn(move || {
                let board = TaskBoard::at_dir(&dir_path).unwrap();
                let mut claimed = Vec::new();
                while let Some(task) = board.claim(&format!("w{worker}")).unwrap() {
                    claimed.push(task.id);
                }
                claimed
            })
        })
        .collect();

    let mut all: Vec<String> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    let total = all.len();
    all.sort();
    all.dedup();
    // Every task claimed exactly once across all workers.
    assert_eq!(total, 8);
    assert_eq!(all.len(), 8);
}
