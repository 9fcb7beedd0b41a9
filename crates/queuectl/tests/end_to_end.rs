mod common;

use std::time::Duration;

use queuectl::jobs::{CommandExecutor, JobSpec, JobState, WorkerPool};

#[tokio::test]
async fn success_and_exhausted_failure_end_to_end() -> anyhow::Result<()> {
    let tq = common::setup_queue().await;

    tq.queue
        .enqueue(JobSpec::new("a", "echo hello from a; exit 0"))
        .await?;
    tq.queue
        .enqueue(JobSpec::new("b", "echo failing >&2; exit 1").max_retries(1))
        .await?;

    let pool = WorkerPool::start(
        &tq.queue,
        CommandExecutor::default(),
        vec![common::fast_worker("w1")],
    );

    let a = common::wait_for_state(&tq, "a", JobState::Completed, Duration::from_secs(10)).await;
    // two attempts with a 2s backoff in between
    let b = common::wait_for_state(&tq, "b", JobState::Dead, Duration::from_secs(20)).await;

    pool.shutdown().await?;

    assert_eq!(a.attempts, 1);
    assert_eq!(a.last_exit_code, Some(0));
    assert_eq!(b.attempts, 2);
    assert_eq!(b.last_exit_code, Some(1));

    let m = tq.queue.metrics().await?;
    assert_eq!(m.total, 2);
    assert_eq!(m.completed, 1);
    assert_eq!(m.dead, 1);
    assert_eq!(m.pending, 0);
    assert_eq!(m.claimed, 0);
    assert_eq!(m.success_rate, 0.5);

    let dlq = tq.queue.dlq_list().await?;
    assert_eq!(dlq.iter().map(|j| j.id.as_str()).collect::<Vec<_>>(), vec!["b"]);

    let log_a = tq.queue.read_log("a").await?.expect("log for a");
    assert!(log_a.contains("hello from a"), "{log_a}");
    let log_b = tq.queue.read_log("b").await?.expect("log for b");
    assert!(log_b.contains("failing"), "{log_b}");
    Ok(())
}

#[tokio::test]
async fn several_workers_drain_the_queue_without_duplicates() -> anyhow::Result<()> {
    let tq = common::setup_queue().await;
    let marker_dir = tq.dir.path().join("runs");
    std::fs::create_dir_all(&marker_dir)?;

    for i in 0..12 {
        // each run appends a line, so a double execution shows up as two lines
        let cmd = format!("echo run >> {}/job-{i}", marker_dir.display());
        tq.queue.enqueue(JobSpec::new(format!("job-{i}"), cmd)).await?;
    }

    let pool = WorkerPool::start(
        &tq.queue,
        CommandExecutor::default(),
        (1..=3).map(|n| common::fast_worker(&format!("w{n}"))).collect(),
    );

    for i in 0..12 {
        common::wait_for_state(&tq, &format!("job-{i}"), JobState::Completed, Duration::from_secs(20))
            .await;
    }
    pool.shutdown().await?;

    for i in 0..12 {
        let runs = std::fs::read_to_string(marker_dir.join(format!("job-{i}")))?;
        assert_eq!(runs.lines().count(), 1, "job-{i} ran {} times", runs.lines().count());
    }
    assert_eq!(tq.queue.metrics().await?.completed, 12);
    Ok(())
}
