mod common;

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use queuectl::jobs::{JobSpec, JobState};

#[tokio::test]
async fn concurrent_claims_have_exactly_one_winner() -> anyhow::Result<()> {
    let tq = common::setup_queue().await;
    common::enqueue(&tq, "only", "true").await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let jobs = tq.queue.jobs().clone();
        handles.push(tokio::spawn(async move {
            jobs.claim_next(&format!("w{i}"), common::JOB_TIMEOUT).await
        }));
    }

    let mut winners = Vec::new();
    for h in handles {
        if let Some(job) = h.await?? {
            winners.push(job);
        }
    }

    assert_eq!(winners.len(), 1, "winners: {winners:?}");
    let job = &winners[0];
    assert_eq!(job.state, JobState::Claimed);
    assert!(!job.claim_token.is_empty());

    let stored = tq.queue.get_status("only").await?;
    assert_eq!(stored.owner, job.owner);
    assert_eq!(stored.claim_token, job.claim_token);
    Ok(())
}

#[tokio::test]
async fn stale_candidate_cannot_be_claimed_twice() -> anyhow::Result<()> {
    let tq = common::setup_queue().await;
    common::enqueue(&tq, "contended", "true").await;

    let candidate = tq
        .queue
        .jobs()
        .select_candidate()
        .await?
        .expect("candidate");

    let mut handles = Vec::new();
    for i in 0..6 {
        let jobs = tq.queue.jobs().clone();
        let candidate = candidate.clone();
        handles.push(tokio::spawn(async move {
            jobs.try_claim(&candidate, &format!("w{i}"), common::JOB_TIMEOUT).await
        }));
    }

    let mut won = 0;
    for h in handles {
        if h.await??.is_some() {
            won += 1;
        }
    }
    assert_eq!(won, 1);

    // the loser's snapshot is now stale
    assert!(tq.queue.jobs().try_claim(&candidate, "late", common::JOB_TIMEOUT).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn many_jobs_are_each_claimed_once() -> anyhow::Result<()> {
    let tq = common::setup_queue().await;
    for i in 0..20 {
        common::enqueue(&tq, &format!("job-{i}"), "true").await;
    }

    let mut handles = Vec::new();
    for w in 0..4 {
        let jobs = tq.queue.jobs().clone();
        handles.push(tokio::spawn(async move {
            let mut got = Vec::new();
            while let Some(job) = jobs.claim_next(&format!("w{w}"), common::JOB_TIMEOUT).await? {
                got.push(job.id);
            }
            Ok::<_, queuectl::QueueError>(got)
        }));
    }

    let mut seen = HashSet::new();
    for h in handles {
        for id in h.await?? {
            assert!(seen.insert(id.clone()), "{id} claimed twice");
        }
    }
    assert_eq!(seen.len(), 20);
    Ok(())
}

#[tokio::test]
async fn higher_priority_is_claimed_first() -> anyhow::Result<()> {
    let tq = common::setup_queue().await;
    tq.queue.enqueue(JobSpec::new("low", "true").priority(1)).await?;
    tq.queue.enqueue(JobSpec::new("high", "true").priority(5)).await?;
    tq.queue.enqueue(JobSpec::new("mid", "true").priority(3)).await?;

    let jobs = tq.queue.jobs();
    let mut order = Vec::new();
    while let Some(job) = jobs.claim_next("w1", common::JOB_TIMEOUT).await? {
        order.push(job.id);
    }

    assert_eq!(order, vec!["high", "mid", "low"]);
    Ok(())
}

#[tokio::test]
async fn equal_priority_is_claimed_in_arrival_order() -> anyhow::Result<()> {
    let tq = common::setup_queue().await;
    for id in ["a", "b", "c"] {
        common::enqueue(&tq, id, "true").await;
    }

    let jobs = tq.queue.jobs();
    let mut order = Vec::new();
    while let Some(job) = jobs.claim_next("w1", common::JOB_TIMEOUT).await? {
        order.push(job.id);
    }
    assert_eq!(order, vec!["a", "b", "c"]);
    Ok(())
}

#[tokio::test]
async fn future_jobs_are_not_eligible_until_due() -> anyhow::Result<()> {
    let tq = common::setup_queue().await;
    let run_at = Utc::now() + chrono::Duration::milliseconds(800);
    tq.queue
        .enqueue(JobSpec::new("later", "true").priority(100).run_at(run_at))
        .await?;

    assert!(tq.queue.claim_next("w1").await?.is_none());

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let job = tq.queue.claim_next("w1").await?.expect("due job");
    assert_eq!(job.id, "later");
    Ok(())
}

#[tokio::test]
async fn due_low_priority_beats_future_high_priority() -> anyhow::Result<()> {
    let tq = common::setup_queue().await;
    tq.queue
        .enqueue(
            JobSpec::new("future", "true")
                .priority(10)
                .run_at(Utc::now() + chrono::Duration::hours(1)),
        )
        .await?;
    common::enqueue(&tq, "now", "true").await;

    let job = tq.queue.claim_next("w1").await?.expect("job");
    assert_eq!(job.id, "now");
    assert!(tq.queue.claim_next("w1").await?.is_none());
    Ok(())
}
