//! Cross-module admission scenarios driven through the public API.

use std::collections::HashSet;
use std::time::Duration;

use photoqueue::config::QueueConfig;
use photoqueue::{AdmissionQueue, PriorityTier, QueueError, QueueStatus};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_test::{assert_pending, assert_ready_err, assert_ready_ok, task};

fn make_queue(max_concurrent: usize, max_queue_size: usize) -> AdmissionQueue {
    AdmissionQueue::new(QueueConfig {
        max_concurrent,
        max_queue_size,
        ..QueueConfig::default()
    })
}

fn assert_invariants(status: &QueueStatus) {
    assert!(status.active_count <= status.max_concurrent);
    assert_eq!(status.active_count, status.processing_job_ids.len());
    assert_eq!(status.queue_length, status.waiting_job_ids.len());
    assert!(status.queue_length <= status.max_queue_size);
    let running: HashSet<&String> = status.processing_job_ids.iter().collect();
    let waiting: HashSet<&String> = status.waiting_job_ids.iter().collect();
    assert_eq!(waiting.len(), status.waiting_job_ids.len(), "id waiting twice");
    assert!(running.is_disjoint(&waiting), "id both waiting and running");
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_scenario() {
    let q = make_queue(2, 2);

    q.enqueue("A", Some("owner-1"), PriorityTier::Free).await.unwrap();
    q.enqueue("B", Some("owner-2"), PriorityTier::Free).await.unwrap();
    assert_eq!(q.status().active_count, 2);

    let mut c = task::spawn(q.enqueue("C", None, PriorityTier::Free));
    assert_pending!(c.poll());
    let mut d = task::spawn(q.enqueue("D", None, PriorityTier::Free));
    assert_pending!(d.poll());
    assert_eq!(q.status().queue_length, 2);

    let mut e = task::spawn(q.enqueue("E", None, PriorityTier::Free));
    let err = assert_ready_err!(e.poll());
    assert!(matches!(err, QueueError::QueueFull { capacity: 2 }));

    q.release("A");
    assert_ready_ok!(c.poll());
    let status = q.status();
    assert_eq!(status.active_count, 2);
    assert_eq!(status.waiting_job_ids, vec!["D"]);

    q.release("B");
    assert_ready_ok!(d.poll());

    let status = q.status();
    assert_eq!(status.queue_length, 0);
    assert_eq!(status.active_count, 2);
    assert_eq!(status.processing_job_ids, vec!["C", "D"]);
    assert_invariants(&status);
}

#[tokio::test(start_paused = true)]
async fn test_priority_then_arrival_order() {
    let q = make_queue(1, 10);
    q.enqueue("free-first", None, PriorityTier::Free).await.unwrap();

    let mut ent = task::spawn(q.enqueue("enterprise", None, PriorityTier::Enterprise));
    let mut starter = task::spawn(q.enqueue("starter", None, PriorityTier::Starter));
    assert_pending!(ent.poll());
    assert_pending!(starter.poll());

    q.release("free-first");
    assert_ready_ok!(ent.poll());
    assert_pending!(starter.poll());

    q.release("enterprise");
    assert_ready_ok!(starter.poll());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_never_admitted_twice() {
    let q = make_queue(2, 10);
    let mut first = task::spawn(q.enqueue("img-42", None, PriorityTier::Free));
    assert_ready_ok!(first.poll());

    let mut second = task::spawn(q.enqueue("img-42", None, PriorityTier::Enterprise));
    let err = assert_ready_err!(second.poll());
    assert_eq!(
        err,
        QueueError::Duplicate {
            job_id: "img-42".into()
        }
    );
    assert_eq!(q.status().processing_job_ids, vec!["img-42"]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_frees_space_without_admission() {
    let q = AdmissionQueue::new(QueueConfig {
        max_concurrent: 1,
        max_queue_size: 1,
        processing_timeout_ms: 5_000,
        ..QueueConfig::default()
    });
    q.enqueue("busy", None, PriorityTier::Free).await.unwrap();

    let mut waiter = task::spawn(q.enqueue("waiter", None, PriorityTier::Free));
    assert_pending!(waiter.poll());

    let mut rejected = task::spawn(q.enqueue("rejected", None, PriorityTier::Free));
    assert!(matches!(
        assert_ready_err!(rejected.poll()),
        QueueError::QueueFull { .. }
    ));

    tokio::time::advance(Duration::from_millis(5_001)).await;
    let err = assert_ready_err!(waiter.poll());
    assert!(matches!(err, QueueError::Timeout { .. }));
    assert!(err.is_retryable());
    assert_eq!(q.status().active_count, 1);

    let mut next = task::spawn(q.enqueue("next", None, PriorityTier::Free));
    assert_pending!(next.poll());
}

#[tokio::test]
async fn test_default_limits() {
    let q = AdmissionQueue::new(QueueConfig::default());
    for i in 0..5 {
        q.enqueue(&format!("img-{i}"), None, PriorityTier::Free)
            .await
            .unwrap();
    }
    let status = q.status();
    assert_eq!(status.active_count, 5);
    assert_eq!(status.max_concurrent, 5);
    assert_eq!(status.max_queue_size, 50);
}

/// Random enqueue / release / cancel interleavings never break the bound.
#[tokio::test(start_paused = true)]
async fn test_random_interleavings_keep_invariants() {
    let q = make_queue(3, 6);
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let mut waiters = Vec::new();
    let mut admitted: HashSet<String> = HashSet::new();

    for step in 0..400 {
        match rng.gen_range(0..10) {
            0..=4 => {
                let id = format!("img-{}", rng.gen_range(0..12));
                let tier = PriorityTier::ALL[rng.gen_range(0..4)];
                let queue = q.clone();
                let mut fut = task::spawn(async move {
                    let res = queue.enqueue(&id, None, tier).await;
                    (id, res)
                });
                if let std::task::Poll::Ready((id, res)) = fut.poll() {
                    if res.is_ok() {
                        assert!(admitted.insert(id), "admitted twice at step {step}");
                    }
                } else {
                    waiters.push(fut);
                }
            }
            5..=7 => {
                let running = q.status().processing_job_ids;
                if !running.is_empty() {
                    let id = &running[rng.gen_range(0..running.len())];
                    q.release(id);
                    admitted.remove(id);
                }
            }
            8 => {
                q.release(&format!("img-{}", rng.gen_range(0..12)));
                admitted.retain(|id| q.status().processing_job_ids.contains(id));
            }
            _ => {
                q.cancel(&format!("img-{}", rng.gen_range(0..12)));
            }
        }

        waiters.retain_mut(|fut| match fut.poll() {
            std::task::Poll::Ready((id, res)) => {
                if res.is_ok() {
                    assert!(admitted.insert(id), "admitted twice at step {step}");
                }
                false
            }
            std::task::Poll::Pending => true,
        });

        let status = q.status();
        assert_invariants(&status);
        let running: HashSet<String> = status.processing_job_ids.into_iter().collect();
        assert_eq!(running, admitted, "running set drifted at step {step}");
    }
}
