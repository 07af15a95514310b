use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Mutex, Notify, Semaphore};

use super::*;
use crate::error::AppError;

#[derive(Default)]
struct CountingCallback {
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl ErrorCallback for CountingCallback {
    async fn on_error(&self, task_name: &str, _error: &AppError) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().await.push(task_name.to_string());
    }
}

fn constant(name: &str, value: TaskValue) -> TaskNode {
    task_fn(name, move |_input| {
        let value = value.clone();
        async move { Ok(value) }
    })
}

fn failing(name: &str) -> TaskNode {
    let message = format!("{name} blew up");
    task_fn(name, move |_input| {
        let message = message.clone();
        async move { Err(AppError::Processing(message)) }
    })
}

#[tokio::test]
async fn chain_feeds_each_output_forward() {
    let scheduler = Scheduler::default();
    let add_one = || {
        task_fn("add_one", |input: TaskValue| async move {
            let n = input.as_i64().unwrap_or_default();
            Ok(json!(n + 1))
        })
    };

    let handle = scheduler.submit("chain", chain([add_one(), add_one(), add_one()]), json!(0));
    assert_eq!(handle.wait().await, JobStatus::Succeeded);

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.output, Some(json!(3)));
    assert_eq!(snapshot.task("add_one").dispatched, 3);
}

#[tokio::test]
async fn chord_joins_outputs_in_member_order() {
    let scheduler = Scheduler::default();
    let members = (0..3).map(|i| {
        task_fn("member", move |_input| async move {
            // Later members finish first.
            tokio::time::sleep(Duration::from_millis(30 - i * 10)).await;
            Ok(json!(i))
        })
    });
    let join = task_fn("join", |input: TaskValue| async move { Ok(input) });

    let handle = scheduler.submit("chord", chord(members, join), TaskValue::Null);
    assert_eq!(handle.wait().await, JobStatus::Succeeded);

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.output, Some(json!([0, 1, 2])));
    assert_eq!(snapshot.task("member").dispatched, 3);
    assert_eq!(snapshot.task("join").dispatched, 1);
    assert_eq!(snapshot.barriers.len(), 1);
    assert!(snapshot.barriers[0].is_released());
}

#[tokio::test]
async fn failed_member_skips_join_and_lets_siblings_finish() {
    let scheduler = Scheduler::new(FailurePolicy::ContinueSiblings);
    let callback = Arc::new(CountingCallback::default());
    let gate = Arc::new(Semaphore::new(0));

    let slow = |gate: Arc<Semaphore>| {
        task_fn("member", move |_input| {
            let gate = Arc::clone(&gate);
            async move {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|err| AppError::InternalError(err.to_string()))?;
                Ok(json!("done"))
            }
        })
        .on_error(callback.clone())
    };
    let header = vec![
        slow(Arc::clone(&gate)),
        failing("member").on_error(callback.clone()),
        slow(Arc::clone(&gate)),
    ];

    let handle = scheduler.submit("chord", chord(header, constant("join", json!(null))), json!(null));

    // The failing member reports before its siblings are allowed to finish.
    tokio::time::timeout(Duration::from_secs(2), async {
        while callback.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("error callback fired");
    assert!(!handle.status().is_finished());

    gate.add_permits(2);
    let status = handle.wait().await;
    assert!(matches!(status, JobStatus::Failed(ref msg) if msg.contains("blew up")));

    let snapshot = handle.snapshot();
    let members = snapshot.task("member");
    assert_eq!(members.dispatched, 3);
    assert_eq!(members.succeeded, 2);
    assert_eq!(members.failed, 1);
    assert_eq!(snapshot.task("join").dispatched, 0);
    assert_eq!(callback.calls.load(Ordering::SeqCst), 1);
    assert_eq!(snapshot.barriers[0].completed, 2);
    assert_eq!(snapshot.barriers[0].failed, 1);
}

#[tokio::test]
async fn cancel_policy_stops_running_siblings() {
    let scheduler = Scheduler::new(FailurePolicy::CancelSiblings);
    let never = Arc::new(Notify::new());

    let stuck = |never: Arc<Notify>| {
        task_fn("member", move |_input| {
            let never = Arc::clone(&never);
            async move {
                never.notified().await;
                Ok(json!("unreachable"))
            }
        })
    };
    let header = vec![
        stuck(Arc::clone(&never)),
        failing("member"),
        stuck(Arc::clone(&never)),
    ];

    let handle = scheduler.submit("chord", chord(header, constant("join", json!(null))), json!(null));
    let status = tokio::time::timeout(Duration::from_secs(2), handle.wait())
        .await
        .expect("cancelled siblings let the job finish");
    assert!(matches!(status, JobStatus::Failed(_)));

    let members = handle.snapshot().task("member");
    assert_eq!(members.failed, 1);
    assert_eq!(members.cancelled, 2);
    assert_eq!(members.succeeded, 0);
    assert_eq!(handle.snapshot().task("join").dispatched, 0);
}

#[tokio::test]
async fn group_chains_run_in_order_within_each_chain() {
    let scheduler = Scheduler::default();
    let log = Arc::new(Mutex::new(Vec::new()));

    let step = |label: String, log: Arc<Mutex<Vec<String>>>| {
        task_fn(label.clone(), move |input: TaskValue| {
            let log = Arc::clone(&log);
            let label = label.clone();
            async move {
                log.lock().await.push(label.clone());
                Ok(json!(format!("{}>{label}", input.as_str().unwrap_or_default())))
            }
        })
    };

    let chains = ["a", "b"].map(|fmt| {
        chain([
            step(format!("create{fmt}"), Arc::clone(&log)),
            step(format!("deliver{fmt}"), Arc::clone(&log)),
        ])
    });
    let handle = scheduler.submit(
        "search",
        chain([constant("search", json!("s")).into(), group(chains)]),
        TaskValue::Null,
    );
    assert_eq!(handle.wait().await, JobStatus::Succeeded);

    let output = handle.snapshot().output.expect("output");
    assert_eq!(output, json!(["s>createa>delivera", "s>createb>deliverb"]));

    let order = log.lock().await.clone();
    for fmt in ["a", "b"] {
        let create = order.iter().position(|l| *l == format!("create{fmt}"));
        let deliver = order.iter().position(|l| *l == format!("deliver{fmt}"));
        assert!(create < deliver);
    }
}

#[tokio::test]
async fn empty_group_completes_immediately() {
    let scheduler = Scheduler::default();
    let handle = scheduler.submit("empty", group(Vec::<Stage>::new()), TaskValue::Null);
    assert_eq!(handle.wait().await, JobStatus::Succeeded);
    assert_eq!(handle.snapshot().output, Some(json!([])));
}

#[tokio::test]
async fn submitted_jobs_can_be_looked_up() {
    let scheduler = Scheduler::default();
    let handle = scheduler.submit("lookup", constant("only", json!(1)).into(), TaskValue::Null);

    let found = scheduler.job(handle.id()).expect("registered");
    assert_eq!(found.wait().await, JobStatus::Succeeded);
    assert!(scheduler.job("missing").is_none());
}

fn panicking(name: &str) -> TaskNode {
    task_fn(name, |_input| async move {
        if true {
            panic!("task body panicked");
        }
        Ok(TaskValue::Null)
    })
}

#[tokio::test]
async fn panicking_member_counts_as_failure_and_fires_callback() {
    let scheduler = Scheduler::default();
    let callback = Arc::new(CountingCallback::default());
    let header = vec![
        constant("member", json!(1)),
        panicking("member").on_error(callback.clone()),
        constant("member", json!(3)),
    ];

    let handle = scheduler.submit("chord", chord(header, constant("join", json!(null))), json!(null));
    let status = tokio::time::timeout(Duration::from_secs(2), handle.wait())
        .await
        .expect("job finishes");
    assert!(matches!(status, JobStatus::Failed(ref msg) if msg.contains("panicked")));

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.task("member").failed, 1);
    assert_eq!(snapshot.task("member").succeeded, 2);
    assert_eq!(snapshot.task("join").dispatched, 0);
    assert_eq!(callback.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panicking_join_still_finishes_the_job() {
    let scheduler = Scheduler::default();
    let callback = Arc::new(CountingCallback::default());
    let join = panicking("join").on_error(callback.clone());

    let handle = scheduler.submit(
        "chord",
        chord([constant("member", json!(1))], join),
        json!(null),
    );
    let status = tokio::time::timeout(Duration::from_secs(2), handle.wait())
        .await
        .expect("job finishes");

    assert!(matches!(status, JobStatus::Failed(_)));
    assert_eq!(handle.snapshot().task("join").failed, 1);
    assert_eq!(callback.seen.lock().await.clone(), vec!["join".to_string()]);
}

#[tokio::test]
async fn task_output_is_visible_before_the_job_finishes() {
    let scheduler = Scheduler::default();
    let gate = Arc::new(Semaphore::new(0));
    let blocked = {
        let gate = Arc::clone(&gate);
        task_fn("render", move |input: TaskValue| {
            let gate = Arc::clone(&gate);
            async move {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|err| AppError::InternalError(err.to_string()))?;
                Ok(input)
            }
        })
    };

    let handle = scheduler.submit(
        "search",
        chain([constant("search", json!({ "search_id": "s1" })), blocked]),
        TaskValue::Null,
    );

    let early = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(output) = handle.task_output("search") {
                return output;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("first stage output");
    assert_eq!(early, json!({ "search_id": "s1" }));
    assert!(!handle.status().is_finished());
    assert!(handle.snapshot().output.is_none());

    gate.add_permits(1);
    assert_eq!(handle.wait().await, JobStatus::Succeeded);
    assert_eq!(
        handle.snapshot().task_output("render"),
        Some(&json!({ "search_id": "s1" }))
    );
}

#[tokio::test]
async fn registry_evicts_oldest_finished_jobs() {
    let scheduler = Scheduler::default().with_retention(2);

    let mut finished = Vec::new();
    for i in 0..4 {
        let handle = scheduler.submit("quick", constant("only", json!(i)).into(), TaskValue::Null);
        handle.wait().await;
        finished.push(handle.id().to_string());
    }
    let latest = scheduler.submit("quick", constant("only", json!(4)).into(), TaskValue::Null);

    assert!(scheduler.job(&finished[0]).is_none());
    assert!(scheduler.job(&finished[1]).is_none());
    assert!(scheduler.job(&finished[2]).is_some());
    assert!(scheduler.job(&finished[3]).is_some());
    assert!(scheduler.job(latest.id()).is_some());
}
