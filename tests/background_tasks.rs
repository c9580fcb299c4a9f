mod common;

use common::test_helpers::capture_logs;
use greenlight::{BackgroundTasks, TaskError};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn wait_covers_every_submitted_task() {
    const K: usize = 25;
    let tasks = BackgroundTasks::new();
    let finished = Arc::new(AtomicUsize::new(0));

    let delays: Vec<Duration> = {
        let mut rng = rand::rng();
        (0..K).map(|_| Duration::from_millis(rng.random_range(1..40))).collect()
    };
    for (i, delay) in delays.into_iter().enumerate() {
        let finished = finished.clone();
        tasks
            .submit(format!("job-{i}"), async move {
                tokio::time::sleep(delay).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(())
            })
            .unwrap();
    }
    assert_eq!(tasks.in_flight(), K);

    tasks.close();
    tasks.wait().await;
    assert_eq!(finished.load(Ordering::SeqCst), K);
    assert_eq!(tasks.in_flight(), 0);
}

#[tokio::test]
async fn panicking_task_is_contained_and_logged() {
    let logs = capture_logs();
    let tasks = BackgroundTasks::new();
    let survivor = Arc::new(AtomicUsize::new(0));

    tasks.submit("explodes", explode()).unwrap();
    let s = survivor.clone();
    tasks
        .submit("survives", async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            s.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(())
        })
        .unwrap();

    tasks.wait().await;
    assert_eq!(tasks.in_flight(), 0);
    assert_eq!(survivor.load(Ordering::SeqCst), 1);

    let out = logs.contents();
    assert!(out.contains("background task panicked"), "logs: {out}");
    assert!(out.contains("mailer exploded"), "logs: {out}");
    assert!(out.contains("explodes"), "logs: {out}");
}

async fn explode() -> Result<(), std::io::Error> {
    panic!("mailer exploded")
}

#[tokio::test]
async fn failing_task_logs_name_and_error() {
    let logs = capture_logs();
    let tasks = BackgroundTasks::new();
    tasks
        .submit("welcome_email", async { Err::<(), _>("smtp connection refused") })
        .unwrap();
    tasks.wait().await;

    let out = logs.contents();
    assert!(out.contains("background task failed"), "logs: {out}");
    assert!(out.contains("welcome_email"), "logs: {out}");
    assert!(out.contains("smtp connection refused"), "logs: {out}");
}

#[tokio::test]
async fn submissions_after_close_are_rejected() {
    let tasks = BackgroundTasks::new();
    tasks.close();
    let err = tasks.submit("late", async { Ok::<_, std::io::Error>(()) }).unwrap_err();
    assert_eq!(err, TaskError::Closed { task: "late".into() });
    assert_eq!(tasks.in_flight(), 0);
}

#[tokio::test]
async fn nested_submission_keeps_wait_open() {
    let tasks = BackgroundTasks::new();
    let done = Arc::new(AtomicUsize::new(0));

    let inner_tasks = tasks.clone();
    let d = done.clone();
    tasks
        .submit("outer", async move {
            let d2 = d.clone();
            inner_tasks
                .submit("inner", async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    d2.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>(())
                })
                .map_err(|e| e.to_string())?;
            d.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(())
        })
        .unwrap();

    tasks.wait().await;
    assert_eq!(done.load(Ordering::SeqCst), 2);
}
