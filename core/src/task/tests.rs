use super::manager::{BackgroundTaskManager, TaskStatus};
use super::{Task, TaskExt, TaskVariant};
use crate::errors::BridgeError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Works,
    Transient,
    Fatal,
}

/// Scans `blocks` blocks one per iteration, then reports no progress.
#[derive(Debug, Clone)]
struct ScanTask {
    scanned: Arc<AtomicU32>,
    blocks: u32,
    outcome: Outcome,
}

impl ScanTask {
    fn new(blocks: u32) -> (Self, Arc<AtomicU32>) {
        let scanned = Arc::new(AtomicU32::new(0));
        (
            Self {
                scanned: scanned.clone(),
                blocks,
                outcome: Outcome::Works,
            },
            scanned,
        )
    }

    fn failing(outcome: Outcome) -> Self {
        Self {
            outcome,
            ..Self::new(1).0
        }
    }
}

#[async_trait::async_trait]
impl Task for ScanTask {
    type Output = bool;
    const VARIANT: TaskVariant = TaskVariant::TestScan;

    async fn run_once(&mut self) -> Result<bool, BridgeError> {
        match self.outcome {
            Outcome::Transient => Err(BridgeError::ChainRpc("connection reset".into())),
            Outcome::Fatal => Err(eyre::eyre!("schema mismatch").into()),
            Outcome::Works => {
                if self.scanned.load(Ordering::SeqCst) < self.blocks {
                    self.scanned.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

/// Never finishes an iteration on its own.
#[derive(Debug, Clone)]
struct StallTask;

#[async_trait::async_trait]
impl Task for StallTask {
    type Output = bool;
    const VARIANT: TaskVariant = TaskVariant::TestStall;

    async fn run_once(&mut self) -> Result<bool, BridgeError> {
        sleep(Duration::from_secs(3600)).await;
        Ok(true)
    }
}

#[tokio::test(start_paused = true)]
async fn polling_sleeps_only_without_progress() {
    let (task, scanned) = ScanTask::new(1);
    let mut task = task.into_polling(Duration::from_secs(12));

    let start = Instant::now();
    assert!(task.run_once().await.unwrap());
    assert!(start.elapsed() < Duration::from_secs(12));

    let start = Instant::now();
    assert!(!task.run_once().await.unwrap());
    assert!(start.elapsed() >= Duration::from_secs(12));
    assert_eq!(scanned.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn recoverable_backs_off_on_transient_errors() {
    let mut task = ScanTask::failing(Outcome::Transient).into_recoverable(Duration::from_secs(5));

    let start = Instant::now();
    assert!(!task.run_once().await.unwrap());
    assert!(start.elapsed() >= Duration::from_secs(5));
}

#[tokio::test]
async fn recoverable_passes_other_errors_through() {
    let mut task = ScanTask::failing(Outcome::Fatal).into_recoverable(Duration::from_secs(5));

    let err = task.run_once().await.unwrap_err();
    assert!(!err.is_transient());
    assert!(err.to_string().contains("schema mismatch"));
}

#[tokio::test(start_paused = true)]
async fn loop_runs_until_stopped() {
    let (task, scanned) = ScanTask::new(5);
    let (mut task_loop, stop) = task.into_polling(Duration::from_millis(10)).into_loop();

    tokio::spawn(async move {
        sleep(Duration::from_secs(1)).await;
        let _ = stop.send(());
    });

    task_loop.run_once().await.unwrap();
    assert_eq!(scanned.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn dropped_stop_sender_ends_loop() {
    let (task, _) = ScanTask::new(0);
    let (mut task_loop, stop) = task.into_loop();
    drop(stop);

    task_loop.run_once().await.unwrap();
}

#[tokio::test]
async fn into_bg_runs_once() {
    let (task, scanned) = ScanTask::new(3);
    assert!(task.into_bg().await.unwrap().unwrap());
    assert_eq!(scanned.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn manager_runs_and_stops_loops() {
    let (task, scanned) = ScanTask::new(5);
    let mut manager = BackgroundTaskManager::default();
    manager
        .ensure_task_looping(task.into_polling(Duration::from_millis(10)))
        .await;

    sleep(Duration::from_secs(1)).await;
    assert_eq!(scanned.load(Ordering::SeqCst), 5);
    assert_eq!(
        manager.get_task_status(TaskVariant::TestScan).await,
        Some(TaskStatus::Running)
    );

    manager.graceful_shutdown().await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(
        manager.get_task_status(TaskVariant::TestScan).await,
        Some(TaskStatus::NotRunning("Stopped".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn same_variant_is_started_once() {
    let (first, first_scanned) = ScanTask::new(3);
    let (second, second_scanned) = ScanTask::new(3);
    let mut manager = BackgroundTaskManager::default();

    manager
        .ensure_task_looping(first.into_polling(Duration::from_millis(10)))
        .await;
    manager
        .ensure_task_looping(second.into_polling(Duration::from_millis(10)))
        .await;

    sleep(Duration::from_secs(1)).await;
    assert_eq!(first_scanned.load(Ordering::SeqCst), 3);
    assert_eq!(second_scanned.load(Ordering::SeqCst), 0);

    manager.graceful_shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn manager_records_failures() {
    let manager = BackgroundTaskManager::default();
    manager
        .ensure_task_looping(ScanTask::failing(Outcome::Fatal))
        .await;

    sleep(Duration::from_millis(100)).await;

    let stopped = manager.get_stopped_tasks().await;
    assert_eq!(stopped.len(), 1);
    assert!(stopped[0].starts_with("TestScan: Failed"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_timeout_aborts_stalled_loops() {
    let mut manager = BackgroundTaskManager::default();
    manager.ensure_task_looping(StallTask).await;

    let start = Instant::now();
    manager
        .graceful_shutdown_with_timeout(Duration::from_secs(2))
        .await;
    assert!(start.elapsed() < Duration::from_secs(3600));

    sleep(Duration::from_millis(10)).await;
    assert_eq!(
        manager.get_task_status(TaskVariant::TestStall).await,
        Some(TaskStatus::NotRunning("Aborted".to_string()))
    );

    // An aborted variant can be started again.
    manager.ensure_task_looping(StallTask).await;
    assert_eq!(
        manager.get_task_status(TaskVariant::TestStall).await,
        Some(TaskStatus::Running)
    );
}
