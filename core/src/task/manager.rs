use super::{Task, TaskExt, TaskVariant};
use crate::errors::BridgeError;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Running,
    NotRunning(String),
}

#[derive(Debug)]
struct LoopEntry {
    status: TaskStatus,
    abort: AbortHandle,
    stop: Option<oneshot::Sender<()>>,
}

type LoopTable = HashMap<TaskVariant, LoopEntry>;

/// Owns the coordinator's background loops. Dropping the manager aborts
/// every loop; [`BackgroundTaskManager::graceful_shutdown_with_timeout`]
/// lets in-flight iterations finish first.
#[derive(Debug, Default)]
pub struct BackgroundTaskManager {
    loops: Arc<RwLock<LoopTable>>,
}

fn exit_reason(variant: TaskVariant, result: Result<Result<(), BridgeError>, JoinError>) -> String {
    match result {
        Ok(Ok(())) => {
            tracing::debug!("{variant:?} exited");
            "Stopped".to_string()
        }
        Ok(Err(e)) => {
            tracing::error!("{variant:?} failed: {e}");
            format!("Failed: {e}")
        }
        Err(e) if e.is_cancelled() => {
            tracing::debug!("{variant:?} was aborted");
            "Aborted".to_string()
        }
        Err(e) => {
            tracing::error!("{variant:?} panicked: {e}");
            format!("Panicked: {e}")
        }
    }
}

impl BackgroundTaskManager {
    /// Records the loop's exit reason once its handle resolves.
    fn watch_exit(&self, variant: TaskVariant, handle: JoinHandle<Result<(), BridgeError>>) {
        let loops: Weak<RwLock<LoopTable>> = Arc::downgrade(&self.loops);

        tokio::spawn(async move {
            let reason = exit_reason(variant, handle.await);
            let Some(loops) = loops.upgrade() else {
                return;
            };

            if let Some(entry) = loops.write().await.get_mut(&variant) {
                entry.status = TaskStatus::NotRunning(reason);
            };
        });
    }

    pub async fn get_task_status(&self, variant: TaskVariant) -> Option<TaskStatus> {
        self.loops
            .read()
            .await
            .get(&variant)
            .map(|entry| entry.status.clone())
    }

    /// `"{variant:?}: {reason}"` for every loop that is no longer running.
    pub async fn get_stopped_tasks(&self) -> Vec<String> {
        self.loops
            .read()
            .await
            .iter()
            .filter_map(|(variant, entry)| match &entry.status {
                TaskStatus::Running => None,
                TaskStatus::NotRunning(reason) => Some(format!("{variant:?}: {reason}")),
            })
            .collect()
    }

    /// Spawns `task` as a stoppable loop unless a loop of the same variant is
    /// already running.
    pub async fn ensure_task_looping<T: Task>(&self, task: T) {
        let variant = T::VARIANT;
        let mut loops = self.loops.write().await;
        if loops
            .get(&variant)
            .is_some_and(|entry| entry.status == TaskStatus::Running)
        {
            tracing::debug!("{variant:?} is already running");
            return;
        }

        let (task_loop, stop) = task.into_loop();
        let handle = task_loop.into_bg();
        loops.insert(
            variant,
            LoopEntry {
                status: TaskStatus::Running,
                abort: handle.abort_handle(),
                stop: Some(stop),
            },
        );
        drop(loops);

        tracing::info!("Started {variant:?}");
        self.watch_exit(variant, handle);
    }

    pub fn abort_all(&mut self) {
        // `&mut self` means no other caller holds the lock.
        if let Ok(loops) = self.loops.try_read() {
            for entry in loops.values() {
                entry.abort.abort();
            }
        }
    }

    /// Signals every loop to stop and waits until all of them have exited.
    pub async fn graceful_shutdown(&mut self) {
        tracing::info!("Stopping background tasks");
        for entry in self.loops.write().await.values_mut() {
            if let Some(stop) = entry.stop.take() {
                // The loop may have exited already.
                let _ = stop.send(());
            }
        }

        while !self
            .loops
            .read()
            .await
            .values()
            .all(|entry| entry.abort.is_finished())
        {
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// [`Self::graceful_shutdown`], aborting whatever is still running after
    /// `timeout`.
    pub async fn graceful_shutdown_with_timeout(&mut self, timeout: Duration) {
        if tokio::time::timeout(timeout, self.graceful_shutdown())
            .await
            .is_err()
        {
            tracing::warn!("Background tasks did not stop within {timeout:?}, aborting");
            self.abort_all();
        }
    }
}

impl Drop for BackgroundTaskManager {
    fn drop(&mut self) {
        self.abort_all();
    }
}
