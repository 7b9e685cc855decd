//! # Background Loops
//!
//! Long-lived work (chain scanning, finality checks, registry refresh) is
//! written as a [`Task`] that does one unit of work per [`Task::run_once`]
//! call. Combinators from [`TaskExt`] add pacing, transient error recovery
//! and a stoppable loop around it, and [`manager::BackgroundTaskManager`]
//! spawns and supervises the result.

use crate::errors::BridgeError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

pub mod manager;

#[cfg(test)]
mod tests;

/// Identifies a long-lived loop in the [`manager::BackgroundTaskManager`].
/// At most one loop per variant runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskVariant {
    ChainObserver,
    Finalizer,
    RegistrySync,
    #[cfg(test)]
    TestScan,
    #[cfg(test)]
    TestStall,
}

#[async_trait]
pub trait Task: Send + Sync + 'static {
    type Output: Send + Sync + 'static + Sized;
    const VARIANT: TaskVariant;

    /// Performs one unit of work. Tasks used with [`TaskExt::into_polling`]
    /// return `true` when they made progress and should run again right
    /// away.
    async fn run_once(&mut self) -> Result<Self::Output, BridgeError>;
}

/// Sleeps for `poll_delay` after every iteration of the inner task that made
/// no progress.
#[derive(Debug)]
pub struct Polling<T: Task>
where
    T::Output: Into<bool>,
{
    inner: T,
    poll_delay: Duration,
}

#[async_trait]
impl<T: Task> Task for Polling<T>
where
    T::Output: Into<bool>,
{
    type Output = bool;
    const VARIANT: TaskVariant = T::VARIANT;

    async fn run_once(&mut self) -> Result<bool, BridgeError> {
        let progressed: bool = self.inner.run_once().await?.into();
        if !progressed {
            sleep(self.poll_delay).await;
        }

        Ok(progressed)
    }
}

/// Retries transient upstream errors after a fixed backoff instead of
/// stopping the loop. Any other error is passed through.
#[derive(Debug)]
pub struct Recoverable<T: Task>
where
    T::Output: Default,
{
    inner: T,
    retry_delay: Duration,
}

#[async_trait]
impl<T: Task> Task for Recoverable<T>
where
    T::Output: Default,
{
    type Output = T::Output;
    const VARIANT: TaskVariant = T::VARIANT;

    async fn run_once(&mut self) -> Result<Self::Output, BridgeError> {
        match self.inner.run_once().await {
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    "{:?} hit a transient error, retrying in {:?}: {e}",
                    T::VARIANT,
                    self.retry_delay
                );
                sleep(self.retry_delay).await;
                Ok(T::Output::default())
            }
            other => other,
        }
    }
}

/// Runs the inner task until a stop signal arrives or it fails. The signal
/// is checked between iterations, so an iteration in flight completes.
#[derive(Debug)]
pub struct StoppableLoop<T: Task> {
    inner: T,
    stop_rx: oneshot::Receiver<()>,
}

#[async_trait]
impl<T: Task> Task for StoppableLoop<T> {
    type Output = ();
    const VARIANT: TaskVariant = T::VARIANT;

    async fn run_once(&mut self) -> Result<(), BridgeError> {
        // A dropped sender counts as a stop signal.
        while let Err(oneshot::error::TryRecvError::Empty) = self.stop_rx.try_recv() {
            self.inner.run_once().await?;
            tokio::task::yield_now().await;
        }
        tracing::debug!("{:?} stopped", T::VARIANT);

        Ok(())
    }
}

pub trait TaskExt: Task + Sized {
    fn into_polling(self, poll_delay: Duration) -> Polling<Self>
    where
        Self::Output: Into<bool>,
    {
        Polling {
            inner: self,
            poll_delay,
        }
    }

    fn into_recoverable(self, retry_delay: Duration) -> Recoverable<Self>
    where
        Self::Output: Default,
    {
        Recoverable {
            inner: self,
            retry_delay,
        }
    }

    /// Returns the loop and the sender that stops it.
    fn into_loop(self) -> (StoppableLoop<Self>, oneshot::Sender<()>) {
        let (stop_tx, stop_rx) = oneshot::channel();
        (
            StoppableLoop {
                inner: self,
                stop_rx,
            },
            stop_tx,
        )
    }

    /// Spawns a single `run_once` on the runtime.
    fn into_bg(mut self) -> JoinHandle<Result<Self::Output, BridgeError>> {
        tokio::spawn(async move { self.run_once().await })
    }
}

impl<T: Task> TaskExt for T {}
