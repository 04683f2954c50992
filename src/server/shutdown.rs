//! Graceful shutdown coordination for Parcelgate
//!
//! One `ShutdownCoordinator` is created per server run. Background services
//! subscribe to it, the HTTP server waits on its signal, and on the way out
//! the coordinator joins every task handle it was given.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::signal;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Broadcasts the shutdown signal and owns background task handles
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    shutdown_initiated: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Arc<Mutex<Vec<(&'static str, JoinHandle<()>)>>>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Hand a spawned background task to the coordinator so shutdown can join it
    pub async fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.lock().await.push((name, handle));
    }

    /// Signal every subscriber; repeated calls are no-ops
    pub fn initiate_shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::Relaxed) {
            info!("Initiating graceful shutdown...");
            if let Err(e) = self.shutdown_tx.send(()) {
                // no live subscribers
                warn!("Shutdown signal had no receivers: {}", e);
            }
        }
    }

    /// Wait for SIGINT, SIGTERM or a manual `initiate_shutdown`
    pub async fn wait_for_shutdown_signal(&self) {
        let mut manual = self.subscribe();
        if self.is_shutdown_initiated() {
            return;
        }

        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C signal"),
            _ = terminate => info!("Received SIGTERM signal"),
            _ = manual.recv() => info!("Shutdown requested"),
        }

        self.initiate_shutdown();
    }

    /// Join tracked tasks, aborting whatever is still running after `timeout`
    pub async fn wait_for_tasks_completion(&self, timeout: Duration) {
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        info!(
            "Waiting up to {}s for {} background task(s) to stop",
            timeout.as_secs(),
            tasks.len()
        );

        let deadline = tokio::time::Instant::now() + timeout;
        for (name, mut handle) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => info!(task = name, "Background task stopped"),
                Ok(Err(e)) => warn!(task = name, "Background task ended abnormally: {}", e),
                Err(_) => {
                    warn!(task = name, "Background task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
    }
}

/// Receiver wrapper for periodic background loops
pub struct ShutdownAwareTask {
    shutdown_rx: broadcast::Receiver<()>,
}

impl ShutdownAwareTask {
    pub fn new(coordinator: &ShutdownCoordinator) -> Self {
        Self {
            shutdown_rx: coordinator.subscribe(),
        }
    }

    /// Sleep for `duration`; returns true if shutdown arrived first
    pub async fn wait_or_shutdown(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown_rx.recv() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    /// Drive `work` to completion unless shutdown arrives first, in which
    /// case the work is dropped and `None` is returned
    pub async fn run_or_shutdown<F: Future>(&mut self, work: F) -> Option<F::Output> {
        tokio::select! {
            _ = self.shutdown_rx.recv() => None,
            output = work => Some(output),
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_shutdown_initiation() {
        let coordinator = ShutdownCoordinator::new();
        let mut receiver = coordinator.subscribe();
        assert!(!coordinator.is_shutdown_initiated());

        coordinator.initiate_shutdown();
        coordinator.initiate_shutdown();

        assert!(coordinator.is_shutdown_initiated());
        assert!(receiver.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_or_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let mut task = ShutdownAwareTask::new(&coordinator);

        assert!(!task.wait_or_shutdown(Duration::from_millis(20)).await);

        let trigger = coordinator.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            trigger.initiate_shutdown();
        });
        assert!(task.wait_or_shutdown(Duration::from_secs(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_or_shutdown_abandons_work() {
        let coordinator = ShutdownCoordinator::new();
        let mut task = ShutdownAwareTask::new(&coordinator);

        assert_eq!(task.run_or_shutdown(async { 7 }).await, Some(7));

        let trigger = coordinator.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            trigger.initiate_shutdown();
        });
        let stuck = task.run_or_shutdown(sleep(Duration::from_secs(3600)));
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(5), stuck).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_manual_shutdown_ends_signal_wait() {
        let coordinator = ShutdownCoordinator::new();
        let waiter = coordinator.clone();
        let handle = tokio::spawn(async move { waiter.wait_for_shutdown_signal().await });

        sleep(Duration::from_millis(20)).await;
        coordinator.initiate_shutdown();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("signal wait should end")
            .unwrap();
    }

    #[tokio::test]
    async fn test_tracked_tasks_are_joined() {
        let coordinator = ShutdownCoordinator::new();
        let mut task = ShutdownAwareTask::new(&coordinator);
        let handle = tokio::spawn(async move {
            while !task.wait_or_shutdown(Duration::from_secs(60)).await {}
        });
        coordinator.track("looping", handle).await;

        coordinator.initiate_shutdown();
        tokio::time::timeout(
            Duration::from_secs(2),
            coordinator.wait_for_tasks_completion(Duration::from_secs(1)),
        )
        .await
        .expect("tracked task should stop");
    }
}
