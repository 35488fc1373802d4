//! Handle for background loops owned by the engine.

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A spawned loop that stops when signalled.
pub struct BackgroundTask {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl BackgroundTask {
    pub(crate) fn new(shutdown: watch::Sender<bool>, join: JoinHandle<()>) -> Self {
        Self { shutdown, join }
    }

    /// Spawns `body` with a shutdown receiver it should select on.
    pub fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = watch::channel(false);
        let join = tokio::spawn(body(rx));
        Self::new(tx, join)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signals the loop and waits for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            tracing::warn!("background task ended abnormally: {e}");
        }
    }
}
