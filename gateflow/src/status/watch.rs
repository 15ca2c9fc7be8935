//! Polling status watcher.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::status::{StatusMap, StatusRepository};

/// Re-reads a status repository on a fixed interval and publishes the map
/// whenever it changes.
///
/// The watcher stops once every receiver has been dropped.
pub struct StatusWatcher {
    repository: Arc<dyn StatusRepository>,
    interval: Duration,
    tx: watch::Sender<StatusMap>,
}

impl StatusWatcher {
    /// Creates a watcher over `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn StatusRepository>, interval: Duration) -> Self {
        let (tx, _rx) = watch::channel(StatusMap::new());
        Self {
            repository,
            interval,
            tx,
        }
    }

    /// Returns a new receiver for published maps.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StatusMap> {
        self.tx.subscribe()
    }

    /// Reads the repository once and publishes the map if it changed.
    ///
    /// Returns true if subscribers were notified.
    pub fn poll_once(&self) -> Result<bool> {
        let map = self.repository.get()?;
        Ok(self.tx.send_if_modified(|current| {
            if *current == map {
                false
            } else {
                *current = map;
                true
            }
        }))
    }

    /// Starts polling on a background task and returns a receiver together
    /// with the task handle.
    pub fn spawn(self) -> (watch::Receiver<StatusMap>, JoinHandle<()>) {
        let rx = self.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                if self.tx.is_closed() {
                    debug!("All status subscribers gone, stopping watcher");
                    break;
                }
                if let Err(e) = self.poll_once() {
                    warn!(error = %e, "Status poll failed");
                }
            }
        });
        (rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageState;
    use crate::pipeline::PipelineDefinition;
    use crate::status::InMemoryStatusRepository;

    #[test]
    fn test_poll_once_only_notifies_on_change() {
        let repo = Arc::new(InMemoryStatusRepository::new());
        repo.reset(&PipelineDefinition::Mono).unwrap();
        let watcher = StatusWatcher::new(repo.clone(), Duration::from_millis(10));

        assert!(watcher.poll_once().unwrap());
        assert!(!watcher.poll_once().unwrap());

        let mut map = repo.get().unwrap();
        map["mono_agent"].state = StageState::InProgress;
        repo.set(&map).unwrap();
        assert!(watcher.poll_once().unwrap());
        assert_eq!(watcher.subscribe().borrow()["mono_agent"].state, StageState::InProgress);
    }

    #[tokio::test]
    async fn test_spawned_watcher_publishes() {
        let repo = Arc::new(InMemoryStatusRepository::new());
        let watcher = StatusWatcher::new(repo.clone(), Duration::from_millis(5));
        let (mut rx, handle) = watcher.spawn();

        repo.reset(&PipelineDefinition::Sequential).unwrap();
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.borrow().len(), 7);

        drop(rx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
