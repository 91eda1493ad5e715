//! Bundle change detection and event bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, watch};
use trust_csi_common::{CsiError, CsiResult};

use crate::source::BundleSource;

/// Bundle events.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleEvent {
    /// Content of a bundle changed, appeared or disappeared.
    Changed { namespace: String, bundle: String },
}

impl BundleEvent {
    /// Name of the bundle the event concerns.
    #[must_use]
    pub fn bundle(&self) -> &str {
        match self {
            Self::Changed { bundle, .. } => bundle,
        }
    }
}

type Digests = HashMap<(String, String), [u8; 32]>;

/// Polls a [`BundleSource`] and broadcasts changes.
///
/// The first poll reports every bundle as changed.
#[derive(Debug, Clone)]
pub struct BundleWatcher {
    source: Arc<dyn BundleSource>,
    interval: Duration,
    sender: broadcast::Sender<BundleEvent>,
    digests: Arc<Mutex<Digests>>,
}

impl BundleWatcher {
    /// Create a watcher polling every `interval`.
    pub fn new(source: Arc<dyn BundleSource>, interval: Duration) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            source,
            interval,
            sender,
            digests: Arc::default(),
        }
    }

    /// Subscribe to events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BundleEvent> {
        self.sender.subscribe()
    }

    /// Compare every bundle against the last seen digest and publish an
    /// event for each difference.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be listed or read.
    pub fn poll_once(&self) -> CsiResult<Vec<BundleEvent>> {
        let mut current = Digests::new();
        for (namespace, bundle) in self.source.list()? {
            let data = match self.source.load(&namespace, &bundle) {
                Ok(data) => data,
                // Removed between list and load.
                Err(CsiError::BundleNotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            current.insert((namespace, bundle), Sha256::digest(&data).into());
        }

        let mut digests = self.digests.lock();
        let mut changed: Vec<(String, String)> = current
            .iter()
            .filter(|(key, digest)| digests.get(*key) != Some(*digest))
            .map(|(key, _)| key.clone())
            .chain(
                digests
                    .keys()
                    .filter(|key| !current.contains_key(*key))
                    .cloned(),
            )
            .collect();
        *digests = current;
        drop(digests);

        changed.sort();
        let events: Vec<BundleEvent> = changed
            .into_iter()
            .map(|(namespace, bundle)| BundleEvent::Changed { namespace, bundle })
            .collect();

        for event in &events {
            tracing::debug!(?event, "Bundle changed");
            // No subscribers is fine.
            let _ = self.sender.send(event.clone());
        }
        Ok(events)
    }

    /// Poll until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let watcher = self.clone();
                    match tokio::task::spawn_blocking(move || watcher.poll_once()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => tracing::warn!(error = %e, "Bundle poll failed"),
                        Err(e) => tracing::warn!(error = %e, "Bundle poll task failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("Bundle watcher stopping");
                        return;
                    }
                }
            }
        }
    }
}
