//! Expiry Reaper
//!
//! Consumes the store's expired-key notifications and purges the staging and
//! final folders of sessions that timed out. The record itself is already
//! gone by the time the notification arrives.
//!
//! Purges run as separate tasks so the consumer loop keeps draining
//! notifications. Shutdown is cooperative: the loop stops reading, drops the
//! subscription, then waits for in-flight purges.

use std::future::Future;

use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use super::cleanup::Cleanup;
use super::registry::session_id_from_key;
use super::types::CleanupError;
use crate::kv::ExpiredKeys;

pub struct Reaper;

/// Running reaper task
pub struct ReaperHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Reaper {
    /// Start consuming `expired` on a background task
    pub fn spawn(cleanup: Cleanup, expired: ExpiredKeys) -> ReaperHandle {
        Self::spawn_with(expired, move |session_id| {
            let cleanup = cleanup.clone();
            async move { cleanup.purge_artifacts(session_id).await }
        })
    }

    /// Start consuming `expired`, running `reap` for every expired session
    pub fn spawn_with<F, Fut>(expired: ExpiredKeys, reap: F) -> ReaperHandle
    where
        F: Fn(Uuid) -> Fut + Send + 'static,
        Fut: Future<Output = Vec<CleanupError>> + Send + 'static,
    {
        let (shutdown, stop) = oneshot::channel();
        let task = tokio::spawn(run(expired, reap, stop));
        ReaperHandle { shutdown, task }
    }
}

impl ReaperHandle {
    /// Stop consuming and wait for in-flight purges
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Expiry reaper task failed");
        }
    }
}

async fn run<F, Fut>(mut expired: ExpiredKeys, reap: F, mut stop: oneshot::Receiver<()>)
where
    F: Fn(Uuid) -> Fut,
    Fut: Future<Output = Vec<CleanupError>> + Send + 'static,
{
    let mut in_flight = JoinSet::new();

    tracing::info!("Expiry reaper started");

    loop {
        tokio::select! {
            _ = &mut stop => break,
            key = expired.next() => {
                let Some(key) = key else {
                    tracing::warn!("Expiry notification stream closed");
                    break;
                };
                // Bindings expire alongside their session; only records matter.
                let Some(session_id) = session_id_from_key(&key) else {
                    continue;
                };

                tracing::info!(session_id = %session_id, "Session expired, deleting folders");
                let purge = reap(session_id);
                in_flight.spawn(async move {
                    let errors = purge.await;
                    for error in &errors {
                        tracing::error!(session_id = %session_id, error = %error, "Failed to reap expired session");
                    }
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Reap task panicked");
                }
            }
        }
    }

    drop(expired);

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Reap task panicked");
        }
    }

    tracing::info!("Expiry reaper stopped");
}
