//! Cleanup
//!
//! Best-effort removal of everything a session left behind. Every step runs
//! even when an earlier one failed, and each failure is returned.

use std::path::Path;

use uuid::Uuid;

use super::binding::IdentityBindings;
use super::registry::SessionRegistry;
use super::staging::ArtifactLayout;
use super::types::CleanupError;

#[derive(Clone)]
pub struct Cleanup {
    layout: ArtifactLayout,
    registry: SessionRegistry,
    bindings: IdentityBindings,
}

impl Cleanup {
    pub fn new(layout: ArtifactLayout, registry: SessionRegistry, bindings: IdentityBindings) -> Self {
        Self {
            layout,
            registry,
            bindings,
        }
    }

    /// Remove the session record, its binding and its final + staging folders
    ///
    /// The record goes first: an ingest racing with the purge then finds no
    /// session and removes whatever it staged itself.
    pub async fn purge(&self, session_id: Uuid) -> Vec<CleanupError> {
        self.purge_with(session_id, true).await
    }

    /// Like [`Cleanup::purge`] for a session whose binding was already taken
    pub async fn purge_evicted(&self, session_id: Uuid) -> Vec<CleanupError> {
        self.purge_with(session_id, false).await
    }

    async fn purge_with(&self, session_id: Uuid, release_binding: bool) -> Vec<CleanupError> {
        let mut errors = Vec::new();

        match self.registry.delete(session_id).await {
            Ok(Some(session)) if release_binding => {
                if let Err(e) = self.bindings.release(&session.fingerprint, session_id).await {
                    errors.push(e.into());
                }
            }
            Ok(_) => {}
            Err(e) => errors.push(e.into()),
        }

        errors.extend(self.purge_artifacts(session_id).await);

        if errors.is_empty() {
            tracing::debug!(session_id = %session_id, "Session cleaned up");
        } else {
            for error in &errors {
                tracing::warn!(session_id = %session_id, error = %error, "Cleanup step failed");
            }
        }

        errors
    }

    /// Remove only the filesystem side: final and staging folders
    pub async fn purge_artifacts(&self, session_id: Uuid) -> Vec<CleanupError> {
        let mut errors = Vec::new();

        for dir in [
            self.layout.final_dir(session_id),
            self.layout.staging_dir(session_id),
        ] {
            if let Err(e) = remove_dir(&dir).await {
                errors.push(e);
            }
        }

        errors
    }
}

async fn remove_dir(path: &Path) -> Result<(), CleanupError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CleanupError::Filesystem {
            path: path.to_path_buf(),
            source,
        }),
    }
}
