//! Upload Service
//!
//! Chunk ingest path and completion evaluator.
//!
//! Flow per request:
//! 1. Resolve the session from the token, or open a new one (evicting any
//!    stale session bound to the same client fingerprint)
//! 2. Stage the chunk bytes
//! 3. Record the attempt in the session (received or failed) and, in the
//!    same atomic update, claim the session for finalize when every chunk is
//!    present and the client asked for it
//! 4. Finalize: refuse on failed chunks, otherwise compile, publish, clean up

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::binding::IdentityBindings;
use super::cleanup::Cleanup;
use super::compiler::Compiler;
use super::publisher::Publisher;
use super::registry::SessionRegistry;
use super::staging::{is_safe_file_type, ArtifactLayout, StagingArea};
use super::types::{
    ChunkReceipt, ChunkRequest, ChunkRequestMeta, ClientFingerprint, CompletionReceipt, FileMeta,
    PartialFailureReceipt, UploadError, UploadOutcome, UploadReply, UploadSession,
};

/// What the registry update decided for one chunk attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    /// Session already claimed by a finalize attempt; nothing recorded
    Finalizing,
    /// Attempt recorded, upload continues
    Recorded,
    /// Attempt recorded and this request owns the finalize
    Finalize,
}

// ============================================================================
// Upload Service
// ============================================================================

#[derive(Clone)]
pub struct UploadService {
    inner: Arc<UploadServiceInner>,
}

struct UploadServiceInner {
    registry: SessionRegistry,
    bindings: IdentityBindings,
    staging: StagingArea,
    compiler: Compiler,
    publisher: Publisher,
    cleanup: Cleanup,
    session_ttl: Duration,
}

impl UploadService {
    pub fn new(
        registry: SessionRegistry,
        layout: ArtifactLayout,
        publisher: Publisher,
        session_ttl: Duration,
    ) -> Self {
        let bindings = IdentityBindings::new(registry.clone());
        let cleanup = Cleanup::new(layout.clone(), registry.clone(), bindings.clone());

        Self {
            inner: Arc::new(UploadServiceInner {
                registry,
                bindings,
                staging: StagingArea::new(layout.clone()),
                compiler: Compiler::new(layout),
                publisher,
                cleanup,
                session_ttl,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn bindings(&self) -> &IdentityBindings {
        &self.inner.bindings
    }

    pub fn cleanup(&self) -> &Cleanup {
        &self.inner.cleanup
    }

    pub fn session_ttl(&self) -> Duration {
        self.inner.session_ttl
    }

    // ========================================================================
    // Ingest
    // ========================================================================

    /// Handle one inbound chunk
    pub async fn handle_chunk(&self, request: ChunkRequest) -> Result<UploadReply, UploadError> {
        validate_meta(&request.meta)?;

        let (session, new_session) = match request.session_token.as_deref() {
            Some(token) => (self.resume_session(token).await?, false),
            None => (
                self.open_session(&request.fingerprint, &request.meta).await?,
                true,
            ),
        };

        if request.meta.total_chunks != session.file.total_chunks {
            return Err(UploadError::InvalidRequest(format!(
                "total_chunks is fixed at {} for this session",
                session.file.total_chunks
            )));
        }

        let outcome = self.ingest(&session, &request).await?;

        Ok(UploadReply {
            session_id: session.id,
            new_session,
            outcome,
        })
    }

    /// Look up the session named by a client token
    pub async fn resume_session(&self, token: &str) -> Result<UploadSession, UploadError> {
        let id = Uuid::parse_str(token)
            .map_err(|_| UploadError::SessionInvalidToken(token.to_string()))?;

        self.inner
            .registry
            .get(id)
            .await?
            .ok_or_else(|| UploadError::SessionExpired(id.to_string()))
    }

    /// Create a session for `fingerprint`, evicting the one it had before
    pub async fn open_session(
        &self,
        fingerprint: &ClientFingerprint,
        meta: &ChunkRequestMeta,
    ) -> Result<UploadSession, UploadError> {
        // Held until the new session and its binding are written.
        let held = self.inner.bindings.hold(fingerprint).await;

        if let Some(stale) = self.inner.bindings.take_held(fingerprint, &held).await? {
            tracing::info!(
                session_id = %stale,
                client = %fingerprint,
                "Evicting stale session for returning client"
            );
            // Failures are logged by cleanup and must not block the new session.
            let _ = self.inner.cleanup.purge_evicted(stale).await;
        }

        let session = UploadSession::new(
            fingerprint.clone(),
            FileMeta::from(meta),
            self.inner.session_ttl,
        );
        let binding = self.inner.bindings.entry(fingerprint, session.id);
        self.inner.registry.create(&session, &[binding]).await?;
        drop(held);

        tracing::info!(
            session_id = %session.id,
            file_name = %session.file.name,
            total_chunks = session.file.total_chunks,
            expires_at = %session.expires_at,
            "Created upload session"
        );

        Ok(session)
    }

    async fn ingest(
        &self,
        session: &UploadSession,
        request: &ChunkRequest,
    ) -> Result<UploadOutcome, UploadError> {
        let id = session.id;
        let index = request.meta.chunk_number;

        if session.finalizing {
            return Err(UploadError::SessionFinalizing(id));
        }
        if !session.is_valid_index(index) {
            return Err(UploadError::ChunkIndexOutOfRange {
                index,
                total: session.file.total_chunks,
            });
        }

        let staged = match self
            .inner
            .staging
            .stage_chunk(id, index, &session.file.file_type, &request.data)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(session_id = %id, chunk_index = index, error = %e, "Chunk staging failed");
                false
            }
        };

        let finalize_requested = request.meta.compile_status;
        let updated = self
            .inner
            .registry
            .update(id, |s| {
                if s.finalizing {
                    return Decision::Finalizing;
                }
                if staged {
                    s.mark_chunk_received(index);
                } else {
                    s.mark_chunk_failed(index);
                }
                if finalize_requested && s.is_complete() {
                    s.finalizing = true;
                    Decision::Finalize
                } else {
                    Decision::Recorded
                }
            })
            .await?;

        let (session, decision) = match updated {
            Some(updated) => updated,
            None => {
                // The session expired or was cleaned up while the chunk was
                // being written; the reaper will not see this folder again.
                let _ = self.inner.cleanup.purge_artifacts(id).await;
                return Err(UploadError::SessionExpired(id.to_string()));
            }
        };

        let receipt = ChunkReceipt {
            session_id: id,
            chunk_number: index,
            staged,
            chunks_received: session.received_chunks.len(),
            total_chunks: session.file.total_chunks,
        };

        match decision {
            Decision::Finalizing => Err(UploadError::SessionFinalizing(id)),
            Decision::Finalize => self.finalize(session).await,
            Decision::Recorded if staged => {
                tracing::debug!(
                    session_id = %id,
                    chunk_index = index,
                    chunks_received = receipt.chunks_received,
                    total_chunks = receipt.total_chunks,
                    "Chunk staged"
                );
                Ok(UploadOutcome::Accepted(receipt))
            }
            Decision::Recorded => Ok(UploadOutcome::StageFailed(receipt)),
        }
    }

    // ========================================================================
    // Finalize
    // ========================================================================

    /// Run a claimed finalize to a terminal outcome
    ///
    /// Every path ends with the session and its artifacts purged.
    async fn finalize(&self, session: UploadSession) -> Result<UploadOutcome, UploadError> {
        let id = session.id;

        if !session.failed_chunks.is_empty() {
            let failed_chunk_list = session.failed_chunks.clone();
            let cleanup_errors = self.inner.cleanup.purge(id).await;

            tracing::warn!(
                session_id = %id,
                failed_chunks = ?failed_chunk_list,
                "Upload finalized with failed chunks"
            );

            return Ok(UploadOutcome::PartialFailure(PartialFailureReceipt {
                session_id: id,
                failed_chunk_list,
                cleanup_errors: cleanup_errors.iter().map(|e| e.to_string()).collect(),
            }));
        }

        let published = self.compile_and_publish(&session).await;
        let cleanup_errors = self.inner.cleanup.purge(id).await;

        match published {
            Ok((bucket, object_key, size)) => {
                tracing::info!(
                    session_id = %id,
                    file_name = %session.file.name,
                    size = size,
                    key = %object_key,
                    "Upload complete"
                );
                Ok(UploadOutcome::Completed(CompletionReceipt {
                    session_id: id,
                    bucket,
                    object_key,
                    size,
                    cleanup_errors: cleanup_errors.iter().map(|e| e.to_string()).collect(),
                }))
            }
            Err(e) => {
                tracing::error!(session_id = %id, error = %e, "Finalize failed, session discarded");
                Err(e)
            }
        }
    }

    async fn compile_and_publish(
        &self,
        session: &UploadSession,
    ) -> Result<(String, String, u64), UploadError> {
        let artifact = self
            .inner
            .compiler
            .compile(session.id, session.file.total_chunks, &session.file.file_type)
            .await?;

        let object = self.inner.publisher.publish(&artifact.path, session).await?;

        Ok((object.bucket, object.key, artifact.size))
    }
}

fn validate_meta(meta: &ChunkRequestMeta) -> Result<(), UploadError> {
    if meta.total_chunks == 0 {
        return Err(UploadError::InvalidRequest(
            "total_chunks must be at least 1".to_string(),
        ));
    }
    if meta.chunk_number == 0 || meta.chunk_number > meta.total_chunks {
        return Err(UploadError::ChunkIndexOutOfRange {
            index: meta.chunk_number,
            total: meta.total_chunks,
        });
    }
    if !is_safe_file_type(&meta.file_type) {
        return Err(UploadError::InvalidRequest(format!(
            "unsupported file type: {}",
            meta.file_type
        )));
    }
    Ok(())
}
