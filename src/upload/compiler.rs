//! Compiler
//!
//! Concatenates a session's staged chunks, in ascending index order, into
//! the final artifact. Arrival order never matters here.

use std::path::PathBuf;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::staging::ArtifactLayout;
use super::types::CompileError;

/// Final artifact produced by a compile run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub path: PathBuf,
    pub size: u64,
}

/// Assembles staged chunks into one file
#[derive(Debug, Clone)]
pub struct Compiler {
    layout: ArtifactLayout,
}

impl Compiler {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    /// Write `1..=total_chunks` into the session's final artifact
    ///
    /// The artifact is created exclusively; an existing file is an error.
    pub async fn compile(
        &self,
        session_id: Uuid,
        total_chunks: u32,
        file_type: &str,
    ) -> Result<CompiledArtifact, CompileError> {
        let final_dir = self.layout.final_dir(session_id);
        tokio::fs::create_dir_all(&final_dir)
            .await
            .map_err(|source| CompileError::Io {
                path: final_dir.clone(),
                source,
            })?;

        let path = self.layout.final_path(session_id, file_type);
        let io_err = |source: std::io::Error| CompileError::Io {
            path: path.clone(),
            source,
        };

        let mut output = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(io_err)?;

        let mut size = 0u64;
        for index in 1..=total_chunks {
            let chunk_path = self.layout.chunk_path(session_id, index, file_type);
            let mut chunk = match File::open(&chunk_path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(CompileError::MissingChunk { index });
                }
                Err(source) => {
                    return Err(CompileError::Io {
                        path: chunk_path,
                        source,
                    })
                }
            };

            size += tokio::io::copy(&mut chunk, &mut output)
                .await
                .map_err(|source| CompileError::Io {
                    path: chunk_path.clone(),
                    source,
                })?;
        }

        output.flush().await.map_err(io_err)?;
        output.sync_all().await.map_err(io_err)?;

        tracing::info!(
            session_id = %session_id,
            chunks = total_chunks,
            size = size,
            path = %path.display(),
            "Compiled final artifact"
        );

        Ok(CompiledArtifact { path, size })
    }
}
