//! Staging Storage
//!
//! Filesystem layout for a session's artifacts and the chunk write path.
//!
//! ```text
//! <staging_root>/<session_id>/<session_id>_<index>.<type>   staged chunks
//! <final_root>/<session_id>/<session_id>.<type>             compiled artifact
//! ```

use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::types::UploadError;

/// Extension used when the declared file type is empty
const FALLBACK_EXTENSION: &str = "bin";

// ============================================================================
// Layout
// ============================================================================

/// Per-session directory layout under the two configured roots
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    staging_root: PathBuf,
    final_root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(staging_root: impl Into<PathBuf>, final_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            final_root: final_root.into(),
        }
    }

    pub fn staging_dir(&self, session_id: Uuid) -> PathBuf {
        self.staging_root.join(session_id.to_string())
    }

    pub fn chunk_path(&self, session_id: Uuid, chunk_index: u32, file_type: &str) -> PathBuf {
        self.staging_dir(session_id).join(format!(
            "{}_{}.{}",
            session_id,
            chunk_index,
            extension(file_type)
        ))
    }

    pub fn final_dir(&self, session_id: Uuid) -> PathBuf {
        self.final_root.join(session_id.to_string())
    }

    pub fn final_path(&self, session_id: Uuid, file_type: &str) -> PathBuf {
        self.final_dir(session_id)
            .join(format!("{}.{}", session_id, extension(file_type)))
    }
}

/// Declared file type without a leading dot
pub fn extension(file_type: &str) -> &str {
    match file_type.trim_start_matches('.') {
        "" => FALLBACK_EXTENSION,
        ext => ext,
    }
}

/// Check that a declared file type is safe to embed in a file name
pub fn is_safe_file_type(file_type: &str) -> bool {
    file_type.len() <= 32
        && file_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'))
        && !file_type.contains("..")
}

// ============================================================================
// Staging Area
// ============================================================================

/// Writes chunk bytes into a session's staging directory
#[derive(Debug, Clone)]
pub struct StagingArea {
    layout: ArtifactLayout,
}

impl StagingArea {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Persist one chunk, replacing any earlier copy of the same index
    ///
    /// Bytes land in a temporary sibling first and are renamed into place,
    /// so a failed retry leaves a previously staged copy untouched.
    pub async fn stage_chunk(
        &self,
        session_id: Uuid,
        chunk_index: u32,
        file_type: &str,
        data: &[u8],
    ) -> Result<PathBuf, UploadError> {
        let failure = |source: std::io::Error| UploadError::ChunkStageFailure {
            index: chunk_index,
            source,
        };

        tokio::fs::create_dir_all(self.layout.staging_dir(session_id))
            .await
            .map_err(failure)?;

        let path = self.layout.chunk_path(session_id, chunk_index, file_type);
        let partial = partial_path(&path);

        if let Err(e) = tokio::fs::write(&partial, data).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(failure(e));
        }

        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(failure(e));
        }

        Ok(path)
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.part", Uuid::new_v4().simple()));
    path.with_file_name(name)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn staging(temp: &TempDir) -> StagingArea {
        StagingArea::new(ArtifactLayout::new(
            temp.path().join("staging"),
            temp.path().join("final"),
        ))
    }

    #[test]
    fn test_layout_paths() {
        let layout = ArtifactLayout::new("/tmp/staging", "/tmp/final");
        let id = Uuid::nil();

        assert_eq!(
            layout.chunk_path(id, 3, ".png"),
            PathBuf::from(format!("/tmp/staging/{id}/{id}_3.png"))
        );
        assert_eq!(
            layout.final_path(id, "png"),
            PathBuf::from(format!("/tmp/final/{id}/{id}.png"))
        );
        assert_eq!(
            layout.final_path(id, ""),
            PathBuf::from(format!("/tmp/final/{id}/{id}.bin"))
        );
    }

    #[test]
    fn test_file_type_validation() {
        assert!(is_safe_file_type("png"));
        assert!(is_safe_file_type(".tar.gz"));
        assert!(!is_safe_file_type("../etc"));
        assert!(!is_safe_file_type("a/b"));
    }

    #[tokio::test]
    async fn test_stage_chunk_overwrites_retry() {
        let temp = TempDir::new().unwrap();
        let staging = staging(&temp);
        let id = Uuid::new_v4();

        let path = staging.stage_chunk(id, 1, "txt", b"first").await.unwrap();
        staging.stage_chunk(id, 1, "txt", b"second").await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"second");

        let mut entries = tokio::fs::read_dir(staging.layout().staging_dir(id)).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_stage_chunk_failure_leaves_no_partial() {
        let temp = TempDir::new().unwrap();
        let staging = staging(&temp);
        let id = Uuid::new_v4();

        let good = staging.stage_chunk(id, 2, "txt", b"good").await.unwrap();

        // A directory in the way of the rename target makes the write fail.
        let blocked = staging.layout().chunk_path(id, 3, "txt");
        tokio::fs::create_dir_all(&blocked).await.unwrap();
        let result = staging.stage_chunk(id, 3, "txt", b"bad").await;

        assert!(matches!(
            result,
            Err(UploadError::ChunkStageFailure { index: 3, .. })
        ));
        assert_eq!(tokio::fs::read(&good).await.unwrap(), b"good");

        let mut entries = tokio::fs::read_dir(staging.layout().staging_dir(id)).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().to_string();
            assert!(!name.ends_with(".part"), "leftover partial file {name}");
        }
    }
}
