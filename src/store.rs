//! Artifact persistence: file-map materialization and the storage boundary.
//!
//! Durable storage (object stores, signed URLs) lives outside the core
//! behind [`ArtifactStore`]; the bundled [`LocalArtifactStore`] writes
//! project trees under a local output directory and remembers where.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::codemap::FileMap;

/// Write `files` under `root` as a directory tree: entries with absent
/// content become empty directories, entries with content become UTF-8
/// text files, parent directories are created as needed. Returns the
/// written paths in map order.
///
/// Paths are required to be relative and free of `..` components — the map
/// comes from generated text and must not escape `root`.
pub async fn materialize(files: &FileMap, root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(files.len());
    for (path, content) in files.iter() {
        validate_relative(path)?;
        let full = root.join(path);
        match content {
            None => {
                tokio::fs::create_dir_all(&full).await?;
            }
            Some(text) => {
                if let Some(parent) = full.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&full, text).await?;
            }
        }
        written.push(full);
    }
    Ok(written)
}

fn validate_relative(path: &str) -> io::Result<()> {
    let p = Path::new(path);
    let escapes = p.is_absolute()
        || p.components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
    if escapes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("generated path escapes the project root: {}", path),
        ));
    }
    Ok(())
}

/// External collaborator that persists a generated project and later hands
/// back a reference to it.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `files` under `project_id`, returning a durable location
    /// reference.
    async fn persist(&self, project_id: &str, files: &FileMap) -> Result<String>;

    /// The stored location for a previously persisted project, if any.
    async fn lookup(&self, project_id: &str) -> Option<String>;
}

/// Filesystem-backed store: each project is materialized under
/// `<root>/<project_id>/`.
pub struct LocalArtifactStore {
    root: PathBuf,
    index: Mutex<HashMap<String, String>>,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn persist(&self, project_id: &str, files: &FileMap) -> Result<String> {
        let project_dir = self.root.join(project_id);
        tokio::fs::create_dir_all(&project_dir)
            .await
            .with_context(|| format!("Failed to create {}", project_dir.display()))?;

        if let Err(e) = materialize(files, &project_dir).await {
            // Do not leave a half-written tree behind a recorded id.
            let _ = tokio::fs::remove_dir_all(&project_dir).await;
            return Err(anyhow::Error::from(e)
                .context(format!("Failed to write project {}", project_id)));
        }

        let location = project_dir.display().to_string();
        self.index
            .lock()
            .await
            .insert(project_id.to_string(), location.clone());
        Ok(location)
    }

    async fn lookup(&self, project_id: &str) -> Option<String> {
        self.index.lock().await.get(project_id).cloned()
    }
}
