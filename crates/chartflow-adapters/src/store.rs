//! JSON result store

use async_trait::async_trait;
use chartflow_core::{PersistError, ResultDocument, ResultStore};
use std::path::{Path, PathBuf};

/// Writes the result document as pretty-printed JSON
///
/// The document is written to a sibling temp file and renamed into place,
/// so readers never see a half-written file.
#[derive(Debug, Clone)]
pub struct JsonResultStore {
    path: PathBuf,
}

impl JsonResultStore {
    /// Create new store writing to `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a previously written document
    ///
    /// # Errors
    /// - `PersistError::Io` if the file cannot be read
    /// - `PersistError::Serialize` if it is not a result document
    pub async fn load(&self) -> Result<ResultDocument, PersistError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| self.io_error(e))?;
        serde_json::from_slice(&bytes).map_err(|e| PersistError::Serialize(e.to_string()))
    }

    fn io_error(&self, error: std::io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.display().to_string(),
            message: error.to_string(),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "results.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ResultStore for JsonResultStore {
    async fn persist(&self, document: &ResultDocument) -> Result<PathBuf, PersistError> {
        let json = serde_json::to_vec_pretty(document)
            .map_err(|e| PersistError::Serialize(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, &json)
            .await
            .map_err(|e| self.io_error(e))?;
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(self.io_error(e));
        }

        tracing::info!(
            path = %self.path.display(),
            results = document.results.len(),
            "results saved"
        );
        Ok(self.path.clone())
    }
}
