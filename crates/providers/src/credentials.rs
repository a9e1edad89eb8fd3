use async_trait::async_trait;
use presence_sync_core::CredentialState;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CredentialStoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize credentials: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Persistent home of the artwork provider's credential. Shared with other writers; the
/// last write wins.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<CredentialState>, CredentialStoreError>;
    async fn save(&self, credential: &CredentialState) -> Result<(), CredentialStoreError>;
}

pub struct TomlCredentialStore {
    path: PathBuf,
}

impl TomlCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for TomlCredentialStore {
    async fn load(&self) -> Result<Option<CredentialState>, CredentialStoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CredentialStoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let credential = toml::from_str(&raw).map_err(|source| CredentialStoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(credential))
    }

    async fn save(&self, credential: &CredentialState) -> Result<(), CredentialStoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CredentialStoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let data = toml::to_string_pretty(credential)?;
        tokio::fs::write(&self.path, data)
            .await
            .map_err(|source| CredentialStoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = %self.path.display(), "credential state written");
        Ok(())
    }
}
