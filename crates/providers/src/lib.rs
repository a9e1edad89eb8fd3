use async_trait::async_trait;
use presence_sync_core::{CredentialState, PlayerSnapshot, SeekSignal};
use thiserror::Error;

pub mod credentials;
pub mod deezer;
pub mod spotify;

pub use credentials::{CredentialStore, CredentialStoreError, TomlCredentialStore};
pub use deezer::DeezerMetadata;
pub use spotify::{SpotifyCovers, SpotifyTokenRefresher};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("snapshot source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("track not found: {0}")]
    NotFound(String),
    #[error("metadata unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ArtworkError {
    #[error("artwork provider rejected the access credential")]
    Unauthorized,
    #[error("no artwork for {0}")]
    NotFound(String),
    #[error("no stored credential for the artwork provider")]
    MissingCredential,
    #[error("artwork lookup failed: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: String,
    pub artists: Vec<String>,
    pub album_title: Option<String>,
    pub track_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: i64,
    pub refresh_token: Option<String>,
}

#[async_trait]
pub trait SnapshotSource: Send {
    fn name(&self) -> &'static str;

    async fn snapshot(&mut self) -> Result<PlayerSnapshot, SourceError>;

    /// Sources that can observe seeks raise `signal` whenever the user moves the playhead.
    fn attach_seek_signal(&mut self, _signal: SeekSignal) {}
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn lookup(&self, snapshot: &PlayerSnapshot) -> Result<TrackMetadata, MetadataError>;
}

#[async_trait]
pub trait ArtworkProvider: Send + Sync {
    async fn cover(
        &self,
        identifier: &str,
        region: &str,
        credential: &CredentialState,
    ) -> Result<String, ArtworkError>;
}

#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, RefreshError>;
}

pub struct SnapshotMetadata;

#[async_trait]
impl MetadataProvider for SnapshotMetadata {
    async fn lookup(&self, snapshot: &PlayerSnapshot) -> Result<TrackMetadata, MetadataError> {
        if snapshot.track_title.trim().is_empty() {
            return Err(MetadataError::Unavailable(
                "snapshot carries no track title".to_string(),
            ));
        }
        Ok(TrackMetadata {
            title: snapshot.track_title.clone(),
            artists: snapshot.artist_names.clone(),
            album_title: snapshot.album_title.clone(),
            track_url: snapshot
                .track_id
                .as_deref()
                .map(presence_sync_core::urls::deezer_track_url),
        })
    }
}

pub fn build_snapshot_source(preferred_player: Option<String>) -> Box<dyn SnapshotSource> {
    match platform::mpris_source(preferred_player) {
        Some(source) => source,
        None => Box::new(NullSource),
    }
}

struct NullSource;

#[async_trait]
impl SnapshotSource for NullSource {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn snapshot(&mut self) -> Result<PlayerSnapshot, SourceError> {
        Err(SourceError::Unavailable(
            "no player source on this platform".to_string(),
        ))
    }
}

mod platform {
    use super::SnapshotSource;

    #[cfg(target_os = "linux")]
    pub fn mpris_source(preferred: Option<String>) -> Option<Box<dyn SnapshotSource>> {
        Some(Box::new(crate::mpris::MprisSource::new(preferred)))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn mpris_source(_preferred: Option<String>) -> Option<Box<dyn SnapshotSource>> {
        None
    }
}

#[cfg(target_os = "linux")]
mod mpris;
