use crate::EngineError;
use presence_sync_core::{urls, CredentialState, PlayerSnapshot, PresencePayload};
use presence_sync_providers::{
    ArtworkError, ArtworkProvider, CredentialRefresher, CredentialStore, MetadataProvider,
    TrackMetadata,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Absolute `(start, end)` epoch milliseconds for a track observed at `poll_time_ms`.
/// `end - start` is `duration_ms` whenever both ends fit in an `i64`; otherwise they saturate.
pub fn playback_window(poll_time_ms: i64, duration_ms: u64, remaining_ms: u64) -> (i64, i64) {
    let remaining = i64::try_from(remaining_ms).unwrap_or(i64::MAX);
    let duration = i64::try_from(duration_ms).unwrap_or(i64::MAX);
    let end = poll_time_ms.saturating_add(remaining);
    (end.saturating_sub(duration), end)
}

const ARTWORK_ARTIST_SEPARATOR: &str = ", ";

pub struct ArtworkChain {
    provider: Arc<dyn ArtworkProvider>,
    refresher: Arc<dyn CredentialRefresher>,
    store: Arc<dyn CredentialStore>,
    region: String,
}

impl ArtworkChain {
    pub fn new(
        provider: Arc<dyn ArtworkProvider>,
        refresher: Arc<dyn CredentialRefresher>,
        store: Arc<dyn CredentialStore>,
        region: String,
    ) -> Self {
        Self {
            provider,
            refresher,
            store,
            region,
        }
    }

    async fn lookup(&self, identifier: &str) -> Result<String, EngineError> {
        let credential = self
            .store
            .load()
            .await
            .map_err(|err| ArtworkError::Transport(err.to_string()))?
            .ok_or(ArtworkError::MissingCredential)?;

        match self
            .provider
            .cover(identifier, &self.region, &credential)
            .await
        {
            Err(ArtworkError::Unauthorized) => {
                info!("artwork access token rejected; refreshing it");
                let renewed = self.renew(&credential).await?;
                Ok(self
                    .provider
                    .cover(identifier, &self.region, &renewed)
                    .await?)
            }
            other => Ok(other?),
        }
    }

    async fn renew(&self, rejected: &CredentialState) -> Result<CredentialState, EngineError> {
        match self.store.load().await {
            Ok(Some(stored)) if stored.access_token != rejected.access_token => {
                debug!("credential was already replaced by another writer");
                return Ok(stored);
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "cannot re-read credential store"),
        }

        let token = self.refresher.refresh(&rejected.refresh_token).await?;
        let renewed = CredentialState {
            access_token: token.access_token,
            token_type: token.token_type,
            expires_at: token.expires_at,
            refresh_token: token
                .refresh_token
                .unwrap_or_else(|| rejected.refresh_token.clone()),
        };
        if let Err(err) = self.store.save(&renewed).await {
            warn!(error = %err, "refreshed credential could not be persisted");
        }
        Ok(renewed)
    }
}

pub struct MetadataResolver {
    metadata: Arc<dyn MetadataProvider>,
    artwork: Option<ArtworkChain>,
    separator: String,
}

impl MetadataResolver {
    pub fn new(metadata: Arc<dyn MetadataProvider>, separator: impl Into<String>) -> Self {
        Self {
            metadata,
            artwork: None,
            separator: separator.into(),
        }
    }

    pub fn with_artwork(mut self, chain: ArtworkChain) -> Self {
        self.artwork = Some(chain);
        self
    }

    /// Builds the payload for `snapshot` as observed at `poll_time_ms`. Only textual metadata
    /// failures are returned; missing artwork just leaves the cover empty.
    pub async fn resolve(
        &self,
        snapshot: &PlayerSnapshot,
        poll_time_ms: i64,
    ) -> Result<PresencePayload, EngineError> {
        let meta = self.metadata.lookup(snapshot).await?;
        let (start_timestamp, end_timestamp) =
            playback_window(poll_time_ms, snapshot.duration_ms, snapshot.remaining_ms);

        let track_artists = if meta.artists.is_empty() {
            snapshot.media_type.label().to_string()
        } else {
            meta.artists.join(&self.separator)
        };
        let album_cover_url = self.cover(snapshot, &meta).await;

        Ok(PresencePayload {
            track_title: meta.title,
            track_artists,
            album_title: meta.album_title,
            album_cover_url,
            track_url: meta.track_url,
            is_playing: snapshot.is_playing,
            start_timestamp,
            end_timestamp,
            media_type: snapshot.media_type,
        })
    }

    async fn cover(&self, snapshot: &PlayerSnapshot, meta: &TrackMetadata) -> Option<String> {
        if let Some(chain) = &self.artwork {
            let identifier = urls::artwork_identifier(
                &meta.title,
                &meta.artists.join(ARTWORK_ARTIST_SEPARATOR),
                meta.album_title.as_deref(),
            );
            match chain.lookup(&identifier).await {
                Ok(url) => return Some(url),
                Err(err) => warn!(error = %err, "primary artwork unavailable; using album image"),
            }
        }
        snapshot
            .album_id
            .as_deref()
            .map(urls::deezer_album_image_url)
    }
}

#[cfg(test)]
mod tests {
    use super::{playback_window, ArtworkChain, MetadataResolver};
    use crate::EngineError;
    use async_trait::async_trait;
    use presence_sync_core::{CredentialState, MediaType, PlayerSnapshot};
    use presence_sync_providers::{
        ArtworkError, ArtworkProvider, CredentialRefresher, CredentialStore, CredentialStoreError,
        MetadataError, MetadataProvider, RefreshError, RefreshedToken, SnapshotMetadata,
        TrackMetadata,
    };
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct ScriptedCovers {
        replies: Mutex<VecDeque<Result<String, ArtworkError>>>,
        seen_tokens: Mutex<Vec<String>>,
        seen_queries: Mutex<Vec<String>>,
    }

    impl ScriptedCovers {
        fn new(replies: Vec<Result<String, ArtworkError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen_tokens: Mutex::new(Vec::new()),
                seen_queries: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.seen_tokens.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ArtworkProvider for ScriptedCovers {
        async fn cover(
            &self,
            identifier: &str,
            _region: &str,
            credential: &CredentialState,
        ) -> Result<String, ArtworkError> {
            self.seen_queries
                .lock()
                .unwrap()
                .push(identifier.to_string());
            self.seen_tokens
                .lock()
                .unwrap()
                .push(credential.access_token.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ArtworkError::NotFound("script exhausted".to_string())))
        }
    }

    struct FakeRefresher {
        succeed: bool,
        calls: Mutex<u32>,
    }

    impl FakeRefresher {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                succeed,
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl CredentialRefresher for FakeRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, RefreshError> {
            *self.calls.lock().unwrap() += 1;
            assert_eq!(refresh_token, "refresh-1");
            if self.succeed {
                Ok(RefreshedToken {
                    access_token: "fresh".to_string(),
                    token_type: "Bearer".to_string(),
                    expires_at: 9_999,
                    refresh_token: None,
                })
            } else {
                Err(RefreshError::RefreshFailed("invalid_grant".to_string()))
            }
        }
    }

    struct MemoryStore {
        loads: Mutex<VecDeque<CredentialState>>,
        saved: Mutex<Vec<CredentialState>>,
    }

    impl MemoryStore {
        fn new(states: Vec<CredentialState>) -> Arc<Self> {
            Arc::new(Self {
                loads: Mutex::new(states.into()),
                saved: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CredentialStore for MemoryStore {
        async fn load(&self) -> Result<Option<CredentialState>, CredentialStoreError> {
            if let Some(saved) = self.saved.lock().unwrap().last() {
                return Ok(Some(saved.clone()));
            }
            let mut loads = self.loads.lock().unwrap();
            let current = loads.front().cloned();
            if loads.len() > 1 {
                loads.pop_front();
            }
            Ok(current)
        }

        async fn save(&self, credential: &CredentialState) -> Result<(), CredentialStoreError> {
            self.saved.lock().unwrap().push(credential.clone());
            Ok(())
        }
    }

    struct FailingMetadata;

    #[async_trait]
    impl MetadataProvider for FailingMetadata {
        async fn lookup(&self, _snapshot: &PlayerSnapshot) -> Result<TrackMetadata, MetadataError> {
            Err(MetadataError::Unavailable("catalogue down".to_string()))
        }
    }

    fn credential(token: &str) -> CredentialState {
        CredentialState {
            access_token: token.to_string(),
            token_type: "Bearer".to_string(),
            expires_at: 0,
            refresh_token: "refresh-1".to_string(),
        }
    }

    fn snapshot() -> PlayerSnapshot {
        PlayerSnapshot {
            track_id: Some("3135556".to_string()),
            track_title: "Harder, Better, Faster, Stronger".to_string(),
            album_id: Some("302127".to_string()),
            album_title: Some("Discovery".to_string()),
            artist_names: vec!["Daft Punk".to_string(), "Edwin Birdsong".to_string()],
            is_playing: true,
            duration_ms: 224_000,
            remaining_ms: 100_000,
            media_type: MediaType::Track,
            is_live_stream: false,
        }
    }

    const SECONDARY: &str = "https://api.deezer.com/album/302127/image";

    fn resolver(
        covers: Arc<ScriptedCovers>,
        refresher: Arc<FakeRefresher>,
        store: Arc<MemoryStore>,
    ) -> MetadataResolver {
        MetadataResolver::new(Arc::new(SnapshotMetadata), " & ").with_artwork(ArtworkChain::new(
            covers,
            refresher,
            store,
            "FR".to_string(),
        ))
    }

    #[test]
    fn window_length_always_equals_duration() {
        for (duration, remaining) in [
            (0, 0),
            (224_000, 224_000),
            (224_000, 0),
            (224_000, 1),
            (4 * 3_600_000 + 59_000, 3_600_000),
        ] {
            let (start, end) = playback_window(1_700_000_000_000, duration, remaining);
            assert_eq!(end - start, duration as i64);
            assert_eq!(end, 1_700_000_000_000 + remaining as i64);
        }
    }

    #[test]
    fn absurd_lengths_saturate_instead_of_overflowing() {
        let now = 1_700_000_000_000;

        let (start, end) = playback_window(now, 1 << 63, 0);
        assert_eq!(end, now);
        assert_eq!(start, now.saturating_sub(i64::MAX));
        assert!(start < end);

        let (start, end) = playback_window(now, u64::MAX, u64::MAX);
        assert_eq!(end, i64::MAX);
        assert_eq!(start, 0);
        assert!(end - start > 0);

        let (start, end) = playback_window(now, i64::MAX as u64 / 2, i64::MAX as u64 / 4);
        assert_eq!(end - start, i64::MAX / 2);
    }

    #[tokio::test]
    async fn joins_artists_and_computes_window() {
        let resolver = MetadataResolver::new(Arc::new(SnapshotMetadata), " & ");
        let payload = resolver.resolve(&snapshot(), 1_000_000).await.unwrap();

        assert_eq!(payload.track_artists, "Daft Punk & Edwin Birdsong");
        assert_eq!(payload.end_timestamp, 1_100_000);
        assert_eq!(payload.start_timestamp, 1_100_000 - 224_000);
        assert_eq!(payload.album_cover_url.as_deref(), Some(SECONDARY));
        assert_eq!(
            payload.track_url.as_deref(),
            Some("https://www.deezer.com/track/3135556")
        );
    }

    #[tokio::test]
    async fn empty_artists_fall_back_to_media_type() {
        let resolver = MetadataResolver::new(Arc::new(SnapshotMetadata), ", ");
        let radio = PlayerSnapshot {
            artist_names: Vec::new(),
            album_id: None,
            media_type: MediaType::Radio,
            ..snapshot()
        };

        let payload = resolver.resolve(&radio, 0).await.unwrap();
        assert_eq!(payload.track_artists, "Radio");
        assert!(payload.album_cover_url.is_none());
    }

    #[tokio::test]
    async fn primary_cover_wins_without_refresh() {
        let covers = ScriptedCovers::new(vec![Ok("https://i.scdn.co/image/a".to_string())]);
        let refresher = FakeRefresher::new(true);
        let store = MemoryStore::new(vec![credential("stale")]);
        let resolver = resolver(covers.clone(), refresher.clone(), store);

        let payload = resolver.resolve(&snapshot(), 0).await.unwrap();
        assert_eq!(
            payload.album_cover_url.as_deref(),
            Some("https://i.scdn.co/image/a")
        );
        assert_eq!(covers.calls(), vec!["stale"]);
        assert_eq!(*refresher.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn cover_query_names_every_artist() {
        let covers = ScriptedCovers::new(vec![Ok("https://i.scdn.co/image/a".to_string())]);
        let store = MemoryStore::new(vec![credential("stale")]);
        let resolver = resolver(covers.clone(), FakeRefresher::new(true), store);

        let payload = resolver.resolve(&snapshot(), 0).await.unwrap();
        assert_eq!(payload.track_artists, "Daft Punk & Edwin Birdsong");
        assert_eq!(
            *covers.seen_queries.lock().unwrap(),
            vec![
                "track:Harder, Better, Faster, Stronger artist:Daft Punk, Edwin Birdsong album:Discovery"
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn rejected_token_is_refreshed_and_retried_once() {
        let covers = ScriptedCovers::new(vec![
            Err(ArtworkError::Unauthorized),
            Ok("https://i.scdn.co/image/retried".to_string()),
        ]);
        let refresher = FakeRefresher::new(true);
        let store = MemoryStore::new(vec![credential("stale")]);
        let resolver = resolver(covers.clone(), refresher.clone(), store.clone());

        let payload = resolver.resolve(&snapshot(), 0).await.unwrap();
        assert_eq!(
            payload.album_cover_url.as_deref(),
            Some("https://i.scdn.co/image/retried")
        );
        assert_eq!(covers.calls(), vec!["stale", "fresh"]);
        assert_eq!(*refresher.calls.lock().unwrap(), 1);

        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].access_token, "fresh");
        assert_eq!(saved[0].refresh_token, "refresh-1");
    }

    #[tokio::test]
    async fn failed_refresh_degrades_to_album_image() {
        let covers = ScriptedCovers::new(vec![Err(ArtworkError::Unauthorized)]);
        let refresher = FakeRefresher::new(false);
        let store = MemoryStore::new(vec![credential("stale")]);
        let resolver = resolver(covers.clone(), refresher.clone(), store.clone());

        let payload = resolver.resolve(&snapshot(), 0).await.unwrap();
        assert_eq!(payload.album_cover_url.as_deref(), Some(SECONDARY));
        assert_eq!(covers.calls().len(), 1);
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_rejection_is_not_retried_again() {
        let covers = ScriptedCovers::new(vec![
            Err(ArtworkError::Unauthorized),
            Err(ArtworkError::Unauthorized),
            Ok("https://i.scdn.co/image/never".to_string()),
        ]);
        let refresher = FakeRefresher::new(true);
        let store = MemoryStore::new(vec![credential("stale")]);
        let resolver = resolver(covers.clone(), refresher.clone(), store);

        let payload = resolver.resolve(&snapshot(), 0).await.unwrap();
        assert_eq!(payload.album_cover_url.as_deref(), Some(SECONDARY));
        assert_eq!(covers.calls().len(), 2);
        assert_eq!(*refresher.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn token_replaced_by_another_writer_is_reused() {
        let covers = ScriptedCovers::new(vec![
            Err(ArtworkError::Unauthorized),
            Ok("https://i.scdn.co/image/b".to_string()),
        ]);
        let refresher = FakeRefresher::new(true);
        let store = MemoryStore::new(vec![credential("stale"), credential("elsewhere")]);
        let resolver = resolver(covers.clone(), refresher.clone(), store);

        let payload = resolver.resolve(&snapshot(), 0).await.unwrap();
        assert_eq!(
            payload.album_cover_url.as_deref(),
            Some("https://i.scdn.co/image/b")
        );
        assert_eq!(covers.calls(), vec!["stale", "elsewhere"]);
        assert_eq!(*refresher.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn not_found_skips_refresh() {
        let covers = ScriptedCovers::new(vec![Err(ArtworkError::NotFound("x".to_string()))]);
        let refresher = FakeRefresher::new(true);
        let store = MemoryStore::new(vec![credential("stale")]);
        let resolver = resolver(covers, refresher.clone(), store);

        let payload = resolver.resolve(&snapshot(), 0).await.unwrap();
        assert_eq!(payload.album_cover_url.as_deref(), Some(SECONDARY));
        assert_eq!(*refresher.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_credential_uses_album_image() {
        let covers = ScriptedCovers::new(vec![Ok("https://i.scdn.co/image/a".to_string())]);
        let store = MemoryStore::new(Vec::new());
        let resolver = resolver(covers.clone(), FakeRefresher::new(true), store);

        let payload = resolver.resolve(&snapshot(), 0).await.unwrap();
        assert_eq!(payload.album_cover_url.as_deref(), Some(SECONDARY));
        assert!(covers.calls().is_empty());
    }

    #[tokio::test]
    async fn textual_failure_is_a_resolution_error() {
        let resolver = MetadataResolver::new(Arc::new(FailingMetadata), ", ");
        let err = resolver.resolve(&snapshot(), 0).await.unwrap_err();
        assert!(matches!(err, EngineError::Resolution(_)));
    }
}
