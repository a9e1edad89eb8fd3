use crate::{MetadataError, MetadataProvider, TrackMetadata};
use async_trait::async_trait;
use presence_sync_core::PlayerSnapshot;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const API_BASE: &str = "https://api.deezer.com";

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TrackAlbum {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    id: u64,
    title: String,
    link: Option<String>,
    #[serde(default)]
    contributors: Vec<Named>,
    artist: Option<Named>,
    album: Option<TrackAlbum>,
}

#[derive(Debug, Deserialize)]
struct AlbumTrack {
    id: u64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct AlbumTracks {
    data: Vec<AlbumTrack>,
}

#[derive(Debug, Deserialize)]
struct ApiAlbum {
    tracks: AlbumTracks,
}

pub struct DeezerMetadata {
    http: reqwest::Client,
    base_url: String,
}

impl DeezerMetadata {
    pub fn new() -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            base_url: API_BASE.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, MetadataError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "deezer metadata request");
        let body: serde_json::Value = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|err| MetadataError::Unavailable(err.to_string()))?
            .json()
            .await
            .map_err(|err| MetadataError::Unavailable(err.to_string()))?;
        decode(body)
    }

    async fn find_track_in_album(&self, album_id: &str, title: &str) -> Result<u64, MetadataError> {
        let album: ApiAlbum = self.get(&format!("album/{album_id}")).await?;
        album
            .tracks
            .data
            .iter()
            .find(|t| t.title == title)
            .or_else(|| {
                album
                    .tracks
                    .data
                    .iter()
                    .find(|t| t.title.eq_ignore_ascii_case(title))
            })
            .map(|t| t.id)
            .ok_or_else(|| MetadataError::NotFound(format!("{title} in album {album_id}")))
    }
}

#[async_trait]
impl MetadataProvider for DeezerMetadata {
    async fn lookup(&self, snapshot: &PlayerSnapshot) -> Result<TrackMetadata, MetadataError> {
        let track_id = match (&snapshot.track_id, &snapshot.album_id) {
            (Some(id), _) => id.clone(),
            (None, Some(album_id)) => self
                .find_track_in_album(album_id, &snapshot.track_title)
                .await?
                .to_string(),
            (None, None) => {
                return Err(MetadataError::NotFound(format!(
                    "{} carries neither track nor album id",
                    snapshot.track_title
                )))
            }
        };

        let track: ApiTrack = self.get(&format!("track/{track_id}")).await?;
        Ok(into_metadata(track))
    }
}

fn decode<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, MetadataError> {
    if let Some(err) = body.get("error") {
        let err: ApiError = serde_json::from_value(err.clone())
            .map_err(|e| MetadataError::Unavailable(e.to_string()))?;
        // 800 is "no data"
        if err.code == 800 {
            return Err(MetadataError::NotFound(err.message));
        }
        return Err(MetadataError::Unavailable(format!(
            "{} ({}): {}",
            err.kind, err.code, err.message
        )));
    }
    serde_json::from_value(body).map_err(|e| MetadataError::Unavailable(e.to_string()))
}

fn into_metadata(track: ApiTrack) -> TrackMetadata {
    let mut artists: Vec<String> = track.contributors.into_iter().map(|c| c.name).collect();
    if artists.is_empty() {
        artists.extend(track.artist.map(|a| a.name));
    }
    TrackMetadata {
        title: track.title,
        artists,
        album_title: track.album.map(|a| a.title),
        track_url: track
            .link
            .or_else(|| Some(presence_sync_core::urls::deezer_track_url(&track.id.to_string()))),
    }
}
