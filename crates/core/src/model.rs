use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    Track,
    Radio,
    Ad,
    ShowEpisode,
}

impl MediaType {
    pub fn label(self) -> &'static str {
        match self {
            MediaType::Track => "Track",
            MediaType::Radio => "Radio",
            MediaType::Ad => "Ad",
            MediaType::ShowEpisode => "Episode",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlayerSnapshot {
    pub track_id: Option<String>,
    pub track_title: String,
    pub album_id: Option<String>,
    pub album_title: Option<String>,
    pub artist_names: Vec<String>,
    pub is_playing: bool,
    pub duration_ms: u64,
    pub remaining_ms: u64,
    pub media_type: MediaType,
    pub is_live_stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedState {
    pub track_title: String,
    pub is_playing: bool,
    pub observed_duration_ms: u64,
}

impl AcceptedState {
    pub fn observe(snapshot: &PlayerSnapshot) -> Self {
        Self {
            track_title: snapshot.track_title.clone(),
            is_playing: snapshot.is_playing,
            observed_duration_ms: snapshot.duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub track_title: String,
    pub track_artists: String,
    pub album_title: Option<String>,
    pub album_cover_url: Option<String>,
    pub track_url: Option<String>,
    pub is_playing: bool,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub media_type: MediaType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialState {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: i64,
    pub refresh_token: String,
}

impl CredentialState {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }

    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
