use crate::{SnapshotSource, SourceError};
use async_trait::async_trait;
use futures_util::StreamExt;
use presence_sync_core::{MediaType, PlayerSnapshot, SeekSignal};
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zbus::zvariant::{OwnedValue, Str, Value};
use zbus::{Connection, Proxy};

const PLAYER_PATH: &str = "/org/mpris/MediaPlayer2";
const PLAYER_IFACE: &str = "org.mpris.MediaPlayer2.Player";

pub struct MprisSource {
    preferred: Option<String>,
    conn: Option<Connection>,
    seek_signal: Option<SeekSignal>,
    seek_watch: Option<(String, JoinHandle<()>)>,
}

impl MprisSource {
    pub fn new(preferred: Option<String>) -> Self {
        Self {
            preferred: preferred.map(|p| p.to_lowercase()),
            conn: None,
            seek_signal: None,
            seek_watch: None,
        }
    }

    async fn connection(&mut self) -> Result<Connection, SourceError> {
        if let Some(conn) = &self.conn {
            return Ok(conn.clone());
        }
        let conn = Connection::session()
            .await
            .map_err(|err| SourceError::Unavailable(format!("DBus session: {err}")))?;
        self.conn = Some(conn.clone());
        Ok(conn)
    }

    async fn find_player(&self, conn: &Connection) -> zbus::Result<Option<String>> {
        let proxy = Proxy::new(
            conn,
            "org.freedesktop.DBus",
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus",
        )
        .await?;

        let names: Vec<String> = proxy.call("ListNames", &()).await?;
        let mut players: Vec<String> = names
            .into_iter()
            .filter(|n| n.starts_with("org.mpris.MediaPlayer2."))
            .collect();
        players.sort();

        if let Some(preferred) = &self.preferred {
            if let Some(name) = players
                .iter()
                .find(|n| n.to_lowercase().contains(preferred.as_str()))
            {
                return Ok(Some(name.clone()));
            }
        }
        Ok(players.into_iter().next())
    }

    fn watch_seeks(&mut self, proxy: &Proxy<'static>, player: &str) {
        let Some(signal) = self.seek_signal.clone() else {
            return;
        };
        if matches!(&self.seek_watch, Some((watched, _)) if watched == player) {
            return;
        }
        if let Some((_, handle)) = self.seek_watch.take() {
            handle.abort();
        }

        let proxy = proxy.clone();
        let name = player.to_string();
        let handle = tokio::spawn(async move {
            let mut seeks = match proxy.receive_signal("Seeked").await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(player = %name, error = %err, "cannot subscribe to Seeked");
                    return;
                }
            };
            while seeks.next().await.is_some() {
                debug!(player = %name, "seek observed");
                signal.notify();
            }
        });
        self.seek_watch = Some((player.to_string(), handle));
    }

    fn ov_to_string(v: &OwnedValue) -> Option<String> {
        let owned = v.try_clone().ok()?;
        if let Ok(s) = String::try_from(owned.try_clone().ok()?) {
            return Some(s);
        }
        if let Ok(s) = Str::try_from(owned) {
            return Some(s.to_string());
        }
        None
    }

    fn ov_to_i64(v: &OwnedValue) -> Option<i64> {
        if let Ok(i) = <i64>::try_from(v) {
            return Some(i);
        }
        if let Ok(u) = <u64>::try_from(v) {
            return Some(u as i64);
        }
        None
    }

    fn ov_to_strings(v: &OwnedValue) -> Vec<String> {
        v.try_clone()
            .ok()
            .and_then(|owned| Vec::<String>::try_from(owned).ok())
            .unwrap_or_default()
    }

    fn ov_to_object_path(v: &OwnedValue) -> Option<String> {
        match &**v {
            Value::ObjectPath(p) => Some(p.to_string()),
            Value::Str(s) => Some(s.to_string()),
            _ => None,
        }
    }
}

impl Drop for MprisSource {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.seek_watch.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl SnapshotSource for MprisSource {
    fn name(&self) -> &'static str {
        "mpris"
    }

    fn attach_seek_signal(&mut self, signal: SeekSignal) {
        self.seek_signal = Some(signal);
    }

    async fn snapshot(&mut self) -> Result<PlayerSnapshot, SourceError> {
        let conn = self.connection().await?;
        let player = match self.find_player(&conn).await {
            Ok(Some(p)) => p,
            Ok(None) => return Err(SourceError::Unavailable("no MPRIS player".to_string())),
            Err(err) => {
                self.conn = None;
                return Err(SourceError::Unavailable(err.to_string()));
            }
        };

        let proxy = Proxy::new_owned(conn, player.clone(), PLAYER_PATH, PLAYER_IFACE)
            .await
            .map_err(|err| SourceError::Unavailable(err.to_string()))?;
        self.watch_seeks(&proxy, &player);

        let status: String = proxy
            .get_property("PlaybackStatus")
            .await
            .map_err(|err| SourceError::Unavailable(err.to_string()))?;
        let metadata: HashMap<String, OwnedValue> = proxy
            .get_property("Metadata")
            .await
            .map_err(|err| SourceError::Unavailable(err.to_string()))?;
        let position_us: i64 = proxy.get_property("Position").await.unwrap_or(0);

        let track_title = metadata
            .get("xesam:title")
            .and_then(Self::ov_to_string)
            .unwrap_or_default();
        if status == "Stopped" && track_title.is_empty() {
            return Err(SourceError::Unavailable(format!("{player} is stopped")));
        }

        let length_us = metadata
            .get("mpris:length")
            .and_then(Self::ov_to_i64)
            .unwrap_or(0);
        let track_path = metadata.get("mpris:trackid").and_then(Self::ov_to_object_path);
        let url = metadata.get("xesam:url").and_then(Self::ov_to_string);

        Ok(to_snapshot(Fields {
            track_title,
            album_title: metadata.get("xesam:album").and_then(Self::ov_to_string),
            artist_names: metadata
                .get("xesam:artist")
                .map(Self::ov_to_strings)
                .unwrap_or_default(),
            status,
            length_us,
            position_us,
            track_path,
            url,
        }))
    }
}

struct Fields {
    track_title: String,
    album_title: Option<String>,
    artist_names: Vec<String>,
    status: String,
    length_us: i64,
    position_us: i64,
    track_path: Option<String>,
    url: Option<String>,
}

fn to_snapshot(f: Fields) -> PlayerSnapshot {
    let duration_ms = (f.length_us.max(0) as u64) / 1_000;
    let position_ms = (f.position_us.max(0) as u64) / 1_000;
    let is_live_stream = duration_ms == 0;

    let web_url = f.url.as_deref().filter(|u| is_web_url(u));
    let media_type = classify(f.track_path.as_deref(), f.url.as_deref(), is_live_stream);

    PlayerSnapshot {
        track_id: web_url.and_then(|u| id_after(u, "/track/")),
        album_id: web_url.and_then(|u| id_after(u, "/album/")),
        track_title: f.track_title,
        album_title: f.album_title.filter(|a| !a.is_empty()),
        artist_names: f.artist_names,
        is_playing: f.status == "Playing",
        duration_ms,
        remaining_ms: duration_ms.saturating_sub(position_ms),
        media_type,
        is_live_stream,
    }
}

fn is_web_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}

fn web_segments(url: &str) -> Vec<String> {
    let Some((_, rest)) = url.split_once("://") else {
        return Vec::new();
    };
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    rest.split('/')
        .skip(1)
        .filter(|seg| !seg.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Decides the media type from structural markers only. Local file paths are never inspected,
/// so artist or album folder names cannot leak into the result.
fn classify(track_path: Option<&str>, url: Option<&str>, is_live_stream: bool) -> MediaType {
    let mut segments: Vec<String> = track_path
        .unwrap_or_default()
        .split('/')
        .filter(|seg| !seg.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();

    if let Some(url) = url {
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("spotify:ad:") {
            return MediaType::Ad;
        }
        if lower.starts_with("spotify:episode:") || lower.starts_with("spotify:show:") {
            return MediaType::ShowEpisode;
        }
        if is_web_url(url) {
            segments.extend(web_segments(url));
        }
    }

    let has = |names: &[&str]| segments.iter().any(|seg| names.contains(&seg.as_str()));
    if has(&["ad", "ads", "advert", "advertisement"]) {
        MediaType::Ad
    } else if has(&["episode", "show", "podcast", "podcasts"]) {
        MediaType::ShowEpisode
    } else if is_live_stream || has(&["radio"]) {
        MediaType::Radio
    } else {
        MediaType::Track
    }
}

fn id_after(url: &str, marker: &str) -> Option<String> {
    let rest = &url[url.find(marker)? + marker.len()..];
    let id: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    (!id.is_empty()).then_some(id)
}
