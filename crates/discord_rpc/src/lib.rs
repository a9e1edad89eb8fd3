use anyhow::{anyhow, Result};
use async_trait::async_trait;
use presence_sync_core::{AppConfig, PresencePayload, TooltipText};
use presence_sync_engine::PresencePublisher;
use serde_json::json;
use std::time::{Duration, Instant};

mod gateway;
mod transport;

pub use gateway::GatewayClient;
pub use transport::endpoint_reachable;
use transport::Connection;

const BACKOFF_STEPS: [Duration; 4] = [
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

const ACTIVITY_LISTENING: u8 = 2;
const APP_NAME: &str = "Deezer";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const MAX_FIELD_CHARS: usize = 128;

#[derive(Debug, Clone)]
pub struct ActivityOptions {
    pub enable_buttons: bool,
    pub tooltip_text: TooltipText,
    pub fallback_large_image: Option<String>,
    pub small_play_image: Option<String>,
    pub small_pause_image: Option<String>,
}

impl ActivityOptions {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            enable_buttons: cfg.enable_buttons,
            tooltip_text: cfg.tooltip_text,
            fallback_large_image: cfg.assets.large_image.clone(),
            small_play_image: cfg.assets.small_play_image.clone(),
            small_pause_image: cfg.assets.small_pause_image.clone(),
        }
    }
}

pub struct DiscordRpcClient {
    client_id: String,
    options: ActivityOptions,
    connection: Option<Connection>,
    backoff_idx: usize,
    next_retry_at: Instant,
}

impl DiscordRpcClient {
    pub fn new(client_id: String, options: ActivityOptions) -> Self {
        Self {
            client_id,
            options,
            connection: None,
            backoff_idx: 0,
            next_retry_at: Instant::now(),
        }
    }

    pub async fn set_activity(&mut self, payload: &PresencePayload) -> Result<()> {
        let activity = build_activity(payload, &self.options);
        self.command(activity).await
    }

    pub async fn clear_activity(&mut self) -> Result<()> {
        self.command(serde_json::Value::Null).await
    }

    async fn command(&mut self, activity: serde_json::Value) -> Result<()> {
        let body = json!({
            "cmd": "SET_ACTIVITY",
            "args": {
                "pid": std::process::id(),
                "activity": activity
            },
            "nonce": nonce()
        });

        let connection = self.connection().await?;
        let sent = match connection.request(&body).await {
            Ok(raw) => validate_rpc_response(&raw),
            Err(err) => Err(err),
        };
        if sent.is_err() {
            self.connection = None;
            self.schedule_backoff();
        }
        sent
    }

    async fn connection(&mut self) -> Result<&mut Connection> {
        if self.connection.is_none() {
            if Instant::now() < self.next_retry_at {
                return Err(anyhow!("discord reconnect backoff active"));
            }
            match Connection::open(&self.client_id).await {
                Some(conn) => {
                    self.connection = Some(conn);
                    self.backoff_idx = 0;
                }
                None => {
                    self.schedule_backoff();
                    return Err(anyhow!("unable to connect to local Discord RPC"));
                }
            }
        }
        self.connection
            .as_mut()
            .ok_or_else(|| anyhow!("discord transport not connected"))
    }

    fn schedule_backoff(&mut self) {
        let idx = self.backoff_idx.min(BACKOFF_STEPS.len() - 1);
        self.next_retry_at = Instant::now() + BACKOFF_STEPS[idx];
        self.backoff_idx = (self.backoff_idx + 1).min(BACKOFF_STEPS.len() - 1);
    }
}

fn nonce() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let n = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{n:x}")
}

/// Discord rejects text fields shorter than 2 or longer than 128 characters.
fn field(text: &str) -> String {
    let mut out: String = text.chars().take(MAX_FIELD_CHARS).collect();
    while out.chars().count() < 2 {
        out.push(' ');
    }
    out
}

fn large_text(payload: &PresencePayload, tooltip: TooltipText) -> String {
    match tooltip {
        TooltipText::AppName => APP_NAME.to_string(),
        TooltipText::AppVersion => format!("v{APP_VERSION}"),
        TooltipText::AppNameAndVersion => format!("{APP_NAME} v{APP_VERSION}"),
        TooltipText::AlbumTitle => payload
            .album_title
            .clone()
            .unwrap_or_else(|| APP_NAME.to_string()),
        TooltipText::ArtistsAndTitle => {
            format!("{} - {}", payload.track_artists, payload.track_title)
        }
        TooltipText::TitleAndArtists => {
            format!("{} - {}", payload.track_title, payload.track_artists)
        }
    }
}

fn build_activity(payload: &PresencePayload, opts: &ActivityOptions) -> serde_json::Value {
    let mut activity = json!({
        "type": ACTIVITY_LISTENING,
        "details": field(&payload.track_title),
        "state": field(&payload.track_artists),
    });
    let Some(obj) = activity.as_object_mut() else {
        return activity;
    };

    if payload.is_playing {
        obj.insert(
            "timestamps".to_string(),
            json!({"start": payload.start_timestamp, "end": payload.end_timestamp}),
        );
    }

    let mut assets = serde_json::Map::new();
    if let Some(v) = payload
        .album_cover_url
        .as_ref()
        .or(opts.fallback_large_image.as_ref())
    {
        assets.insert("large_image".to_string(), json!(v));
        assets.insert(
            "large_text".to_string(),
            json!(field(&large_text(payload, opts.tooltip_text))),
        );
    }
    let small = if payload.is_playing {
        (&opts.small_play_image, "Playing")
    } else {
        (&opts.small_pause_image, "Paused")
    };
    if let (Some(image), text) = small {
        assets.insert("small_image".to_string(), json!(image));
        assets.insert("small_text".to_string(), json!(text));
    }
    if !assets.is_empty() {
        obj.insert("assets".to_string(), serde_json::Value::Object(assets));
    }

    if opts.enable_buttons {
        if let Some(url) = &payload.track_url {
            obj.insert(
                "buttons".to_string(),
                json!([{"label": "Listen on Deezer", "url": url}]),
            );
        }
    }

    activity
}

fn validate_rpc_response(raw: &[u8]) -> Result<()> {
    let value: serde_json::Value = match serde_json::from_slice(raw) {
        Ok(v) => v,
        Err(_) => return Ok(()),
    };

    if value
        .get("evt")
        .and_then(|v| v.as_str())
        .map(|evt| evt.eq_ignore_ascii_case("ERROR"))
        .unwrap_or(false)
    {
        let data = value.get("data");
        let code = data
            .and_then(|d| d.get("code"))
            .and_then(|c| c.as_i64())
            .unwrap_or_default();
        let msg = data
            .and_then(|d| d.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown discord rpc error");
        return Err(anyhow!("discord rpc error {code}: {msg}"));
    }

    Ok(())
}

#[async_trait]
impl PresencePublisher for DiscordRpcClient {
    fn name(&self) -> &'static str {
        "discord-rpc"
    }

    async fn publish(&mut self, payload: &PresencePayload) -> Result<()> {
        self.set_activity(payload).await
    }

    async fn clear(&mut self) -> Result<()> {
        self.clear_activity().await
    }
}
