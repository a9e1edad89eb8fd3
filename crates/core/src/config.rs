use serde::{Deserialize, Serialize};

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigIntervals {
    pub poll_ms: u64,
    pub grace_delay_ms: u64,
    pub snapshot_timeout_ms: u64,
    pub resolve_timeout_ms: u64,
    pub publish_timeout_ms: u64,
}

impl Default for ConfigIntervals {
    fn default() -> Self {
        Self {
            poll_ms: 1_000,
            grace_delay_ms: 5_000,
            snapshot_timeout_ms: 3_000,
            resolve_timeout_ms: 10_000,
            publish_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    pub large_image: Option<String>,
    pub small_play_image: Option<String>,
    pub small_pause_image: Option<String>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            large_image: Some("app_icon".to_string()),
            small_play_image: Some("play".to_string()),
            small_pause_image: Some("pause".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PublisherKind {
    #[default]
    Rpc,
    Gateway,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    Snapshot,
    #[default]
    Deezer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TooltipText {
    AppName,
    AppVersion,
    AppNameAndVersion,
    #[default]
    AlbumTitle,
    ArtistsAndTitle,
    TitleAndArtists,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtworkConfig {
    pub enabled: bool,
    pub region: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            region: "US".to_string(),
            client_id: None,
            client_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    pub url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub discord_app_id: String,
    #[serde(default)]
    pub publisher: PublisherKind,
    #[serde(default)]
    pub metadata: MetadataKind,
    #[serde(default)]
    pub preferred_player: Option<String>,
    pub artists_separator: String,
    pub enable_buttons: bool,
    #[serde(default)]
    pub tooltip_text: TooltipText,
    pub log_level: String,
    pub intervals: ConfigIntervals,
    pub assets: AssetsConfig,
    #[serde(default)]
    pub artwork: ArtworkConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            discord_app_id: "YOUR_DISCORD_APP_ID".to_string(),
            publisher: PublisherKind::default(),
            metadata: MetadataKind::default(),
            preferred_player: Some("deezer".to_string()),
            artists_separator: ", ".to_string(),
            enable_buttons: true,
            tooltip_text: TooltipText::default(),
            log_level: "info".to_string(),
            intervals: ConfigIntervals::default(),
            assets: AssetsConfig::default(),
            artwork: ArtworkConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}
