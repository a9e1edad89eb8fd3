use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use presence_sync_core::{now_epoch_ms, AppConfig, MetadataKind, PublisherKind};
use presence_sync_discord_rpc::{
    endpoint_reachable, ActivityOptions, DiscordRpcClient, GatewayClient,
};
use presence_sync_engine::{ArtworkChain, LoopConfig, MetadataResolver, PresencePublisher, SyncLoop};
use presence_sync_providers::{
    build_snapshot_source, CredentialStore, DeezerMetadata, MetadataProvider, SnapshotMetadata,
    SnapshotSource, SpotifyCovers, SpotifyTokenRefresher, TomlCredentialStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "presence-sync",
    about = "Player snapshots -> change detection -> rich presence"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run,
    Doctor,
    Status,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Commands::Run);
    let cfg_path = cli.config.unwrap_or_else(default_config_path);

    match cmd {
        Commands::Config {
            action: ConfigAction::Init,
        } => {
            init_config(&cfg_path)?;
            println!("Initialized config at {}", cfg_path.display());
            Ok(())
        }
        Commands::Doctor => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            doctor(&cfg, &cfg_path).await
        }
        Commands::Status => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            status(&cfg, &cfg_path).await
        }
        Commands::Run => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            run(&cfg, &cfg_path).await
        }
    }
}

async fn run(cfg: &AppConfig, cfg_path: &Path) -> Result<()> {
    let source = build_snapshot_source(cfg.preferred_player.clone());
    let resolver = build_resolver(cfg, cfg_path)?;
    let publisher = build_publisher(cfg)?;

    info!(
        source = source.name(),
        publisher = publisher.name(),
        "presence-sync started"
    );

    let sync = SyncLoop::new(source, resolver, publisher, LoopConfig::from_app_config(cfg));
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("received ctrl-c; shutting down");
    };

    if let Some(mut publisher) = sync.run(shutdown).await {
        if let Err(err) = publisher.clear().await {
            warn!(error = %err, publisher = publisher.name(), "failed to clear presence");
        }
    }
    Ok(())
}

fn build_resolver(cfg: &AppConfig, cfg_path: &Path) -> Result<MetadataResolver> {
    let metadata: Arc<dyn MetadataProvider> = match cfg.metadata {
        MetadataKind::Snapshot => Arc::new(SnapshotMetadata),
        MetadataKind::Deezer => {
            Arc::new(DeezerMetadata::new().context("failed to build deezer metadata client")?)
        }
    };
    let mut resolver = MetadataResolver::new(metadata, cfg.artists_separator.clone());

    let artwork = &cfg.artwork;
    if artwork.enabled {
        match (&artwork.client_id, &artwork.client_secret) {
            (Some(id), Some(secret)) => {
                let covers = SpotifyCovers::new().context("failed to build artwork client")?;
                let refresher = SpotifyTokenRefresher::new(id.clone(), secret.clone())
                    .context("failed to build token refresher")?;
                let chain = ArtworkChain::new(
                    Arc::new(covers),
                    Arc::new(refresher),
                    Arc::new(credentials_store(cfg_path)),
                    artwork.region.clone(),
                );
                resolver = resolver.with_artwork(chain);
            }
            _ => warn!("artwork enabled without client_id/client_secret; using album images only"),
        }
    }
    Ok(resolver)
}

fn build_publisher(cfg: &AppConfig) -> Result<Box<dyn PresencePublisher>> {
    match cfg.publisher {
        PublisherKind::Rpc => Ok(Box::new(DiscordRpcClient::new(
            cfg.discord_app_id.clone(),
            ActivityOptions::from_app_config(cfg),
        ))),
        PublisherKind::Gateway => {
            let Some(url) = cfg.gateway.url.as_deref() else {
                bail!("publisher = \"gateway\" requires gateway.url");
            };
            Ok(Box::new(GatewayClient::new(url, cfg.gateway.token.clone())?))
        }
    }
}

async fn doctor(cfg: &AppConfig, cfg_path: &Path) -> Result<()> {
    println!("== presence-sync doctor ==");

    let rpc_ok = endpoint_reachable().await;
    println!(
        "Discord RPC local endpoint: {}",
        if rpc_ok { "reachable" } else { "not reachable" }
    );
    println!("Publisher: {:?}", cfg.publisher);
    if cfg.publisher == PublisherKind::Gateway && cfg.gateway.url.is_none() {
        println!("Gateway: url missing");
    }

    let mut source = build_snapshot_source(cfg.preferred_player.clone());
    println!("Snapshot source: {}", source.name());
    match source.snapshot().await {
        Ok(snapshot) => println!(
            "Now playing: {} ({})",
            snapshot.track_title,
            if snapshot.is_playing { "playing" } else { "paused" }
        ),
        Err(err) => println!("Source error: {err}"),
    }

    if cfg.artwork.enabled {
        let store = credentials_store(cfg_path);
        match store.load().await {
            Ok(Some(cred)) if cred.is_expired(now_epoch_ms()) => {
                println!("Artwork credential: expired (will refresh on next lookup)")
            }
            Ok(Some(_)) => println!("Artwork credential: valid"),
            Ok(None) => println!("Artwork credential: missing at {}", store.path().display()),
            Err(err) => println!("Artwork credential: unreadable ({err})"),
        }
    } else {
        println!("Artwork: disabled");
    }

    Ok(())
}

async fn status(cfg: &AppConfig, cfg_path: &Path) -> Result<()> {
    let mut source = build_snapshot_source(cfg.preferred_player.clone());
    println!("source: {}", source.name());

    let snapshot = match source.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            println!("error: {err}");
            return Ok(());
        }
    };
    println!("media: {}", snapshot.media_type.label());

    let resolver = build_resolver(cfg, cfg_path)?;
    match resolver.resolve(&snapshot, now_epoch_ms()).await {
        Ok(payload) => {
            println!("track: {} - {}", payload.track_artists, payload.track_title);
            if let Some(album) = &payload.album_title {
                println!("album: {album}");
            }
            println!("state: {}", if payload.is_playing { "playing" } else { "paused" });
            println!("window: {} -> {}", payload.start_timestamp, payload.end_timestamp);
            if let Some(cover) = &payload.album_cover_url {
                println!("cover: {cover}");
            }
        }
        Err(err) => println!("error: {err}"),
    }

    Ok(())
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("presence-sync").join("config.toml")
}

fn credentials_store(cfg_path: &Path) -> TomlCredentialStore {
    let dir = cfg_path.parent().unwrap_or_else(|| Path::new("."));
    TomlCredentialStore::new(dir.join("credentials.toml"))
}

fn init_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let cfg = AppConfig::default();
    let toml = toml::to_string_pretty(&cfg)?;
    std::fs::write(path, toml)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

fn load_or_default(path: &Path) -> Result<AppConfig> {
    let mut cfg = if !path.exists() {
        AppConfig::default()
    } else {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))?
    };
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}

fn apply_env_overrides(cfg: &mut AppConfig, var: impl Fn(&str) -> Option<String>) {
    let set = |key: &str| var(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = set("PRESENCE_SYNC_DISCORD_APP_ID") {
        cfg.discord_app_id = v;
    }
    if let Some(v) = set("PRESENCE_SYNC_LOG_LEVEL") {
        cfg.log_level = v;
    }
    if let Some(parsed) = set("PRESENCE_SYNC_ENABLE_BUTTONS").and_then(|v| v.parse().ok()) {
        cfg.enable_buttons = parsed;
    }
    match set("PRESENCE_SYNC_PUBLISHER").as_deref() {
        Some("rpc") => cfg.publisher = PublisherKind::Rpc,
        Some("gateway") => cfg.publisher = PublisherKind::Gateway,
        Some(other) => warn!(value = other, "ignoring unknown PRESENCE_SYNC_PUBLISHER"),
        None => {}
    }
}
