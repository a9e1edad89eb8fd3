pub mod config;
pub mod model;
pub mod signal;
pub mod urls;

pub use config::{
    AppConfig, ArtworkConfig, AssetsConfig, ConfigIntervals, GatewayConfig, MetadataKind,
    PublisherKind, TooltipText,
};
pub use model::{
    now_epoch_ms, AcceptedState, CredentialState, MediaType, PlayerSnapshot, PresencePayload,
};
pub use signal::SeekSignal;
