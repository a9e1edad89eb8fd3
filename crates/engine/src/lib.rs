use async_trait::async_trait;
use presence_sync_core::PresencePayload;

pub mod detector;
mod error;
pub mod resolver;
pub mod sync_loop;

pub use detector::{decide, detect, ChangeReason, Decision};
pub use error::EngineError;
pub use resolver::{playback_window, ArtworkChain, MetadataResolver};
pub use sync_loop::{Completion, LoopConfig, Phase, PublishJob, SyncLoop, Tick};

#[async_trait]
pub trait PresencePublisher: Send {
    fn name(&self) -> &'static str;

    async fn publish(&mut self, payload: &PresencePayload) -> anyhow::Result<()>;

    async fn clear(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
