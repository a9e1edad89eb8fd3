use crate::detector::{decide, Decision};
use crate::{EngineError, MetadataResolver, PresencePublisher};
use futures_util::future::BoxFuture;
use presence_sync_core::{now_epoch_ms, AcceptedState, AppConfig, PlayerSnapshot, SeekSignal};
use presence_sync_providers::SnapshotSource;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub poll_interval: Duration,
    pub grace_delay: Duration,
    pub snapshot_timeout: Duration,
    pub resolve_timeout: Duration,
    pub publish_timeout: Duration,
}

impl LoopConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(cfg.intervals.poll_ms.max(1)),
            grace_delay: Duration::from_millis(cfg.intervals.grace_delay_ms),
            snapshot_timeout: Duration::from_millis(cfg.intervals.snapshot_timeout_ms),
            resolve_timeout: Duration::from_millis(cfg.intervals.resolve_timeout_ms),
            publish_timeout: Duration::from_millis(cfg.intervals.publish_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Publishing,
}

/// The publisher is lent to the in-flight job; holding it is what `Idle` means.
enum Slot {
    Idle(Box<dyn PresencePublisher>),
    Publishing,
}

pub type PublishJob = BoxFuture<'static, Completion>;

pub struct Completion {
    publisher: Box<dyn PresencePublisher>,
    observed: AcceptedState,
    outcome: Result<(), EngineError>,
}

impl Completion {
    pub fn outcome(&self) -> &Result<(), EngineError> {
        &self.outcome
    }
}

pub enum Tick {
    SourceUnavailable(EngineError),
    Unchanged,
    Dropped(Decision),
    Started { decision: Decision, job: PublishJob },
}

pub struct SyncLoop {
    source: Box<dyn SnapshotSource>,
    resolver: Arc<MetadataResolver>,
    slot: Slot,
    accepted: Option<AcceptedState>,
    seek: SeekSignal,
    cfg: LoopConfig,
}

impl SyncLoop {
    pub fn new(
        mut source: Box<dyn SnapshotSource>,
        resolver: MetadataResolver,
        publisher: Box<dyn PresencePublisher>,
        cfg: LoopConfig,
    ) -> Self {
        let seek = SeekSignal::new();
        source.attach_seek_signal(seek.clone());
        Self {
            source,
            resolver: Arc::new(resolver),
            slot: Slot::Idle(publisher),
            accepted: None,
            seek,
            cfg,
        }
    }

    pub fn seek_signal(&self) -> SeekSignal {
        self.seek.clone()
    }

    pub fn accepted(&self) -> Option<&AcceptedState> {
        self.accepted.as_ref()
    }

    pub fn phase(&self) -> Phase {
        match self.slot {
            Slot::Idle(_) => Phase::Idle,
            Slot::Publishing => Phase::Publishing,
        }
    }

    pub async fn tick(&mut self) -> Tick {
        let snapshot = match timeout(self.cfg.snapshot_timeout, self.source.snapshot()).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(err)) => return self.skip(EngineError::from(err)),
            Err(_) => {
                return self.skip(EngineError::Timeout {
                    operation: "snapshot",
                    after: self.cfg.snapshot_timeout,
                })
            }
        };
        let poll_time = now_epoch_ms();
        let seek = self.seek.take();

        let decision = decide(self.accepted.as_ref(), &snapshot, seek);
        if !decision.publishes() {
            self.accepted = Some(AcceptedState::observe(&snapshot));
            return Tick::Unchanged;
        }

        let publisher = match std::mem::replace(&mut self.slot, Slot::Publishing) {
            Slot::Idle(publisher) => publisher,
            Slot::Publishing => {
                debug!(reason = ?decision.reason(), "publish in flight; tick skipped");
                return Tick::Dropped(decision);
            }
        };

        match decision.reason() {
            Some(reason) => info!(%reason, title = %snapshot.track_title, "updating presence"),
            None => info!(title = %snapshot.track_title, "publishing initial presence"),
        }

        let job = publish(
            self.resolver.clone(),
            publisher,
            snapshot,
            poll_time,
            self.cfg.clone(),
        );
        Tick::Started {
            decision,
            job: Box::pin(job),
        }
    }

    fn skip(&self, err: EngineError) -> Tick {
        debug!(source = self.source.name(), error = %err, "no snapshot this tick");
        Tick::SourceUnavailable(err)
    }

    pub fn complete(&mut self, done: Completion) {
        match &done.outcome {
            Ok(()) => debug!("presence updated"),
            Err(EngineError::Resolution(err)) => {
                warn!(error = %err, "metadata unresolved; publish skipped")
            }
            Err(err) => warn!(error = %err, "presence update failed"),
        }
        self.accepted = Some(done.observed);
        self.slot = Slot::Idle(done.publisher);
    }

    /// Polls until `shutdown` resolves. A publish in flight at shutdown is finished first.
    /// Hands the publisher back so the caller can clear the presence.
    pub async fn run<F>(mut self, shutdown: F) -> Option<Box<dyn PresencePublisher>>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        tokio::select! {
            _ = tokio::time::sleep(self.cfg.grace_delay) => {}
            _ = &mut shutdown => return self.into_publisher(),
        }

        let mut ticker = tokio::time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<PublishJob> = None;
        let mut stopping = false;

        info!(source = self.source.name(), "presence synchronization started");
        loop {
            tokio::select! {
                _ = &mut shutdown, if !stopping => {
                    info!("stopping presence synchronization");
                    stopping = true;
                    if in_flight.is_none() {
                        break;
                    }
                }
                done = async {
                    match in_flight.as_mut() {
                        Some(job) => job.await,
                        None => std::future::pending().await,
                    }
                }, if in_flight.is_some() => {
                    in_flight = None;
                    self.complete(done);
                    if stopping {
                        break;
                    }
                }
                _ = ticker.tick(), if !stopping => {
                    if let Tick::Started { job, .. } = self.tick().await {
                        in_flight = Some(job);
                    }
                }
            }
        }

        self.into_publisher()
    }

    fn into_publisher(self) -> Option<Box<dyn PresencePublisher>> {
        match self.slot {
            Slot::Idle(publisher) => Some(publisher),
            Slot::Publishing => None,
        }
    }
}

async fn publish(
    resolver: Arc<MetadataResolver>,
    mut publisher: Box<dyn PresencePublisher>,
    snapshot: PlayerSnapshot,
    poll_time: i64,
    cfg: LoopConfig,
) -> Completion {
    let outcome = resolve_and_publish(&resolver, publisher.as_mut(), &snapshot, poll_time, &cfg).await;
    Completion {
        publisher,
        observed: AcceptedState::observe(&snapshot),
        outcome,
    }
}

async fn resolve_and_publish(
    resolver: &MetadataResolver,
    publisher: &mut dyn PresencePublisher,
    snapshot: &PlayerSnapshot,
    poll_time: i64,
    cfg: &LoopConfig,
) -> Result<(), EngineError> {
    let payload = timeout(cfg.resolve_timeout, resolver.resolve(snapshot, poll_time))
        .await
        .map_err(|_| EngineError::Timeout {
            operation: "metadata resolution",
            after: cfg.resolve_timeout,
        })??;

    let name = publisher.name();
    timeout(cfg.publish_timeout, publisher.publish(&payload))
        .await
        .map_err(|_| EngineError::Timeout {
            operation: "publish",
            after: cfg.publish_timeout,
        })?
        .map_err(|err| EngineError::PublishFailed {
            publisher: name,
            message: format!("{err:#}"),
        })
}
