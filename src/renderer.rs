//! Renderer driver: owns the services and publishes their state.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::bus::SharedBus;
use crate::mpd::SharedPlayer;
use crate::services::{
    RadioError, RadioService, ReceiverError, ReceiverSession, StateMap, StatePublisher,
    StatefulService, VolumeService,
};

/// Sources that can own the player
pub const SOURCES: [&str; 2] = [
    crate::services::radio::SERVICE_NAME,
    crate::services::receiver::SERVICE_NAME,
];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unknown source: {0}")]
    Unknown(String),
    #[error(transparent)]
    Receiver(#[from] ReceiverError),
    #[error(transparent)]
    Radio(#[from] RadioError),
}

pub struct Renderer {
    player: SharedPlayer,
    volume: Arc<VolumeService>,
    receiver: Arc<ReceiverSession>,
    radio: Arc<RadioService>,
    publisher: StatePublisher<SharedBus>,
}

impl Renderer {
    pub fn new(
        player: SharedPlayer,
        volume: Arc<VolumeService>,
        receiver: Arc<ReceiverSession>,
        radio: Arc<RadioService>,
        bus: SharedBus,
    ) -> Self {
        Self {
            player,
            volume,
            receiver,
            radio,
            publisher: StatePublisher::new(bus),
        }
    }

    pub fn player(&self) -> &SharedPlayer {
        &self.player
    }

    pub fn volume(&self) -> &Arc<VolumeService> {
        &self.volume
    }

    pub fn receiver(&self) -> &Arc<ReceiverSession> {
        &self.receiver
    }

    pub fn radio(&self) -> &Arc<RadioService> {
        &self.radio
    }

    fn services(&self) -> [&dyn StatefulService; 3] {
        [self.volume.as_ref(), self.receiver.as_ref(), self.radio.as_ref()]
    }

    /// Hand the player to one source. The others are deactivated first.
    pub async fn select_source(&self, name: &str) -> Result<(), SourceError> {
        if !SOURCES.contains(&name) {
            return Err(SourceError::Unknown(name.to_string()));
        }
        tracing::info!("Source selected: {}", name);
        if name == crate::services::radio::SERVICE_NAME {
            self.receiver.set_active(false).await?;
            self.radio.set_active(true).await?;
        } else {
            self.radio.set_active(false).await?;
            self.receiver.set_active(true).await?;
        }
        Ok(())
    }

    /// Name of the active source, if any
    pub async fn active_source(&self) -> Option<&'static str> {
        if self.radio.is_active().await {
            Some(crate::services::radio::SERVICE_NAME)
        } else if self.receiver.is_active().await {
            Some(crate::services::receiver::SERVICE_NAME)
        } else {
            None
        }
    }

    /// Look up a service by its publication name
    pub fn service(&self, name: &str) -> Option<&dyn StatefulService> {
        self.services().into_iter().find(|s| s.name() == name)
    }

    /// Refresh the player status, then publish every service's changes.
    pub async fn poll_once(&self, all: bool) -> Vec<(String, StateMap)> {
        if let Err(e) = self.player.lock().await.refresh_status().await {
            tracing::debug!("Status refresh failed: {}", e);
        }
        let mut published = Vec::new();
        for service in self.services() {
            let changes = self.publisher.publish(service, all).await;
            if !changes.is_empty() {
                published.push((service.name().to_string(), changes));
            }
        }
        published
    }

    /// Poll until `shutdown` fires. The first round publishes everything.
    pub async fn run(&self, period: Duration, shutdown: CancellationToken) {
        let mut ticker = interval(period.max(Duration::from_millis(50)));
        let mut first = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Renderer poll loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once(first).await;
                    first = false;
                }
            }
        }
    }
}
