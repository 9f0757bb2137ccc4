//! Receiver session: relays a SongCast sender through a subprocess.
//!
//! In queue-injection mode the relay exposes the stream over HTTP and the
//! session inserts that endpoint into the player queue; in external-output
//! mode the relay plays the stream itself and the player is not touched.
//!
//! Life cycle: Stopped → Starting → AwaitingReady → Active → Stopped. Any
//! failure on the way up tears everything down again.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::relay::RelayProcess;
use super::state::{StateMap, StatefulService};
use crate::bus::{BusEvent, SharedBus};
use crate::config::{ReceiverConfig, ReceiverMode};
use crate::didl::{self, DidlError};
use crate::mpd::{MpdError, PlayState, SharedPlayer};

pub const SERVICE_NAME: &str = "receiver";

/// Protocols a sender may offer us
pub const PROTOCOL_INFO: &str = "ohz:*:*:*,ohm:*:*:*,ohu:*.*.*";

const STATE_FILE_NAME: &str = "receiver-state.json";

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("no sender configured")]
    NotConfigured,
    #[error("can't start relay {0}: {1}")]
    Spawn(String, #[source] std::io::Error),
    #[error("relay exited before it was ready")]
    RelayExited,
    #[error("relay not ready after {0} seconds")]
    HandshakeTimeout(u64),
    #[error("start cancelled")]
    Cancelled,
    #[error("bad sender metadata: {0}")]
    Metadata(#[from] DidlError),
    #[error(transparent)]
    Player(#[from] MpdError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransportState {
    Playing,
    Paused,
    Stopped,
}

impl TransportState {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportState::Playing => "Playing",
            TransportState::Paused => "Paused",
            TransportState::Stopped => "Stopped",
        }
    }
}

/// Relay invocation and session settings
#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    pub relay_path: String,
    pub http_port: u16,
    pub mode: ReceiverMode,
    pub handshake_timeout: Duration,
    pub relay_config: Option<String>,
    /// Where the sender is remembered across restarts (`None`: not persisted)
    pub state_file: Option<PathBuf>,
}

impl ReceiverSettings {
    pub fn from_config(config: &ReceiverConfig, data_dir: &Path) -> Self {
        Self {
            relay_path: config.relay_path.clone(),
            http_port: config.http_port,
            mode: config.mode,
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
            relay_config: config.relay_config.clone(),
            state_file: Some(data_dir.join(STATE_FILE_NAME)),
        }
    }

    /// Endpoint the relay serves in queue-injection mode
    pub fn endpoint_uri(&self) -> String {
        format!("http://localhost:{}/Songcast.wav", self.http_port)
    }

    fn relay_args(&self, uri: &str) -> Vec<String> {
        let mut args = Vec::new();
        if self.mode == ReceiverMode::ExternalOutput {
            args.push("-d".to_string());
        }
        args.push("-u".to_string());
        args.push(uri.to_string());
        if let Some(config) = &self.relay_config {
            args.push("-c".to_string());
            args.push(config.clone());
        }
        args
    }
}

/// Sender as written to the state file
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedSender {
    #[serde(default)]
    scsenderuri: String,
    #[serde(default)]
    scsendermetadata: String,
}

fn load_sender(path: &Path) -> PersistedSender {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_default()
}

fn save_sender(path: &Path, uri: &str, metadata: &str) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let sender = PersistedSender {
        scsenderuri: uri.to_string(),
        scsendermetadata: metadata.to_string(),
    };
    match serde_json::to_string_pretty(&sender) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                error!("Failed writing receiver state to {}: {}", path.display(), e);
            }
        }
        Err(e) => error!("Failed encoding receiver state: {}", e),
    }
}

struct Session {
    relay: Option<RelayProcess>,
    active: bool,
}

#[derive(Clone, Default, PartialEq)]
struct Sender {
    uri: String,
    metadata: String,
}

pub struct ReceiverSession {
    settings: ReceiverSettings,
    player: SharedPlayer,
    bus: SharedBus,
    session: Mutex<Session>,
    /// Readable without waiting on a handshake that holds `session`
    sender: std::sync::Mutex<Sender>,
    /// Cancels an in-progress handshake; kept outside `session` so `stop`
    /// can reach it while `play` holds the session lock.
    handshake: std::sync::Mutex<CancellationToken>,
}

impl ReceiverSession {
    /// Create the session, restoring the last sender from the state file.
    pub fn new(settings: ReceiverSettings, player: SharedPlayer, bus: SharedBus) -> Self {
        let persisted = settings
            .state_file
            .as_deref()
            .map(load_sender)
            .unwrap_or_default();
        debug!(
            "Receiver sender restored: uri [{}]",
            persisted.scsenderuri
        );
        Self {
            settings,
            player,
            bus,
            session: Mutex::new(Session {
                relay: None,
                active: false,
            }),
            sender: std::sync::Mutex::new(Sender {
                uri: persisted.scsenderuri,
                metadata: persisted.scsendermetadata,
            }),
            handshake: std::sync::Mutex::new(CancellationToken::new()),
        }
    }

    pub fn settings(&self) -> &ReceiverSettings {
        &self.settings
    }

    fn fresh_handshake_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut current = self
            .handshake
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = token.clone();
        token
    }

    fn current_sender(&self) -> Sender {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn cancel_handshake(&self) {
        self.handshake
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cancel();
    }

    /// Start relaying the configured sender.
    pub async fn play(&self) -> Result<(), ReceiverError> {
        let token = self.fresh_handshake_token();
        let mut session = self.session.lock().await;
        let sender = self.current_sender();
        if sender.uri.is_empty() || sender.metadata.is_empty() {
            warn!("Receiver play refused: no sender configured");
            return Err(ReceiverError::NotConfigured);
        }
        session.active = true;
        if let Some(relay) = session.relay.take() {
            relay.kill().await;
        }

        let result = self.start(&mut session, &sender, &token).await;
        if let Err(e) = &result {
            error!("Receiver play failed: {}", e);
            self.teardown(&mut session).await;
        }
        self.publish_transport(&session);
        result
    }

    async fn start(
        &self,
        session: &mut Session,
        sender: &Sender,
        token: &CancellationToken,
    ) -> Result<(), ReceiverError> {
        let args = self.settings.relay_args(&sender.uri);
        let mut relay = RelayProcess::spawn(&self.settings.relay_path, &args)?;

        if self.settings.mode == ReceiverMode::ExternalOutput {
            relay.drain_output();
            session.relay = Some(relay);
            return Ok(());
        }

        if let Err(e) = self.player.lock().await.stop().await {
            warn!("Receiver: stopping player failed: {}", e);
        }

        match relay
            .wait_ready(self.settings.handshake_timeout, token)
            .await
        {
            Ok(line) => debug!("Relay ready: {}", line),
            Err(e) => {
                relay.kill().await;
                return Err(e);
            }
        }
        relay.drain_output();
        session.relay = Some(relay);

        let endpoint = self.settings.endpoint_uri();
        let mut player = self.player.lock().await;
        let existing = player
            .queue_url_map()
            .await?
            .into_iter()
            .find(|(_, uri)| *uri == endpoint)
            .map(|(id, _)| id);
        let id = match existing {
            Some(id) => id,
            None => {
                let meta = didl::parse_track(&sender.metadata)?;
                player.insert_after_id(&endpoint, 0, &meta).await?
            }
        };
        player.play_id(id).await?;
        info!("Receiver playing {} (queue id {})", sender.uri, id);
        Ok(())
    }

    /// Stop relaying. Succeeds when nothing is running.
    pub async fn stop(&self) -> Result<(), ReceiverError> {
        self.cancel_handshake();
        let mut session = self.session.lock().await;
        self.teardown(&mut session).await;
        self.publish_transport(&session);
        Ok(())
    }

    /// Kill the relay and, in queue-injection mode, remove the endpoint
    /// from the queue.
    async fn teardown(&self, session: &mut Session) {
        if let Some(relay) = session.relay.take() {
            relay.kill().await;
        }
        if self.settings.mode != ReceiverMode::QueueInjection {
            return;
        }

        let endpoint = self.settings.endpoint_uri();
        let mut player = self.player.lock().await;
        if let Err(e) = player.stop().await {
            warn!("Receiver stop: stopping player failed: {}", e);
        }
        match player.queue_url_map().await {
            Ok(map) => {
                for (id, uri) in map {
                    if uri == endpoint {
                        if let Err(e) = player.delete_id(id).await {
                            warn!("Receiver stop: can't delete queue id {}: {}", id, e);
                        }
                    }
                }
            }
            Err(e) => warn!("Receiver stop: can't list queue: {}", e),
        }
    }

    /// Change the sender. Identical values are a no-op and leave a pending
    /// handshake alone; otherwise a running session is stopped first and the
    /// new sender persisted.
    pub async fn set_sender(&self, uri: &str, metadata: &str) -> Result<(), ReceiverError> {
        let wanted = Sender {
            uri: uri.to_string(),
            metadata: metadata.to_string(),
        };
        if self.current_sender() == wanted {
            return Ok(());
        }
        self.cancel_handshake();
        let mut session = self.session.lock().await;
        if session.relay.is_some() {
            self.teardown(&mut session).await;
            self.publish_transport(&session);
        }
        *self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = wanted;
        if let Some(path) = &self.settings.state_file {
            save_sender(path, uri, metadata);
        }
        debug!("Receiver sender set: uri [{}]", uri);
        Ok(())
    }

    /// Current sender `(uri, metadata)`
    pub async fn sender(&self) -> (String, String) {
        let sender = self.current_sender();
        (sender.uri, sender.metadata)
    }

    pub async fn transport_state(&self) -> TransportState {
        let session = self.session.lock().await;
        transport_of(&session)
    }

    pub fn protocol_info(&self) -> &'static str {
        PROTOCOL_INFO
    }

    /// Source selection: deactivating stops the session.
    pub async fn set_active(&self, active: bool) -> Result<(), ReceiverError> {
        if active {
            self.session.lock().await.active = true;
            return Ok(());
        }
        self.cancel_handshake();
        let mut session = self.session.lock().await;
        session.active = false;
        self.teardown(&mut session).await;
        self.publish_transport(&session);
        Ok(())
    }

    pub async fn is_active(&self) -> bool {
        self.session.lock().await.active
    }

    /// Bring the session in line with what actually happened outside it.
    async fn reconcile(&self, session: &mut Session) {
        let Some(relay) = session.relay.as_mut() else {
            return;
        };
        match self.settings.mode {
            ReceiverMode::QueueInjection => {
                let state = self.player.lock().await.status().state;
                if !matches!(state, PlayState::Playing | PlayState::Paused) {
                    info!("Receiver: player left the relay stream, stopping");
                    self.teardown(session).await;
                    self.publish_transport(session);
                }
            }
            ReceiverMode::ExternalOutput => {
                if !relay.is_alive() {
                    info!("Receiver: relay exited");
                    session.relay = None;
                    self.publish_transport(session);
                }
            }
        }
    }

    fn publish_transport(&self, session: &Session) {
        self.bus.publish(BusEvent::ReceiverStateChanged {
            transport_state: transport_of(session).as_str().to_string(),
            uri: self.current_sender().uri,
        });
    }
}

fn transport_of(session: &Session) -> TransportState {
    if session.relay.is_some() {
        TransportState::Playing
    } else {
        TransportState::Stopped
    }
}

#[async_trait]
impl StatefulService for ReceiverSession {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn make_state(&self) -> StateMap {
        let mut session = self.session.lock().await;
        self.reconcile(&mut session).await;

        let sender = self.current_sender();
        let mut state = StateMap::new();
        state.insert("Uri".to_string(), sender.uri);
        state.insert("Metadata".to_string(), sender.metadata);
        state.insert(
            "TransportState".to_string(),
            transport_of(&session).as_str().to_string(),
        );
        state.insert("ProtocolInfo".to_string(), PROTOCOL_INFO.to_string());
        state
    }
}
