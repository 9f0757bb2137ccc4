//! Internet radio source: a fixed channel list played through the player
//! queue.
//!
//! Playing a channel saves the player's queue and status first; stopping
//! (or switching to another source) puts them back.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::receiver::TransportState;
use super::state::{StateMap, StatefulService};
use crate::config::{RadioChannel, RadioConfig};
use crate::didl;
use crate::exchange;
use crate::fetch::{FetchError, NetFetch};
use crate::mpd::{MpdError, PlayState, SavedState, SharedPlayer, Track};

pub const SERVICE_NAME: &str = "radio";

pub const PROTOCOL_INFO: &str = "http-get:*:*:*";

const PLAYLIST_EXCHANGE_DEPTH: usize = 4;
/// Playlists larger than this are cut short
const PLAYLIST_MAX_BYTES: usize = 64 * 1024;
const RESOLVE_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("no channel with id {0}")]
    NoChannel(u32),
    #[error("can't fetch {0}")]
    Resolve(String),
    #[error("playlist {0} lists no stream")]
    EmptyPlaylist(String),
    #[error(transparent)]
    Player(#[from] MpdError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Default)]
struct RadioState {
    /// Selected channel, 0 when none
    id: u32,
    /// What actually went into the queue
    stream_uri: String,
    playing: bool,
    saved: Option<SavedState>,
    active: bool,
}

pub struct RadioService {
    channels: Vec<RadioChannel>,
    player: SharedPlayer,
    state: Mutex<RadioState>,
}

impl RadioService {
    pub fn new(config: &RadioConfig, player: SharedPlayer) -> Self {
        debug!("Radio: {} channel(s)", config.channels.len());
        Self {
            channels: config.channels.clone(),
            player,
            state: Mutex::new(RadioState::default()),
        }
    }

    pub fn channels(&self) -> &[RadioChannel] {
        &self.channels
    }

    pub fn channels_max(&self) -> u32 {
        self.channels.len() as u32
    }

    pub fn protocol_info(&self) -> &'static str {
        PROTOCOL_INFO
    }

    fn channel(&self, id: u32) -> Option<&RadioChannel> {
        id.checked_sub(1)
            .and_then(|index| self.channels.get(index as usize))
    }

    pub async fn id(&self) -> u32 {
        self.state.lock().await.id
    }

    /// Select a channel. Switching while playing moves playback to the new
    /// channel; 0 clears the selection.
    pub async fn set_id(&self, id: u32) -> Result<(), RadioError> {
        if id != 0 && self.channel(id).is_none() {
            return Err(RadioError::NoChannel(id));
        }
        let mut state = self.state.lock().await;
        if state.id == id {
            return Ok(());
        }
        state.id = id;
        debug!("Radio: channel {} selected", id);
        if state.playing {
            if id == 0 {
                self.stop_locked(&mut state).await?;
            } else {
                self.start_locked(&mut state).await?;
            }
        }
        Ok(())
    }

    /// Play the selected channel.
    pub async fn play(&self) -> Result<(), RadioError> {
        let mut state = self.state.lock().await;
        state.active = true;
        let result = self.start_locked(&mut state).await;
        if let Err(e) = &result {
            warn!("Radio play failed: {}", e);
            if !state.playing {
                if let Err(e) = self.stop_locked(&mut state).await {
                    warn!("Radio: restoring player state failed: {}", e);
                }
            }
        }
        result
    }

    async fn start_locked(&self, state: &mut RadioState) -> Result<(), RadioError> {
        let channel = self
            .channel(state.id)
            .ok_or(RadioError::NoChannel(state.id))?;
        let stream = resolve_stream_uri(&channel.uri).await?;

        let mut player = self.player.lock().await;
        if state.saved.is_none() {
            state.saved = Some(player.save_state(0).await?);
        }
        player.clear_queue().await?;
        let meta = Track {
            uri: stream.clone(),
            title: channel.title.clone(),
            name: channel.title.clone(),
            ..Default::default()
        };
        let queue_id = player.insert(&stream, None, &meta).await?;
        player.play_id(queue_id).await?;

        info!("Radio playing {} ({})", channel.title, stream);
        state.stream_uri = stream;
        state.playing = true;
        Ok(())
    }

    /// Stop and put the saved player state back. Succeeds when not playing.
    pub async fn stop(&self) -> Result<(), RadioError> {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await
    }

    async fn stop_locked(&self, state: &mut RadioState) -> Result<(), RadioError> {
        let Some(saved) = state.saved.take() else {
            state.playing = false;
            return Ok(());
        };
        state.playing = false;
        state.stream_uri.clear();

        let mut player = self.player.lock().await;
        if let Err(e) = player.stop().await {
            warn!("Radio stop: stopping player failed: {}", e);
        }
        player.restore_state(&saved).await?;
        debug!("Radio stopped, {} queue entries restored", saved.queue.len());
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), RadioError> {
        let state = self.state.lock().await;
        if state.playing {
            self.player.lock().await.pause(true).await?;
        }
        Ok(())
    }

    /// Source selection: deactivating stops and restores.
    pub async fn set_active(&self, active: bool) -> Result<(), RadioError> {
        let mut state = self.state.lock().await;
        state.active = active;
        if active {
            return Ok(());
        }
        self.stop_locked(&mut state).await
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.active
    }

    pub async fn transport_state(&self) -> TransportState {
        let state = self.state.lock().await;
        self.transport_of(&state).await
    }

    async fn transport_of(&self, state: &RadioState) -> TransportState {
        if !state.playing {
            return TransportState::Stopped;
        }
        let mut player = self.player.lock().await;
        let refreshed = player.refresh_status().await.map(|status| status.state);
        let play_state = match refreshed {
            Ok(state) => state,
            Err(e) => {
                debug!("Radio: status refresh failed: {}", e);
                player.status().state
            }
        };
        match play_state {
            PlayState::Playing => TransportState::Playing,
            PlayState::Paused => TransportState::Paused,
            _ => TransportState::Stopped,
        }
    }

    /// DIDL-Lite metadata of channel `id`
    pub fn metadata(&self, id: u32) -> Option<String> {
        self.channel(id).map(|channel| {
            didl::broadcast_item(id, &channel.title, &channel.uri, channel.art_uri.as_deref())
        })
    }
}

#[async_trait]
impl StatefulService for RadioService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn make_state(&self) -> StateMap {
        let state = self.state.lock().await;
        let uri = if state.stream_uri.is_empty() {
            self.channel(state.id)
                .map(|c| c.uri.clone())
                .unwrap_or_default()
        } else {
            state.stream_uri.clone()
        };

        let mut map = StateMap::new();
        map.insert(
            "TransportState".to_string(),
            self.transport_of(&state).await.as_str().to_string(),
        );
        map.insert("Id".to_string(), state.id.to_string());
        map.insert("Uri".to_string(), uri);
        map.insert(
            "Metadata".to_string(),
            self.metadata(state.id).unwrap_or_default(),
        );
        map.insert("ProtocolInfo".to_string(), PROTOCOL_INFO.to_string());
        map.insert("ChannelsMax".to_string(), self.channels_max().to_string());
        map
    }
}

// =============================================================================
// Stream resolution
// =============================================================================

fn is_pls_content_type(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.contains("audio/x-scpls") || content_type.contains("application/pls+xml")
}

fn looks_like_pls(data: &[u8]) -> bool {
    String::from_utf8_lossy(data)
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("[playlist]")
}

/// Stream URIs listed by a PLS playlist, in file order
pub fn parse_pls(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once('=')?;
            let value = value.trim();
            (key.trim().to_ascii_lowercase().starts_with("file") && !value.is_empty())
                .then(|| value.to_string())
        })
        .collect()
}

/// Turn a channel URI into something the player can queue: PLS playlists
/// are fetched and their first entry used, anything else is passed through.
pub async fn resolve_stream_uri(uri: &str) -> Result<String, RadioError> {
    let (producer, mut consumer) = exchange::exchange("radio", PLAYLIST_EXCHANGE_DEPTH);
    let mut fetch = NetFetch::new(uri);
    fetch.start(producer, 0)?;

    if !fetch.wait_for_headers(Some(RESOLVE_WAIT)).await {
        return Err(RadioError::Resolve(uri.to_string()));
    }
    if !matches!(fetch.http_code(), Some(code) if (200..300).contains(&code)) {
        warn!("Radio: {} answered {:?}", uri, fetch.http_code());
        return Err(RadioError::Resolve(uri.to_string()));
    }

    let mut pls = fetch
        .header_value("content-type")
        .is_some_and(|ct| is_pls_content_type(&ct));
    let mut body = Vec::new();
    while let Ok(Some(buf)) = timeout(RESOLVE_WAIT, consumer.take()).await {
        if buf.is_eof() {
            break;
        }
        body.extend_from_slice(buf.remaining());
        consumer.recycle(buf);
        if !pls {
            if !looks_like_pls(&body) {
                // An audio stream: dropping the fetch ends the transfer
                debug!("Radio: {} is a direct stream", uri);
                return Ok(uri.to_string());
            }
            pls = true;
        }
        if body.len() >= PLAYLIST_MAX_BYTES {
            break;
        }
    }
    if !pls {
        return Ok(uri.to_string());
    }

    let entries = parse_pls(&String::from_utf8_lossy(&body));
    debug!("Radio: {} lists {} stream(s)", uri, entries.len());
    entries
        .into_iter()
        .next()
        .ok_or_else(|| RadioError::EmptyPlaylist(uri.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pls_entries_in_file_order() {
        let text = "[playlist]\r\nNumberOfEntries=2\r\nFile1=http://a.example/live\r\nTitle1=A\r\nFile2 = http://b.example/live?x=1\r\nLength1=-1\r\n";
        assert_eq!(
            parse_pls(text),
            vec!["http://a.example/live", "http://b.example/live?x=1"]
        );
    }

    #[test]
    fn pls_without_files_is_empty() {
        assert!(parse_pls("[playlist]\nNumberOfEntries=0\nFile1=\n").is_empty());
    }

    #[test]
    fn pls_detection() {
        assert!(is_pls_content_type("audio/x-scpls; charset=utf-8"));
        assert!(is_pls_content_type("Application/PLS+XML"));
        assert!(!is_pls_content_type("audio/mpeg"));
        assert!(looks_like_pls(b"  \n[Playlist]\nFile1=x"));
        assert!(!looks_like_pls(b"ID3\x04\x00"));
    }
}
