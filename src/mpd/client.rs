//! MPD client with a uniform reconnect-and-retry policy.
//!
//! Every remote call goes through [`PlayerClient::execute`]: the command is
//! attempted once; if the failure means the session is gone, the client
//! reconnects and tries exactly once more. Rejections (`ACK`) are returned as
//! is. The client keeps the last successful status snapshot.

use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::connection::MpdConnection;
use super::protocol::{flag, MpdCommand, MpdError, Response};
use super::status::{AudioFormat, PlayState, PlayerStatus};
use super::track::{AudioResource, Track};
use crate::bus::{BusEvent, SharedBus};
use crate::config::MpdConfig;
use crate::hooks::{self, Hooks};

/// Pause before the second attempt of a [`Retry::AfterPause`] command
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Comment tag stored with the entries this client inserts
const CLIENT_COMMENT: &str = "client=mpd-renderer-bridge;";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    Immediate,
    AfterPause,
}

/// Where the previous insert landed, for cheap successive inserts
#[derive(Debug, Clone, Copy)]
struct LastInsert {
    id: u32,
    pos: Option<u32>,
    queue_version: u32,
}

/// Everything needed to put the player back the way it was
#[derive(Debug, Clone, Default)]
pub struct SavedState {
    pub status: PlayerStatus,
    pub queue: Vec<Track>,
}

pub struct PlayerClient {
    config: MpdConfig,
    hooks: Hooks,
    bus: SharedBus,
    conn: Option<MpdConnection>,
    have_addtagid: bool,
    status: PlayerStatus,
    cached_volume: Option<u32>,
    premute_volume: u32,
    last_insert: Option<LastInsert>,
}

impl PlayerClient {
    /// Create a disconnected client. Call [`connect`](Self::connect) next.
    pub fn new(config: MpdConfig, hooks: Hooks, bus: SharedBus) -> Self {
        Self {
            config,
            hooks,
            bus,
            conn: None,
            have_addtagid: false,
            status: PlayerStatus::default(),
            cached_volume: None,
            premute_volume: 0,
            last_insert: None,
        }
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Open the session, authenticate and read the supported commands.
    pub async fn connect(&mut self) -> Result<(), MpdError> {
        self.conn = None;
        let io_timeout = Duration::from_millis(self.config.timeout_ms.max(1));
        let mut conn = MpdConnection::connect(&self.config.host, self.config.port, io_timeout)
            .await
            .inspect_err(|e| {
                warn!(
                    "Can't connect to MPD at {}:{}: {}",
                    self.config.host, self.config.port, e
                )
            })?;

        if let Some(password) = self.config.password.as_deref().filter(|p| !p.is_empty()) {
            conn.run(&MpdCommand::new("password").arg(password)).await?;
        }
        let commands = conn.run(&MpdCommand::new("commands")).await?;
        self.have_addtagid = commands.values("command").any(|c| c == "addtagid");

        let (major, minor, patch) = conn.version();
        let version = format!("{}.{}.{}", major, minor, patch);
        self.status.version = conn.version();
        self.conn = Some(conn);

        info!(
            "MPD connected: {}:{} v{} (addtagid: {})",
            self.config.host, self.config.port, version, self.have_addtagid
        );
        self.bus.publish(BusEvent::MpdConnected {
            host: self.config.host.clone(),
            version,
        });
        Ok(())
    }

    pub async fn reconnect(&mut self) -> Result<(), MpdError> {
        self.mark_disconnected();
        self.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Drop the session (no-op when already disconnected).
    pub fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            info!("MPD disconnected from {}", self.config.host);
            self.bus.publish(BusEvent::MpdDisconnected {
                host: self.config.host.clone(),
            });
        }
    }

    fn mark_disconnected(&mut self) {
        if self.conn.take().is_some() {
            warn!("MPD connection lost to {}", self.config.host);
            self.bus.publish(BusEvent::MpdDisconnected {
                host: self.config.host.clone(),
            });
        }
    }

    async fn run_once(&mut self, cmd: &MpdCommand) -> Result<Response, MpdError> {
        let conn = self.conn.as_mut().ok_or(MpdError::NotConnected)?;
        debug!("MPD > {}", cmd.name());
        conn.run(cmd).await
    }

    /// Attempt, reconnect once on a lost session, attempt again.
    async fn execute(&mut self, cmd: MpdCommand, retry: Retry) -> Result<Response, MpdError> {
        match self.run_once(&cmd).await {
            Ok(resp) => Ok(resp),
            Err(e) if e.is_connection_lost() => {
                warn!("MPD {} failed ({}), reconnecting", cmd.name(), e);
                self.mark_disconnected();
                if retry == Retry::AfterPause {
                    tokio::time::sleep(RETRY_PAUSE).await;
                }
                self.connect().await?;
                let result = self.run_once(&cmd).await;
                if let Err(e) = &result {
                    error!("MPD {} failed after reconnect: {}", cmd.name(), e);
                    if e.is_connection_lost() {
                        self.mark_disconnected();
                    }
                }
                result
            }
            Err(e) => {
                warn!("MPD {} rejected: {}", cmd.name(), e);
                Err(e)
            }
        }
    }

    async fn simple(&mut self, cmd: MpdCommand) -> Result<(), MpdError> {
        self.execute(cmd, Retry::Immediate).await.map(|_| ())
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Last successfully refreshed snapshot
    pub fn status(&self) -> &PlayerStatus {
        &self.status
    }

    /// Fetch a fresh status snapshot from MPD.
    ///
    /// On failure the cached snapshot is left as it was.
    pub async fn refresh_status(&mut self) -> Result<&PlayerStatus, MpdError> {
        if self.conn.is_none() {
            self.connect().await?;
        }
        let resp = self
            .execute(MpdCommand::new("status"), Retry::Immediate)
            .await?;

        let mut next = self.status.clone();
        next.apply_status(&resp);

        // Volume: external command, else MPD; unknown keeps the cached value
        let reported = if self.hooks.external_volume_control
            && !self.hooks.getexternalvolume.is_empty()
        {
            let out = hooks::capture_output("getexternalvolume", &self.hooks.getexternalvolume)
                .await;
            let parsed = out.as_deref().and_then(|o| o.trim().parse::<i64>().ok());
            if parsed.is_none() {
                warn!("Can't read external volume");
            }
            parsed
        } else {
            resp.get_parsed::<i64>("volume")
        };
        match reported {
            Some(v) if v >= 0 => {
                let v = v.min(100) as u32;
                self.cached_volume = Some(v);
                next.volume = Some(v);
            }
            _ => next.volume = self.cached_volume,
        }

        let prev_state = self.status.state;
        next.state = resp
            .get("state")
            .map(PlayState::from_mpd)
            .unwrap_or_default();
        let transition_hook = match next.state {
            PlayState::Stopped if prev_state.is_active() => {
                self.hooks.onstop.clone().map(|c| ("onstop", c))
            }
            PlayState::Playing if prev_state != PlayState::Playing => {
                self.hooks.onplay.clone().map(|c| ("onplay", c))
            }
            PlayState::Paused if prev_state == PlayState::Playing => {
                self.hooks.onpause.clone().map(|c| ("onpause", c))
            }
            _ => None,
        };

        match next.song_pos {
            Some(pos) => {
                let prev_uri = self.status.current_song.uri.clone();
                match self
                    .execute(MpdCommand::new("currentsong"), Retry::Immediate)
                    .await
                {
                    Ok(song) if !song.is_empty() => next.current_song = Track::from_song(&song),
                    Ok(_) => next.current_song = Track::default(),
                    Err(e) => debug!("currentsong failed: {}", e),
                }
                if next.current_song.uri != prev_uri {
                    next.track_counter += 1;
                    next.details_counter = 0;
                }
                let next_pos = pos.saturating_add(1);
                next.next_song = if next_pos < next.queue_len {
                    match self.song_at(next_pos).await {
                        Ok(Some(track)) => track,
                        _ => Track::default(),
                    }
                } else {
                    Track::default()
                };
            }
            None => {
                next.current_song = Track::default();
                next.next_song = Track::default();
            }
        }

        match resp.get("audio").and_then(AudioFormat::parse) {
            Some(format) => {
                next.sample_rate = format.sample_rate;
                next.bit_depth = format.bits;
                next.channels = format.channels;
                // Streams carry no resource details of their own
                next.current_song.resource = AudioResource {
                    bitrate: next.kbit_rate.saturating_mul(1000),
                    sample_rate: format.sample_rate,
                    bits_per_sample: format.bits,
                    channels: format.channels,
                };
            }
            None => {
                next.sample_rate = 0;
                next.bit_depth = 0;
                next.channels = 0;
            }
        }

        self.status = next;
        if let Some((label, command)) = transition_hook {
            hooks::run_shell(label, &command).await;
        }
        Ok(&self.status)
    }

    /// Queue position of the current song, if any
    pub async fn cur_pos(&mut self) -> Result<Option<u32>, MpdError> {
        Ok(self.refresh_status().await?.song_pos)
    }

    /// Cached volume (0-100)
    pub fn get_volume(&self) -> Option<u32> {
        self.status.volume
    }

    // =========================================================================
    // Transport
    // =========================================================================

    /// Start playback, at queue position `pos` when given.
    pub async fn play(&mut self, pos: Option<u32>) -> Result<(), MpdError> {
        debug!("play(pos={:?})", pos);
        self.run_onstart().await;
        let cmd = match pos {
            Some(pos) => MpdCommand::new("play").arg(pos),
            None => MpdCommand::new("play"),
        };
        self.simple(cmd).await?;
        self.refresh_status().await.map(|_| ())
    }

    pub async fn play_id(&mut self, id: u32) -> Result<(), MpdError> {
        debug!("play_id({})", id);
        self.run_onstart().await;
        self.simple(MpdCommand::new("playid").arg(id)).await?;
        self.refresh_status().await.map(|_| ())
    }

    async fn run_onstart(&self) {
        if let Some(command) = &self.hooks.onstart {
            hooks::run_shell("onstart", command).await;
        }
    }

    pub async fn pause(&mut self, on: bool) -> Result<(), MpdError> {
        self.simple(MpdCommand::new("pause").arg(flag(on))).await
    }

    pub async fn toggle_pause(&mut self) -> Result<(), MpdError> {
        self.simple(MpdCommand::new("pause")).await
    }

    pub async fn stop(&mut self) -> Result<(), MpdError> {
        self.simple(MpdCommand::new("stop")).await
    }

    /// Seek within the current song.
    pub async fn seek(&mut self, seconds: u32) -> Result<(), MpdError> {
        let pos = self
            .refresh_status()
            .await?
            .song_pos
            .ok_or(MpdError::NoCurrentSong)?;
        debug!("seek: pos {} to {}s", pos, seconds);
        self.simple(MpdCommand::new("seek").arg(pos).arg(seconds))
            .await
    }

    pub async fn next(&mut self) -> Result<(), MpdError> {
        self.simple(MpdCommand::new("next")).await
    }

    pub async fn previous(&mut self) -> Result<(), MpdError> {
        self.simple(MpdCommand::new("previous")).await
    }

    pub async fn repeat(&mut self, on: bool) -> Result<(), MpdError> {
        self.simple(MpdCommand::new("repeat").arg(flag(on))).await
    }

    pub async fn random(&mut self, on: bool) -> Result<(), MpdError> {
        self.simple(MpdCommand::new("random").arg(flag(on))).await
    }

    pub async fn single(&mut self, on: bool) -> Result<(), MpdError> {
        self.simple(MpdCommand::new("single").arg(flag(on))).await
    }

    pub async fn consume(&mut self, on: bool) -> Result<(), MpdError> {
        self.simple(MpdCommand::new("consume").arg(flag(on))).await
    }

    // =========================================================================
    // Volume
    // =========================================================================

    /// Set the volume, with mute handled as an override.
    ///
    /// With `is_mute`, a level of 0 mutes (remembering the current volume)
    /// and any other level unmutes (restoring the remembered volume when
    /// there is one).
    pub async fn set_volume(&mut self, level: i32, is_mute: bool) -> Result<(), MpdError> {
        debug!("set_volume({}, mute={})", level, is_mute);
        let mut level = level;
        // Committed only once the backend took the new level
        let mut premute = self.premute_volume;
        if is_mute {
            if level != 0 {
                if premute != 0 {
                    level = premute as i32;
                }
                premute = 0;
            } else {
                if premute > 0 {
                    // Already muted
                    return Ok(());
                }
                premute = match self.cached_volume {
                    Some(v) if v > 0 => v,
                    _ => 1,
                };
            }
        }
        let level = level.clamp(0, 100) as u32;

        if !self.hooks.external_volume_control {
            self.simple(MpdCommand::new("setvol").arg(level)).await?;
        }
        self.premute_volume = premute;
        if !self.hooks.onvolumechange.is_empty() {
            hooks::run_argv(
                "onvolumechange",
                &self.hooks.onvolumechange,
                Some(&level.to_string()),
            )
            .await;
        }
        self.status.volume = Some(level);
        self.cached_volume = Some(level);
        Ok(())
    }

    /// Stop reading or notifying an external volume controller and drive
    /// the MPD mixer directly.
    pub fn force_internal_volume_control(&mut self) {
        self.hooks.getexternalvolume.clear();
        if self.hooks.external_volume_control {
            self.hooks.onvolumechange.clear();
        }
        self.hooks.external_volume_control = false;
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Add `uri` at `pos` (appended when `None`) and return its queue id.
    pub async fn insert(
        &mut self,
        uri: &str,
        pos: Option<u32>,
        meta: &Track,
    ) -> Result<u32, MpdError> {
        debug!("insert({}, pos={:?})", uri, pos);
        let mut cmd = MpdCommand::new("addid").arg(uri);
        if let Some(pos) = pos {
            cmd = cmd.arg(pos);
        }
        let resp = self.execute(cmd, Retry::Immediate).await?;
        let id = resp
            .get_parsed::<u32>("Id")
            .ok_or_else(|| MpdError::Protocol("addid returned no Id".to_string()))?;

        if self.have_addtagid {
            if let Err(e) = self.send_tag_data(id, meta).await {
                debug!("Can't tag queue entry {}: {}", id, e);
            }
        }
        if let Err(e) = self.refresh_status().await {
            warn!("insert: status refresh failed: {}", e);
        }
        self.last_insert = Some(LastInsert {
            id,
            pos,
            queue_version: self.status.queue_version,
        });
        Ok(id)
    }

    /// Insert `uri` right after the entry with queue id `id` (0 = at the
    /// head). Falls back to the end of the queue when `id` is not found.
    pub async fn insert_after_id(
        &mut self,
        uri: &str,
        id: u32,
        meta: &Track,
    ) -> Result<u32, MpdError> {
        debug!("insert_after_id({}, {})", uri, id);
        if id == 0 {
            return self.insert(uri, Some(0), meta).await;
        }

        if let Err(e) = self.refresh_status().await {
            warn!("insert_after_id: status refresh failed: {}", e);
        }
        let fast = self.last_insert.and_then(|last| {
            let pos = last.pos?;
            (last.id == id && last.queue_version == self.status.queue_version).then_some(pos + 1)
        });
        let new_pos = match fast {
            Some(pos) => pos,
            None => {
                let queue = self.queue_data().await?;
                queue
                    .iter()
                    .enumerate()
                    .find(|(i, track)| track.id == Some(id) || i + 1 == queue.len())
                    .map(|(i, _)| i as u32 + 1)
                    .unwrap_or(0)
            }
        };
        self.insert(uri, Some(new_pos), meta).await
    }

    /// Tag a queue entry with the given metadata.
    pub async fn send_tag_data(&mut self, id: u32, meta: &Track) -> Result<(), MpdError> {
        if !self.have_addtagid {
            return Ok(());
        }
        let tags = [
            ("Artist", meta.artist.as_str()),
            ("Album", meta.album.as_str()),
            ("Title", meta.title.as_str()),
            ("Track", meta.track_number.as_str()),
            ("Comment", CLIENT_COMMENT),
        ];
        for (tag, value) in tags {
            let value = value.replace(['\r', '\n'], " ");
            self.simple(MpdCommand::new("addtagid").arg(id).arg(tag).arg(value))
                .await?;
        }
        Ok(())
    }

    pub async fn delete_id(&mut self, id: u32) -> Result<(), MpdError> {
        debug!("delete_id({})", id);
        self.execute(MpdCommand::new("deleteid").arg(id), Retry::AfterPause)
            .await
            .map(|_| ())
    }

    /// Delete positions `start..end`
    pub async fn delete_pos_range(&mut self, start: u32, end: u32) -> Result<(), MpdError> {
        debug!("delete_pos_range({}, {})", start, end);
        self.simple(MpdCommand::new("delete").arg(format!("{}:{}", start, end)))
            .await
    }

    pub async fn clear_queue(&mut self) -> Result<(), MpdError> {
        self.simple(MpdCommand::new("clear")).await
    }

    /// Does queue id `id` exist?
    pub async fn stat_id(&mut self, id: u32) -> Result<bool, MpdError> {
        match self
            .execute(MpdCommand::new("playlistid").arg(id), Retry::Immediate)
            .await
        {
            Ok(resp) => Ok(!resp.is_empty()),
            Err(MpdError::Ack { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn song_at(&mut self, pos: u32) -> Result<Option<Track>, MpdError> {
        let resp = self
            .execute(MpdCommand::new("playlistinfo").arg(pos), Retry::Immediate)
            .await?;
        Ok((!resp.is_empty()).then(|| Track::from_song(&resp)))
    }

    /// All queue entries in order
    pub async fn queue_data(&mut self) -> Result<Vec<Track>, MpdError> {
        let resp = self
            .execute(MpdCommand::new("playlistinfo"), Retry::Immediate)
            .await?;
        Ok(resp
            .split_records("file")
            .iter()
            .map(Track::from_song)
            .collect())
    }

    /// Queue id → published URI
    pub async fn queue_url_map(&mut self) -> Result<HashMap<u32, String>, MpdError> {
        Ok(self
            .queue_data()
            .await?
            .into_iter()
            .filter_map(|t| t.id.map(|id| (id, t.uri)))
            .collect())
    }

    // =========================================================================
    // Save / restore
    // =========================================================================

    /// Capture status and queue. A non-zero `seek_ms` replaces the saved
    /// elapsed time.
    pub async fn save_state(&mut self, seek_ms: u64) -> Result<SavedState, MpdError> {
        let mut status = self.refresh_status().await?.clone();
        if seek_ms > 0 {
            status.elapsed_ms = seek_ms;
        }
        let queue = self.queue_data().await?;
        debug!("save_state: {} entries, {:?}", queue.len(), status.state);
        Ok(SavedState { status, queue })
    }

    pub async fn restore_state(&mut self, saved: &SavedState) -> Result<(), MpdError> {
        let status = &saved.status;
        debug!("restore_state: elapsed {}ms", status.elapsed_ms);

        self.clear_queue().await?;
        for (i, track) in saved.queue.iter().enumerate() {
            self.insert(track.queue_uri(), Some(i as u32), track)
                .await
                .inspect_err(|e| error!("restore_state: insert failed: {}", e))?;
        }
        self.repeat(status.repeat).await?;
        self.random(status.random).await?;
        self.single(status.single).await?;
        self.consume(status.consume).await?;

        self.cached_volume = status.volume;
        self.restore_volume(status.volume).await?;

        if status.state.is_active() {
            self.play(status.song_pos).await?;
            if status.elapsed_ms > 0 {
                self.seek((status.elapsed_ms / 1000) as u32).await?;
            }
            if status.state == PlayState::Paused {
                self.pause(true).await?;
            }
            self.restore_volume(status.volume).await?;
        }
        Ok(())
    }

    async fn restore_volume(&mut self, volume: Option<u32>) -> Result<(), MpdError> {
        match volume {
            Some(v) if !self.hooks.external_volume_control => {
                self.simple(MpdCommand::new("setvol").arg(v)).await
            }
            _ => Ok(()),
        }
    }
}
