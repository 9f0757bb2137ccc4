//! Cached player status snapshot

use serde::{Deserialize, Serialize};

use super::protocol::Response;
use super::track::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayState {
    #[default]
    Unknown,
    Stopped,
    Playing,
    Paused,
}

impl PlayState {
    pub fn from_mpd(state: &str) -> Self {
        match state {
            "play" => PlayState::Playing,
            "pause" => PlayState::Paused,
            "stop" => PlayState::Stopped,
            _ => PlayState::Unknown,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, PlayState::Playing | PlayState::Paused)
    }
}

/// State after one successful status refresh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub state: PlayState,
    /// 0-100, `None` while never known
    pub volume: Option<u32>,
    pub repeat: bool,
    pub random: bool,
    pub single: bool,
    pub consume: bool,
    pub queue_len: u32,
    pub queue_version: u32,
    pub crossfade: u32,
    pub mixramp_db: f32,
    pub mixramp_delay: f32,
    pub song_pos: Option<u32>,
    pub song_id: Option<u32>,
    pub elapsed_ms: u64,
    pub total_ms: u64,
    pub kbit_rate: u32,
    pub sample_rate: u32,
    pub bit_depth: u32,
    pub channels: u32,
    pub current_song: Track,
    pub next_song: Track,
    pub error_message: String,
    pub version: (u32, u32, u32),
    /// Bumped each time the current song URI changes
    pub track_counter: u64,
    pub details_counter: u64,
}

/// Audio format as reported in `audio: rate:bits:channels`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits: u32,
    pub channels: u32,
}

impl AudioFormat {
    /// Parse `44100:16:2`. Non-numeric parts (`f` for float samples, `dsd64`
    /// rates) read as 0.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split(':');
        let sample_rate = parts.next()?;
        let bits = parts.next()?;
        let channels = parts.next()?;
        Some(Self {
            sample_rate: sample_rate.parse().unwrap_or(0),
            bits: bits.parse().unwrap_or(0),
            channels: channels.parse().unwrap_or(0),
        })
    }
}

fn parse_flag(value: Option<&str>) -> bool {
    // "single" may also read "oneshot"
    matches!(value, Some("1") | Some("oneshot"))
}

impl PlayerStatus {
    /// Copy the plain fields of a `status` response. Volume, play state,
    /// songs and the audio format are arbitrated by the client.
    pub fn apply_status(&mut self, resp: &Response) {
        self.repeat = parse_flag(resp.get("repeat"));
        self.random = parse_flag(resp.get("random"));
        self.single = parse_flag(resp.get("single"));
        self.consume = parse_flag(resp.get("consume"));
        self.queue_len = resp.get_parsed("playlistlength").unwrap_or(0);
        self.queue_version = resp.get_parsed("playlist").unwrap_or(0);
        self.crossfade = resp.get_parsed("xfade").unwrap_or(0);
        self.mixramp_db = resp.get_parsed("mixrampdb").unwrap_or(0.0);
        self.mixramp_delay = resp.get_parsed("mixrampdelay").unwrap_or(0.0);
        self.song_pos = resp.get_parsed("song");
        self.song_id = resp.get_parsed("songid");

        self.elapsed_ms = resp
            .get_parsed::<f64>("elapsed")
            .map(|s| (s * 1000.0).round() as u64)
            .unwrap_or(0);
        self.total_ms = resp
            .get_parsed::<f64>("duration")
            .map(|s| (s * 1000.0).round() as u64)
            .or_else(|| {
                resp.get("time")
                    .and_then(|t| t.split_once(':'))
                    .and_then(|(_, total)| total.parse::<u64>().ok())
                    .map(|s| s.saturating_mul(1000))
            })
            .unwrap_or(0);
        self.kbit_rate = resp.get_parsed("bitrate").unwrap_or(0);
        if let Some(err) = resp.get("error") {
            self.error_message = err.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_fields_are_copied() {
        let resp = Response::new(
            [
                ("repeat", "1"),
                ("random", "0"),
                ("single", "oneshot"),
                ("consume", "0"),
                ("playlist", "17"),
                ("playlistlength", "3"),
                ("state", "play"),
                ("song", "1"),
                ("songid", "22"),
                ("time", "12:200"),
                ("elapsed", "12.345"),
                ("bitrate", "1411"),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        );
        let mut status = PlayerStatus::default();
        status.apply_status(&resp);
        assert!(status.repeat && status.single && !status.random);
        assert_eq!(status.queue_version, 17);
        assert_eq!(status.queue_len, 3);
        assert_eq!(status.song_pos, Some(1));
        assert_eq!(status.song_id, Some(22));
        assert_eq!(status.elapsed_ms, 12345);
        assert_eq!(status.total_ms, 200_000);
        assert_eq!(status.kbit_rate, 1411);
    }

    #[test]
    fn audio_format_variants() {
        assert_eq!(
            AudioFormat::parse("44100:16:2"),
            Some(AudioFormat {
                sample_rate: 44100,
                bits: 16,
                channels: 2
            })
        );
        assert_eq!(AudioFormat::parse("48000:f:2").map(|f| f.bits), Some(0));
        assert_eq!(AudioFormat::parse("bogus"), None);
    }

    #[test]
    fn play_states() {
        assert_eq!(PlayState::from_mpd("pause"), PlayState::Paused);
        assert!(PlayState::Playing.is_active());
        assert!(!PlayState::Stopped.is_active());
    }
}
