//! Queue entries as seen by the renderer

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::protocol::Response;

/// Prefix given to queue URIs that are not transport URIs (local files)
pub const LOCAL_URI_PREFIX: &str = "http://127.0.0.1/";

#[allow(clippy::expect_used)] // Constant pattern, checked by the tests below
static TRANSPORT_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[[:alpha:]]+://.+").expect("valid transport URI regex"));

/// True for `scheme://something` URIs
pub fn looks_like_transport_uri(uri: &str) -> bool {
    TRANSPORT_URI.is_match(uri)
}

/// Audio characteristics of a track's resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioResource {
    /// Bits per second
    pub bitrate: u32,
    pub sample_rate: u32,
    pub bits_per_sample: u32,
    pub channels: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// URI as published to controllers
    pub uri: String,
    /// URI as stored in the MPD queue, when it differs from `uri`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend_uri: String,
    pub name: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub track_number: String,
    pub duration_secs: u32,
    pub resource: AudioResource,
    /// MPD queue id
    pub id: Option<u32>,
}

impl Track {
    /// Build from one song record (`file:` ... lines).
    pub fn from_song(song: &Response) -> Self {
        let file = song.get("file").unwrap_or_default().to_string();
        let (uri, backend_uri) = if looks_like_transport_uri(&file) {
            (file, String::new())
        } else {
            (format!("{}{}", LOCAL_URI_PREFIX, file), file)
        };

        let tag = |key: &str| song.get(key).unwrap_or_default().to_string();
        let name = tag("Name");
        let mut artist = tag("Artist");
        if artist.is_empty() {
            artist = name.clone();
        }
        let mut track_number = tag("Track");
        if let Some(slash) = track_number.find('/') {
            track_number.truncate(slash);
        }

        // "duration" carries sub-second precision, "Time" is the legacy integer
        let duration_secs = song
            .get_parsed::<f64>("duration")
            .map(|d| d as u32)
            .or_else(|| song.get_parsed::<u32>("Time"))
            .unwrap_or(0);

        Self {
            uri,
            backend_uri,
            name,
            title: tag("Title"),
            artist,
            album: tag("Album"),
            genre: tag("Genre"),
            track_number,
            duration_secs,
            resource: AudioResource::default(),
            id: song.get_parsed("Id"),
        }
    }

    /// URI to hand back to MPD when re-queueing this track
    pub fn queue_uri(&self) -> &str {
        if self.backend_uri.is_empty() {
            &self.uri
        } else {
            &self.backend_uri
        }
    }

    pub fn is_empty(&self) -> bool {
        self.uri.is_empty()
    }
}
