//! MPD backend client

mod client;
mod connection;
pub mod protocol;
mod status;
mod track;

pub use client::{PlayerClient, SavedState};
pub use protocol::MpdError;
pub use status::{AudioFormat, PlayState, PlayerStatus};
pub use track::{looks_like_transport_uri, AudioResource, Track, LOCAL_URI_PREFIX};

use std::sync::Arc;
use tokio::sync::Mutex;

/// The one client instance, shared by every service
pub type SharedPlayer = Arc<Mutex<PlayerClient>>;
