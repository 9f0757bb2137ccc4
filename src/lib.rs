//! MPD renderer bridge
//!
//! Exposes an MPD server as a network audio renderer:
//! - a resilient MPD client with hooks and queue save/restore
//! - service state publication as change events
//! - a SongCast receiver that drives a relay subprocess
//! - a bounded buffer exchange fed by HTTP fetches

pub mod api;
pub mod bus;
pub mod config;
pub mod didl;
pub mod exchange;
pub mod fetch;
pub mod hooks;
pub mod mpd;
pub mod renderer;
pub mod services;
