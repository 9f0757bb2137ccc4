//! Mock servers for integration testing
//!
//! Simulates an MPD server and an HTTP origin so the player client, the
//! receiver session, the network fetch and the HTTP API can be exercised
//! without real services.

#![allow(dead_code)]

pub mod http;
pub mod mpd;

pub use http::MockHttpServer;
pub use mpd::MockMpdServer;
