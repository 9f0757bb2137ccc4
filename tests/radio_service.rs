#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Radio service tests against a mock MPD and a local HTTP origin

mod mock_servers;

use std::sync::Arc;
use tokio::sync::Mutex;

use mock_servers::http::PLS_STREAM;
use mock_servers::{MockHttpServer, MockMpdServer};
use mpd_renderer_bridge::bus::create_bus;
use mpd_renderer_bridge::config::{MpdConfig, RadioChannel, RadioConfig};
use mpd_renderer_bridge::hooks::Hooks;
use mpd_renderer_bridge::mpd::PlayerClient;
use mpd_renderer_bridge::services::radio::resolve_stream_uri;
use mpd_renderer_bridge::services::{RadioError, RadioService, StatefulService, TransportState};

struct Fixture {
    server: MockMpdServer,
    origin: MockHttpServer,
    radio: RadioService,
}

impl Fixture {
    async fn new(paths: &[&str]) -> Self {
        let server = MockMpdServer::start().await;
        let origin = MockHttpServer::start().await;
        let config = MpdConfig {
            host: "127.0.0.1".to_string(),
            port: server.port(),
            password: None,
            timeout_ms: 2000,
        };
        let mut client = PlayerClient::new(config, Hooks::default(), create_bus());
        client.connect().await.unwrap();

        let channels = paths
            .iter()
            .enumerate()
            .map(|(i, path)| RadioChannel {
                title: format!("Channel {}", i + 1),
                uri: origin.url(path),
                art_uri: None,
            })
            .collect();
        let radio = RadioService::new(
            &RadioConfig { channels },
            Arc::new(Mutex::new(client)),
        );
        Self {
            server,
            origin,
            radio,
        }
    }

    async fn queue_files(&self) -> Vec<String> {
        self.server
            .queue()
            .await
            .into_iter()
            .map(|(_, file)| file)
            .collect()
    }
}

// =============================================================================
// Stream resolution
// =============================================================================

#[tokio::test]
async fn pls_playlist_resolves_to_first_entry() {
    let origin = MockHttpServer::start().await;
    assert_eq!(
        resolve_stream_uri(&origin.url("/radio.pls")).await.unwrap(),
        PLS_STREAM
    );
}

#[tokio::test]
async fn playlist_is_recognised_by_content() {
    let origin = MockHttpServer::start().await;
    assert_eq!(
        resolve_stream_uri(&origin.url("/plain.pls")).await.unwrap(),
        PLS_STREAM
    );
}

#[tokio::test]
async fn audio_stream_is_used_as_is() {
    let origin = MockHttpServer::start().await;
    let uri = origin.url("/audio");
    assert_eq!(resolve_stream_uri(&uri).await.unwrap(), uri);
}

#[tokio::test]
async fn unreachable_channel_fails_to_resolve() {
    let origin = MockHttpServer::start().await;
    assert!(matches!(
        resolve_stream_uri(&origin.url("/missing")).await,
        Err(RadioError::Resolve(_))
    ));
}

// =============================================================================
// Play / stop
// =============================================================================

#[tokio::test]
async fn play_replaces_queue_and_stop_restores_it() {
    let fx = Fixture::new(&["/radio.pls"]).await;
    fx.server.add_songs(&["a.flac", "b.flac", "c.flac"]).await;
    fx.server.set_playing(1, 42.0).await;

    fx.radio.set_id(1).await.unwrap();
    fx.radio.play().await.unwrap();

    assert_eq!(fx.queue_files().await, vec![PLS_STREAM.to_string()]);
    assert_eq!(fx.server.snapshot().await.state, "play");

    fx.radio.stop().await.unwrap();

    assert_eq!(fx.queue_files().await, vec!["a.flac", "b.flac", "c.flac"]);
    let state = fx.server.snapshot().await;
    assert_eq!(state.state, "play");
    assert_eq!(state.current, Some(1));
    assert_eq!(state.elapsed, 42.0);
    assert_eq!(fx.radio.transport_state().await, TransportState::Stopped);
}

#[tokio::test]
async fn deactivation_restores_the_queue() {
    let fx = Fixture::new(&["/audio"]).await;
    fx.server.add_songs(&["a.flac"]).await;

    fx.radio.set_id(1).await.unwrap();
    fx.radio.play().await.unwrap();
    assert_eq!(fx.queue_files().await, vec![fx.origin.url("/audio")]);

    fx.radio.set_active(false).await.unwrap();

    assert!(!fx.radio.is_active().await);
    assert_eq!(fx.queue_files().await, vec!["a.flac"]);
}

#[tokio::test]
async fn switching_channel_keeps_the_first_saved_queue() {
    let fx = Fixture::new(&["/radio.pls", "/audio"]).await;
    fx.server.add_songs(&["a.flac", "b.flac"]).await;

    fx.radio.set_id(1).await.unwrap();
    fx.radio.play().await.unwrap();
    fx.radio.set_id(2).await.unwrap();

    assert_eq!(fx.queue_files().await, vec![fx.origin.url("/audio")]);

    fx.radio.stop().await.unwrap();
    assert_eq!(fx.queue_files().await, vec!["a.flac", "b.flac"]);
}

#[tokio::test]
async fn failed_play_leaves_the_queue_alone() {
    let fx = Fixture::new(&["/empty.pls"]).await;
    fx.server.add_songs(&["a.flac", "b.flac"]).await;

    fx.radio.set_id(1).await.unwrap();
    assert!(matches!(
        fx.radio.play().await,
        Err(RadioError::EmptyPlaylist(_))
    ));
    assert_eq!(fx.queue_files().await, vec!["a.flac", "b.flac"]);

    // Nothing saved, so stop has nothing to undo
    fx.radio.stop().await.unwrap();
    assert_eq!(fx.queue_files().await, vec!["a.flac", "b.flac"]);
}

#[tokio::test]
async fn play_without_channel_is_refused() {
    let fx = Fixture::new(&["/radio.pls"]).await;
    assert!(matches!(fx.radio.play().await, Err(RadioError::NoChannel(0))));
    assert!(matches!(fx.radio.set_id(5).await, Err(RadioError::NoChannel(5))));
    assert_eq!(fx.radio.id().await, 0);
}

#[tokio::test]
async fn stop_when_idle_is_a_no_op() {
    let fx = Fixture::new(&["/radio.pls"]).await;
    fx.server.add_songs(&["a.flac"]).await;
    fx.radio.stop().await.unwrap();
    fx.radio.stop().await.unwrap();
    assert_eq!(fx.queue_files().await, vec!["a.flac"]);
}

// =============================================================================
// Published state
// =============================================================================

#[tokio::test]
async fn state_follows_selection_and_transport() {
    let fx = Fixture::new(&["/radio.pls", "/audio"]).await;

    let state = fx.radio.make_state().await;
    assert_eq!(state["Id"], "0");
    assert_eq!(state["Uri"], "");
    assert_eq!(state["Metadata"], "");
    assert_eq!(state["TransportState"], "Stopped");
    assert_eq!(state["ChannelsMax"], "2");
    assert_eq!(state["ProtocolInfo"], fx.radio.protocol_info());

    fx.radio.set_id(1).await.unwrap();
    let state = fx.radio.make_state().await;
    assert_eq!(state["Uri"], fx.origin.url("/radio.pls"));
    assert!(state["Metadata"].contains("<dc:title>Channel 1</dc:title>"));

    fx.radio.play().await.unwrap();
    let state = fx.radio.make_state().await;
    assert_eq!(state["Uri"], PLS_STREAM);
    assert_eq!(state["TransportState"], "Playing");

    fx.radio.pause().await.unwrap();
    assert_eq!(fx.radio.transport_state().await, TransportState::Paused);
}
