//! Calls driven through a real relay over real WebSockets, with in-memory media.

use peercall::config::RelayConfig;
use peercall::mock::{wait_until, MockMediaProvider, RecordingSink};
use peercall::{
    Call, CallConfig, CallState, CandidatePolicy, OutputSinks, RelayServer, Role,
    WebSocketConnector,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const WAIT: Duration = Duration::from_secs(5);

struct RunningRelay {
    relay: RelayServer,
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl RunningRelay {
    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for RunningRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

fn start_relay() -> RunningRelay {
    let relay = RelayServer::new(RelayConfig {
        answer_timeout: Duration::from_secs(5),
        ..RelayConfig::default()
    });
    let (tx, rx) = oneshot::channel::<()>();
    let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
    let (addr, server) = relay
        .bind(addr, async move {
            rx.await.ok();
        })
        .expect("bind relay");
    tokio::spawn(server);

    RunningRelay {
        relay,
        url: format!("ws://{}/ws", addr),
        shutdown: Some(tx),
    }
}

struct Endpoint {
    call: Call,
    audio: Arc<RecordingSink>,
    video: Arc<RecordingSink>,
}

fn endpoint(label: &str, url: &str) -> Endpoint {
    let audio = Arc::new(RecordingSink::default());
    let video = Arc::new(RecordingSink::default());
    let mut config = CallConfig::new(url);
    config.candidate_policy = CandidatePolicy::Drop;
    let call = Call::new(
        Arc::new(MockMediaProvider::new(label)),
        Arc::new(WebSocketConnector),
        OutputSinks::new(audio.clone(), video.clone()),
        config,
    );
    Endpoint { call, audio, video }
}

#[tokio::test]
async fn test_call_through_relay() {
    let relay = start_relay();
    let mut alice = endpoint("alice", &relay.url);
    let mut bob = endpoint("bob", &relay.url);

    bob.call.start(Role::Responder).await.unwrap();
    assert!(wait_until(WAIT, || relay.relay.client_count() == 1).await);
    alice.call.start(Role::Initiator).await.unwrap();

    assert!(
        wait_until(WAIT, || alice.call.state() == CallState::Connected
            && bob.call.state() == CallState::Connected)
        .await
    );
    assert!(
        wait_until(WAIT, || alice.audio.attached().len() == 1
            && alice.video.attached().len() == 1
            && bob.audio.attached().len() == 1
            && bob.video.attached().len() == 1)
        .await
    );
    assert_eq!(alice.audio.attached()[0].stream_id, "bob-stream");
    assert_eq!(bob.video.attached()[0].stream_id, "alice-stream");

    alice.call.stop().await;
    bob.call.stop().await;
    assert!(wait_until(WAIT, || relay.relay.client_count() == 0).await);
}

#[tokio::test]
async fn test_http_offer_answered_by_websocket_call() {
    let relay = start_relay();
    let mut bob = endpoint("bob", &relay.url);
    bob.call.start(Role::Responder).await.unwrap();
    assert!(wait_until(WAIT, || relay.relay.client_count() == 1).await);

    let offer = "v=0\r\no=web 0 0 IN IP4 127.0.0.1\r\ns=-\r\n\
                 a=track:video web-stream web-video\r\n";
    let res = warp::test::request()
        .method("POST")
        .path("/signal")
        .json(&serde_json::json!({ "type": "offer", "sdp": offer }))
        .reply(&relay.relay.routes())
        .await;

    assert_eq!(res.status(), 200);
    let answer: Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(answer["type"], "answer");
    assert!(answer["sdp"].as_str().unwrap().contains("bob-stream"));
    assert!(answer["id"].is_string());
    assert_eq!(relay.relay.pending_offers(), 0);

    assert!(wait_until(WAIT, || bob.video.attached().len() == 1).await);
    assert_eq!(bob.video.attached()[0].stream_id, "web-stream");
    assert!(bob.audio.attached().is_empty());

    bob.call.stop().await;
}

#[tokio::test]
async fn test_relay_shutdown_disconnects_clients() {
    let mut relay = start_relay();
    let mut bob = endpoint("bob", &relay.url);
    bob.call.start(Role::Responder).await.unwrap();
    assert!(wait_until(WAIT, || relay.relay.client_count() == 1).await);

    relay.stop();
    assert!(wait_until(WAIT, || relay.relay.client_count() == 0).await);

    // The call can still be torn down after the relay went away.
    bob.call.stop().await;
    assert_eq!(bob.call.state(), CallState::Closed);
}
