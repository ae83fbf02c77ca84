//! Mock implementations for testing.
//!
//! Deterministic stand-ins for the media stack and the relay, so the handshake
//! can be exercised without sockets or codecs:
//!
//! - [`MockMediaProvider`] / [`MockSession`]: in-memory sessions whose SDP lists
//!   the attached tracks and which emit a fixed number of candidates.
//! - [`MemoryHub`]: an in-process relay; every connected channel receives the
//!   frames sent by the others, after a real encode/decode pass.
//! - [`RecordingSink`]: remembers every stream bound to it.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::channel::{IncomingMessages, SignalingChannel, SignalingConnector, INCOMING_BUFFER};
use crate::error::{CallError, Result};
use crate::media::{
    LocalTrack, MediaKind, MediaSession, MediaSessionProvider, RemoteTrack, SessionConfig,
    SessionEvent, SessionEvents, SESSION_EVENT_BUFFER,
};
use crate::message::{Candidate, SdpKind, SessionDescription, SignalMessage};
use crate::track_handler::OutputSink;

const ICE_URL_SCHEMES: &[&str] = &["stun:", "stuns:", "turn:", "turns:"];

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Mock media provider for testing.
pub struct MockMediaProvider {
    label: String,
    candidates_per_session: usize,
    fail_media: AtomicBool,
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockMediaProvider {
    /// A provider whose sessions each discover two candidates.
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            candidates_per_session: 2,
            fail_media: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_candidates(mut self, count: usize) -> Self {
        self.candidates_per_session = count;
        self
    }

    /// Makes `acquire_local_media` fail, like a denied camera permission.
    pub fn fail_media(&self, fail: bool) {
        self.fail_media.store(fail, Ordering::SeqCst);
    }

    /// Every session created so far, oldest first.
    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        lock(&self.sessions).clone()
    }

    pub fn last_session(&self) -> Option<Arc<MockSession>> {
        lock(&self.sessions).last().cloned()
    }
}

#[async_trait]
impl MediaSessionProvider for MockMediaProvider {
    async fn acquire_local_media(&self) -> Result<Vec<LocalTrack>> {
        if self.fail_media.load(Ordering::SeqCst) {
            return Err(CallError::MediaAcquisition(
                "permission denied by user".to_string(),
            ));
        }
        let stream_id = format!("{}-stream", self.label);
        Ok(vec![
            LocalTrack {
                kind: MediaKind::Audio,
                track_id: format!("{}-audio", self.label),
                stream_id: stream_id.clone(),
            },
            LocalTrack {
                kind: MediaKind::Video,
                track_id: format!("{}-video", self.label),
                stream_id,
            },
        ])
    }

    async fn create_session(
        &self,
        config: &SessionConfig,
    ) -> Result<(Arc<dyn MediaSession>, SessionEvents)> {
        for url in &config.ice_servers {
            if !ICE_URL_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
                return Err(CallError::Session(format!(
                    "unsupported assist server url '{}'",
                    url
                )));
            }
        }

        let (tx, rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        let session = Arc::new(MockSession {
            label: self.label.clone(),
            candidates: self.candidates_per_session,
            ice_servers: config.ice_servers.clone(),
            events: tx,
            state: Mutex::new(MockState::default()),
        });
        lock(&self.sessions).push(session.clone());
        Ok((session, rx))
    }
}

#[derive(Default)]
struct MockState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    tracks: Vec<LocalTrack>,
    applied: Vec<Candidate>,
    closed: bool,
}

/// In-memory media session.
///
/// Its SDP carries one `a=track:<kind> <stream> <track>` line per local track;
/// applying a remote description with such lines emits `TrackReceived` for each.
pub struct MockSession {
    label: String,
    candidates: usize,
    ice_servers: Vec<String>,
    events: mpsc::Sender<SessionEvent>,
    state: Mutex<MockState>,
}

impl MockSession {
    pub fn ice_servers(&self) -> Vec<String> {
        self.ice_servers.clone()
    }

    pub fn applied_candidates(&self) -> Vec<Candidate> {
        lock(&self.state).applied.clone()
    }

    pub fn local_tracks(&self) -> Vec<LocalTrack> {
        lock(&self.state).tracks.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        lock(&self.state).local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        lock(&self.state).remote.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// The candidates this session announces once its local description is set.
    pub fn local_candidates(&self) -> Vec<Candidate> {
        (0..self.candidates)
            .map(|i| Candidate {
                candidate: format!(
                    "candidate:{}{} 1 udp 2130706431 127.0.0.1 {} typ host",
                    self.label,
                    i,
                    50000 + i
                ),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            })
            .collect()
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            tracing::warn!(session = %self.label, error = %e, "Mock session event dropped");
        }
    }

    fn render_sdp(&self, tracks: &[LocalTrack]) -> String {
        let mut sdp = format!(
            "v=0\r\no=mock-{} 0 0 IN IP4 127.0.0.1\r\ns=-\r\n",
            self.label
        );
        for track in tracks {
            sdp.push_str(&format!(
                "a=track:{} {} {}\r\n",
                track.kind, track.stream_id, track.track_id
            ));
        }
        sdp
    }
}

fn parse_tracks(sdp: &str) -> Vec<RemoteTrack> {
    sdp.lines()
        .filter_map(|line| line.strip_prefix("a=track:"))
        .filter_map(|rest| {
            let mut parts = rest.split_whitespace();
            let kind = parts.next()?;
            let stream_id = parts.next()?;
            let track_id = parts.next()?;
            Some(RemoteTrack {
                kind: MediaKind::from(kind),
                track_id: track_id.to_string(),
                stream_id: stream_id.to_string(),
            })
        })
        .collect()
}

fn ensure_well_formed(desc: &SessionDescription) -> Result<()> {
    if desc.sdp.starts_with("v=0") {
        Ok(())
    } else {
        Err(CallError::InvalidDescription(format!(
            "{} does not start with a version line",
            desc.kind
        )))
    }
}

#[async_trait]
impl MediaSession for MockSession {
    async fn add_local_track(&self, track: LocalTrack) -> Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(CallError::Closed);
        }
        state.tracks.push(track);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let state = lock(&self.state);
        if state.closed {
            return Err(CallError::Closed);
        }
        if state.tracks.is_empty() {
            return Err(CallError::Session(
                "no local tracks attached to offer".to_string(),
            ));
        }
        Ok(SessionDescription::offer(self.render_sdp(&state.tracks)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let state = lock(&self.state);
        if state.closed {
            return Err(CallError::Closed);
        }
        match &state.remote {
            Some(remote) if remote.kind == SdpKind::Offer => {
                Ok(SessionDescription::answer(self.render_sdp(&state.tracks)))
            }
            _ => Err(CallError::InvalidDescription(
                "cannot answer without a remote offer".to_string(),
            )),
        }
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(CallError::Closed);
            }
            ensure_well_formed(&desc)?;
            if desc.kind == SdpKind::Answer
                && !matches!(&state.remote, Some(remote) if remote.kind == SdpKind::Offer)
            {
                return Err(CallError::InvalidDescription(
                    "local answer without a remote offer".to_string(),
                ));
            }
            state.local = Some(desc);
        }

        for candidate in self.local_candidates() {
            self.emit(SessionEvent::CandidateDiscovered(candidate));
        }
        self.emit(SessionEvent::GatheringComplete);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let tracks = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(CallError::Closed);
            }
            ensure_well_formed(&desc)?;
            match desc.kind {
                SdpKind::Answer => {
                    if !matches!(&state.local, Some(local) if local.kind == SdpKind::Offer) {
                        return Err(CallError::InvalidDescription(
                            "answer received before any local offer".to_string(),
                        ));
                    }
                }
                SdpKind::Offer => {
                    if state.local.is_some() {
                        return Err(CallError::InvalidDescription(
                            "offer collides with a local description".to_string(),
                        ));
                    }
                }
            }
            let tracks = parse_tracks(&desc.sdp);
            state.remote = Some(desc);
            tracks
        };

        for track in tracks {
            self.emit(SessionEvent::TrackReceived(track));
        }
        Ok(())
    }

    async fn add_candidate(&self, candidate: Candidate) -> Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(CallError::Closed);
        }
        if state.remote.is_none() {
            return Err(CallError::CandidateRejected(
                "remote description not set".to_string(),
            ));
        }
        state.applied.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        lock(&self.state).closed = true;
        Ok(())
    }
}

struct HubInner {
    clients: DashMap<u64, mpsc::Sender<SignalMessage>>,
    next_id: AtomicU64,
    frames: Mutex<Vec<String>>,
    refuse: AtomicBool,
    failing_kinds: Mutex<Vec<String>>,
}

/// In-process relay: a frame sent by one channel reaches every other channel.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                clients: DashMap::new(),
                next_id: AtomicU64::new(0),
                frames: Mutex::new(Vec::new()),
                refuse: AtomicBool::new(false),
                failing_kinds: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    /// Every text frame sent through the hub, in order.
    pub fn frames(&self) -> Vec<String> {
        lock(&self.inner.frames).clone()
    }

    /// Makes subsequent `connect` calls fail, like an unreachable relay.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Makes every send of a message with this `type` fail with a transport error.
    pub fn fail_sends_of(&self, kind: &str) {
        lock(&self.inner.failing_kinds).push(kind.to_string());
    }

    fn rejects(&self, message: &SignalMessage) -> bool {
        let kind = match message {
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Candidate { .. } => "candidate",
        };
        lock(&self.inner.failing_kinds).iter().any(|k| k == kind)
    }

    fn deliver(&self, from: u64, text: &str) -> Result<()> {
        lock(&self.inner.frames).push(text.to_string());
        for client in self.inner.clients.iter() {
            if *client.key() == from {
                continue;
            }
            let message = SignalMessage::decode(text)?;
            if client.value().try_send(message).is_err() {
                tracing::warn!(client = *client.key(), "Memory hub dropped a frame");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SignalingConnector for MemoryHub {
    async fn connect(&self, url: &str) -> Result<(Arc<dyn SignalingChannel>, IncomingMessages)> {
        if self.inner.refuse.load(Ordering::SeqCst) {
            return Err(CallError::Transport(format!("connection to {} refused", url)));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        self.inner.clients.insert(id, tx);
        let channel = MemoryChannel {
            id,
            hub: self.clone(),
            closed: AtomicBool::new(false),
        };
        Ok((Arc::new(channel), rx))
    }
}

/// One endpoint of a [`MemoryHub`].
pub struct MemoryChannel {
    id: u64,
    hub: MemoryHub,
    closed: AtomicBool,
}

#[async_trait]
impl SignalingChannel for MemoryChannel {
    async fn send(&self, message: &SignalMessage) -> Result<()> {
        if self.is_closed() {
            return Err(CallError::Closed);
        }
        if self.hub.rejects(message) {
            return Err(CallError::Transport("send failed".to_string()));
        }
        let text = message.encode()?;
        self.hub.deliver(self.id, &text)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.hub.inner.clients.remove(&self.id);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Output sink that remembers what it was given.
#[derive(Default)]
pub struct RecordingSink {
    attached: Mutex<Vec<RemoteTrack>>,
}

impl RecordingSink {
    pub fn attached(&self) -> Vec<RemoteTrack> {
        lock(&self.attached).clone()
    }
}

impl OutputSink for RecordingSink {
    fn attach(&self, track: &RemoteTrack) {
        lock(&self.attached).push(track.clone());
    }
}
