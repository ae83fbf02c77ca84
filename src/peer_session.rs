//! `webrtc`-backed media session.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::API;
use webrtc::media::Sample;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{CallError, Result};
use crate::media::{
    LocalTrack, MediaKind, MediaSession, MediaSessionProvider, RemoteTrack, SessionConfig,
    SessionEvent, SessionEvents, SESSION_EVENT_BUFFER,
};
use crate::media_setup::MediaSetup;
use crate::message::{Candidate, SdpKind, SessionDescription};

/// Produces peer connections from one shared `webrtc` API.
pub struct WebRtcProvider {
    api: API,
}

impl WebRtcProvider {
    pub fn new() -> Result<Self> {
        Ok(Self {
            api: MediaSetup::create_webrtc_api()?,
        })
    }
}

#[async_trait]
impl MediaSessionProvider for WebRtcProvider {
    /// There is no capture device behind this provider: it describes one Opus
    /// and one VP8 track of a fresh stream, which the session then sends.
    async fn acquire_local_media(&self) -> Result<Vec<LocalTrack>> {
        let stream_id = uuid::Uuid::new_v4().to_string();
        Ok(vec![
            LocalTrack {
                kind: MediaKind::Audio,
                track_id: format!("audio-{}", uuid::Uuid::new_v4()),
                stream_id: stream_id.clone(),
            },
            LocalTrack {
                kind: MediaKind::Video,
                track_id: format!("video-{}", uuid::Uuid::new_v4()),
                stream_id,
            },
        ])
    }

    async fn create_session(
        &self,
        config: &SessionConfig,
    ) -> Result<(Arc<dyn MediaSession>, SessionEvents)> {
        let pc = self
            .api
            .new_peer_connection(MediaSetup::rtc_config(config))
            .await
            .map_err(|e| CallError::Session(format!("Failed to create peer connection: {}", e)))?;

        let (tx, rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        let session = WebRtcSession::new(Arc::new(pc));
        session.register_ice_candidate_handler(tx.clone());
        session.register_track_handler(tx);
        session.register_state_handler();

        Ok((Arc::new(session), rx))
    }
}

/// A single peer connection.
pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
    writers: Mutex<Vec<JoinHandle<()>>>,
}

impl WebRtcSession {
    pub fn new(pc: Arc<RTCPeerConnection>) -> Self {
        Self {
            pc,
            closed: AtomicBool::new(false),
            writers: Mutex::new(Vec::new()),
        }
    }

    /// Starts writing placeholder frames to `local`. Nothing leaves the
    /// connection until the track is bound, so this can start before the
    /// handshake. The writer runs until the session closes.
    fn start_sample_writer(&self, kind: MediaKind, local: Arc<TrackLocalStaticSample>) {
        let Some((frame, interval)) = MediaSetup::placeholder_frame(kind) else {
            debug!(kind = %kind, "No placeholder media for track kind");
            return;
        };

        let writer = tokio::spawn(async move {
            debug!(kind = %kind, track_id = %local.id(), "Started sample writer");
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let sample = Sample {
                    data: Bytes::from_static(frame),
                    duration: interval,
                    ..Default::default()
                };
                if let Err(e) = local.write_sample(&sample).await {
                    debug!(kind = %kind, error = %e, "Sample writer stopping");
                    break;
                }
            }
        });

        self.writers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(writer);
    }

    fn stop_sample_writers(&self) {
        let writers = std::mem::take(
            &mut *self
                .writers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for writer in writers {
            writer.abort();
        }
    }

    /// Number of sample writers currently held by the session.
    pub fn sample_writer_count(&self) -> usize {
        self.writers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|writer| !writer.is_finished())
            .count()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CallError::Closed)
        } else {
            Ok(())
        }
    }

    fn register_ice_candidate_handler(&self, tx: mpsc::Sender<SessionEvent>) {
        self.pc
            .on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
                let tx = tx.clone();
                Box::pin(async move {
                    let event = match c {
                        Some(candidate) => match candidate.to_json() {
                            Ok(init) => SessionEvent::CandidateDiscovered(from_candidate_init(init)),
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize local candidate");
                                return;
                            }
                        },
                        None => SessionEvent::GatheringComplete,
                    };
                    if tx.send(event).await.is_err() {
                        debug!("Session events receiver gone; candidate discarded");
                    }
                })
            }));
    }

    fn register_track_handler(&self, tx: mpsc::Sender<SessionEvent>) {
        self.pc
            .on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                let tx = tx.clone();
                let remote = RemoteTrack {
                    kind: MediaKind::from(track.kind().to_string().as_str()),
                    track_id: track.id().to_owned(),
                    stream_id: track.stream_id().to_owned(),
                };
                info!(
                    kind = %remote.kind,
                    stream_id = %remote.stream_id,
                    track_id = %remote.track_id,
                    ssrc = %track.ssrc(),
                    "Remote track arrived"
                );

                Box::pin(async move {
                    let track_id = remote.track_id.clone();
                    if tx.send(SessionEvent::TrackReceived(remote)).await.is_err() {
                        debug!(track = %track_id, "Session events receiver gone; track not reported");
                    }

                    // Keep the interceptors fed; the payload itself is not decoded here.
                    tokio::spawn(async move {
                        let mut packet_count: u64 = 0;
                        while track.read_rtp().await.is_ok() {
                            packet_count += 1;
                            if packet_count == 1 {
                                info!(track = %track_id, "First packet received");
                            }
                        }
                        debug!(track = %track_id, packets = packet_count, "Remote track ended");
                    });
                })
            }));
    }

    fn register_state_handler(&self) {
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                info!(state = %s, "Peer connection state changed");
                Box::pin(async {})
            }));
    }
}

fn from_candidate_init(init: RTCIceCandidateInit) -> Candidate {
    Candidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_candidate_init(candidate: Candidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let kind = desc.kind;
    let parsed = match kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    parsed.map_err(|e| CallError::InvalidDescription(format!("unparsable {}: {}", kind, e)))
}

fn from_rtc_description(desc: RTCSessionDescription) -> Result<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(CallError::Session(format!(
            "unexpected description type {}",
            other
        ))),
    }
}

#[async_trait]
impl MediaSession for WebRtcSession {
    async fn add_local_track(&self, track: LocalTrack) -> Result<()> {
        self.ensure_open()?;
        let local = Arc::new(TrackLocalStaticSample::new(
            MediaSetup::codec_for(track.kind),
            track.track_id.clone(),
            track.stream_id.clone(),
        ));

        let sender = self
            .pc
            .add_track(local.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| CallError::Session(format!("Failed to add {} track: {}", track.kind, e)))?;

        // RTCP has to be read for interceptors like NACK to work.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        self.start_sample_writer(track.kind, local);
        debug!(kind = %track.kind, track_id = %track.track_id, "Local track attached");
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| CallError::Session(format!("Failed to create offer: {}", e)))?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| CallError::InvalidDescription(format!("Failed to create answer: {}", e)))?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| CallError::InvalidDescription(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| CallError::InvalidDescription(format!("Failed to set remote description: {}", e)))
    }

    async fn add_candidate(&self, candidate: Candidate) -> Result<()> {
        self.ensure_open()?;
        if self.pc.remote_description().await.is_none() {
            return Err(CallError::CandidateRejected(
                "remote description not set".to_string(),
            ));
        }
        self.pc
            .add_ice_candidate(to_candidate_init(candidate))
            .await
            .map_err(|e| CallError::CandidateRejected(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop_sample_writers();
        self.pc
            .close()
            .await
            .map_err(|e| CallError::Session(format!("Failed to close peer connection: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_init_conversion() {
        let candidate = Candidate {
            candidate: "candidate:1 1 udp 2130706431 10.0.0.1 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: Some("frag".to_string()),
        };
        let init = to_candidate_init(candidate.clone());
        assert_eq!(init.sdp_mid.as_deref(), Some("0"));
        assert_eq!(from_candidate_init(init), candidate);
    }

    #[test]
    fn test_unparsable_description_rejected() {
        let result = to_rtc_description(SessionDescription::offer("not sdp"));
        assert!(matches!(result, Err(CallError::InvalidDescription(_))));
    }

    #[tokio::test]
    async fn test_closed_session_refuses_operations() {
        let provider = WebRtcProvider::new().unwrap();
        let (session, _events) = provider
            .create_session(&SessionConfig::default())
            .await
            .unwrap();

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(matches!(session.create_offer().await, Err(CallError::Closed)));
    }

    #[tokio::test]
    async fn test_local_tracks_get_sample_writers_until_close() {
        let provider = WebRtcProvider::new().unwrap();
        let api = MediaSetup::create_webrtc_api().unwrap();
        let pc = api
            .new_peer_connection(MediaSetup::rtc_config(&SessionConfig::default()))
            .await
            .unwrap();
        let session = WebRtcSession::new(Arc::new(pc));

        for track in provider.acquire_local_media().await.unwrap() {
            session.add_local_track(track).await.unwrap();
        }
        // Writing to an unbound track is a no-op, so the writers keep going.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(session.sample_writer_count(), 2);

        session.close().await.unwrap();
        assert_eq!(session.sample_writer_count(), 0);
    }

    #[tokio::test]
    async fn test_candidate_before_remote_description_rejected() {
        let provider = WebRtcProvider::new().unwrap();
        let (session, _events) = provider
            .create_session(&SessionConfig::default())
            .await
            .unwrap();

        let result = session
            .add_candidate(Candidate::new(
                "candidate:1 1 udp 2130706431 10.0.0.1 5000 typ host",
            ))
            .await;
        assert!(matches!(result, Err(CallError::CandidateRejected(_))));
        session.close().await.unwrap();
    }
}
