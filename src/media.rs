//! The media capability a call is built on.
//!
//! The call controller never touches a peer connection directly. It asks a
//! [`MediaSessionProvider`] for local tracks and for a [`MediaSession`], and
//! listens to the [`SessionEvent`]s the session emits. `WebRtcProvider`
//! backs this with the `webrtc` crate; `mock::MockMediaProvider` with plain
//! in-memory state.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::message::{Candidate, SessionDescription};

/// Buffer of the session event channel.
pub const SESSION_EVENT_BUFFER: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
    Unknown,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for MediaKind {
    fn from(kind: &str) -> Self {
        match kind {
            "audio" => MediaKind::Audio,
            "video" => MediaKind::Video,
            _ => MediaKind::Unknown,
        }
    }
}

/// A locally captured track to transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub kind: MediaKind,
    pub track_id: String,
    pub stream_id: String,
}

/// A track received from the remote peer. `stream_id` names its originating stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub kind: MediaKind,
    pub track_id: String,
    pub stream_id: String,
}

/// Session construction parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Network-assist (STUN) server URLs; may be empty.
    pub ice_servers: Vec<String>,
}

/// Asynchronous notifications from a media session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    CandidateDiscovered(Candidate),
    GatheringComplete,
    TrackReceived(RemoteTrack),
}

pub type SessionEvents = mpsc::Receiver<SessionEvent>;

#[async_trait]
pub trait MediaSession: Send + Sync {
    async fn add_local_track(&self, track: LocalTrack) -> Result<()>;

    /// Requires local tracks to be attached.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Requires a remote offer to be set.
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Fails with `CandidateRejected` while no remote description is set.
    async fn add_candidate(&self, candidate: Candidate) -> Result<()>;

    /// Idempotent. Every other method fails with `Closed` afterwards.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait MediaSessionProvider: Send + Sync {
    /// Captures the tracks a call sends.
    async fn acquire_local_media(&self) -> Result<Vec<LocalTrack>>;

    async fn create_session(
        &self,
        config: &SessionConfig,
    ) -> Result<(Arc<dyn MediaSession>, SessionEvents)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_from_str() {
        assert_eq!(MediaKind::from("audio"), MediaKind::Audio);
        assert_eq!(MediaKind::from("video"), MediaKind::Video);
        assert_eq!(MediaKind::from("data"), MediaKind::Unknown);
        assert_eq!(MediaKind::Video.to_string(), "video");
    }
}
