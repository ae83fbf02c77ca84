use std::sync::Arc;
use tracing::{info, warn};

use crate::media::{MediaKind, RemoteTrack};
use crate::metrics::CALL_REMOTE_TRACKS_TOTAL;

/// A rendering target for received media (the audio or video element of a page,
/// a file writer, a log line).
pub trait OutputSink: Send + Sync {
    /// Binds the originating stream of `track` to this sink.
    fn attach(&self, track: &RemoteTrack);
}

/// The two sinks a call renders into.
#[derive(Clone)]
pub struct OutputSinks {
    pub audio: Arc<dyn OutputSink>,
    pub video: Arc<dyn OutputSink>,
}

impl OutputSinks {
    pub fn new(audio: Arc<dyn OutputSink>, video: Arc<dyn OutputSink>) -> Self {
        Self { audio, video }
    }
}

/// Routes a remote track to the sink matching its media kind.
///
/// Returns false (and binds nothing) for tracks of unknown kind.
pub fn bind_remote_track(sinks: &OutputSinks, track: &RemoteTrack) -> bool {
    let sink = match track.kind {
        MediaKind::Audio => &sinks.audio,
        MediaKind::Video => &sinks.video,
        MediaKind::Unknown => {
            warn!(track_id = %track.track_id, stream_id = %track.stream_id, "Ignoring remote track of unknown kind");
            return false;
        }
    };

    info!(
        kind = %track.kind,
        track_id = %track.track_id,
        stream_id = %track.stream_id,
        "Binding remote stream to output sink"
    );
    sink.attach(track);
    CALL_REMOTE_TRACKS_TOTAL
        .with_label_values(&[track.kind.as_str()])
        .inc();
    true
}

/// Sink that only reports what it renders. Used by the command-line client.
pub struct LogSink {
    label: &'static str,
}

impl LogSink {
    pub fn new(label: &'static str) -> Self {
        Self { label }
    }
}

impl OutputSink for LogSink {
    fn attach(&self, track: &RemoteTrack) {
        info!(
            sink = self.label,
            stream_id = %track.stream_id,
            track_id = %track.track_id,
            "Remote stream attached"
        );
    }
}
