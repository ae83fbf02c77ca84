use std::fmt;

/// Errors raised by the call controller, its media session and its signaling channel.
#[derive(Debug)]
pub enum CallError {
    /// The signaling channel failed to open, send, or closed under us.
    Transport(String),
    /// A session description was malformed or not applicable in the current state.
    InvalidDescription(String),
    /// A candidate could not be applied (usually: no remote description yet).
    CandidateRejected(String),
    /// Local capture could not be acquired.
    MediaAcquisition(String),
    /// A signaling frame could not be encoded or decoded.
    Codec(serde_json::Error),
    /// Any other failure reported by the media stack.
    Session(String),
    /// The session or channel was already torn down.
    Closed,
    /// `start` was called while a call is still running.
    AlreadyActive,
}

pub type Result<T> = std::result::Result<T, CallError>;

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Transport(msg) => write!(f, "signaling transport error: {}", msg),
            CallError::InvalidDescription(msg) => write!(f, "invalid session description: {}", msg),
            CallError::CandidateRejected(msg) => write!(f, "candidate rejected: {}", msg),
            CallError::MediaAcquisition(msg) => {
                write!(f, "could not acquire local media: {}", msg)
            }
            CallError::Codec(err) => write!(f, "malformed signaling message: {}", err),
            CallError::Session(msg) => write!(f, "media session error: {}", msg),
            CallError::Closed => write!(f, "call resources are closed"),
            CallError::AlreadyActive => write!(f, "a call is already active"),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CallError::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        CallError::Codec(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(CallError::Closed.to_string(), "call resources are closed");
        assert!(CallError::MediaAcquisition("denied".into())
            .to_string()
            .contains("denied"));
    }

    #[test]
    fn test_codec_error_has_source() {
        let err: CallError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, CallError::Codec(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
