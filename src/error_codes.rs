//! Error codes for structured error handling in the karaoke queue protocol.
//!
//! These codes are wire-compatible with the server's error payloads and
//! serialize using `SCREAMING_SNAKE_CASE` (e.g. `"SESSION_NOT_FOUND"`).
//!
//! A small fixed subset is *terminal*: once the server has invalidated the
//! client's session or identity, holding the transport open is meaningless
//! and the connection manager forces an unconditional disconnect. See
//! [`ErrorCode::is_terminal`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error codes pushed by the karaoke queue server.
///
/// The server sends these as `"SCREAMING_SNAKE_CASE"` strings inside the
/// `error` message. Codes introduced by newer servers deserialize as
/// [`Unknown`](ErrorCode::Unknown) instead of failing the whole message.
///
/// Use [`description()`](ErrorCode::description) for a human-readable
/// explanation suitable for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Resume-protocol / terminal errors
    ReconnectTokenExpired,
    InvalidReconnectToken,
    SessionEnded,
    UserAlreadyConnected,
    SessionExpired,

    // Join / session errors
    SessionNotFound,
    SessionFull,
    NicknameTaken,
    InvalidNickname,
    NotInSession,

    // Queue errors
    QueueItemNotFound,
    DuplicateRequest,
    QueueFull,
    InvalidSongTitle,

    // Permission errors
    HostOnly,
    ParticipantOnly,

    // Server errors
    RateLimitExceeded,
    InternalError,

    /// A code this client version does not recognize.
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    /// Returns `true` if this code makes continuing to hold the current
    /// transport connection meaningless.
    ///
    /// When a terminal code arrives, the connection manager forces a full
    /// disconnect and clears the persisted resume token, so the next
    /// `connect()` requires an explicit manual join.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ReconnectTokenExpired
                | Self::InvalidReconnectToken
                | Self::SessionEnded
                | Self::UserAlreadyConnected
                | Self::SessionExpired
        )
    }

    /// Returns `true` if this code reports a failed resume attempt.
    ///
    /// The token-invalid and session-discarded cases are handled identically:
    /// clear the token and fall back to a manual join.
    pub fn is_resume_failure(&self) -> bool {
        matches!(
            self,
            Self::ReconnectTokenExpired | Self::InvalidReconnectToken | Self::SessionExpired
        )
    }

    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::ReconnectTokenExpired => {
                "The resume token has expired. Join the session again to continue."
            }
            Self::InvalidReconnectToken => {
                "The resume token is invalid or malformed. Join the session again to continue."
            }
            Self::SessionEnded => "The session has ended.",
            Self::UserAlreadyConnected => {
                "This user is already connected to the session from another device."
            }
            Self::SessionExpired => {
                "The session is no longer available on the server. Join or create a new session."
            }

            Self::SessionNotFound => {
                "No session exists with that ID. Check the code or create a new session."
            }
            Self::SessionFull => "The session has reached its participant limit.",
            Self::NicknameTaken => "That nickname is already in use in this session.",
            Self::InvalidNickname => {
                "The nickname is invalid. Nicknames must be non-empty and meet length requirements."
            }
            Self::NotInSession => "You are not in a session. Join a session before performing this action.",

            Self::QueueItemNotFound => {
                "The queue item could not be found. It may have already been removed or performed."
            }
            Self::DuplicateRequest => "You already have this song in the queue.",
            Self::QueueFull => "The queue has reached its maximum length. Try again later.",
            Self::InvalidSongTitle => {
                "The song title is invalid. Titles must be non-empty and meet length requirements."
            }

            Self::HostOnly => "Only the session host can perform this action.",
            Self::ParticipantOnly => "Only participants can perform this action.",

            Self::RateLimitExceeded => "Too many requests in a short time. Please slow down.",
            Self::InternalError => {
                "An internal server error occurred. Please try again or contact support."
            }

            Self::Unknown => "The server reported an error this client version does not recognize.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
