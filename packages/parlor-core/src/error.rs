//! # Error Handling
//!
//! Error types for Parlor Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                          ErrorKind                   │
//! │  │                                                                      │
//! │  ├── Argument Errors (100-199)  ─────────►  InvalidArgument             │
//! │  │   ├── InvalidUserId, InvalidId                                       │
//! │  │   ├── SelfConversation                                               │
//! │  │   ├── InvalidContent, InvalidReaction                                │
//! │  │   ├── InvalidPage, InvalidGroup, InvalidFlag                         │
//! │  │   └── PostNotFound (shared post that does not resolve)               │
//! │  │                                                                      │
//! │  ├── Authorization Errors (200-299)  ────►  Forbidden                   │
//! │  │   ├── NotParticipant                                                 │
//! │  │   ├── ConversationDeleted                                            │
//! │  │   ├── NotSender                                                      │
//! │  │   └── NotGroupAdmin                                                  │
//! │  │                                                                      │
//! │  ├── Lookup Errors (300-399)  ───────────►  NotFound                    │
//! │  │   ├── ConversationNotFound, MessageNotFound                          │
//! │  │   └── UserNotFound                                                   │
//! │  │                                                                      │
//! │  ├── Concurrency Errors (400-499)  ──────►  Conflict                    │
//! │  │   └── Conflict                                                       │
//! │  │                                                                      │
//! │  └── Internal Errors (900-999)  ─────────►  Internal                    │
//! │      ├── DatabaseError, StorageCorrupted                                │
//! │      ├── SerializationError                                             │
//! │      ├── RealtimeStopped                                                │
//! │      └── Internal                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transports only ever look at [`Error::kind`] (to pick a status) and
//! [`Error::code`] (to give clients something stable to match on).

use serde::Serialize;
use thiserror::Error;

/// Result type alias for Parlor Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error category surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for Parlor Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Argument Errors (100-199)
    // ========================================================================

    /// User id is empty, too long, or contains control characters
    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    /// Conversation or message id is not a UUID
    #[error("Invalid id: {0}")]
    InvalidId(String),

    /// Direct conversation requested with oneself
    #[error("Cannot start a conversation with yourself.")]
    SelfConversation,

    /// Message payload failed validation
    #[error("Invalid message content: {0}")]
    InvalidContent(String),

    /// Reaction emoji failed validation
    #[error("Invalid reaction: {0}")]
    InvalidReaction(String),

    /// Page number or page size out of range
    #[error("Invalid page request: {0}")]
    InvalidPage(String),

    /// Group creation or membership change rejected
    #[error("Invalid group operation: {0}")]
    InvalidGroup(String),

    /// Unknown conversation flag action
    #[error("Invalid conversation flag: {0}")]
    InvalidFlag(String),

    /// Shared post in a message payload unknown to the post directory
    #[error("Post not found: {0}")]
    PostNotFound(String),

    // ========================================================================
    // Authorization Errors (200-299)
    // ========================================================================

    /// Caller is not a participant of the conversation
    #[error("You are not a participant of this conversation.")]
    NotParticipant,

    /// Caller deleted the conversation from their view
    #[error("This conversation was deleted. It reappears when a new message arrives.")]
    ConversationDeleted,

    /// Only the sender may delete a message
    #[error("Only the sender can delete this message.")]
    NotSender,

    /// Only the group admin may change membership
    #[error("Only the group admin can change membership.")]
    NotGroupAdmin,

    // ========================================================================
    // Lookup Errors (300-399)
    // ========================================================================

    /// Conversation not found
    #[error("Conversation not found.")]
    ConversationNotFound,

    /// Message not found (or soft-deleted where a live message is required)
    #[error("Message not found.")]
    MessageNotFound,

    /// User unknown to the identity directory
    #[error("User not found: {0}")]
    UserNotFound(String),

    // ========================================================================
    // Concurrency Errors (400-499)
    // ========================================================================

    /// Optimistic update lost too many races in a row
    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Stored row could not be mapped back into the model
    #[error("Data corruption detected: {0}")]
    StorageCorrupted(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Realtime router is not running
    #[error("Realtime delivery is not running.")]
    RealtimeStopped,

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Invalid arguments
    /// - 200-299: Authorization
    /// - 300-399: Lookup
    /// - 400-499: Concurrency
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Argument (100-199)
            Error::InvalidUserId(_) => 100,
            Error::InvalidId(_) => 101,
            Error::SelfConversation => 102,
            Error::InvalidContent(_) => 103,
            Error::InvalidReaction(_) => 104,
            Error::InvalidPage(_) => 105,
            Error::InvalidGroup(_) => 106,
            Error::InvalidFlag(_) => 107,
            Error::PostNotFound(_) => 108,

            // Authorization (200-299)
            Error::NotParticipant => 200,
            Error::ConversationDeleted => 201,
            Error::NotSender => 202,
            Error::NotGroupAdmin => 203,

            // Lookup (300-399)
            Error::ConversationNotFound => 300,
            Error::MessageNotFound => 301,
            Error::UserNotFound(_) => 302,

            // Concurrency (400-499)
            Error::Conflict(_) => 400,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::DatabaseError(_) => 901,
            Error::StorageCorrupted(_) => 902,
            Error::SerializationError(_) => 903,
            Error::RealtimeStopped => 904,
        }
    }

    /// Category used by transports to choose a status.
    pub fn kind(&self) -> ErrorKind {
        match self.code() {
            100..=199 => ErrorKind::InvalidArgument,
            200..=299 => ErrorKind::Forbidden,
            300..=399 => ErrorKind::NotFound,
            400..=499 => ErrorKind::Conflict,
            _ => ErrorKind::Internal,
        }
    }

    /// Check if retrying the same request may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::RealtimeStopped)
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::InvalidUserId("x".into()).code(), 100);
        assert_eq!(Error::NotParticipant.code(), 200);
        assert_eq!(Error::ConversationNotFound.code(), 300);
        assert_eq!(Error::Conflict("x".into()).code(), 400);
        assert_eq!(Error::Internal("x".into()).code(), 900);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::SelfConversation.kind(), ErrorKind::InvalidArgument);
        assert_eq!(Error::InvalidReaction("x".into()).kind(), ErrorKind::InvalidArgument);
        assert_eq!(Error::NotSender.kind(), ErrorKind::Forbidden);
        assert_eq!(Error::ConversationDeleted.kind(), ErrorKind::Forbidden);
        assert_eq!(Error::MessageNotFound.kind(), ErrorKind::NotFound);
        assert_eq!(Error::PostNotFound("p".into()).kind(), ErrorKind::InvalidArgument);
        assert_eq!(Error::UserNotFound("u".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::Conflict("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(Error::DatabaseError("x".into()).kind(), ErrorKind::Internal);
        assert_eq!(Error::RealtimeStopped.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::Conflict("x".into()).is_recoverable());
        assert!(!Error::NotParticipant.is_recoverable());
    }

    #[test]
    fn test_rusqlite_conversion() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().starts_with("Database error"));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InvalidArgument).unwrap();
        assert_eq!(json, "\"invalid_argument\"");
    }
}
