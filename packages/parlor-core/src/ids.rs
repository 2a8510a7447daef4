//! Identifier newtypes.
//!
//! User ids are opaque strings owned by the identity service; conversation
//! and message ids are UUID v4 minted here. All three serialize as plain
//! strings and are validated on the way in.

use std::fmt;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Longest accepted user id, in bytes.
pub const MAX_USER_ID_LEN: usize = 128;

/// An authenticated user's opaque identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Validate and wrap a raw id. Surrounding whitespace is trimmed.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self> {
        let id = raw.as_ref().trim();
        if id.is_empty() {
            return Err(Error::InvalidUserId("must not be empty".into()));
        }
        if id.len() > MAX_USER_ID_LEN {
            return Err(Error::InvalidUserId(format!(
                "must be at most {} bytes",
                MAX_USER_ID_LEN
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(Error::InvalidUserId("must not contain control characters".into()));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversation identifier (UUID v4 text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(raw: impl AsRef<str>) -> Result<Self> {
        parse_uuid(raw.as_ref()).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for ConversationId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message identifier (UUID v4 text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(raw: impl AsRef<str>) -> Result<Self> {
        parse_uuid(raw.as_ref()).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for MessageId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical lowercase hyphenated form, so equal ids compare equal as text.
fn parse_uuid(raw: &str) -> Result<String> {
    Uuid::parse_str(raw.trim())
        .map(|u| u.to_string())
        .map_err(|e| Error::InvalidId(format!("{}: {}", raw, e)))
}

// ============================================================================
// SQLITE MAPPING
// ============================================================================
//
// Rows written by this crate are trusted, so reading skips validation.

macro_rules! sql_text_id {
    ($ty:ident) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                String::column_result(value).map($ty)
            }
        }
    };
}

sql_text_id!(UserId);
sql_text_id!(ConversationId);
sql_text_id!(MessageId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_trims_and_validates() {
        assert_eq!(UserId::parse("  alice ").unwrap().as_str(), "alice");
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse("   ").is_err());
        assert!(UserId::parse("a\u{1f}b").is_err());
        assert!(UserId::parse("x".repeat(MAX_USER_ID_LEN)).is_ok());
        assert!(UserId::parse("x".repeat(MAX_USER_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_user_id_allows_did_style() {
        let id = UserId::parse("did:key:z6Mk").unwrap();
        assert_eq!(id.to_string(), "did:key:z6Mk");
    }

    #[test]
    fn test_user_id_deserialize_validates() {
        let ok: UserId = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(ok.as_str(), "bob");
        assert!(serde_json::from_str::<UserId>("\"\"").is_err());
    }

    #[test]
    fn test_uuid_ids() {
        let id = MessageId::new();
        assert_eq!(MessageId::parse(id.as_str()).unwrap(), id);
        assert!(MessageId::parse("not-a-uuid").is_err());

        let upper = ConversationId::parse("67E55044-10B1-426F-9247-BB680E5FE0C8").unwrap();
        assert_eq!(upper.as_str(), "67e55044-10b1-426f-9247-bb680e5fe0c8");
    }
}
