//! # Reaction Ledger
//!
//! At most one emoji per user per message. Setting a reaction replaces
//! whatever the user had before; clearing removes it whatever it was.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::conversations;
use crate::error::{Error, Result};
use crate::ids::{ConversationId, MessageId, UserId};
use crate::storage::Database;
use crate::time::now_millis;

/// Longest accepted emoji, in characters (skin tones and ZWJ sequences
/// take several).
pub const MAX_EMOJI_CHARS: usize = 10;

/// A user's reaction to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub created_at: i64,
}

impl Reaction {
    pub(crate) fn entry<'a>(&'a self, user_id: &'a UserId) -> ReactionEntry<'a> {
        ReactionEntry {
            user_id,
            emoji: &self.emoji,
            created_at: self.created_at,
        }
    }
}

/// Wire form of one reaction: `{userId, emoji, createdAt}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionEntry<'a> {
    pub user_id: &'a UserId,
    pub emoji: &'a str,
    pub created_at: i64,
}

#[derive(Clone)]
pub struct ReactionLedger {
    db: Database,
}

impl ReactionLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Set (or replace) `user`'s reaction on a live message.
    pub fn set_reaction(&self, message_id: &MessageId, user: &UserId, emoji: &str) -> Result<Reaction> {
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(Error::InvalidReaction("emoji must not be empty".into()));
        }
        if emoji.chars().count() > MAX_EMOJI_CHARS {
            return Err(Error::InvalidReaction(format!(
                "emoji must be at most {} characters",
                MAX_EMOJI_CHARS
            )));
        }

        self.db.transaction(|tx| {
            require_reactable(tx, message_id, user)?;
            let now = now_millis();
            tx.execute(
                "INSERT INTO reactions (message_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(message_id, user_id)
                 DO UPDATE SET emoji = excluded.emoji, created_at = excluded.created_at",
                params![message_id, user, emoji, now],
            )?;
            tx.execute(
                "UPDATE messages SET updated_at = ?1 WHERE id = ?2",
                params![now, message_id],
            )?;
            Ok(Reaction {
                emoji: emoji.to_string(),
                created_at: now,
            })
        })
    }

    /// Remove `user`'s reaction, if any. Returns whether one was removed.
    pub fn clear_reaction(&self, message_id: &MessageId, user: &UserId) -> Result<bool> {
        self.db.transaction(|tx| {
            require_reactable(tx, message_id, user)?;
            let removed = tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                params![message_id, user],
            )?;
            if removed > 0 {
                tx.execute(
                    "UPDATE messages SET updated_at = ?1 WHERE id = ?2",
                    params![now_millis(), message_id],
                )?;
            }
            Ok(removed > 0)
        })
    }

    /// All reactions on a message, oldest first.
    pub fn reactions_for(&self, message_id: &MessageId) -> Result<Vec<(UserId, Reaction)>> {
        self.db.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM messages WHERE id = ?1 AND is_deleted = 0)",
                params![message_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(Error::MessageNotFound);
            }
            let mut reactions: Vec<_> = load(conn, message_id)?.into_iter().collect();
            reactions.sort_by(|a, b| (a.1.created_at, &a.0).cmp(&(b.1.created_at, &b.0)));
            Ok(reactions)
        })
    }
}

/// The message must exist, be live, and `user` must be in its conversation.
fn require_reactable(conn: &Connection, message_id: &MessageId, user: &UserId) -> Result<()> {
    let conversation_id: ConversationId = conn
        .query_row(
            "SELECT conversation_id FROM messages WHERE id = ?1 AND is_deleted = 0",
            params![message_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(Error::MessageNotFound)?;
    if !conversations::is_participant(conn, &conversation_id, user)? {
        return Err(Error::NotParticipant);
    }
    Ok(())
}

pub(crate) fn load(conn: &Connection, message_id: &MessageId) -> Result<BTreeMap<UserId, Reaction>> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id, emoji, created_at FROM reactions WHERE message_id = ?1",
    )?;
    let rows = stmt.query_map(params![message_id], |row| {
        Ok((
            row.get::<_, UserId>(0)?,
            Reaction {
                emoji: row.get(1)?,
                created_at: row.get(2)?,
            },
        ))
    })?;
    Ok(rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()?)
}
