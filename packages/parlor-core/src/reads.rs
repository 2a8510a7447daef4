//! # Read Tracker
//!
//! Unread counts are never stored. They are counted from `messages` on
//! demand: messages in the conversation, not sent by the requester, not read
//! and not deleted. Marking read is a single conditional `UPDATE`, so
//! repeating it (or racing it) changes nothing the second time.

use rusqlite::{params, Connection, OptionalExtension};

use crate::conversations;
use crate::error::{Error, Result};
use crate::ids::{ConversationId, MessageId, UserId};
use crate::storage::Database;
use crate::time::now_millis;

#[derive(Clone)]
pub struct ReadTracker {
    db: Database,
}

impl ReadTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Mark everything `requester` has received in the conversation as read.
    ///
    /// Returns how many messages changed.
    pub fn mark_all_read(&self, conversation_id: &ConversationId, requester: &UserId) -> Result<usize> {
        self.db.transaction(|tx| {
            conversations::require_member(tx, conversation_id, requester)?;
            mark_all_read(tx, conversation_id, requester, now_millis())
        })
    }

    pub fn unread_count(&self, conversation_id: &ConversationId, requester: &UserId) -> Result<u64> {
        self.db.with_conn(|conn| {
            conversations::require_member(conn, conversation_id, requester)?;
            count_unread(conn, conversation_id, requester)
        })
    }

    /// Mark one message read.
    ///
    /// A no-op when it is already read or when the requester sent it.
    pub fn mark_message_read(&self, message_id: &MessageId, requester: &UserId) -> Result<bool> {
        self.db.transaction(|tx| {
            let (conversation_id, sender, is_read): (ConversationId, UserId, bool) = tx
                .query_row(
                    "SELECT conversation_id, sender_id, is_read FROM messages WHERE id = ?1",
                    params![message_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?
                .ok_or(Error::MessageNotFound)?;

            if !conversations::is_participant(tx, &conversation_id, requester)? {
                return Err(Error::NotParticipant);
            }
            if is_read || &sender == requester {
                return Ok(false);
            }

            let now = now_millis();
            let changed = tx.execute(
                "UPDATE messages SET is_read = 1, read_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND is_read = 0",
                params![now, message_id],
            )?;
            Ok(changed > 0)
        })
    }
}

pub(crate) fn mark_all_read(
    conn: &Connection,
    conversation_id: &ConversationId,
    requester: &UserId,
    now: i64,
) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE messages SET is_read = 1, read_at = ?3, updated_at = ?3
         WHERE conversation_id = ?1 AND sender_id != ?2 AND is_read = 0 AND is_deleted = 0",
        params![conversation_id, requester, now],
    )?;
    if changed > 0 {
        tracing::debug!(conversation_id = %conversation_id, changed, "Marked messages read");
    }
    Ok(changed)
}

pub(crate) fn count_unread(
    conn: &Connection,
    conversation_id: &ConversationId,
    requester: &UserId,
) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages
         WHERE conversation_id = ?1 AND sender_id != ?2 AND is_read = 0 AND is_deleted = 0",
        params![conversation_id, requester],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MessageContent;
    use crate::conversations::ConversationStore;
    use crate::messages::MessageStore;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn setup() -> (MessageStore, ReadTracker, ConversationId, UserId, UserId) {
        let db = Database::open(None).unwrap();
        let (alice, bob) = (uid("alice"), uid("bob"));
        let (conversation, _) = ConversationStore::new(db.clone())
            .get_or_create_direct(&alice, &bob)
            .unwrap();
        (MessageStore::new(db.clone()), ReadTracker::new(db), conversation.id, alice, bob)
    }

    #[test]
    fn test_unread_excludes_own_read_and_deleted() {
        let (messages, reads, conversation, alice, bob) = setup();
        messages.send(&conversation, &alice, MessageContent::text("one")).unwrap();
        let two = messages.send(&conversation, &alice, MessageContent::text("two")).unwrap();
        let three = messages.send(&conversation, &alice, MessageContent::text("three")).unwrap();
        messages.send(&conversation, &bob, MessageContent::text("mine")).unwrap();

        assert_eq!(reads.unread_count(&conversation, &bob).unwrap(), 3);
        assert_eq!(reads.unread_count(&conversation, &alice).unwrap(), 1);

        messages.soft_delete(&two.id, &alice).unwrap();
        assert_eq!(reads.unread_count(&conversation, &bob).unwrap(), 2);

        assert!(reads.mark_message_read(&three.id, &bob).unwrap());
        assert_eq!(reads.unread_count(&conversation, &bob).unwrap(), 1);
    }

    #[test]
    fn test_mark_all_read_is_idempotent() {
        let (messages, reads, conversation, alice, bob) = setup();
        messages.send(&conversation, &alice, MessageContent::text("a")).unwrap();
        messages.send(&conversation, &alice, MessageContent::text("b")).unwrap();

        assert_eq!(reads.mark_all_read(&conversation, &bob).unwrap(), 2);
        assert_eq!(reads.unread_count(&conversation, &bob).unwrap(), 0);
        assert_eq!(reads.mark_all_read(&conversation, &bob).unwrap(), 0);
        assert_eq!(reads.unread_count(&conversation, &bob).unwrap(), 0);
    }

    #[test]
    fn test_mark_all_read_leaves_own_messages() {
        let (messages, reads, conversation, alice, bob) = setup();
        let own = messages.send(&conversation, &bob, MessageContent::text("mine")).unwrap();
        assert_eq!(reads.mark_all_read(&conversation, &bob).unwrap(), 0);
        assert!(!messages.get(&own.id).unwrap().is_read);
        assert_eq!(reads.unread_count(&conversation, &alice).unwrap(), 1);
    }

    #[test]
    fn test_mark_message_read_rules() {
        let (messages, reads, conversation, alice, bob) = setup();
        let message = messages.send(&conversation, &alice, MessageContent::text("hi")).unwrap();

        // Sender reading their own message is a no-op
        assert!(!reads.mark_message_read(&message.id, &alice).unwrap());
        assert!(!messages.get(&message.id).unwrap().is_read);

        assert!(matches!(
            reads.mark_message_read(&message.id, &uid("mallory")),
            Err(Error::NotParticipant)
        ));
        assert!(matches!(
            reads.mark_message_read(&MessageId::new(), &bob),
            Err(Error::MessageNotFound)
        ));

        assert!(reads.mark_message_read(&message.id, &bob).unwrap());
        let read_at = messages.get(&message.id).unwrap().read_at;
        assert!(read_at.is_some());

        assert!(!reads.mark_message_read(&message.id, &bob).unwrap());
        assert_eq!(messages.get(&message.id).unwrap().read_at, read_at);
    }

    #[test]
    fn test_unread_requires_membership() {
        let (_, reads, conversation, _, _) = setup();
        assert!(matches!(
            reads.unread_count(&conversation, &uid("mallory")),
            Err(Error::NotParticipant)
        ));
    }
}
