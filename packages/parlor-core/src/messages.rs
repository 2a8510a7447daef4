//! # Message Store
//!
//! Durable message history. A send inserts the message and advances the
//! conversation's last-message pointer in one transaction, so readers never
//! see one without the other.
//!
//! History is paged newest-first on `(created_at, id)` and each page is
//! handed back oldest-first, ready to render top to bottom.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Serialize, Serializer};

use crate::content::{self, ContentColumns, MessageContent};
use crate::conversations;
use crate::error::{Error, Result};
use crate::ids::{ConversationId, MessageId, UserId};
use crate::reactions::{self, Reaction};
use crate::reads;
use crate::storage::Database;
use crate::time::now_millis;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// Largest page a caller may ask for.
pub const MAX_PAGE_SIZE: u32 = 100;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, message_type, text, image_url, \
     image_alt, shared_post_id, location_name, location_lat, location_lng, is_read, read_at, \
     is_deleted, deleted_at, created_at, updated_at";

// ============================================================================
// MODEL
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(flatten)]
    pub content: MessageContent,
    pub is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<i64>,
    pub is_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    #[serde(serialize_with = "serialize_reactions")]
    pub reactions: BTreeMap<UserId, Reaction>,
    pub created_at: i64,
    pub updated_at: i64,
}

fn serialize_reactions<S: Serializer>(
    reactions: &BTreeMap<UserId, Reaction>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(reactions.iter().map(|(user_id, r)| r.entry(user_id)))
}

/// A validated page request. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Result<Self> {
        if page == 0 {
            return Err(Error::InvalidPage("page starts at 1".into()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(Error::InvalidPage(format!(
                "page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(Self { page, page_size })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of history plus the numbers a client needs to page further.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
    pub has_more: bool,
}

// ============================================================================
// STORE
// ============================================================================

#[derive(Clone)]
pub struct MessageStore {
    db: Database,
}

impl MessageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a message from `sender` and record it on the conversation.
    pub fn send(
        &self,
        conversation_id: &ConversationId,
        sender: &UserId,
        content: MessageContent,
    ) -> Result<Message> {
        let id = MessageId::new();

        self.db.transaction(|tx| {
            conversations::require_member(tx, conversation_id, sender)?;
            let content = content::prepare(content)?;

            // Strictly after the previous send, so history order is commit order
            let last_activity: i64 = tx.query_row(
                "SELECT last_activity FROM conversations WHERE id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            let now = now_millis().max(last_activity + 1);

            let cols = content.columns();
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, message_type, text, image_url,
                     image_alt, shared_post_id, location_name, location_lat, location_lng,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                params![
                    id,
                    conversation_id,
                    sender,
                    content.message_type(),
                    cols.text,
                    cols.image_url,
                    cols.image_alt,
                    cols.shared_post_id,
                    cols.location_name,
                    cols.location_lat,
                    cols.location_lng,
                    now,
                ],
            )?;
            conversations::record_send(tx, conversation_id, &id, now)?;

            tracing::debug!(
                conversation_id = %conversation_id,
                message_id = %id,
                message_type = content.message_type(),
                "Message stored"
            );

            Ok(Message {
                id: id.clone(),
                conversation_id: conversation_id.clone(),
                sender_id: sender.clone(),
                content,
                is_read: false,
                read_at: None,
                is_deleted: false,
                deleted_at: None,
                reactions: BTreeMap::new(),
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// One page of live history, marking everything the requester received as read.
    ///
    /// Refused for non-participants and for a requester who has deleted the
    /// conversation. The read marking happens before the page is read, so the
    /// returned messages already carry their read state.
    pub fn list_page(
        &self,
        conversation_id: &ConversationId,
        requester: &UserId,
        page: PageRequest,
    ) -> Result<MessagePage> {
        self.db.transaction(|tx| {
            conversations::require_visible(tx, conversation_id, requester)?;
            reads::mark_all_read(tx, conversation_id, requester, now_millis())?;

            let total: i64 = tx.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1 AND is_deleted = 0",
                params![conversation_id],
                |row| row.get(0),
            )?;
            let total = total.max(0) as u64;

            let raw = {
                let mut stmt = tx.prepare_cached(&format!(
                    "SELECT {} FROM messages
                     WHERE conversation_id = ?1 AND is_deleted = 0
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?2 OFFSET ?3",
                    MESSAGE_COLUMNS
                ))?;
                let rows = stmt.query_map(
                    params![conversation_id, page.page_size(), page.offset()],
                    RawMessage::from_row,
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let mut messages = raw
                .into_iter()
                .map(|r| r.hydrate(tx))
                .collect::<Result<Vec<_>>>()?;
            messages.reverse();

            let page_size = u64::from(page.page_size());
            Ok(MessagePage {
                messages,
                page: page.page(),
                page_size: page.page_size(),
                total,
                total_pages: total.div_ceil(page_size),
                has_more: u64::from(page.page()) * page_size < total,
            })
        })
    }

    /// Soft-delete a message. Only its sender may; repeating is a no-op.
    ///
    /// Returns whether this call changed anything.
    pub fn soft_delete(&self, message_id: &MessageId, requester: &UserId) -> Result<bool> {
        self.db.transaction(|tx| {
            let (sender, deleted): (UserId, bool) = tx
                .query_row(
                    "SELECT sender_id, is_deleted FROM messages WHERE id = ?1",
                    params![message_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .ok_or(Error::MessageNotFound)?;

            if &sender != requester {
                return Err(Error::NotSender);
            }
            if deleted {
                return Ok(false);
            }

            let now = now_millis();
            tx.execute(
                "UPDATE messages SET is_deleted = 1, deleted_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND is_deleted = 0",
                params![now, message_id],
            )?;
            tracing::debug!(message_id = %message_id, "Message soft-deleted");
            Ok(true)
        })
    }

    /// Fetch a single message with its reactions, deleted or not.
    pub fn get(&self, message_id: &MessageId) -> Result<Message> {
        self.db
            .with_conn(|conn| load(conn, message_id)?.ok_or(Error::MessageNotFound))
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

/// A `messages` row before its payload and reactions are assembled.
struct RawMessage {
    id: MessageId,
    conversation_id: ConversationId,
    sender_id: UserId,
    message_type: String,
    text: Option<String>,
    image_url: Option<String>,
    image_alt: Option<String>,
    shared_post_id: Option<String>,
    location_name: Option<String>,
    location_lat: Option<f64>,
    location_lng: Option<f64>,
    is_read: bool,
    read_at: Option<i64>,
    is_deleted: bool,
    deleted_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl RawMessage {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            sender_id: row.get(2)?,
            message_type: row.get(3)?,
            text: row.get(4)?,
            image_url: row.get(5)?,
            image_alt: row.get(6)?,
            shared_post_id: row.get(7)?,
            location_name: row.get(8)?,
            location_lat: row.get(9)?,
            location_lng: row.get(10)?,
            is_read: row.get(11)?,
            read_at: row.get(12)?,
            is_deleted: row.get(13)?,
            deleted_at: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    fn hydrate(self, conn: &Connection) -> Result<Message> {
        let content = MessageContent::from_columns(
            &self.message_type,
            ContentColumns {
                text: self.text.as_deref(),
                image_url: self.image_url.as_deref(),
                image_alt: self.image_alt.as_deref(),
                shared_post_id: self.shared_post_id.as_deref(),
                location_name: self.location_name.as_deref(),
                location_lat: self.location_lat,
                location_lng: self.location_lng,
            },
        )?;
        let reactions = reactions::load(conn, &self.id)?;
        Ok(Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content,
            is_read: self.is_read,
            read_at: self.read_at,
            is_deleted: self.is_deleted,
            deleted_at: self.deleted_at,
            reactions,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(crate) fn load(conn: &Connection, message_id: &MessageId) -> Result<Option<Message>> {
    let raw = conn
        .query_row(
            &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
            params![message_id],
            RawMessage::from_row,
        )
        .optional()?;
    raw.map(|r| r.hydrate(conn)).transpose()
}

// ============================================================================
// TESTS
// ============================================================================
