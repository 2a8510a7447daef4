//! # Conversation Store
//!
//! Participants, per-user flags and the last-message pointer.
//!
//! A conversation row is shared by everyone in it. What differs per user
//! (muted, archived, deleted-for-me) lives in `conversation_flags`, so a flag
//! change by one participant never rewrites the shared row's membership.
//!
//! ## Direct conversations
//!
//! ```text
//!   getOrCreateDirect(A, B)
//!         │
//!         ▼
//!   INSERT ... ON CONFLICT(direct_key) DO NOTHING   key = min(A,B) ␟ max(A,B)
//!         │
//!         ▼
//!   SELECT id WHERE direct_key = key   ◄── every concurrent caller lands here
//!         │                                 on the same row
//!         ▼
//!   clear caller's "deleted" flag
//! ```

use std::collections::BTreeMap;
use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::ids::{ConversationId, MessageId, UserId};
use crate::reads;
use crate::storage::Database;
use crate::time::now_millis;

/// Longest group name, in characters.
pub const MAX_GROUP_NAME_CHARS: usize = 100;

/// How many times `record_send` re-reads the pointer after losing a race.
const MAX_POINTER_ATTEMPTS: u32 = 5;

/// Separator for the unordered-pair key. User ids may contain ':' (DIDs)
/// but never control characters.
const DIRECT_KEY_SEPARATOR: char = '\u{1f}';

// ============================================================================
// FLAGS
// ============================================================================

/// The per-user state a flag row can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagKind {
    Muted,
    Archived,
    Deleted,
}

impl FlagKind {
    fn as_str(self) -> &'static str {
        match self {
            FlagKind::Muted => "muted",
            FlagKind::Archived => "archived",
            FlagKind::Deleted => "deleted",
        }
    }
}

/// A per-user flag action on a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationFlag {
    Mute,
    Unmute,
    Archive,
    Unarchive,
    Delete,
}

impl ConversationFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationFlag::Mute => "mute",
            ConversationFlag::Unmute => "unmute",
            ConversationFlag::Archive => "archive",
            ConversationFlag::Unarchive => "unarchive",
            ConversationFlag::Delete => "delete",
        }
    }

    /// Which flag row this action touches and whether it sets or clears it.
    fn target(self) -> (FlagKind, bool) {
        match self {
            ConversationFlag::Mute => (FlagKind::Muted, true),
            ConversationFlag::Unmute => (FlagKind::Muted, false),
            ConversationFlag::Archive => (FlagKind::Archived, true),
            ConversationFlag::Unarchive => (FlagKind::Archived, false),
            ConversationFlag::Delete => (FlagKind::Deleted, true),
        }
    }
}

impl FromStr for ConversationFlag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mute" => Ok(ConversationFlag::Mute),
            "unmute" => Ok(ConversationFlag::Unmute),
            "archive" => Ok(ConversationFlag::Archive),
            "unarchive" => Ok(ConversationFlag::Unarchive),
            "delete" => Ok(ConversationFlag::Delete),
            other => Err(Error::InvalidFlag(other.to_string())),
        }
    }
}

// ============================================================================
// MODEL
// ============================================================================

/// A conversation as stored, shared by all participants.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Vec<UserId>,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_admin_id: Option<UserId>,
    #[serde(serialize_with = "serialize_flag_map")]
    pub muted_by: BTreeMap<UserId, i64>,
    #[serde(serialize_with = "serialize_flag_map")]
    pub archived_by: BTreeMap<UserId, i64>,
    #[serde(serialize_with = "serialize_flag_map")]
    pub deleted_by: BTreeMap<UserId, i64>,
    pub last_message_id: Option<MessageId>,
    pub last_activity: i64,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip)]
    pub version: i64,
}

impl Conversation {
    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    pub fn is_muted_by(&self, user: &UserId) -> bool {
        self.muted_by.contains_key(user)
    }

    pub fn is_archived_by(&self, user: &UserId) -> bool {
        self.archived_by.contains_key(user)
    }

    pub fn is_deleted_by(&self, user: &UserId) -> bool {
        self.deleted_by.contains_key(user)
    }

    /// Participants other than `user`.
    pub fn others<'a>(&'a self, user: &'a UserId) -> impl Iterator<Item = &'a UserId> + 'a {
        self.participants.iter().filter(move |p| *p != user)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FlagEntry<'a> {
    user_id: &'a UserId,
    at: i64,
}

fn serialize_flag_map<S: Serializer>(
    map: &BTreeMap<UserId, i64>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(map.iter().map(|(user_id, at)| FlagEntry { user_id, at: *at }))
}

/// A conversation annotated for one requester.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub unread_count: u64,
    pub is_muted: bool,
    pub is_archived: bool,
}

// ============================================================================
// STORE
// ============================================================================

#[derive(Clone)]
pub struct ConversationStore {
    db: Database,
}

impl ConversationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Find or create the direct conversation between `caller` and `other`.
    ///
    /// Returns the conversation and `true` when this call created it. Clears
    /// the caller's deleted-for-me flag either way.
    pub fn get_or_create_direct(
        &self,
        caller: &UserId,
        other: &UserId,
    ) -> Result<(Conversation, bool)> {
        if caller == other {
            return Err(Error::SelfConversation);
        }
        let key = direct_key(caller, other);
        let now = now_millis();

        self.db.transaction(|tx| {
            let candidate = ConversationId::new();
            let inserted = tx.execute(
                "INSERT INTO conversations (id, is_group, direct_key, last_activity, created_at, updated_at)
                 VALUES (?1, 0, ?2, ?3, ?3, ?3)
                 ON CONFLICT(direct_key) DO NOTHING",
                params![candidate, key, now],
            )?;
            let created = inserted == 1;
            if created {
                insert_participant(tx, &candidate, caller, now)?;
                insert_participant(tx, &candidate, other, now)?;
            }

            let id: ConversationId = tx.query_row(
                "SELECT id FROM conversations WHERE direct_key = ?1",
                params![key],
                |row| row.get(0),
            )?;

            let restored = clear_flag(tx, &id, caller, FlagKind::Deleted)?;
            if restored {
                touch(tx, &id, now)?;
            }

            let conversation = load(tx, &id)?.ok_or(Error::ConversationNotFound)?;
            if created {
                tracing::info!(conversation_id = %id, "Created direct conversation");
            }
            Ok((conversation, created))
        })
    }

    /// Create a group conversation administered by `admin`.
    pub fn create_group(
        &self,
        admin: &UserId,
        name: &str,
        members: &[UserId],
        image: Option<&str>,
    ) -> Result<Conversation> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidGroup("group name must not be empty".into()));
        }
        if name.chars().count() > MAX_GROUP_NAME_CHARS {
            return Err(Error::InvalidGroup(format!(
                "group name must be at most {} characters",
                MAX_GROUP_NAME_CHARS
            )));
        }

        let mut participants = vec![admin.clone()];
        for member in members {
            if !participants.contains(member) {
                participants.push(member.clone());
            }
        }
        if participants.len() < 2 {
            return Err(Error::InvalidGroup(
                "a group needs at least one other participant".into(),
            ));
        }

        let image = image.map(str::trim).filter(|i| !i.is_empty());
        let id = ConversationId::new();
        let now = now_millis();

        self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO conversations
                     (id, is_group, group_name, group_image, group_admin_id, last_activity, created_at, updated_at)
                 VALUES (?1, 1, ?2, ?3, ?4, ?5, ?5, ?5)",
                params![id, name, image, admin, now],
            )?;
            for user in &participants {
                insert_participant(tx, &id, user, now)?;
            }
            tracing::info!(
                conversation_id = %id,
                participants = participants.len(),
                "Created group conversation"
            );
            load(tx, &id)?.ok_or(Error::ConversationNotFound)
        })
    }

    /// Fetch a conversation regardless of who is asking.
    pub fn get(&self, id: &ConversationId) -> Result<Conversation> {
        self.db
            .with_conn(|conn| load(conn, id)?.ok_or(Error::ConversationNotFound))
    }

    /// Fetch a conversation as `user` sees it.
    pub fn get_for_user(&self, id: &ConversationId, user: &UserId) -> Result<ConversationView> {
        self.db.with_conn(|conn| {
            require_visible(conn, id, user)?;
            let conversation = load(conn, id)?.ok_or(Error::ConversationNotFound)?;
            view_for(conn, conversation, user)
        })
    }

    /// Conversations `user` takes part in and has not deleted, most recent first.
    pub fn list_for_user(&self, user: &UserId) -> Result<Vec<ConversationView>> {
        self.db.with_conn(|conn| {
            let ids = {
                let mut stmt = conn.prepare_cached(
                    "SELECT c.id FROM conversations c
                     JOIN conversation_participants p
                       ON p.conversation_id = c.id AND p.user_id = ?1
                     WHERE NOT EXISTS (
                         SELECT 1 FROM conversation_flags f
                         WHERE f.conversation_id = c.id AND f.user_id = ?1 AND f.flag = 'deleted'
                     )
                     ORDER BY c.last_activity DESC, c.id DESC",
                )?;
                let rows = stmt.query_map(params![user], |row| row.get::<_, ConversationId>(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            ids.iter()
                .map(|id| {
                    let conversation = load(conn, id)?.ok_or(Error::ConversationNotFound)?;
                    view_for(conn, conversation, user)
                })
                .collect()
        })
    }

    /// Apply a per-user flag action. Returns whether anything changed.
    pub fn set_flag(
        &self,
        id: &ConversationId,
        user: &UserId,
        flag: ConversationFlag,
    ) -> Result<bool> {
        let (kind, set) = flag.target();
        let now = now_millis();

        self.db.transaction(|tx| {
            require_member(tx, id, user)?;
            let changed = if set {
                tx.execute(
                    "INSERT OR IGNORE INTO conversation_flags (conversation_id, user_id, flag, set_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id, user, kind.as_str(), now],
                )? > 0
            } else {
                clear_flag(tx, id, user, kind)?
            };
            if changed {
                touch(tx, id, now)?;
                tracing::debug!(conversation_id = %id, flag = flag.as_str(), "Conversation flag changed");
            }
            Ok(changed)
        })
    }

    pub fn is_participant(&self, id: &ConversationId, user: &UserId) -> Result<bool> {
        self.db.with_conn(|conn| is_participant(conn, id, user))
    }

    /// Fails `ConversationNotFound` or `NotParticipant` unless `user` is in
    /// the conversation.
    pub fn require_member(&self, id: &ConversationId, user: &UserId) -> Result<()> {
        self.db
            .with_conn(|conn| require_member(conn, id, user).map(|_| ()))
    }

    /// Whether `a` and `b` are both in at least one conversation.
    pub fn shares_conversation(&self, a: &UserId, b: &UserId) -> Result<bool> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS (
                     SELECT 1 FROM conversation_participants p1
                     JOIN conversation_participants p2 ON p2.conversation_id = p1.conversation_id
                     WHERE p1.user_id = ?1 AND p2.user_id = ?2
                 )",
                params![a, b],
                |row| row.get(0),
            )?)
        })
    }

    /// Add `user` to a group. Only the admin may do this.
    pub fn add_participant(
        &self,
        id: &ConversationId,
        actor: &UserId,
        user: &UserId,
    ) -> Result<Conversation> {
        let now = now_millis();
        self.db.transaction(|tx| {
            let conversation = load(tx, id)?.ok_or(Error::ConversationNotFound)?;
            if !conversation.is_group {
                return Err(Error::InvalidGroup(
                    "direct conversations have fixed participants".into(),
                ));
            }
            if conversation.group_admin_id.as_ref() != Some(actor) {
                return Err(Error::NotGroupAdmin);
            }
            if conversation.is_participant(user) {
                return Ok(conversation);
            }
            insert_participant(tx, id, user, now)?;
            touch(tx, id, now)?;
            tracing::info!(conversation_id = %id, "Added group participant");
            load(tx, id)?.ok_or(Error::ConversationNotFound)
        })
    }

    /// Remove `user` from a group.
    ///
    /// The admin may remove anyone but themselves; any member may remove
    /// themselves (leave). A group never drops below two participants.
    pub fn remove_participant(
        &self,
        id: &ConversationId,
        actor: &UserId,
        user: &UserId,
    ) -> Result<Conversation> {
        let now = now_millis();
        self.db.transaction(|tx| {
            let conversation = load(tx, id)?.ok_or(Error::ConversationNotFound)?;
            if !conversation.is_group {
                return Err(Error::InvalidGroup(
                    "direct conversations have fixed participants".into(),
                ));
            }
            let is_admin = conversation.group_admin_id.as_ref() == Some(actor);
            if !is_admin && actor != user {
                return Err(Error::NotGroupAdmin);
            }
            if conversation.group_admin_id.as_ref() == Some(user) {
                return Err(Error::InvalidGroup("the group admin cannot be removed".into()));
            }
            if !conversation.is_participant(user) {
                return Ok(conversation);
            }
            if conversation.participants.len() <= 2 {
                return Err(Error::InvalidGroup(
                    "a group needs at least two participants".into(),
                ));
            }
            tx.execute(
                "DELETE FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
                params![id, user],
            )?;
            touch(tx, id, now)?;
            tracing::info!(conversation_id = %id, "Removed group participant");
            load(tx, id)?.ok_or(Error::ConversationNotFound)
        })
    }
}

// ============================================================================
// SHARED HELPERS
// ============================================================================
//
// These take a bare connection so other stores can call them from inside
// their own transactions.

fn direct_key(a: &UserId, b: &UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}{}{}", lo, DIRECT_KEY_SEPARATOR, hi)
}

fn insert_participant(
    conn: &Connection,
    id: &ConversationId,
    user: &UserId,
    now: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO conversation_participants (conversation_id, user_id, joined_at)
         VALUES (?1, ?2, ?3)",
        params![id, user, now],
    )?;
    Ok(())
}

fn clear_flag(conn: &Connection, id: &ConversationId, user: &UserId, kind: FlagKind) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM conversation_flags WHERE conversation_id = ?1 AND user_id = ?2 AND flag = ?3",
        params![id, user, kind.as_str()],
    )?;
    Ok(removed > 0)
}

fn touch(conn: &Connection, id: &ConversationId, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    Ok(())
}

fn view_for(conn: &Connection, conversation: Conversation, user: &UserId) -> Result<ConversationView> {
    let unread_count = reads::count_unread(conn, &conversation.id, user)?;
    let is_muted = conversation.is_muted_by(user);
    let is_archived = conversation.is_archived_by(user);
    Ok(ConversationView {
        conversation,
        unread_count,
        is_muted,
        is_archived,
    })
}

pub(crate) fn is_participant(conn: &Connection, id: &ConversationId, user: &UserId) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS (
             SELECT 1 FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2
         )",
        params![id, user],
        |row| row.get(0),
    )?)
}

/// Fails `ConversationNotFound` / `NotParticipant`; otherwise returns whether
/// `user` has deleted the conversation from their view.
pub(crate) fn require_member(conn: &Connection, id: &ConversationId, user: &UserId) -> Result<bool> {
    let row: Option<(bool, bool)> = conn
        .query_row(
            "SELECT
                 EXISTS (SELECT 1 FROM conversation_participants
                         WHERE conversation_id = c.id AND user_id = ?2),
                 EXISTS (SELECT 1 FROM conversation_flags
                         WHERE conversation_id = c.id AND user_id = ?2 AND flag = 'deleted')
             FROM conversations c WHERE c.id = ?1",
            params![id, user],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        None => Err(Error::ConversationNotFound),
        Some((false, _)) => Err(Error::NotParticipant),
        Some((true, deleted)) => Ok(deleted),
    }
}

/// Like [`require_member`], but a deleted-for-me conversation is refused too.
pub(crate) fn require_visible(conn: &Connection, id: &ConversationId, user: &UserId) -> Result<()> {
    if require_member(conn, id, user)? {
        return Err(Error::ConversationDeleted);
    }
    Ok(())
}

pub(crate) fn participants(conn: &Connection, id: &ConversationId) -> Result<Vec<UserId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id FROM conversation_participants
         WHERE conversation_id = ?1 ORDER BY joined_at, user_id",
    )?;
    let rows = stmt.query_map(params![id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<UserId>>>()?)
}

pub(crate) fn load(conn: &Connection, id: &ConversationId) -> Result<Option<Conversation>> {
    let row = conn
        .query_row(
            "SELECT id, is_group, group_name, group_image, group_admin_id,
                    last_message_id, last_activity, version, created_at, updated_at
             FROM conversations WHERE id = ?1",
            params![id],
            |row| {
                Ok(Conversation {
                    id: row.get(0)?,
                    participants: Vec::new(),
                    is_group: row.get(1)?,
                    group_name: row.get(2)?,
                    group_image: row.get(3)?,
                    group_admin_id: row.get(4)?,
                    muted_by: BTreeMap::new(),
                    archived_by: BTreeMap::new(),
                    deleted_by: BTreeMap::new(),
                    last_message_id: row.get(5)?,
                    last_activity: row.get(6)?,
                    version: row.get(7)?,
                    created_at: row.get(8)?,
                    updated_at: row.get(9)?,
                })
            },
        )
        .optional()?;

    let Some(mut conversation) = row else {
        return Ok(None);
    };
    conversation.participants = participants(conn, id)?;

    let mut stmt = conn.prepare_cached(
        "SELECT user_id, flag, set_at FROM conversation_flags WHERE conversation_id = ?1",
    )?;
    let flags = stmt.query_map(params![id], |row| {
        Ok((
            row.get::<_, UserId>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    for flag in flags {
        let (user, kind, at) = flag?;
        let map = match kind.as_str() {
            "muted" => &mut conversation.muted_by,
            "archived" => &mut conversation.archived_by,
            "deleted" => &mut conversation.deleted_by,
            other => {
                return Err(Error::StorageCorrupted(format!("unknown conversation flag {}", other)))
            }
        };
        map.insert(user, at);
    }

    Ok(Some(conversation))
}

/// Point the conversation at a freshly inserted message.
///
/// Runs inside the send transaction. The pointer only moves forward in
/// `(last_activity, last_message_id)` order, guarded by a compare-and-set on
/// `version`. Every participant's deleted-for-me flag is cleared so the
/// conversation resurfaces for whoever had hidden it.
pub(crate) fn record_send(
    conn: &Connection,
    id: &ConversationId,
    message_id: &MessageId,
    sent_at: i64,
) -> Result<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let (version, last_activity, last_message_id): (i64, i64, Option<MessageId>) = conn
            .query_row(
                "SELECT version, last_activity, last_message_id FROM conversations WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?
            .ok_or(Error::ConversationNotFound)?;

        let newer_recorded = last_message_id
            .as_ref()
            .is_some_and(|current| (last_activity, current) > (sent_at, message_id));
        if newer_recorded {
            tracing::debug!(conversation_id = %id, "Newer message already recorded; pointer kept");
            break;
        }

        let updated = conn.execute(
            "UPDATE conversations
             SET last_message_id = ?1, last_activity = ?2, updated_at = ?2, version = version + 1
             WHERE id = ?3 AND version = ?4",
            params![message_id, sent_at, id, version],
        )?;
        if updated == 1 {
            break;
        }
        if attempt >= MAX_POINTER_ATTEMPTS {
            return Err(Error::Conflict(format!(
                "last-message pointer of conversation {} kept changing",
                id
            )));
        }
        tracing::debug!(conversation_id = %id, attempt, "Pointer update lost a race, retrying");
    }

    let restored = conn.execute(
        "DELETE FROM conversation_flags WHERE conversation_id = ?1 AND flag = 'deleted'",
        params![id],
    )?;
    if restored > 0 {
        tracing::debug!(conversation_id = %id, restored, "Conversation restored by new message");
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
