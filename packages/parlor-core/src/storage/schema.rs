//! # Database Schema
//!
//! SQL schema definitions for the Parlor database.
//!
//! ## Schema Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────────────┐                    │
//! │  │  conversations   │   │ conversation_participants│                    │
//! │  ├──────────────────┤   ├──────────────────────────┤                    │
//! │  │ id               │◄──│ conversation_id          │                    │
//! │  │ is_group         │   │ user_id                  │                    │
//! │  │ direct_key (UQ)  │   │ joined_at                │                    │
//! │  │ group_*          │   └──────────────────────────┘                    │
//! │  │ last_message_id  │   ┌──────────────────────────┐                    │
//! │  │ last_activity    │◄──│ conversation_flags       │                    │
//! │  │ version          │   │ conversation_id, user_id │                    │
//! │  └──────────────────┘   │ flag (muted|archived|    │                    │
//! │           ▲             │       deleted), set_at   │                    │
//! │           │             └──────────────────────────┘                    │
//! │  ┌──────────────────┐   ┌──────────────────────────┐                    │
//! │  │    messages      │◄──│       reactions          │                    │
//! │  ├──────────────────┤   ├──────────────────────────┤                    │
//! │  │ id               │   │ message_id, user_id (PK) │                    │
//! │  │ conversation_id  │   │ emoji                    │                    │
//! │  │ sender_id        │   │ created_at               │                    │
//! │  │ message_type     │   └──────────────────────────┘                    │
//! │  │ payload columns  │                                                   │
//! │  │ is_read, read_at │                                                   │
//! │  │ is_deleted, ...  │                                                   │
//! │  └──────────────────┘                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Conversations
-- One row per conversation, shared by every participant. Per-user state
-- lives in conversation_flags.
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    is_group INTEGER NOT NULL DEFAULT 0,
    -- Unordered-pair key for direct conversations, NULL for groups
    direct_key TEXT UNIQUE,
    group_name TEXT,
    group_image TEXT,
    group_admin_id TEXT,
    last_message_id TEXT,
    last_activity INTEGER NOT NULL,
    -- Bumped on every recorded send (compare-and-set guard)
    version INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CONSTRAINT direct_or_group CHECK (
        (is_group = 0 AND direct_key IS NOT NULL AND group_name IS NULL)
        OR (is_group = 1 AND direct_key IS NULL AND group_name IS NOT NULL)
    )
);
CREATE INDEX IF NOT EXISTS idx_conversations_activity ON conversations(last_activity DESC, id DESC);

-- Conversation participants
CREATE TABLE IF NOT EXISTS conversation_participants (
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    user_id TEXT NOT NULL,
    joined_at INTEGER NOT NULL,
    PRIMARY KEY (conversation_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_participants_user ON conversation_participants(user_id);

-- Per-user conversation flags
-- Presence of a row means the flag is set; set_at is when it was first set.
CREATE TABLE IF NOT EXISTS conversation_flags (
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    user_id TEXT NOT NULL,
    flag TEXT NOT NULL CHECK (flag IN ('muted', 'archived', 'deleted')),
    set_at INTEGER NOT NULL,
    PRIMARY KEY (conversation_id, user_id, flag)
);

-- Messages
-- Exactly one payload column group is populated, selected by message_type.
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    sender_id TEXT NOT NULL,
    message_type TEXT NOT NULL,
    text TEXT,
    image_url TEXT,
    image_alt TEXT,
    shared_post_id TEXT,
    location_name TEXT,
    location_lat REAL,
    location_lng REAL,
    is_read INTEGER NOT NULL DEFAULT 0,
    read_at INTEGER,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CONSTRAINT payload_matches_type CHECK (
        (message_type = 'text' AND text IS NOT NULL)
        OR (message_type = 'image' AND image_url IS NOT NULL)
        OR (message_type = 'post' AND shared_post_id IS NOT NULL)
        OR (message_type = 'location' AND location_name IS NOT NULL
            AND location_lat IS NOT NULL AND location_lng IS NOT NULL)
    )
);
CREATE INDEX IF NOT EXISTS idx_messages_page ON messages(conversation_id, created_at DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_messages_unread ON messages(conversation_id, is_read, is_deleted);

-- Reactions
-- At most one reaction per user per message.
CREATE TABLE IF NOT EXISTS reactions (
    message_id TEXT NOT NULL REFERENCES messages(id),
    user_id TEXT NOT NULL,
    emoji TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (message_id, user_id)
);
"#;
