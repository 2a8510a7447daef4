//! # Parlor Core
//!
//! Direct messaging for the Parlor social app: conversations between two or
//! more users, ordered history, per-user read/mute/archive/delete state,
//! reactions, and realtime fanout to connected clients.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         PARLOR CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                     ┌──────────────────────────┐                        │
//! │                     │     MessagingService     │◄── relay (REST + ws)   │
//! │                     └────────────┬─────────────┘                        │
//! │          ┌──────────────┬────────┴─────┬──────────────┬────────────┐    │
//! │          ▼              ▼              ▼              ▼            ▼    │
//! │  ┌──────────────┐ ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌──────┐ │
//! │  │ Conversation │ │  Message   │ │    Read    │ │  Reaction  │ │ Real │ │
//! │  │    Store     │ │   Store    │ │  Tracker   │ │   Ledger   │ │ time │ │
//! │  └──────┬───────┘ └─────┬──────┘ └─────┬──────┘ └─────┬──────┘ └──────┘ │
//! │         └───────────────┴───────┬──────┴──────────────┘                 │
//! │                                 ▼                                       │
//! │                       ┌───────────────────┐                             │
//! │                       │ Storage (SQLite)  │                             │
//! │                       └───────────────────┘                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types and numeric codes
//! - [`ids`] - User, conversation and message identifiers
//! - [`content`] - Message payload kinds and their validation
//! - [`storage`] - SQLite handle and schema
//! - [`conversations`] - Participants, per-user flags, last-message pointer
//! - [`messages`] - Message history, paging, soft delete
//! - [`reads`] - Unread counts and mark-as-read
//! - [`reactions`] - One emoji per user per message
//! - [`realtime`] - Live connection map and event fanout
//! - [`directory`] - Lookups into the identity and post services
//! - [`service`] - The facade transports call

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod content;
pub mod conversations;
pub mod directory;
pub mod error;
pub mod ids;
pub mod messages;
pub mod reactions;
pub mod reads;
pub mod realtime;
pub mod service;
pub mod storage;
/// Wall-clock helpers.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use content::MessageContent;
pub use conversations::{Conversation, ConversationFlag, ConversationView};
pub use directory::{OpenDirectory, PostDirectory, UserDirectory};
pub use error::{Error, ErrorKind, Result};
pub use ids::{ConversationId, MessageId, UserId};
pub use messages::{Message, MessagePage, PageRequest};
pub use realtime::{RealtimeEvent, RealtimeRouter};
pub use service::{ConversationPage, MessagingService};
pub use storage::{Database, DatabaseConfig};
