//! # Messaging Service
//!
//! The one entry point transports call. It checks collaborators, calls the
//! stores, and only after a write has committed hands events to the realtime
//! router.
//!
//! ```text
//!   send_message
//!     │  content::prepare + post lookup      (no lock held)
//!     ▼
//!   MessageStore::send                       (one transaction: insert + pointer)
//!     │
//!     ▼
//!   RealtimeRouter::notify per recipient     (best effort, after commit)
//! ```

use std::sync::Arc;

use serde::Serialize;

use crate::content::{self, MessageContent};
use crate::conversations::{Conversation, ConversationFlag, ConversationStore, ConversationView};
use crate::directory::{PostDirectory, UserDirectory};
use crate::error::{Error, Result};
use crate::ids::{ConversationId, MessageId, UserId};
use crate::messages::{Message, MessagePage, MessageStore, PageRequest};
use crate::reactions::ReactionLedger;
use crate::reads::ReadTracker;
use crate::realtime::{ConnectionId, EventReceiver, RealtimeEvent, RealtimeRouter};
use crate::storage::Database;

/// A conversation opened by a requester, with one page of its history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPage {
    pub conversation: ConversationView,
    pub messages: MessagePage,
}

pub struct MessagingService {
    conversations: ConversationStore,
    messages: MessageStore,
    reads: ReadTracker,
    reactions: ReactionLedger,
    router: RealtimeRouter,
    users: Arc<dyn UserDirectory>,
    posts: Arc<dyn PostDirectory>,
}

impl MessagingService {
    pub fn new(
        db: Database,
        router: RealtimeRouter,
        users: Arc<dyn UserDirectory>,
        posts: Arc<dyn PostDirectory>,
    ) -> Self {
        Self {
            conversations: ConversationStore::new(db.clone()),
            messages: MessageStore::new(db.clone()),
            reads: ReadTracker::new(db.clone()),
            reactions: ReactionLedger::new(db),
            router,
            users,
            posts,
        }
    }

    pub fn router(&self) -> &RealtimeRouter {
        &self.router
    }

    // ── Conversations ─────────────────────────────────────────────────────

    pub fn list_conversations(&self, caller: &UserId) -> Result<Vec<ConversationView>> {
        self.conversations.list_for_user(caller)
    }

    /// Open (or reopen) the direct conversation with `other`.
    ///
    /// Returns the caller's view and whether the conversation is new.
    pub fn open_direct(&self, caller: &UserId, other: &UserId) -> Result<(ConversationView, bool)> {
        if caller == other {
            return Err(Error::SelfConversation);
        }
        self.require_user(other)?;
        let (conversation, created) = self.conversations.get_or_create_direct(caller, other)?;
        let view = self.conversations.get_for_user(&conversation.id, caller)?;
        Ok((view, created))
    }

    pub fn create_group(
        &self,
        caller: &UserId,
        name: &str,
        members: &[UserId],
        image: Option<&str>,
    ) -> Result<ConversationView> {
        for member in members.iter().filter(|m| *m != caller) {
            self.require_user(member)?;
        }
        let group = self.conversations.create_group(caller, name, members, image)?;
        self.conversations.get_for_user(&group.id, caller)
    }

    /// One page of history plus the caller's view of the conversation.
    ///
    /// Reading marks the caller's received messages read, so the returned
    /// unread count reflects that.
    pub fn open_conversation(
        &self,
        caller: &UserId,
        conversation_id: &ConversationId,
        page: PageRequest,
    ) -> Result<ConversationPage> {
        let messages = self.messages.list_page(conversation_id, caller, page)?;
        let conversation = self.conversations.get_for_user(conversation_id, caller)?;
        Ok(ConversationPage {
            conversation,
            messages,
        })
    }

    pub fn set_flag(
        &self,
        caller: &UserId,
        conversation_id: &ConversationId,
        flag: ConversationFlag,
    ) -> Result<bool> {
        self.conversations.set_flag(conversation_id, caller, flag)
    }

    pub fn add_participant(
        &self,
        caller: &UserId,
        conversation_id: &ConversationId,
        user: &UserId,
    ) -> Result<Conversation> {
        self.require_user(user)?;
        self.conversations.add_participant(conversation_id, caller, user)
    }

    pub fn remove_participant(
        &self,
        caller: &UserId,
        conversation_id: &ConversationId,
        user: &UserId,
    ) -> Result<Conversation> {
        self.conversations.remove_participant(conversation_id, caller, user)
    }

    // ── Messages ──────────────────────────────────────────────────────────

    /// Persist a message, then push it to the other participants' sockets.
    pub fn send_message(
        &self,
        caller: &UserId,
        conversation_id: &ConversationId,
        content: MessageContent,
    ) -> Result<Message> {
        // Membership is checked before the payload
        self.conversations.require_member(conversation_id, caller)?;
        let content = self.resolve(content)?;
        let message = self.messages.send(conversation_id, caller, content)?;
        self.fan_out(&message);
        Ok(message)
    }

    pub fn delete_message(&self, caller: &UserId, message_id: &MessageId) -> Result<bool> {
        self.messages.soft_delete(message_id, caller)
    }

    pub fn mark_message_read(&self, caller: &UserId, message_id: &MessageId) -> Result<bool> {
        self.reads.mark_message_read(message_id, caller)
    }

    pub fn mark_all_read(&self, caller: &UserId, conversation_id: &ConversationId) -> Result<usize> {
        self.reads.mark_all_read(conversation_id, caller)
    }

    pub fn unread_count(&self, caller: &UserId, conversation_id: &ConversationId) -> Result<u64> {
        self.reads.unread_count(conversation_id, caller)
    }

    /// Set the caller's reaction and return the updated message.
    pub fn set_reaction(&self, caller: &UserId, message_id: &MessageId, emoji: &str) -> Result<Message> {
        self.reactions.set_reaction(message_id, caller, emoji)?;
        self.messages.get(message_id)
    }

    /// Clear the caller's reaction and return the updated message.
    pub fn clear_reaction(&self, caller: &UserId, message_id: &MessageId) -> Result<Message> {
        self.reactions.clear_reaction(message_id, caller)?;
        self.messages.get(message_id)
    }

    // ── Realtime ──────────────────────────────────────────────────────────

    pub fn connect(&self, user: &UserId) -> Result<(ConnectionId, EventReceiver)> {
        self.router.connect(user)
    }

    pub fn disconnect(&self, user: &UserId, connection: ConnectionId) {
        self.router.unregister(user, connection);
    }

    /// Forward a typing indicator. Only users who share a conversation may
    /// signal each other. Returns how many sockets received it.
    pub fn typing(&self, caller: &UserId, receiver: &UserId, active: bool) -> Result<usize> {
        if caller == receiver {
            return Ok(0);
        }
        if !self.conversations.shares_conversation(caller, receiver)? {
            return Err(Error::NotParticipant);
        }
        let event = if active {
            RealtimeEvent::UserTyping {
                sender_id: caller.clone(),
                receiver_id: receiver.clone(),
            }
        } else {
            RealtimeEvent::UserStopTyping {
                sender_id: caller.clone(),
                receiver_id: receiver.clone(),
            }
        };
        Ok(self.router.broadcast_ephemeral(receiver, event))
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn require_user(&self, user: &UserId) -> Result<()> {
        if !self.users.user_exists(user)? {
            return Err(Error::UserNotFound(user.to_string()));
        }
        Ok(())
    }

    /// Normalize a payload and check that any shared post exists.
    fn resolve(&self, content: MessageContent) -> Result<MessageContent> {
        let content = content::prepare(content)?;
        if let Some(post_id) = content.shared_post_id() {
            if !self.posts.post_exists(post_id)? {
                return Err(Error::PostNotFound(post_id.to_string()));
            }
        }
        Ok(content)
    }

    fn fan_out(&self, message: &Message) {
        let conversation = match self.conversations.get(&message.conversation_id) {
            Ok(conversation) => conversation,
            Err(e) => {
                tracing::warn!(
                    message_id = %message.id,
                    error = %e,
                    "Could not load recipients; realtime push skipped"
                );
                return;
            }
        };

        let mut delivered = 0;
        for recipient in conversation.others(&message.sender_id) {
            delivered += self.router.notify(
                recipient,
                RealtimeEvent::ReceiveMessage {
                    message: message.clone(),
                },
            );
        }
        tracing::debug!(message_id = %message.id, delivered, "Message pushed to live sockets");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::directory::fixed::FixedDirectory;
    use crate::directory::OpenDirectory;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn service_with(directory: FixedDirectory) -> MessagingService {
        let router = RealtimeRouter::new();
        router.start();
        let directory = Arc::new(directory);
        MessagingService::new(Database::open(None).unwrap(), router, directory.clone(), directory)
    }

    fn service() -> MessagingService {
        let router = RealtimeRouter::new();
        router.start();
        MessagingService::new(
            Database::open(None).unwrap(),
            router,
            Arc::new(OpenDirectory),
            Arc::new(OpenDirectory),
        )
    }

    #[tokio::test]
    async fn test_send_read_round_trip() {
        let service = service();
        let (alice, bob) = (uid("alice"), uid("bob"));
        let (_connection, mut bob_events) = service.connect(&bob).unwrap();

        let (view, created) = service.open_direct(&alice, &bob).unwrap();
        assert!(created);
        let conversation_id = view.conversation.id.clone();

        let sent = service
            .send_message(&alice, &conversation_id, MessageContent::text("hi"))
            .unwrap();

        // The push arrives after the write is visible
        match bob_events.recv().await {
            Some(RealtimeEvent::ReceiveMessage { message }) => {
                assert_eq!(message.id, sent.id);
                assert!(service.messages.get(&message.id).is_ok());
            }
            other => panic!("unexpected event: {:?}", other),
        }

        assert_eq!(service.unread_count(&bob, &conversation_id).unwrap(), 1);
        let listed = service.list_conversations(&bob).unwrap();
        assert_eq!(listed[0].conversation.last_message_id, Some(sent.id.clone()));
        assert_eq!(listed[0].unread_count, 1);

        let opened = service
            .open_conversation(&bob, &conversation_id, PageRequest::default())
            .unwrap();
        assert_eq!(opened.conversation.unread_count, 0);
        assert!(opened.messages.messages[0].is_read);
        assert_eq!(service.unread_count(&bob, &conversation_id).unwrap(), 0);
    }

    #[test]
    fn test_sender_gets_no_push() {
        let service = service();
        let (alice, bob) = (uid("alice"), uid("bob"));
        let (_connection, mut alice_events) = service.connect(&alice).unwrap();
        let (view, _) = service.open_direct(&alice, &bob).unwrap();

        service
            .send_message(&alice, &view.conversation.id, MessageContent::text("hi"))
            .unwrap();
        assert!(alice_events.try_recv().is_err());
    }

    #[test]
    fn test_delete_for_me_then_resurrection() {
        let service = service();
        let (alice, bob) = (uid("alice"), uid("bob"));
        let (view, _) = service.open_direct(&alice, &bob).unwrap();
        let id = view.conversation.id;

        service.send_message(&alice, &id, MessageContent::text("one")).unwrap();
        assert!(service.set_flag(&alice, &id, ConversationFlag::Delete).unwrap());
        assert!(service.list_conversations(&alice).unwrap().is_empty());
        assert!(matches!(
            service.open_conversation(&alice, &id, PageRequest::default()),
            Err(Error::ConversationDeleted)
        ));

        service.send_message(&bob, &id, MessageContent::text("two")).unwrap();
        let listed = service.list_conversations(&alice).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].conversation.id, id);
        assert_eq!(listed[0].unread_count, 1);
    }

    #[test]
    fn test_mute_unmute_through_service() {
        let service = service();
        let (alice, bob) = (uid("alice"), uid("bob"));
        let (view, _) = service.open_direct(&alice, &bob).unwrap();
        let id = view.conversation.id;

        assert!(service.set_flag(&bob, &id, ConversationFlag::Mute).unwrap());
        assert!(!service.set_flag(&bob, &id, ConversationFlag::Mute).unwrap());
        assert!(service.list_conversations(&bob).unwrap()[0].is_muted);
        assert!(!service.list_conversations(&alice).unwrap()[0].is_muted);

        assert!(service.set_flag(&bob, &id, ConversationFlag::Unmute).unwrap());
        assert!(!service.list_conversations(&bob).unwrap()[0].is_muted);
    }

    #[test]
    fn test_outsider_send_is_forbidden_before_content_checks() {
        let service = service_with(FixedDirectory::new(&["alice", "bob", "mallory"], &["post-1"]));
        let (view, _) = service.open_direct(&uid("alice"), &uid("bob")).unwrap();
        let id = view.conversation.id;
        let mallory = uid("mallory");

        assert!(matches!(
            service.send_message(&mallory, &id, MessageContent::text("   ")),
            Err(Error::NotParticipant)
        ));
        let missing = MessageContent::SharedPost {
            shared_post_id: "post-404".into(),
        };
        assert!(matches!(
            service.send_message(&mallory, &id, missing),
            Err(Error::NotParticipant)
        ));
        assert!(matches!(
            service.send_message(&mallory, &ConversationId::new(), MessageContent::text("   ")),
            Err(Error::ConversationNotFound)
        ));
    }

    #[test]
    fn test_unknown_users_and_posts() {
        let service = service_with(FixedDirectory::new(&["alice", "bob"], &["post-1"]));
        let (alice, bob) = (uid("alice"), uid("bob"));

        assert!(matches!(
            service.open_direct(&alice, &uid("nobody")),
            Err(Error::UserNotFound(_))
        ));
        assert!(matches!(
            service.create_group(&alice, "g", &[bob.clone(), uid("nobody")], None),
            Err(Error::UserNotFound(_))
        ));

        let (view, _) = service.open_direct(&alice, &bob).unwrap();
        let id = view.conversation.id;
        let missing = MessageContent::SharedPost {
            shared_post_id: "post-404".into(),
        };
        let err = service.send_message(&alice, &id, missing).unwrap_err();
        assert!(matches!(err, Error::PostNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(service.conversations.get(&id).unwrap().last_message_id, None);

        let shared = MessageContent::SharedPost {
            shared_post_id: " post-1 ".into(),
        };
        let sent = service.send_message(&alice, &id, shared).unwrap();
        assert_eq!(sent.content.shared_post_id(), Some("post-1"));
    }

    #[test]
    fn test_typing_requires_shared_conversation() {
        let service = service();
        let (alice, bob, carol) = (uid("alice"), uid("bob"), uid("carol"));
        let (_connection, mut bob_events) = service.connect(&bob).unwrap();

        assert!(matches!(
            service.typing(&alice, &bob, true),
            Err(Error::NotParticipant)
        ));

        service.open_direct(&alice, &bob).unwrap();
        assert_eq!(service.typing(&alice, &bob, true).unwrap(), 1);
        assert_eq!(service.typing(&alice, &bob, false).unwrap(), 1);
        assert!(matches!(bob_events.try_recv(), Ok(RealtimeEvent::UserTyping { .. })));
        assert!(matches!(bob_events.try_recv(), Ok(RealtimeEvent::UserStopTyping { .. })));

        // Nobody online: nothing delivered, no error
        service.open_direct(&alice, &carol).unwrap();
        assert_eq!(service.typing(&alice, &carol, true).unwrap(), 0);
    }

    #[test]
    fn test_group_fan_out() {
        let service = service();
        let (alice, bob, carol) = (uid("alice"), uid("bob"), uid("carol"));
        let (_b, mut bob_events) = service.connect(&bob).unwrap();
        let (_c, mut carol_events) = service.connect(&carol).unwrap();

        let group = service
            .create_group(&alice, "trip", &[bob.clone(), carol.clone()], None)
            .unwrap();
        service
            .send_message(&alice, &group.conversation.id, MessageContent::text("tickets?"))
            .unwrap();

        assert!(matches!(bob_events.try_recv(), Ok(RealtimeEvent::ReceiveMessage { .. })));
        assert!(matches!(carol_events.try_recv(), Ok(RealtimeEvent::ReceiveMessage { .. })));

        let removed = service
            .remove_participant(&alice, &group.conversation.id, &carol)
            .unwrap();
        assert!(!removed.is_participant(&carol));
        assert!(matches!(
            service.send_message(&carol, &group.conversation.id, MessageContent::text("hey")),
            Err(Error::NotParticipant)
        ));
    }

    #[test]
    fn test_reactions_through_service() {
        let service = service();
        let (alice, bob) = (uid("alice"), uid("bob"));
        let (view, _) = service.open_direct(&alice, &bob).unwrap();
        let message = service
            .send_message(&alice, &view.conversation.id, MessageContent::text("lunch?"))
            .unwrap();

        let updated = service.set_reaction(&bob, &message.id, "👍").unwrap();
        assert_eq!(updated.reactions[&bob].emoji, "👍");

        let cleared = service.clear_reaction(&bob, &message.id).unwrap();
        assert!(cleared.reactions.is_empty());
    }

    #[test]
    fn test_stopped_router_does_not_block_sends() {
        let service = service();
        let (alice, bob) = (uid("alice"), uid("bob"));
        let (view, _) = service.open_direct(&alice, &bob).unwrap();
        service.router().stop();

        assert!(service
            .send_message(&alice, &view.conversation.id, MessageContent::text("still saved"))
            .is_ok());
        assert!(matches!(service.connect(&bob), Err(Error::RealtimeStopped)));
    }
}
