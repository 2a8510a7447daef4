//! REST API handlers.
//!
//! Every handler identifies the caller from [`Caller`], runs the call on the
//! blocking pool through [`AppState::call`], and wraps the result in the
//! `{ok, data?, error?}` envelope.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parlor_core::{
    Conversation, ConversationFlag, ConversationId, ConversationPage, ConversationView, Error,
    ErrorKind, Message, MessageContent, MessageId, MessagingService, PageRequest, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::Caller;
use crate::state::AppState;

// ── Request / Response Types ─────────────────────────────────────────────────

/// POST /api/conversations and POST /api/conversations/:id/participants
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRequest {
    pub user_id: UserId,
}

/// POST /api/conversations/group
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    pub participants: Vec<UserId>,
    pub image: Option<String>,
}

/// POST /api/messages
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    pub content: MessageContent,
}

/// POST /api/messages/:id/reaction
#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    pub emoji: String,
}

/// GET /api/conversations/:id?page&limit
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Response envelope.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Json<Self> {
        Json(Self {
            ok: true,
            data: Some(data),
            error: None,
            kind: None,
            code: None,
        })
    }
}

/// A failed request, rendered as the error envelope.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    code: Option<i32>,
    message: String,
}

impl ApiError {
    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            kind: "unauthorized",
            code: None,
            message: "Missing or invalid x-user-id header".to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if kind == ErrorKind::Internal {
            tracing::error!(code = err.code(), error = %err, "Request failed");
        } else {
            tracing::debug!(code = err.code(), error = %err, "Request rejected");
        }
        Self {
            status,
            kind: kind.as_str(),
            code: Some(err.code()),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiResponse::<()> {
                ok: false,
                data: None,
                error: Some(self.message),
                kind: Some(self.kind),
                code: self.code,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, ApiResponse::success(data)))
}

fn created<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, ApiResponse::success(data)))
}

async fn run<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&MessagingService) -> parlor_core::Result<T> + Send + 'static,
{
    Ok(state.call(f).await?)
}

fn conversation_id(raw: &str) -> Result<ConversationId, ApiError> {
    Ok(ConversationId::parse(raw)?)
}

fn message_id(raw: &str) -> Result<MessageId, ApiError> {
    Ok(MessageId::parse(raw)?)
}

// ── Conversation Handlers ────────────────────────────────────────────────────

/// GET /api/conversations: The caller's conversations, most recent first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Vec<ConversationView>> {
    let views = run(&state, move |svc| svc.list_conversations(&caller)).await?;
    ok(views)
}

/// POST /api/conversations: Get or create the direct conversation with `userId`.
///
/// 201 when the conversation was created, 200 when an existing one is reused.
pub async fn open_direct(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<UserRequest>,
) -> ApiResult<ConversationView> {
    let (view, is_new) = run(&state, move |svc| svc.open_direct(&caller, &req.user_id)).await?;
    if is_new {
        created(view)
    } else {
        ok(view)
    }
}

/// POST /api/conversations/group: Create a group with the caller as admin.
pub async fn create_group(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<ConversationView> {
    let view = run(&state, move |svc| {
        svc.create_group(&caller, &req.name, &req.participants, req.image.as_deref())
    })
    .await?;
    created(view)
}

/// GET /api/conversations/:id: The conversation plus one page of history.
///
/// Opening a conversation marks the caller's received messages read.
pub async fn get_conversation(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<ConversationPage> {
    let id = conversation_id(&id)?;
    let page = PageRequest::new(
        query.page.unwrap_or(1),
        query.limit.unwrap_or(state.config.default_page_size),
    )?;
    let page = run(&state, move |svc| svc.open_conversation(&caller, &id, page)).await?;
    ok(page)
}

/// PUT /api/conversations/:id/:flag: mute, unmute, archive or unarchive.
pub async fn set_flag(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path((id, flag)): Path<(String, String)>,
) -> ApiResult<Value> {
    let id = conversation_id(&id)?;
    let flag: ConversationFlag = flag.parse()?;
    if flag == ConversationFlag::Delete {
        return Err(Error::InvalidFlag("use DELETE /api/conversations/:id".into()).into());
    }
    let changed = run(&state, move |svc| svc.set_flag(&caller, &id, flag)).await?;
    ok(json!({ "changed": changed }))
}

/// DELETE /api/conversations/:id: Hide the conversation for the caller only.
pub async fn delete_conversation(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let id = conversation_id(&id)?;
    let changed = run(&state, move |svc| {
        svc.set_flag(&caller, &id, ConversationFlag::Delete)
    })
    .await?;
    ok(json!({ "changed": changed }))
}

/// PUT /api/conversations/:id/read: Mark everything received as read.
pub async fn mark_conversation_read(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let id = conversation_id(&id)?;
    let marked = run(&state, move |svc| svc.mark_all_read(&caller, &id)).await?;
    ok(json!({ "marked": marked }))
}

/// GET /api/conversations/:id/unread
pub async fn unread_count(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let id = conversation_id(&id)?;
    let count = run(&state, move |svc| svc.unread_count(&caller, &id)).await?;
    ok(json!({ "unreadCount": count }))
}

/// POST /api/conversations/:id/participants: Admin adds a group member.
pub async fn add_participant(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Json(req): Json<UserRequest>,
) -> ApiResult<Conversation> {
    let id = conversation_id(&id)?;
    let conversation = run(&state, move |svc| {
        svc.add_participant(&caller, &id, &req.user_id)
    })
    .await?;
    ok(conversation)
}

/// DELETE /api/conversations/:id/participants/:userId: Admin removes a member,
/// or a member leaves.
pub async fn remove_participant(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path((id, user)): Path<(String, String)>,
) -> ApiResult<Conversation> {
    let id = conversation_id(&id)?;
    let user = UserId::parse(user)?;
    let conversation = run(&state, move |svc| svc.remove_participant(&caller, &id, &user)).await?;
    ok(conversation)
}

// ── Message Handlers ─────────────────────────────────────────────────────────

/// POST /api/messages: Persist a message and push it to live recipients.
pub async fn send_message(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Message> {
    let message = run(&state, move |svc| {
        svc.send_message(&caller, &req.conversation_id, req.content)
    })
    .await?;
    created(message)
}

/// DELETE /api/messages/:id: Sender-only soft delete.
pub async fn delete_message(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let id = message_id(&id)?;
    let deleted = run(&state, move |svc| svc.delete_message(&caller, &id)).await?;
    ok(json!({ "deleted": deleted }))
}

/// PUT /api/messages/:id/read
pub async fn mark_message_read(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let id = message_id(&id)?;
    let changed = run(&state, move |svc| svc.mark_message_read(&caller, &id)).await?;
    ok(json!({ "changed": changed }))
}

/// POST /api/messages/:id/reaction: Set or replace the caller's reaction.
pub async fn set_reaction(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Json(req): Json<ReactionRequest>,
) -> ApiResult<Message> {
    let id = message_id(&id)?;
    let message = run(&state, move |svc| svc.set_reaction(&caller, &id, &req.emoji)).await?;
    ok(message)
}

/// DELETE /api/messages/:id/reaction: Clear the caller's reaction.
pub async fn clear_reaction(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> ApiResult<Message> {
    let id = message_id(&id)?;
    let message = run(&state, move |svc| svc.clear_reaction(&caller, &id)).await?;
    ok(message)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
