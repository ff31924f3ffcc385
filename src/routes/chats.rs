use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;

// --- View structs ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub id: String,
    pub participants: Vec<ParticipantView>,
    pub last_message: Option<LastMessageView>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: String,
    pub display_name: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageView {
    pub sender_id: String,
    pub text: String,
    pub created_at: String,
    pub read: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_photo: String,
    pub text: String,
    pub created_at: String,
    pub read: bool,
}

// --- Request types ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub participant_id: Option<String>,
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/chats", get(list_chats).post(create_chat))
        .route(
            "/api/chats/{id}/messages",
            get(list_messages).post(send_message),
        )
}

// --- Handlers ---

/// GET /api/chats — the caller's chats, most recently active first.
async fn list_chats(State(state): State<AppState>, user: CurrentUser) -> AppResult<Response> {
    let conn = state.db.get()?;
    let chat_ids = query_chat_ids(&conn, &user.id)?;

    let chats: Vec<ChatView> = chat_ids
        .iter()
        .map(|id| load_chat(&conn, id))
        .collect::<AppResult<_>>()?;

    Ok(Json(serde_json::json!({ "chats": chats })).into_response())
}

/// POST /api/chats — start a chat with one other user.
async fn create_chat(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateChatRequest>,
) -> AppResult<Response> {
    let participant_id = req
        .participant_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Participant id is required".into()))?;

    if participant_id == user.id {
        return Err(AppError::BadRequest(
            "Cannot start a chat with yourself".into(),
        ));
    }

    let mut conn = state.db.get()?;

    // Participant must exist
    let _: String = conn
        .query_row(
            "SELECT id FROM users WHERE id = ?1",
            params![participant_id],
            |r| r.get(0),
        )
        .map_err(|_| AppError::NotFound)?;

    // One chat per participant pair
    let existing: Option<String> = conn
        .query_row(
            "SELECT cp.chat_id FROM chat_participants cp
             WHERE cp.user_id IN (?1, ?2)
             GROUP BY cp.chat_id
             HAVING COUNT(DISTINCT cp.user_id) = 2
                AND (SELECT COUNT(*) FROM chat_participants p2
                     WHERE p2.chat_id = cp.chat_id) = 2",
            params![user.id, participant_id],
            |r| r.get(0),
        )
        .ok();
    if existing.is_some() {
        return Err(AppError::Conflict(
            "A chat with this participant already exists".into(),
        ));
    }

    let chat_id = uuid::Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO chats (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
        params![chat_id, now],
    )?;
    tx.execute(
        "INSERT INTO chat_participants (chat_id, user_id) VALUES (?1, ?2)",
        params![chat_id, user.id],
    )?;
    tx.execute(
        "INSERT INTO chat_participants (chat_id, user_id) VALUES (?1, ?2)",
        params![chat_id, participant_id],
    )?;
    tx.commit()?;

    let chat = load_chat(&conn, &chat_id)?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "chat": chat }))).into_response())
}

/// GET /api/chats/{id}/messages — messages in send order. Fetching marks
/// the other participants' messages as read.
async fn list_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(chat_id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    require_membership(&conn, &chat_id, &user.id)?;

    let messages = query_messages(&conn, &chat_id)?;
    mark_messages_read(&conn, &chat_id, &user.id)?;

    Ok(Json(serde_json::json!({ "messages": messages })).into_response())
}

/// POST /api/chats/{id}/messages — send a message.
async fn send_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(chat_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<Response> {
    let text = req.text.trim().to_string();
    if text.is_empty() {
        return Err(AppError::BadRequest("Message text is required".into()));
    }

    let mut conn = state.db.get()?;
    require_membership(&conn, &chat_id, &user.id)?;

    let message_id = uuid::Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();

    // Message row and last-message snapshot move together
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO chat_messages (id, chat_id, sender_id, body, is_read, created_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        params![message_id, chat_id, user.id, text, now],
    )?;
    tx.execute(
        "UPDATE chats SET last_sender_id = ?1, last_body = ?2, last_sent_at = ?3,
             last_read = 0, updated_at = ?3
         WHERE id = ?4",
        params![user.id, text, now, chat_id],
    )?;
    tx.commit()?;

    let message = MessageView {
        id: message_id,
        chat_id,
        sender_id: user.id,
        sender_name: user.display_name,
        sender_photo: user.avatar_url,
        text,
        created_at: now,
        read: false,
    };

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "message": message })),
    )
        .into_response())
}

// --- Query helpers ---

/// 404 for an unknown chat, 403 for a chat the user is not part of.
pub fn require_membership(
    conn: &rusqlite::Connection,
    chat_id: &str,
    user_id: &str,
) -> AppResult<()> {
    let _: String = conn
        .query_row("SELECT id FROM chats WHERE id = ?1", params![chat_id], |r| {
            r.get(0)
        })
        .map_err(|_| AppError::NotFound)?;

    let is_member: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
        params![chat_id, user_id],
        |r| r.get(0),
    )?;
    if !is_member {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// Ids of the chats a user belongs to, most recently active first.
pub fn query_chat_ids(conn: &rusqlite::Connection, user_id: &str) -> AppResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT c.id FROM chats c
         JOIN chat_participants cp ON cp.chat_id = c.id
         WHERE cp.user_id = ?1
         ORDER BY c.updated_at DESC",
    )?;
    let ids = stmt
        .query_map(params![user_id], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(ids)
}

pub fn load_chat(conn: &rusqlite::Connection, chat_id: &str) -> AppResult<ChatView> {
    let (last_sender_id, last_body, last_sent_at, last_read, created_at, updated_at): (
        Option<String>,
        Option<String>,
        Option<String>,
        bool,
        String,
        String,
    ) = conn
        .query_row(
            "SELECT last_sender_id, last_body, last_sent_at, last_read, created_at, updated_at
             FROM chats WHERE id = ?1",
            params![chat_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .map_err(|_| AppError::NotFound)?;

    let participants = query_participants(conn, chat_id)?;

    let last_message = match (last_sender_id, last_body, last_sent_at) {
        (Some(sender_id), Some(text), Some(sent_at)) => Some(LastMessageView {
            sender_id,
            text,
            created_at: sent_at,
            read: last_read,
        }),
        _ => None,
    };

    Ok(ChatView {
        id: chat_id.to_string(),
        participants,
        last_message,
        created_at,
        updated_at,
    })
}

fn query_participants(
    conn: &rusqlite::Connection,
    chat_id: &str,
) -> AppResult<Vec<ParticipantView>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.display_name, u.avatar_url
         FROM chat_participants cp
         JOIN users u ON u.id = cp.user_id
         WHERE cp.chat_id = ?1
         ORDER BY u.display_name COLLATE NOCASE",
    )?;

    let participants = stmt
        .query_map(params![chat_id], |row| {
            Ok(ParticipantView {
                id: row.get(0)?,
                display_name: row.get(1)?,
                photo_url: row.get(2)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    Ok(participants)
}

pub fn query_messages(conn: &rusqlite::Connection, chat_id: &str) -> AppResult<Vec<MessageView>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.sender_id, u.display_name, u.avatar_url, m.body, m.created_at, m.is_read
         FROM chat_messages m
         JOIN users u ON u.id = m.sender_id
         WHERE m.chat_id = ?1
         ORDER BY m.created_at ASC",
    )?;

    let messages = stmt
        .query_map(params![chat_id], |row| {
            Ok(MessageView {
                id: row.get(0)?,
                chat_id: chat_id.to_string(),
                sender_id: row.get(1)?,
                sender_name: row.get(2)?,
                sender_photo: row.get(3)?,
                text: row.get(4)?,
                created_at: row.get(5)?,
                read: row.get(6)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    Ok(messages)
}

/// Mark messages from other participants as read, snapshot included.
pub fn mark_messages_read(
    conn: &rusqlite::Connection,
    chat_id: &str,
    user_id: &str,
) -> AppResult<()> {
    conn.execute(
        "UPDATE chat_messages SET is_read = 1
         WHERE chat_id = ?1 AND sender_id != ?2 AND is_read = 0",
        params![chat_id, user_id],
    )?;
    conn.execute(
        "UPDATE chats SET last_read = 1
         WHERE id = ?1 AND last_sender_id IS NOT NULL AND last_sender_id != ?2",
        params![chat_id, user_id],
    )?;
    Ok(())
}
