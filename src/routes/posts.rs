use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::state::AppState;

// The feed is capped; older posts are reachable through per-user pages.
const FEED_LIMIT: i64 = 100;
const MAX_POST_LEN: usize = 2000;
const MAX_COMMENT_LEN: usize = 500;

// Limits count characters, not bytes
fn over_limit(text: &str, max_chars: usize) -> bool {
    text.chars().count() > max_chars
}

// --- View structs ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_image: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub likes: Vec<String>,
    pub comments: Vec<CommentView>,
    pub created_at: String,
    pub updated_at: String,
    pub liked: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_image: String,
    pub text: String,
    pub created_at: String,
}

// --- Request types ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub text: String,
    pub image_url: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub text: String,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/posts", get(list_posts).post(create_post))
        .route("/api/posts/{id}", delete(delete_post))
        .route("/api/posts/{id}/like", put(toggle_like))
        .route("/api/posts/{id}/comments", post(add_comment))
}

// --- Handlers ---

/// GET /api/posts — the feed, newest first. Auth is optional; with a valid
/// token each post carries a per-caller `liked` flag.
async fn list_posts(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let current_id = user.as_ref().map(|u| u.id.as_str());
    let posts = query_posts(&conn, current_id, None)?;

    Ok(Json(serde_json::json!({ "posts": posts })).into_response())
}

/// POST /api/posts — create a post.
async fn create_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreatePostRequest>,
) -> AppResult<Response> {
    let text = req.text.trim().to_string();
    if text.is_empty() {
        return Err(AppError::BadRequest("Post text is required".into()));
    }
    if over_limit(&text, MAX_POST_LEN) {
        return Err(AppError::BadRequest(format!(
            "Post text must be {} characters or less",
            MAX_POST_LEN
        )));
    }

    let post_id = uuid::Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();

    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO posts (id, user_id, body, image_url, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![post_id, user.id, text, req.image_url, now],
    )?;
    tx.execute(
        "UPDATE users SET post_count = post_count + 1 WHERE id = ?1",
        params![user.id],
    )?;
    tx.commit()?;

    let post = load_post(&conn, &post_id, Some(&user.id))?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "post": post }))).into_response())
}

/// PUT /api/posts/{id}/like — toggle the caller's like.
async fn toggle_like(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;

    // Verify post exists
    let _: String = conn
        .query_row(
            "SELECT id FROM posts WHERE id = ?1",
            params![post_id],
            |r| r.get(0),
        )
        .map_err(|_| AppError::NotFound)?;

    // Toggle: check exists, then delete or insert
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM likes WHERE post_id = ?1 AND user_id = ?2",
            params![post_id, user.id],
            |r| r.get(0),
        )
        .ok();

    if existing.is_some() {
        conn.execute(
            "DELETE FROM likes WHERE post_id = ?1 AND user_id = ?2",
            params![post_id, user.id],
        )?;
    } else {
        let like_id = uuid::Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO likes (id, post_id, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![like_id, post_id, user.id, now],
        )?;
    }

    conn.execute(
        "UPDATE posts SET updated_at = ?1 WHERE id = ?2",
        params![Utc::now().to_rfc3339(), post_id],
    )?;

    let post = load_post(&conn, &post_id, Some(&user.id))?;
    Ok(Json(serde_json::json!({ "post": post })).into_response())
}

/// POST /api/posts/{id}/comments — add a comment, returns the updated post.
async fn add_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
    Json(req): Json<CreateCommentRequest>,
) -> AppResult<Response> {
    let text = req.text.trim().to_string();
    if text.is_empty() {
        return Err(AppError::BadRequest("Comment text is required".into()));
    }
    if over_limit(&text, MAX_COMMENT_LEN) {
        return Err(AppError::BadRequest(format!(
            "Comment must be {} characters or less",
            MAX_COMMENT_LEN
        )));
    }

    let conn = state.db.get()?;

    // Verify post exists
    let _: String = conn
        .query_row(
            "SELECT id FROM posts WHERE id = ?1",
            params![post_id],
            |r| r.get(0),
        )
        .map_err(|_| AppError::NotFound)?;

    let comment_id = uuid::Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO comments (id, post_id, user_id, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![comment_id, post_id, user.id, text, now],
    )?;
    conn.execute(
        "UPDATE posts SET updated_at = ?1 WHERE id = ?2",
        params![now, post_id],
    )?;

    let post = load_post(&conn, &post_id, Some(&user.id))?;
    Ok(Json(serde_json::json!({ "post": post })).into_response())
}

/// DELETE /api/posts/{id} — authors can delete their own posts.
async fn delete_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let mut conn = state.db.get()?;

    let owner_id: String = conn
        .query_row("SELECT user_id FROM posts WHERE id = ?1", params![id], |r| {
            r.get(0)
        })
        .map_err(|_| AppError::NotFound)?;

    if owner_id != user.id {
        return Err(AppError::Forbidden);
    }

    let tx = conn.transaction()?;
    tx.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
    tx.execute(
        "UPDATE users SET post_count = post_count - 1 WHERE id = ?1 AND post_count > 0",
        params![user.id],
    )?;
    tx.commit()?;

    Ok((StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response())
}

// --- Query helpers ---

struct PostRow {
    id: String,
    user_id: String,
    user_name: String,
    user_image: String,
    body: String,
    image_url: Option<String>,
    created_at: String,
    updated_at: String,
}

fn map_post_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        user_name: row.get(2)?,
        user_image: row.get(3)?,
        body: row.get(4)?,
        image_url: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const POST_SELECT: &str = "SELECT p.id, p.user_id, u.display_name, u.avatar_url, p.body, \
     p.image_url, p.created_at, p.updated_at \
     FROM posts p JOIN users u ON u.id = p.user_id";

/// Shape posts for the API: author profile, full list of liking user ids,
/// embedded comments with commenter profiles, per-caller `liked`.
pub fn query_posts(
    conn: &rusqlite::Connection,
    current_user_id: Option<&str>,
    author_id: Option<&str>,
) -> AppResult<Vec<PostView>> {
    let rows: Vec<PostRow> = match author_id {
        Some(author) => {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE p.user_id = ?1 ORDER BY p.created_at DESC",
                POST_SELECT
            ))?;
            let rows = stmt
                .query_map(params![author], map_post_row)?
                .filter_map(|r| r.ok())
                .collect();
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "{} ORDER BY p.created_at DESC LIMIT ?1",
                POST_SELECT
            ))?;
            let rows = stmt
                .query_map(params![FEED_LIMIT], map_post_row)?
                .filter_map(|r| r.ok())
                .collect();
            rows
        }
    };

    rows.into_iter()
        .map(|row| build_view(conn, row, current_user_id))
        .collect()
}

/// Load a single post in API shape. 404 if unknown.
pub fn load_post(
    conn: &rusqlite::Connection,
    post_id: &str,
    current_user_id: Option<&str>,
) -> AppResult<PostView> {
    let row = conn
        .query_row(
            &format!("{} WHERE p.id = ?1", POST_SELECT),
            params![post_id],
            map_post_row,
        )
        .map_err(|_| AppError::NotFound)?;

    build_view(conn, row, current_user_id)
}

fn build_view(
    conn: &rusqlite::Connection,
    row: PostRow,
    current_user_id: Option<&str>,
) -> AppResult<PostView> {
    let likes = query_likes(conn, &row.id)?;
    let comments = query_comments(conn, &row.id)?;
    let liked = current_user_id
        .map(|uid| likes.iter().any(|id| id == uid))
        .unwrap_or(false);

    Ok(PostView {
        id: row.id,
        user_id: row.user_id,
        user_name: row.user_name,
        user_image: row.user_image,
        text: row.body,
        image_url: row.image_url,
        likes,
        comments,
        created_at: row.created_at,
        updated_at: row.updated_at,
        liked,
    })
}

fn query_likes(conn: &rusqlite::Connection, post_id: &str) -> AppResult<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM likes WHERE post_id = ?1 ORDER BY created_at ASC")?;
    let likes = stmt
        .query_map(params![post_id], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(likes)
}

fn query_comments(conn: &rusqlite::Connection, post_id: &str) -> AppResult<Vec<CommentView>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.user_id, u.display_name, u.avatar_url, c.body, c.created_at
         FROM comments c
         JOIN users u ON u.id = c.user_id
         WHERE c.post_id = ?1
         ORDER BY c.created_at ASC",
    )?;

    let comments = stmt
        .query_map(params![post_id], |row| {
            Ok(CommentView {
                id: row.get(0)?,
                user_id: row.get(1)?,
                user_name: row.get(2)?,
                user_image: row.get(3)?,
                text: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    Ok(comments)
}
