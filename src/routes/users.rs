use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::routes::posts;
use crate::state::AppState;

/// User as shaped for API responses. The email is only present on the
/// owner's own views (register/login/me/profile update).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub display_name: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    pub bio: String,
    pub followers: i64,
    pub following: i64,
    pub posts: i64,
    pub created_at: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(list_users))
        .route("/api/users/me", put(update_profile))
        .route("/api/users/{id}", get(get_user))
        .route("/api/users/{id}/posts", get(user_posts))
}

// --- Query helpers (shared with the auth handlers) ---

const USER_COLUMNS: &str = "id, email, display_name, avatar_url, bio, \
     followers, following, post_count, created_at";

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserResponse> {
    Ok(UserResponse {
        id: row.get(0)?,
        email: Some(row.get(1)?),
        display_name: row.get(2)?,
        photo_url: row.get(3)?,
        bio: row.get(4)?,
        followers: row.get(5)?,
        following: row.get(6)?,
        posts: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Load a user including their email. 404 if unknown.
pub fn load_user(conn: &rusqlite::Connection, id: &str) -> AppResult<UserResponse> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        params![id],
        row_to_user,
    )
    .map_err(|_| AppError::NotFound)
}

/// Load a user's public profile (no email). 404 if unknown.
pub fn load_public_user(conn: &rusqlite::Connection, id: &str) -> AppResult<UserResponse> {
    let mut user = load_user(conn, id)?;
    user.email = None;
    Ok(user)
}

// --- Handlers ---

/// GET /api/users — everyone except the caller, for starting chats.
async fn list_users(State(state): State<AppState>, user: CurrentUser) -> AppResult<Response> {
    let conn = state.db.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users WHERE id != ?1 ORDER BY display_name COLLATE NOCASE",
        USER_COLUMNS
    ))?;

    let users: Vec<UserResponse> = stmt
        .query_map(params![user.id], row_to_user)?
        .filter_map(|r| r.ok())
        .map(|mut u| {
            u.email = None;
            u
        })
        .collect();

    Ok(Json(serde_json::json!({ "users": users })).into_response())
}

/// GET /api/users/{id} — public profile.
async fn get_user(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    let conn = state.db.get()?;
    let user = load_public_user(&conn, &id)?;
    Ok(Json(serde_json::json!({ "user": user })).into_response())
}

/// GET /api/users/{id}/posts — one user's posts, newest first.
async fn user_posts(
    State(state): State<AppState>,
    MaybeUser(current): MaybeUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;

    // Unknown authors are an error, not an empty feed
    load_public_user(&conn, &id)?;

    let current_id = current.as_ref().map(|u| u.id.as_str());
    let posts = posts::query_posts(&conn, current_id, Some(&id))?;

    Ok(Json(serde_json::json!({ "posts": posts })).into_response())
}

/// PUT /api/users/me — update the caller's profile.
async fn update_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<UpdateProfileRequest>,
) -> AppResult<Response> {
    let mut conn = state.db.get()?;
    let updated = apply_profile_update(&mut conn, &user.id, &req)?;
    Ok((StatusCode::OK, Json(serde_json::json!({ "user": updated }))).into_response())
}

/// Apply the requested field changes as one unit; a rejected update
/// leaves the profile untouched.
pub fn apply_profile_update(
    conn: &mut rusqlite::Connection,
    user_id: &str,
    req: &UpdateProfileRequest,
) -> AppResult<UserResponse> {
    let tx = conn.transaction()?;

    if let Some(ref name) = req.display_name {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("Display name cannot be empty".into()));
        }
        tx.execute(
            "UPDATE users SET display_name = ?1 WHERE id = ?2",
            params![name, user_id],
        )?;
    }
    if let Some(ref bio) = req.bio {
        tx.execute(
            "UPDATE users SET bio = ?1 WHERE id = ?2",
            params![bio.trim(), user_id],
        )?;
    }
    if let Some(ref photo_url) = req.photo_url {
        tx.execute(
            "UPDATE users SET avatar_url = ?1 WHERE id = ?2",
            params![photo_url, user_id],
        )?;
    }

    tx.commit()?;
    load_user(conn, user_id)
}
