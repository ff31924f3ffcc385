use axum::extract::State;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use rusqlite::params;
use serde::Deserialize;

use crate::auth::{password, session};
use crate::error::{AppError, AppResult};
use crate::extractors::{extract_bearer_token, CurrentUser};
use crate::routes::users::{load_user, UserResponse};
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

// -- Helpers --

fn default_avatar_url(display_name: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(display_name.as_bytes()).collect();
    format!("https://ui-avatars.com/api/?name={}", encoded)
}

fn auth_response(user: UserResponse, token: String) -> serde_json::Value {
    serde_json::json!({ "user": user, "token": token })
}

// -- Handlers --

/// POST /api/auth/register — create an account, returns the user + a token.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Response> {
    let email = req
        .email
        .as_deref()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty());
    let password_plain = req.password.filter(|s| !s.is_empty());
    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let (email, password_plain, display_name) = match (email, password_plain, display_name) {
        (Some(e), Some(p), Some(d)) => (e, p, d),
        _ => return Err(AppError::BadRequest("All fields are required".into())),
    };

    let conn = state.db.get()?;

    let taken: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE email = ?1",
        params![email],
        |row| row.get(0),
    )?;
    if taken {
        return Err(AppError::Conflict(
            "A user with this email already exists".into(),
        ));
    }

    let user_id = uuid::Uuid::now_v7().to_string();
    let password_hash = password::hash_password(&password_plain)?;
    let avatar_url = default_avatar_url(&display_name);
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO users (id, email, password_hash, display_name, avatar_url, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![user_id, email, password_hash, display_name, avatar_url, now],
    )?;

    let token = session::create_session(&state.db, &user_id, state.config.auth.token_hours)?;
    let user = load_user(&conn, &user_id)?;

    Ok((StatusCode::CREATED, Json(auth_response(user, token))).into_response())
}

/// POST /api/auth/login — verify credentials, returns the user + a token.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Response> {
    let email = req
        .email
        .as_deref()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty());
    let password_plain = req.password.filter(|s| !s.is_empty());

    let (email, password_plain) = match (email, password_plain) {
        (Some(e), Some(p)) => (e, p),
        _ => return Err(AppError::BadRequest("Email and password are required".into())),
    };

    let conn = state.db.get()?;

    // Same response for unknown email and wrong password
    let (user_id, password_hash): (String, String) = conn
        .query_row(
            "SELECT id, password_hash FROM users WHERE email = ?1",
            params![email],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|_| AppError::Unauthorized)?;

    if !password::verify_password(&password_plain, &password_hash)? {
        return Err(AppError::Unauthorized);
    }

    let token = session::create_session(&state.db, &user_id, state.config.auth.token_hours)?;
    let user = load_user(&conn, &user_id)?;

    Ok(Json(auth_response(user, token)).into_response())
}

/// GET /api/auth/me — the user behind the presented token.
pub async fn me(State(state): State<AppState>, user: CurrentUser) -> AppResult<Response> {
    let conn = state.db.get()?;
    let user = load_user(&conn, &user.id)?;
    Ok(Json(serde_json::json!({ "user": user })).into_response())
}

/// POST /api/auth/logout — revoke the presented token.
pub async fn logout(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> AppResult<Response> {
    let (parts, _body): (Parts, _) = request.into_parts();

    if let Some(token) = extract_bearer_token(&parts) {
        session::delete_session(&state.db, token)?;
    }

    Ok(Json(serde_json::json!({ "ok": true })).into_response())
}
