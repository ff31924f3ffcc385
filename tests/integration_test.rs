//! Account and feed flows against a real on-disk database.

use rusqlite::params;
use tempfile::TempDir;

use veranda::auth::{password, session};
use veranda::db;
use veranda::routes::posts::{load_post, query_posts};
use veranda::routes::users::{
    apply_profile_update, load_public_user, load_user, UpdateProfileRequest,
};
use veranda::state::DbPool;

fn create_test_db() -> (TempDir, DbPool) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let pool = db::create_pool(&db_path).expect("Failed to create test database");
    db::run_migrations(&pool).expect("Failed to run migrations");
    (temp_dir, pool)
}

fn insert_user(pool: &DbPool, email: &str, name: &str, plain_password: &str) -> String {
    let conn = pool.get().unwrap();
    let id = uuid::Uuid::now_v7().to_string();
    let hash = password::hash_password(plain_password).unwrap();
    conn.execute(
        "INSERT INTO users (id, email, password_hash, display_name, avatar_url, created_at)
         VALUES (?1, ?2, ?3, ?4, '', ?5)",
        params![id, email, hash, name, chrono::Utc::now().to_rfc3339()],
    )
    .unwrap();
    id
}

fn insert_post(pool: &DbPool, user_id: &str, body: &str) -> String {
    let conn = pool.get().unwrap();
    let id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO posts (id, user_id, body, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
        params![id, user_id, body, now],
    )
    .unwrap();
    id
}

// ============================================================================
// ACCOUNT / SESSION TESTS
// ============================================================================

#[test]
fn stored_password_hash_verifies() {
    let (_tmp, pool) = create_test_db();
    let user_id = insert_user(&pool, "alice@example.com", "Alice", "hunter2");

    let conn = pool.get().unwrap();
    let hash: String = conn
        .query_row(
            "SELECT password_hash FROM users WHERE id = ?1",
            params![user_id],
            |r| r.get(0),
        )
        .unwrap();

    assert!(password::verify_password("hunter2", &hash).unwrap());
    assert!(!password::verify_password("wrong", &hash).unwrap());
}

#[test]
fn session_token_resolves_to_its_user() {
    let (_tmp, pool) = create_test_db();
    let user_id = insert_user(&pool, "alice@example.com", "Alice", "hunter2");

    let token = session::create_session(&pool, &user_id, 24).unwrap();

    let conn = pool.get().unwrap();
    let resolved: String = conn
        .query_row(
            "SELECT u.id FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1 AND s.expires_at > datetime('now')",
            params![token],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(resolved, user_id);
}

#[test]
fn deleted_session_no_longer_resolves() {
    let (_tmp, pool) = create_test_db();
    let user_id = insert_user(&pool, "alice@example.com", "Alice", "hunter2");

    let token = session::create_session(&pool, &user_id, 24).unwrap();
    session::delete_session(&pool, &token).unwrap();

    let conn = pool.get().unwrap();
    let result: Result<String, _> = conn.query_row(
        "SELECT user_id FROM sessions WHERE token = ?1",
        params![token],
        |r| r.get(0),
    );
    assert!(result.is_err());
}

#[test]
fn expired_session_is_rejected_by_the_lookup() {
    let (_tmp, pool) = create_test_db();
    let user_id = insert_user(&pool, "alice@example.com", "Alice", "hunter2");

    // Zero-hour lifetime expires immediately
    let token = session::create_session(&pool, &user_id, 0).unwrap();

    let conn = pool.get().unwrap();
    let result: Result<String, _> = conn.query_row(
        "SELECT u.id FROM sessions s JOIN users u ON u.id = s.user_id
         WHERE s.token = ?1 AND s.expires_at > datetime('now')",
        params![token],
        |r| r.get(0),
    );
    assert!(result.is_err(), "Expired sessions must not authenticate");
}

#[test]
fn public_profile_hides_the_email() {
    let (_tmp, pool) = create_test_db();
    let user_id = insert_user(&pool, "alice@example.com", "Alice", "hunter2");

    let conn = pool.get().unwrap();
    let own = load_user(&conn, &user_id).unwrap();
    assert_eq!(own.email.as_deref(), Some("alice@example.com"));

    let public = load_public_user(&conn, &user_id).unwrap();
    assert!(public.email.is_none());
    assert_eq!(public.display_name, "Alice");
}

#[test]
fn profile_update_applies_all_fields_together() {
    let (_tmp, pool) = create_test_db();
    let alice = insert_user(&pool, "alice@example.com", "Alice", "pw");

    let mut conn = pool.get().unwrap();
    let req = UpdateProfileRequest {
        display_name: Some("Alice B".into()),
        bio: Some("gardener".into()),
        photo_url: Some("/uploads/alice.png".into()),
    };
    let user = apply_profile_update(&mut conn, &alice, &req).unwrap();
    assert_eq!(user.display_name, "Alice B");
    assert_eq!(user.bio, "gardener");
    assert_eq!(user.photo_url, "/uploads/alice.png");
}

#[test]
fn rejected_profile_update_changes_nothing() {
    let (_tmp, pool) = create_test_db();
    let alice = insert_user(&pool, "alice@example.com", "Alice", "pw");

    let mut conn = pool.get().unwrap();
    let req = UpdateProfileRequest {
        display_name: Some("   ".into()),
        bio: Some("should not land".into()),
        photo_url: None,
    };
    assert!(apply_profile_update(&mut conn, &alice, &req).is_err());

    let user = load_user(&conn, &alice).unwrap();
    assert_eq!(user.display_name, "Alice");
    assert_eq!(user.bio, "");
}

#[test]
fn unknown_user_is_not_found() {
    let (_tmp, pool) = create_test_db();
    let conn = pool.get().unwrap();
    assert!(load_user(&conn, "no-such-id").is_err());
}

// ============================================================================
// FEED TESTS
// ============================================================================

#[test]
fn feed_is_newest_first_with_author_profile() {
    let (_tmp, pool) = create_test_db();
    let alice = insert_user(&pool, "alice@example.com", "Alice", "pw");

    let conn = pool.get().unwrap();
    conn.execute(
        "INSERT INTO posts (id, user_id, body, created_at, updated_at)
         VALUES ('p1', ?1, 'older', '2025-01-01T00:00:00+00:00', '2025-01-01T00:00:00+00:00')",
        params![alice],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO posts (id, user_id, body, created_at, updated_at)
         VALUES ('p2', ?1, 'newer', '2025-02-01T00:00:00+00:00', '2025-02-01T00:00:00+00:00')",
        params![alice],
    )
    .unwrap();

    let posts = query_posts(&conn, None, None).unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].text, "newer");
    assert_eq!(posts[1].text, "older");
    assert_eq!(posts[0].user_name, "Alice");
    assert!(!posts[0].liked);
}

#[test]
fn user_filter_only_returns_their_posts() {
    let (_tmp, pool) = create_test_db();
    let alice = insert_user(&pool, "alice@example.com", "Alice", "pw");
    let bob = insert_user(&pool, "bob@example.com", "Bob", "pw");
    insert_post(&pool, &alice, "from alice");
    insert_post(&pool, &bob, "from bob");

    let conn = pool.get().unwrap();
    let posts = query_posts(&conn, None, Some(&alice)).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].text, "from alice");
}

#[test]
fn likes_surface_as_user_ids_and_liked_flag() {
    let (_tmp, pool) = create_test_db();
    let alice = insert_user(&pool, "alice@example.com", "Alice", "pw");
    let bob = insert_user(&pool, "bob@example.com", "Bob", "pw");
    let post_id = insert_post(&pool, &alice, "hello");

    let conn = pool.get().unwrap();
    conn.execute(
        "INSERT INTO likes (id, post_id, user_id) VALUES ('l1', ?1, ?2)",
        params![post_id, bob],
    )
    .unwrap();

    let seen_by_bob = load_post(&conn, &post_id, Some(&bob)).unwrap();
    assert_eq!(seen_by_bob.likes, vec![bob.clone()]);
    assert!(seen_by_bob.liked);

    let seen_by_alice = load_post(&conn, &post_id, Some(&alice)).unwrap();
    assert!(!seen_by_alice.liked);

    let seen_anonymously = load_post(&conn, &post_id, None).unwrap();
    assert!(!seen_anonymously.liked);
}

#[test]
fn comments_are_embedded_in_send_order_with_profiles() {
    let (_tmp, pool) = create_test_db();
    let alice = insert_user(&pool, "alice@example.com", "Alice", "pw");
    let bob = insert_user(&pool, "bob@example.com", "Bob", "pw");
    let post_id = insert_post(&pool, &alice, "hello");

    let conn = pool.get().unwrap();
    conn.execute(
        "INSERT INTO comments (id, post_id, user_id, body, created_at)
         VALUES ('c1', ?1, ?2, 'first', '2025-01-01T00:00:00+00:00')",
        params![post_id, bob],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO comments (id, post_id, user_id, body, created_at)
         VALUES ('c2', ?1, ?2, 'second', '2025-01-02T00:00:00+00:00')",
        params![post_id, alice],
    )
    .unwrap();

    let post = load_post(&conn, &post_id, None).unwrap();
    assert_eq!(post.comments.len(), 2);
    assert_eq!(post.comments[0].text, "first");
    assert_eq!(post.comments[0].user_name, "Bob");
    assert_eq!(post.comments[1].text, "second");
    assert_eq!(post.comments[1].user_name, "Alice");
}

#[test]
fn load_post_unknown_id_is_not_found() {
    let (_tmp, pool) = create_test_db();
    let conn = pool.get().unwrap();
    assert!(load_post(&conn, "no-such-post", None).is_err());
}
