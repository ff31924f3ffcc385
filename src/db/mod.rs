use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

use crate::state::DbPool;

pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial",
        include_str!("../../migrations/001_initial.sql"),
    ),
    ("002_chats", include_str!("../../migrations/002_chats.sql")),
];

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path);
    let pool = Pool::builder().max_size(8).build(manager)?;

    // Configure SQLite for performance
    let conn = pool.get()?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    // Create migrations tracking table
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool() -> DbPool {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).unwrap();
        let conn = pool.get().unwrap();
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )
        .unwrap();
        pool
    }

    fn insert_user(pool: &DbPool, id: &str, email: &str) {
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, display_name) VALUES (?1, ?2, 'x', 'Test')",
            params![id, email],
        )
        .unwrap();
    }

    #[test]
    fn create_pool_creates_db_file() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("sub/dir/test.db");
        let pool = create_pool(&db_path).unwrap();
        assert!(db_path.exists());
        // Verify we can get a connection
        let conn = pool.get().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn migrations_run_successfully() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();

        let conn = pool.get().unwrap();

        // Verify schema_version tracks both migrations
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);

        // Verify key tables exist
        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };
        assert!(tables.contains(&"users".to_string()));
        assert!(tables.contains(&"sessions".to_string()));
        assert!(tables.contains(&"posts".to_string()));
        assert!(tables.contains(&"likes".to_string()));
        assert!(tables.contains(&"comments".to_string()));
        assert!(tables.contains(&"chats".to_string()));
        assert!(tables.contains(&"chat_participants".to_string()));
        assert!(tables.contains(&"chat_messages".to_string()));
    }

    #[test]
    fn migrations_are_idempotent() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();
        run_migrations(&pool).unwrap(); // Should not error on second run

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn email_must_be_unique() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();

        insert_user(&pool, "u1", "alice@example.com");

        let conn = pool.get().unwrap();
        let result = conn.execute(
            "INSERT INTO users (id, email, password_hash, display_name) VALUES ('u2', 'alice@example.com', 'x', 'Other')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn foreign_keys_enforced() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();

        let conn = pool.get().unwrap();
        // Inserting a post with a non-existent user_id should fail
        let result = conn.execute(
            "INSERT INTO posts (id, user_id, body) VALUES (?1, ?2, ?3)",
            params!["post-1", "nonexistent-user", "hello"],
        );
        assert!(result.is_err());
    }

    #[test]
    fn one_like_per_user_per_post() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();
        insert_user(&pool, "u1", "alice@example.com");

        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO posts (id, user_id, body) VALUES ('p1', 'u1', 'hi')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO likes (id, post_id, user_id) VALUES ('l1', 'p1', 'u1')",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO likes (id, post_id, user_id) VALUES ('l2', 'p1', 'u1')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn deleting_post_cascades_to_likes_and_comments() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();
        insert_user(&pool, "u1", "alice@example.com");

        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO posts (id, user_id, body) VALUES ('p1', 'u1', 'hi')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO likes (id, post_id, user_id) VALUES ('l1', 'p1', 'u1')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO comments (id, post_id, user_id, body) VALUES ('c1', 'p1', 'u1', 'nice')",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM posts WHERE id = 'p1'", []).unwrap();

        let likes: i64 = conn
            .query_row("SELECT COUNT(*) FROM likes", [], |r| r.get(0))
            .unwrap();
        let comments: i64 = conn
            .query_row("SELECT COUNT(*) FROM comments", [], |r| r.get(0))
            .unwrap();
        assert_eq!(likes, 0);
        assert_eq!(comments, 0);
    }
}
