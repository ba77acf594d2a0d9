use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            name        TEXT NOT NULL,
            password    TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'I am new!',
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS posts (
            id          TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            content     TEXT NOT NULL,
            image_url   TEXT,
            creator_id  TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_posts_created
            ON posts(created_at);

        -- Owner-side post references. The posts.creator_id column already
        -- encodes the relation; this table is the user's ordered collection,
        -- maintained in the same transaction as the post row.
        CREATE TABLE IF NOT EXISTS user_posts (
            user_id     TEXT NOT NULL REFERENCES users(id),
            post_id     TEXT NOT NULL REFERENCES posts(id),
            UNIQUE(user_id, post_id)
        );

        CREATE INDEX IF NOT EXISTS idx_user_posts_user
            ON user_posts(user_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
