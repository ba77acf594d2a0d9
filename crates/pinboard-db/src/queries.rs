use crate::Database;
use crate::models::{PostRow, UserRow};
use anyhow::Result;
use rusqlite::OptionalExtension;
use rusqlite::Row;

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, name, password, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    user.id,
                    user.email,
                    user.name,
                    user.password,
                    user.status,
                    user.created_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, email, name, password, status, created_at
                 FROM users WHERE email = ?1",
                [email],
                read_user,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn find_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, email, name, password, status, created_at
                 FROM users WHERE id = ?1",
                [id],
                read_user,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Returns the number of rows changed (0 when the user does not exist).
    pub fn update_user_status(&self, id: &str, status: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET status = ?2 WHERE id = ?1",
                rusqlite::params![id, status],
            )?;
            Ok(changed)
        })
    }

    /// The user's post references, in creation order.
    pub fn user_post_ids(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT post_id FROM user_posts WHERE user_id = ?1 ORDER BY rowid",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
    }

    // -- Posts --

    /// Insert a post and append it to the creator's reference collection.
    /// Both writes happen in one transaction so the link can never dangle.
    pub fn create_post_for_user(&self, post: &PostRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO posts (id, title, content, image_url, creator_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    post.id,
                    post.title,
                    post.content,
                    post.image_url,
                    post.creator_id,
                    post.created_at,
                    post.updated_at
                ],
            )?;
            tx.execute(
                "INSERT INTO user_posts (user_id, post_id) VALUES (?1, ?2)",
                rusqlite::params![post.creator_id, post.id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Load a post with its creator resolved.
    pub fn find_post_by_id(&self, id: &str) -> Result<Option<(PostRow, UserRow)>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{POST_WITH_CREATOR_SELECT} WHERE p.id = ?1"),
                [id],
                read_post_with_creator,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// One page of posts, newest first, plus the total post count.
    /// Pages are 1-indexed.
    pub fn find_posts(&self, page: u32, per_page: u32) -> Result<(Vec<(PostRow, UserRow)>, i64)> {
        let offset = (page.max(1) - 1) as i64 * per_page as i64;
        self.with_conn(|conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;

            let mut stmt = conn.prepare(&format!(
                "{POST_WITH_CREATOR_SELECT}
                 ORDER BY p.created_at DESC, p.rowid DESC
                 LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![per_page as i64, offset], read_post_with_creator)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok((rows, total))
        })
    }

    /// Returns the number of rows changed (0 when the post does not exist).
    pub fn save_post(
        &self,
        id: &str,
        title: &str,
        content: &str,
        image_url: Option<&str>,
        updated_at: &str,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE posts SET title = ?2, content = ?3, image_url = ?4, updated_at = ?5
                 WHERE id = ?1",
                rusqlite::params![id, title, content, image_url, updated_at],
            )?;
            Ok(changed)
        })
    }

    /// Delete a post and remove it from the creator's reference collection,
    /// in one transaction. Returns the number of post rows deleted.
    pub fn delete_post_for_user(&self, post_id: &str, user_id: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM user_posts WHERE user_id = ?1 AND post_id = ?2",
                rusqlite::params![user_id, post_id],
            )?;
            let deleted = tx.execute("DELETE FROM posts WHERE id = ?1", [post_id])?;
            tx.commit()?;
            Ok(deleted)
        })
    }
}

const POST_WITH_CREATOR_SELECT: &str = "
    SELECT p.id, p.title, p.content, p.image_url, p.creator_id, p.created_at, p.updated_at,
           u.id, u.email, u.name, u.password, u.status, u.created_at
    FROM posts p
    JOIN users u ON u.id = p.creator_id";

fn read_user(row: &Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        password: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn read_post_with_creator(row: &Row) -> rusqlite::Result<(PostRow, UserRow)> {
    let post = PostRow {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        image_url: row.get(3)?,
        creator_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    };
    let user = UserRow {
        id: row.get(7)?,
        email: row.get(8)?,
        name: row.get(9)?,
        password: row.get(10)?,
        status: row.get(11)?,
        created_at: row.get(12)?,
    };
    Ok((post, user))
}
