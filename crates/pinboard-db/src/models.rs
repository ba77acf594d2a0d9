/// Database row types — these map directly to SQLite rows.
/// Distinct from the pinboard-types API views to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub password: String,
    pub status: String,
    pub created_at: String,
}

pub struct PostRow {
    pub id: String,
    pub title: String,
    pub content: String,
    pub image_url: Option<String>,
    pub creator_id: String,
    pub created_at: String,
    pub updated_at: String,
}
