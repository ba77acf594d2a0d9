use async_graphql::SimpleObject;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared between the HTTP middleware and the WebSocket gateway
/// upgrade. Canonical definition lives here to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub exp: usize,
}

// -- API views --

/// Result of a successful login.
#[derive(Debug, Clone, SimpleObject)]
pub struct AuthData {
    pub token: String,
    pub user_id: String,
}

/// A user as exposed over the API. Identifiers are stringified and the
/// password hash never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub email: String,
    pub name: String,
    pub status: String,
    /// Ids of the posts this user authored, in creation order.
    pub posts: Vec<String>,
}

/// A post with its creator resolved. Timestamps are ISO-8601 strings.
#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: String,
    pub title: String,
    pub content: String,
    pub image_url: Option<String>,
    pub creator: UserView,
    pub created_at: String,
    pub updated_at: String,
}
