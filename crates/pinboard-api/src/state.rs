use std::sync::Arc;

use pinboard_db::Database;
use pinboard_gateway::broadcaster::Broadcaster;

use crate::images::ImageStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub images: ImageStore,
    pub broadcaster: Broadcaster,
    pub jwt_secret: String,
    /// Posts per page for the feed listing. Deliberately small by default.
    pub per_page: u32,
}
