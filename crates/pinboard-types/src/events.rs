use serde::{Deserialize, Serialize};

use crate::models::PostView;

/// Events fanned out to connected real-time clients after a successful
/// post mutation. Delivery is advisory, at-most-once, no replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum FeedEvent {
    /// A post was created
    Create { post: PostView },

    /// A post was edited by its creator
    Update { post: PostView },

    /// A post was deleted; only the id survives
    Delete {
        #[serde(rename = "postId")]
        post_id: String,
    },
}
