use uuid::Uuid;

use pinboard_db::models::{PostRow, UserRow};
use pinboard_types::error::{ApiError, FieldError};
use pinboard_types::events::FeedEvent;
use pinboard_types::models::{PostView, UserView};

use crate::middleware::AuthContext;
use crate::now_iso;
use crate::state::AppState;

/// Input for creating a post. The image path comes from a prior upload.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub image_url: String,
}

/// Input for editing a post.
#[derive(Debug, Clone)]
pub struct UpdatePost {
    pub title: String,
    pub content: String,
    pub image: ImagePatch,
}

/// What to do with a post's stored image on update. An explicit three-state
/// input: callers that don't touch the image send `Keep`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePatch {
    Keep,
    Remove,
    Replace(String),
}

/// Create a post for the authenticated caller. The post row and the
/// creator-side reference are committed together; the broadcast goes out
/// only after the commit.
pub async fn create_post(
    state: &AppState,
    ctx: &AuthContext,
    input: NewPost,
) -> Result<PostView, ApiError> {
    let claims = ctx.require()?;
    validate_post(&input.title, &input.content)?;

    let now = now_iso();
    let row = PostRow {
        id: Uuid::new_v4().to_string(),
        title: input.title,
        content: input.content,
        image_url: Some(input.image_url),
        creator_id: claims.sub.to_string(),
        created_at: now.clone(),
        updated_at: now,
    };

    let db = state.clone();
    let created = tokio::task::spawn_blocking(
        move || -> anyhow::Result<Option<(PostRow, UserRow, Vec<String>)>> {
            let Some(creator) = db.db.find_user_by_id(&row.creator_id)? else {
                return Ok(None);
            };
            db.db.create_post_for_user(&row)?;
            let creator_posts = db.db.user_post_ids(&creator.id)?;
            Ok(Some((row, creator, creator_posts)))
        },
    )
    .await
    .map_err(ApiError::internal)??;

    // An identity whose account no longer resolves is not authenticated
    let (post, creator, creator_posts) = created.ok_or(ApiError::Unauthenticated)?;

    let view = post_view(post, creator, creator_posts);
    state.broadcaster.publish(FeedEvent::Create { post: view.clone() });
    Ok(view)
}

/// A single post with its creator resolved.
pub async fn get_post(state: &AppState, ctx: &AuthContext, id: &str) -> Result<PostView, ApiError> {
    ctx.require()?;

    let (post, creator, creator_posts) = load_post(state, id).await?;
    Ok(post_view(post, creator, creator_posts))
}

/// One page of the feed, newest first, plus the total post count.
pub async fn list_posts(
    state: &AppState,
    ctx: &AuthContext,
    page: Option<u32>,
) -> Result<(Vec<PostView>, i64), ApiError> {
    ctx.require()?;

    let page = page.unwrap_or(1).max(1);
    let per_page = state.per_page;

    let db = state.clone();
    let (rows, total) = tokio::task::spawn_blocking(
        move || -> anyhow::Result<(Vec<(PostRow, UserRow, Vec<String>)>, i64)> {
            let (rows, total) = db.db.find_posts(page, per_page)?;
            let mut out = Vec::with_capacity(rows.len());
            for (post, creator) in rows {
                let creator_posts = db.db.user_post_ids(&creator.id)?;
                out.push((post, creator, creator_posts));
            }
            Ok((out, total))
        },
    )
    .await
    .map_err(ApiError::internal)??;

    let posts = rows
        .into_iter()
        .map(|(post, creator, creator_posts)| post_view(post, creator, creator_posts))
        .collect();
    Ok((posts, total))
}

/// Edit a post. Only the creator may do this; the stored image follows the
/// explicit patch, and a replaced or removed image is discarded without
/// ever blocking the mutation.
pub async fn update_post(
    state: &AppState,
    ctx: &AuthContext,
    id: &str,
    input: UpdatePost,
) -> Result<PostView, ApiError> {
    let claims = ctx.require()?;

    let (post, creator, creator_posts) = load_post(state, id).await?;
    if creator.id != claims.sub.to_string() {
        return Err(ApiError::NotAuthorized);
    }
    validate_post(&input.title, &input.content)?;

    let new_image = match input.image {
        ImagePatch::Keep => post.image_url.clone(),
        ImagePatch::Remove => {
            if let Some(old) = &post.image_url {
                state.images.discard(old);
            }
            None
        }
        ImagePatch::Replace(path) => {
            if let Some(old) = &post.image_url {
                if *old != path {
                    state.images.discard(old);
                }
            }
            Some(path)
        }
    };

    let db = state.clone();
    let updated_at = now_iso();
    let save = {
        let id = post.id.clone();
        let title = input.title.clone();
        let content = input.content.clone();
        let image = new_image.clone();
        let updated_at = updated_at.clone();
        tokio::task::spawn_blocking(move || {
            db.db.save_post(&id, &title, &content, image.as_deref(), &updated_at)
        })
    };
    let changed = save.await.map_err(ApiError::internal)??;
    if changed == 0 {
        // Deleted between the read and the write
        return Err(ApiError::not_found("No post found"));
    }

    let view = post_view(
        PostRow {
            title: input.title,
            content: input.content,
            image_url: new_image,
            updated_at,
            ..post
        },
        creator,
        creator_posts,
    );
    state.broadcaster.publish(FeedEvent::Update { post: view.clone() });
    Ok(view)
}

/// Delete a post. Only the creator may do this. The stored image is
/// discarded best-effort, the post row and the creator-side reference go
/// in one transaction, and the broadcast follows the commit.
pub async fn delete_post(state: &AppState, ctx: &AuthContext, id: &str) -> Result<(), ApiError> {
    let claims = ctx.require()?;

    let (post, creator, _) = load_post(state, id).await?;
    if creator.id != claims.sub.to_string() {
        return Err(ApiError::NotAuthorized);
    }

    if let Some(image) = &post.image_url {
        state.images.discard(image);
    }

    let db = state.clone();
    let post_id = post.id.clone();
    let creator_id = creator.id.clone();
    let deleted = tokio::task::spawn_blocking(move || db.db.delete_post_for_user(&post_id, &creator_id))
        .await
        .map_err(ApiError::internal)??;
    if deleted == 0 {
        return Err(ApiError::not_found("No post found"));
    }

    state.broadcaster.publish(FeedEvent::Delete { post_id: post.id });
    Ok(())
}

async fn load_post(
    state: &AppState,
    id: &str,
) -> Result<(PostRow, UserRow, Vec<String>), ApiError> {
    let db = state.clone();
    let id = id.to_string();
    let found = tokio::task::spawn_blocking(
        move || -> anyhow::Result<Option<(PostRow, UserRow, Vec<String>)>> {
            let Some((post, creator)) = db.db.find_post_by_id(&id)? else {
                return Ok(None);
            };
            let creator_posts = db.db.user_post_ids(&creator.id)?;
            Ok(Some((post, creator, creator_posts)))
        },
    )
    .await
    .map_err(ApiError::internal)??;

    found.ok_or_else(|| ApiError::not_found("No post found"))
}

/// Both fields must be at least 5 characters once trimmed; all failures are
/// reported together.
fn validate_post(title: &str, content: &str) -> Result<(), ApiError> {
    let mut errors = Vec::new();
    if title.trim().chars().count() < 5 {
        errors.push(FieldError::new("Title is invalid"));
    }
    if content.trim().chars().count() < 5 {
        errors.push(FieldError::new("Content is invalid"));
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::InvalidInput(errors))
    }
}

fn post_view(post: PostRow, creator: UserRow, creator_posts: Vec<String>) -> PostView {
    PostView {
        id: post.id,
        title: post.title,
        content: post.content,
        image_url: post.image_url,
        creator: UserView {
            id: creator.id,
            email: creator.email,
            name: creator.name,
            status: creator.status,
            posts: creator_posts,
        },
        created_at: post.created_at,
        updated_at: post.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::ImageStore;
    use crate::state::AppStateInner;
    use pinboard_db::Database;
    use pinboard_gateway::broadcaster::Broadcaster;
    use pinboard_types::models::Claims;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast::Receiver;

    async fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let images = ImageStore::new(dir.path().to_path_buf()).await.unwrap();
        let state = Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            images,
            broadcaster: Broadcaster::new(),
            jwt_secret: "test-secret".into(),
            per_page: 2,
        });
        (state, dir)
    }

    fn seed_user(state: &AppState, email: &str) -> AuthContext {
        let id = Uuid::new_v4();
        state
            .db
            .create_user(&pinboard_db::models::UserRow {
                id: id.to_string(),
                email: email.into(),
                name: email.split('@').next().unwrap().into(),
                password: "$argon2$hash".into(),
                status: "I am new!".into(),
                created_at: now_iso(),
            })
            .unwrap();
        AuthContext::authenticated(Claims {
            sub: id,
            email: email.into(),
            exp: 0,
        })
    }

    fn new_post(title: &str, image_url: &str) -> NewPost {
        NewPost {
            title: title.into(),
            content: "Long enough content".into(),
            image_url: image_url.into(),
        }
    }

    fn keep_update(title: &str) -> UpdatePost {
        UpdatePost {
            title: title.into(),
            content: "Long enough content".into(),
            image: ImagePatch::Keep,
        }
    }

    async fn stored_image(state: &AppState, name: &str) -> String {
        state
            .images
            .store(name, "image/png", b"png")
            .await
            .unwrap()
            .unwrap()
    }

    async fn wait_gone(path: &Path) {
        for _ in 0..50 {
            if !path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("file still present: {}", path.display());
    }

    fn assert_no_event(rx: &mut Receiver<FeedEvent>) {
        assert!(rx.try_recv().is_err(), "unexpected broadcast event");
    }

    #[tokio::test]
    async fn create_requires_authentication_and_mutates_nothing() {
        let (state, _dir) = test_state().await;
        let mut events = state.broadcaster.subscribe();

        let err = create_post(&state, &AuthContext::anonymous(), new_post("Valid title", "/images/x.png"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 401);

        let (_, total) = state.db.find_posts(1, 10).unwrap();
        assert_eq!(total, 0);
        assert_no_event(&mut events);
    }

    #[tokio::test]
    async fn create_aggregates_short_fields() {
        let (state, _dir) = test_state().await;
        let ctx = seed_user(&state, "ann@example.com");

        let err = create_post(
            &state,
            &ctx,
            NewPost {
                title: "Hey".into(),
                content: "  Hi  ".into(),
                image_url: "/images/x.png".into(),
            },
        )
        .await
        .unwrap_err();

        match err {
            ApiError::InvalidInput(fields) => {
                let messages: Vec<_> = fields.iter().map(|f| f.message.as_str()).collect();
                assert_eq!(messages, vec!["Title is invalid", "Content is invalid"]);
            }
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn five_character_fields_are_accepted() {
        let (state, _dir) = test_state().await;
        let ctx = seed_user(&state, "ann@example.com");

        let post = create_post(
            &state,
            &ctx,
            NewPost {
                title: "12345".into(),
                content: "abcde".into(),
                image_url: "/images/x.png".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(post.title, "12345");
    }

    #[tokio::test]
    async fn create_rejects_unresolvable_creator() {
        let (state, _dir) = test_state().await;
        let ghost = AuthContext::authenticated(Claims {
            sub: Uuid::new_v4(),
            email: "ghost@example.com".into(),
            exp: 0,
        });

        let err = create_post(&state, &ghost, new_post("Valid title", "/images/x.png"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 401);
    }

    #[tokio::test]
    async fn create_links_creator_and_broadcasts_once() {
        let (state, _dir) = test_state().await;
        let ctx = seed_user(&state, "ann@example.com");
        let mut events = state.broadcaster.subscribe();

        let post = create_post(&state, &ctx, new_post("First post", "/images/x.png"))
            .await
            .unwrap();

        assert_eq!(post.creator.posts, vec![post.id.clone()]);
        let uid = ctx.claims.as_ref().unwrap().sub.to_string();
        assert_eq!(state.db.user_post_ids(&uid).unwrap(), vec![post.id.clone()]);

        match events.try_recv().unwrap() {
            FeedEvent::Create { post: event_post } => assert_eq!(event_post.id, post.id),
            other => panic!("expected create event, got {:?}", other),
        }
        assert_no_event(&mut events);
    }

    #[tokio::test]
    async fn listing_pages_newest_first() {
        let (state, _dir) = test_state().await;
        let ctx = seed_user(&state, "ann@example.com");
        for n in 1..=5 {
            create_post(&state, &ctx, new_post(&format!("Post number {n}"), "/images/x.png"))
                .await
                .unwrap();
        }

        let (page2, total) = list_posts(&state, &ctx, Some(2)).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(
            page2.iter().map(|p| p.title.as_str()).collect::<Vec<_>>(),
            vec!["Post number 3", "Post number 2"]
        );

        // Page defaults to 1
        let (page1, _) = list_posts(&state, &ctx, None).await.unwrap();
        assert_eq!(
            page1.iter().map(|p| p.title.as_str()).collect::<Vec<_>>(),
            vec!["Post number 5", "Post number 4"]
        );
    }

    #[tokio::test]
    async fn reads_require_authentication() {
        let (state, _dir) = test_state().await;
        let anon = AuthContext::anonymous();

        assert_eq!(list_posts(&state, &anon, None).await.unwrap_err().http_status(), 401);
        assert_eq!(get_post(&state, &anon, "any").await.unwrap_err().http_status(), 401);
    }

    #[tokio::test]
    async fn missing_post_is_404() {
        let (state, _dir) = test_state().await;
        let ctx = seed_user(&state, "ann@example.com");

        let err = get_post(&state, &ctx, &Uuid::new_v4().to_string()).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn only_the_creator_may_update() {
        let (state, _dir) = test_state().await;
        let ann = seed_user(&state, "ann@example.com");
        let bob = seed_user(&state, "bob@example.com");

        let post = create_post(&state, &ann, new_post("Original title", "/images/x.png"))
            .await
            .unwrap();
        let mut events = state.broadcaster.subscribe();

        let err = update_post(&state, &bob, &post.id, keep_update("Hijacked title"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 403);

        // Unchanged, and nothing announced
        let reloaded = get_post(&state, &ann, &post.id).await.unwrap();
        assert_eq!(reloaded.title, "Original title");
        assert_no_event(&mut events);
    }

    #[tokio::test]
    async fn update_replaces_image_and_discards_only_the_old_one() {
        let (state, _dir) = test_state().await;
        let ctx = seed_user(&state, "ann@example.com");

        let old_image = stored_image(&state, "old.png").await;
        let new_image = stored_image(&state, "new.png").await;
        let post = create_post(&state, &ctx, new_post("Original title", &old_image))
            .await
            .unwrap();

        let updated = update_post(
            &state,
            &ctx,
            &post.id,
            UpdatePost {
                title: "Edited title".into(),
                content: "Long enough content".into(),
                image: ImagePatch::Replace(new_image.clone()),
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.image_url.as_deref(), Some(new_image.as_str()));
        wait_gone(&state.images.disk_path(&old_image).unwrap()).await;
        assert!(state.images.disk_path(&new_image).unwrap().exists());
    }

    #[tokio::test]
    async fn update_with_keep_leaves_the_image_alone() {
        let (state, _dir) = test_state().await;
        let ctx = seed_user(&state, "ann@example.com");

        let image = stored_image(&state, "pic.png").await;
        let post = create_post(&state, &ctx, new_post("Original title", &image))
            .await
            .unwrap();

        let updated = update_post(&state, &ctx, &post.id, keep_update("Edited title"))
            .await
            .unwrap();
        assert_eq!(updated.image_url.as_deref(), Some(image.as_str()));
        assert_eq!(updated.title, "Edited title");

        // Give any stray cleanup a chance to run, then confirm the file survived
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.images.disk_path(&image).unwrap().exists());
    }

    #[tokio::test]
    async fn replacing_an_image_with_itself_removes_nothing() {
        let (state, _dir) = test_state().await;
        let ctx = seed_user(&state, "ann@example.com");

        let image = stored_image(&state, "pic.png").await;
        let post = create_post(&state, &ctx, new_post("Original title", &image))
            .await
            .unwrap();

        update_post(
            &state,
            &ctx,
            &post.id,
            UpdatePost {
                title: "Edited title".into(),
                content: "Long enough content".into(),
                image: ImagePatch::Replace(image.clone()),
            },
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.images.disk_path(&image).unwrap().exists());
    }

    #[tokio::test]
    async fn update_can_remove_the_image() {
        let (state, _dir) = test_state().await;
        let ctx = seed_user(&state, "ann@example.com");

        let image = stored_image(&state, "pic.png").await;
        let post = create_post(&state, &ctx, new_post("Original title", &image))
            .await
            .unwrap();

        let updated = update_post(
            &state,
            &ctx,
            &post.id,
            UpdatePost {
                title: "Edited title".into(),
                content: "Long enough content".into(),
                image: ImagePatch::Remove,
            },
        )
        .await
        .unwrap();

        assert!(updated.image_url.is_none());
        wait_gone(&state.images.disk_path(&image).unwrap()).await;
    }

    #[tokio::test]
    async fn update_broadcasts_after_the_write() {
        let (state, _dir) = test_state().await;
        let ctx = seed_user(&state, "ann@example.com");
        let post = create_post(&state, &ctx, new_post("Original title", "/images/x.png"))
            .await
            .unwrap();

        let mut events = state.broadcaster.subscribe();

        // A failing update announces nothing
        let err = update_post(&state, &ctx, &post.id, keep_update("Hey"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 422);
        assert_no_event(&mut events);

        update_post(&state, &ctx, &post.id, keep_update("Edited title"))
            .await
            .unwrap();
        match events.try_recv().unwrap() {
            FeedEvent::Update { post: event_post } => {
                assert_eq!(event_post.title, "Edited title")
            }
            other => panic!("expected update event, got {:?}", other),
        }
        assert_no_event(&mut events);
    }

    #[tokio::test]
    async fn delete_cleans_up_both_sides_and_the_image() {
        let (state, _dir) = test_state().await;
        let ctx = seed_user(&state, "ann@example.com");

        let image = stored_image(&state, "pic.png").await;
        let post = create_post(&state, &ctx, new_post("Doomed post!", &image))
            .await
            .unwrap();
        let mut events = state.broadcaster.subscribe();

        delete_post(&state, &ctx, &post.id).await.unwrap();

        let uid = ctx.claims.as_ref().unwrap().sub.to_string();
        assert!(state.db.user_post_ids(&uid).unwrap().is_empty());
        assert_eq!(get_post(&state, &ctx, &post.id).await.unwrap_err().http_status(), 404);
        wait_gone(&state.images.disk_path(&image).unwrap()).await;

        match events.try_recv().unwrap() {
            FeedEvent::Delete { post_id } => assert_eq!(post_id, post.id),
            other => panic!("expected delete event, got {:?}", other),
        }
        assert_no_event(&mut events);
    }

    #[tokio::test]
    async fn second_delete_is_404_not_403() {
        let (state, _dir) = test_state().await;
        let ctx = seed_user(&state, "ann@example.com");

        let post = create_post(&state, &ctx, new_post("Doomed post!", "/images/x.png"))
            .await
            .unwrap();
        delete_post(&state, &ctx, &post.id).await.unwrap();

        let err = delete_post(&state, &ctx, &post.id).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn only_the_creator_may_delete() {
        let (state, _dir) = test_state().await;
        let ann = seed_user(&state, "ann@example.com");
        let bob = seed_user(&state, "bob@example.com");

        let post = create_post(&state, &ann, new_post("Protected post", "/images/x.png"))
            .await
            .unwrap();

        let err = delete_post(&state, &bob, &post.id).await.unwrap_err();
        assert_eq!(err.http_status(), 403);
        assert!(get_post(&state, &ann, &post.id).await.is_ok());
    }
}
