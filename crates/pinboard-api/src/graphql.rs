use async_graphql::{
    Context, EmptySubscription, ErrorExtensions, InputObject, Object, OneofObject,
    Result as GraphQLResult, Schema, SimpleObject,
};
use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    Extension,
    extract::State,
    response::{Html, IntoResponse},
};

use pinboard_types::error::ApiError;
use pinboard_types::models::{AuthData, PostView, UserView};

use crate::middleware::AuthContext;
use crate::state::AppState;
use crate::{auth, feed};

pub type AppSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

/// Build the schema with the application state attached. The per-request
/// auth context is injected by the HTTP handler.
pub fn build_schema(state: AppState) -> AppSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(state)
        .finish()
}

/// POST /graphql
pub async fn graphql_handler(
    State(schema): State<AppSchema>,
    Extension(auth): Extension<AuthContext>,
    req: GraphQLRequest,
) -> GraphQLResponse {
    schema.execute(req.into_inner().data(auth)).await.into()
}

/// GET /graphql — interactive explorer
pub async fn graphiql() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

/// Map a domain error onto a GraphQL error carrying `status` and field
/// `data` in its extensions — the same shape the REST surface renders.
fn graphql_error(err: ApiError) -> async_graphql::Error {
    let status = err.http_status();
    let data = err
        .field_errors()
        .and_then(|fields| async_graphql::Value::from_json(serde_json::json!(fields)).ok());

    async_graphql::Error::new(err.to_string()).extend_with(|_, ext| {
        ext.set("status", status as i32);
        if let Some(data) = data {
            ext.set("data", data);
        }
    })
}

fn app_state<'a>(ctx: &'a Context<'_>) -> GraphQLResult<&'a AppState> {
    ctx.data::<AppState>()
        .map_err(|_| async_graphql::Error::new("Application state not available"))
}

fn auth_context<'a>(ctx: &'a Context<'_>) -> GraphQLResult<&'a AuthContext> {
    ctx.data::<AuthContext>()
        .map_err(|_| async_graphql::Error::new("Auth context not available"))
}

// ── Inputs and payloads ─────────────────────────────────────────────────

#[derive(InputObject)]
pub struct UserInput {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(InputObject)]
pub struct PostInput {
    pub title: String,
    pub content: String,
    pub image_url: String,
}

#[derive(InputObject)]
pub struct UpdatePostInput {
    pub title: String,
    pub content: String,
    /// Omit to keep the stored image.
    pub image: Option<ImagePatchInput>,
}

/// Explicit image patch: either drop the stored image or point the post at
/// a newly uploaded path.
#[derive(OneofObject)]
pub enum ImagePatchInput {
    Remove(bool),
    Path(String),
}

fn image_patch(input: Option<ImagePatchInput>) -> feed::ImagePatch {
    match input {
        None => feed::ImagePatch::Keep,
        Some(ImagePatchInput::Remove(true)) => feed::ImagePatch::Remove,
        Some(ImagePatchInput::Remove(false)) => feed::ImagePatch::Keep,
        Some(ImagePatchInput::Path(path)) => feed::ImagePatch::Replace(path),
    }
}

#[derive(SimpleObject)]
pub struct PostPage {
    pub posts: Vec<PostView>,
    pub total_posts: i64,
}

// ── Roots ───────────────────────────────────────────────────────────────

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Exchange credentials for a bearer token.
    async fn login(
        &self,
        ctx: &Context<'_>,
        email: String,
        password: String,
    ) -> GraphQLResult<AuthData> {
        let state = app_state(ctx)?;
        auth::login(state, &email, &password).await.map_err(graphql_error)
    }

    /// One page of the feed, newest first.
    async fn posts(&self, ctx: &Context<'_>, page: Option<u32>) -> GraphQLResult<PostPage> {
        let state = app_state(ctx)?;
        let auth = auth_context(ctx)?;
        let (posts, total_posts) = feed::list_posts(state, auth, page)
            .await
            .map_err(graphql_error)?;
        Ok(PostPage { posts, total_posts })
    }

    async fn post(&self, ctx: &Context<'_>, id: String) -> GraphQLResult<PostView> {
        let state = app_state(ctx)?;
        let auth = auth_context(ctx)?;
        feed::get_post(state, auth, &id).await.map_err(graphql_error)
    }

    /// The caller's own account.
    async fn user(&self, ctx: &Context<'_>) -> GraphQLResult<UserView> {
        let state = app_state(ctx)?;
        let auth = auth_context(ctx)?;
        auth::get_user(state, auth).await.map_err(graphql_error)
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn create_user(&self, ctx: &Context<'_>, user_input: UserInput) -> GraphQLResult<UserView> {
        let state = app_state(ctx)?;
        auth::signup(state, &user_input.email, &user_input.name, &user_input.password)
            .await
            .map_err(graphql_error)
    }

    async fn create_post(&self, ctx: &Context<'_>, post_input: PostInput) -> GraphQLResult<PostView> {
        let state = app_state(ctx)?;
        let auth = auth_context(ctx)?;
        feed::create_post(
            state,
            auth,
            feed::NewPost {
                title: post_input.title,
                content: post_input.content,
                image_url: post_input.image_url,
            },
        )
        .await
        .map_err(graphql_error)
    }

    async fn update_post(
        &self,
        ctx: &Context<'_>,
        id: String,
        post_input: UpdatePostInput,
    ) -> GraphQLResult<PostView> {
        let state = app_state(ctx)?;
        let auth = auth_context(ctx)?;
        feed::update_post(
            state,
            auth,
            &id,
            feed::UpdatePost {
                title: post_input.title,
                content: post_input.content,
                image: image_patch(post_input.image),
            },
        )
        .await
        .map_err(graphql_error)
    }

    async fn delete_post(&self, ctx: &Context<'_>, id: String) -> GraphQLResult<bool> {
        let state = app_state(ctx)?;
        let auth = auth_context(ctx)?;
        feed::delete_post(state, auth, &id).await.map_err(graphql_error)?;
        Ok(true)
    }

    async fn update_status(&self, ctx: &Context<'_>, status: String) -> GraphQLResult<UserView> {
        let state = app_state(ctx)?;
        let auth = auth_context(ctx)?;
        auth::update_status(state, auth, &status).await.map_err(graphql_error)
    }
}
