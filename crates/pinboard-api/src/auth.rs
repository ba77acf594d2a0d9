use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use pinboard_db::models::UserRow;
use pinboard_types::error::{ApiError, FieldError};
use pinboard_types::models::{AuthData, Claims, UserView};

use crate::middleware::AuthContext;
use crate::now_iso;
use crate::state::AppState;

/// Status given to freshly signed-up accounts.
const DEFAULT_STATUS: &str = "I am new!";

/// Create an account. Validation failures are aggregated; a taken e-mail
/// address is reported the same way as any other invalid input.
pub async fn signup(
    state: &AppState,
    email: &str,
    name: &str,
    password: &str,
) -> Result<UserView, ApiError> {
    let email = email.trim().to_lowercase();
    let name = name.trim().to_string();
    let password = password.to_string();

    let mut errors = Vec::new();
    if !looks_like_email(&email) {
        errors.push(FieldError::new("E-mail is invalid"));
    }
    if password.trim().chars().count() < 5 {
        errors.push(FieldError::new("Password too short"));
    }
    if !errors.is_empty() {
        return Err(ApiError::InvalidInput(errors));
    }

    // Hashing is CPU-bound, so it runs on the blocking pool with the lookup
    let db = state.clone();
    let user = tokio::task::spawn_blocking(move || -> Result<Option<UserRow>, ApiError> {
        if db.db.find_user_by_email(&email)?.is_some() {
            return Ok(None);
        }

        let user = UserRow {
            id: Uuid::new_v4().to_string(),
            email,
            name,
            password: hash_password(&password)?,
            status: DEFAULT_STATUS.into(),
            created_at: now_iso(),
        };
        db.db.create_user(&user)?;
        Ok(Some(user))
    })
    .await
    .map_err(ApiError::internal)??
    .ok_or_else(|| ApiError::InvalidInput(vec![FieldError::new("User already exists")]))?;

    Ok(UserView {
        id: user.id,
        email: user.email,
        name: user.name,
        status: user.status,
        posts: vec![],
    })
}

/// Exchange credentials for a signed bearer token. Unknown address and
/// wrong password are indistinguishable to the caller.
pub async fn login(state: &AppState, email: &str, password: &str) -> Result<AuthData, ApiError> {
    let email = email.trim().to_lowercase();
    let password = password.to_string();

    let db = state.clone();
    let user = tokio::task::spawn_blocking(move || -> Result<Option<UserRow>, ApiError> {
        let Some(user) = db.db.find_user_by_email(&email)? else {
            return Ok(None);
        };
        if !verify_password(&user.password, &password)? {
            return Ok(None);
        }
        Ok(Some(user))
    })
    .await
    .map_err(ApiError::internal)??
    .ok_or(ApiError::Unauthenticated)?;

    let user_id: Uuid = user.id.parse().map_err(ApiError::internal)?;
    let token = create_token(&state.jwt_secret, user_id, &user.email).map_err(ApiError::internal)?;

    Ok(AuthData {
        token,
        user_id: user.id,
    })
}

/// The caller's own account, with its post references.
pub async fn get_user(state: &AppState, ctx: &AuthContext) -> Result<UserView, ApiError> {
    let claims = ctx.require()?;

    let db = state.clone();
    let user_id = claims.sub.to_string();
    let found = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<(UserRow, Vec<String>)>> {
        let Some(user) = db.db.find_user_by_id(&user_id)? else {
            return Ok(None);
        };
        let posts = db.db.user_post_ids(&user_id)?;
        Ok(Some((user, posts)))
    })
    .await
    .map_err(ApiError::internal)??;

    let (user, posts) = found.ok_or_else(|| ApiError::not_found("No user found"))?;
    Ok(UserView {
        id: user.id,
        email: user.email,
        name: user.name,
        status: user.status,
        posts,
    })
}

/// Replace the caller's free-text status.
pub async fn update_status(
    state: &AppState,
    ctx: &AuthContext,
    status: &str,
) -> Result<UserView, ApiError> {
    let claims = ctx.require()?;

    let db = state.clone();
    let user_id = claims.sub.to_string();
    let status = status.to_string();
    let changed = tokio::task::spawn_blocking(move || db.db.update_user_status(&user_id, &status))
        .await
        .map_err(ApiError::internal)??;

    if changed == 0 {
        return Err(ApiError::not_found("No user found"));
    }
    get_user(state, ctx).await
}

pub fn create_token(secret: &str, user_id: Uuid, email: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: (Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(ApiError::internal)
}

fn verify_password(hash: &str, password: &str) -> Result<bool, ApiError> {
    let parsed = PasswordHash::new(hash).map_err(ApiError::internal)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}
