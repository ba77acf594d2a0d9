use std::path::{Path, PathBuf};

use axum::{
    Extension, Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use pinboard_types::error::{ApiError, FieldError};

use crate::middleware::AuthContext;
use crate::state::AppState;

/// MIME types accepted for post images. Anything else is dropped, not errored.
const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/jpg"];

/// 10 MB upload limit for images
const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// URL prefix under which the static file server exposes stored images.
const PUBLIC_PREFIX: &str = "/images";

/// On-disk store for post images.
///
/// Files live flat in one configured directory under collision-resistant
/// names; the public path handed back to clients is what gets persisted on
/// the post and later passed to `remove`.
#[derive(Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub async fn new(root: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&root).await?;
        info!("Image storage directory: {}", root.display());
        Ok(Self { root })
    }

    /// Store uploaded bytes under `<timestamp>_<original name>`.
    /// Returns `Ok(None)` when the declared MIME type is not an accepted
    /// image — the file is silently dropped rather than rejected.
    pub async fn store(
        &self,
        original_name: &str,
        mime: &str,
        bytes: &[u8],
    ) -> anyhow::Result<Option<String>> {
        if !ALLOWED_MIME.contains(&mime) {
            return Ok(None);
        }

        let name = format!(
            "{}_{}",
            Utc::now().format("%Y%m%d%H%M%S%f"),
            sanitize_file_name(original_name)
        );
        tokio::fs::write(self.root.join(&name), bytes).await?;

        Ok(Some(format!("{PUBLIC_PREFIX}/{name}")))
    }

    /// Best-effort delete of a previously stored image. Absent files and IO
    /// failures are logged and swallowed; cleanup never fails a caller.
    pub async fn remove(&self, image_path: &str) {
        let Some(file_name) = stored_file_name(image_path) else {
            warn!("Refusing to remove path outside the image store: {}", image_path);
            return;
        };

        let path = self.root.join(file_name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!("Removed image {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Image {} already gone", path.display());
            }
            Err(e) => warn!("Error while deleting image {}: {}", path.display(), e),
        }
    }

    /// Fire-and-forget `remove`, for mutation paths: the cleanup runs on its
    /// own task and shares no failure path with the caller.
    pub fn discard(&self, image_path: &str) {
        let store = self.clone();
        let path = image_path.to_string();
        tokio::spawn(async move {
            store.remove(&path).await;
        });
    }

    /// Absolute path a stored public path maps to. Test support.
    pub fn disk_path(&self, image_path: &str) -> Option<PathBuf> {
        stored_file_name(image_path).map(|name| self.root.join(name))
    }
}

fn sanitize_file_name(original: &str) -> String {
    let base = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Resolve a stored public path (`/images/<name>`) back to its bare file
/// name, rejecting anything that would escape the storage root.
fn stored_file_name(image_path: &str) -> Option<&str> {
    let trimmed = image_path.trim_start_matches('/');
    let name = trimmed.strip_prefix("images/").unwrap_or(trimmed);
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return None;
    }
    Some(name)
}

// ── REST upload endpoint ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    #[serde(rename = "filePath", skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// REST rendering of the error taxonomy: `{message, status, data?}` with
/// the HTTP status taken from the error's own code.
pub struct ApiFailure(pub ApiError);

impl From<ApiError> for ApiFailure {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: String,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a [FieldError]>,
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            message: self.0.to_string(),
            status: self.0.http_status(),
            data: self.0.field_errors(),
        };
        (status, Json(&body)).into_response()
    }
}

/// PUT /post-image — multipart form with an `image` file and an optional
/// `oldPath` field naming a previously stored image to discard once the
/// replacement is in place. Requires authentication.
pub async fn upload_image(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    mut multipart: Multipart,
) -> Result<Response, ApiFailure> {
    ctx.require()?;

    let mut stored: Option<String> = None;
    let mut old_path: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(invalid_upload)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime = field.content_type().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(invalid_upload)?;
                if bytes.len() > MAX_IMAGE_SIZE {
                    return Err(ApiError::InvalidInput(vec![FieldError::new("Image too large")]).into());
                }
                stored = state
                    .images
                    .store(&file_name, &mime, &bytes)
                    .await
                    .map_err(ApiError::from)?;
            }
            Some("oldPath") => {
                old_path = Some(field.text().await.map_err(invalid_upload)?);
            }
            _ => {}
        }
    }

    let Some(file_path) = stored else {
        return Ok((
            StatusCode::OK,
            Json(UploadResponse {
                message: "No file provided".into(),
                file_path: None,
            }),
        )
            .into_response());
    };

    if let Some(old) = old_path.filter(|p| !p.is_empty()) {
        state.images.discard(&old);
    }

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "File stored".into(),
            file_path: Some(file_path),
        }),
    )
        .into_response())
}

fn invalid_upload(err: axum::extract::multipart::MultipartError) -> ApiFailure {
    ApiError::InvalidInput(vec![FieldError::new(err.to_string())]).into()
}
