//! Web front end using axum.
//!
//! Endpoints:
//! - GET  /         - upload form
//! - POST /compare  - multipart upload (`reference`, `gallery`), renders the verdict

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::Html;
use axum::routing::{get, post};
use axum::Router;
use photomatch_core::ImageAsset;

use crate::engine::EngineHandle;
use crate::error::WebError;
use crate::page;

/// Form field carrying the known person's photo.
pub const REFERENCE_FIELD: &str = "reference";
/// Form field carrying the photo to search.
pub const GALLERY_FIELD: &str = "gallery";
/// Request body cap for `/compare`; phone photos run well past axum's 2 MB default.
pub const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/compare", post(compare))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

async fn index() -> Html<String> {
    Html(page::upload_form())
}

async fn compare(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Html<String>, WebError> {
    let mut reference = None;
    let mut gallery = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| WebError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name != REFERENCE_FIELD && name != GALLERY_FIELD {
            tracing::debug!(field = %name, "ignoring unknown form field");
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| WebError::BadRequest(e.to_string()))?;

        // Browsers submit an empty part when no file was chosen.
        if file_name.is_empty() && bytes.is_empty() {
            continue;
        }

        let asset = ImageAsset::new(file_name, content_type.as_deref(), bytes.to_vec())?;
        if name == REFERENCE_FIELD {
            reference = Some(asset);
        } else {
            gallery = Some(asset);
        }
    }

    let report = state.engine.compare(reference, gallery).await?;
    Ok(Html(page::result_page(&report)))
}
