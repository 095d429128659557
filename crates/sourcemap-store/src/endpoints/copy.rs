use axum::extract;
use axum::http::StatusCode;
use sourcemap_store_service::service::SourceMapStore;

use super::ResponseError;
use super::params::CopyParams;

/// Stores the source map of one code push release for another release of the same app.
pub async fn copy_code_push_sourcemap(
    extract::State(store): extract::State<SourceMapStore>,
    extract::Path(params): extract::Path<CopyParams>,
) -> Result<StatusCode, ResponseError> {
    let (from, to) = params.into_descriptors();
    store.copy_code_push(&from, to).await?;
    Ok(StatusCode::CREATED)
}
