use axum::extract;
use serde::de::DeserializeOwned;
use sourcemap_store_service::service::SourceMapStore;
use sourcemap_store_service::types::Descriptor;

use super::ResponseError;

/// Symbolicates the stack trace in the request body.
///
/// The body is taken as plain text regardless of its content type. The response lists the
/// symbolicated frames, one per line.
pub async fn handle_symbolication_request<P, D>(
    extract::State(store): extract::State<SourceMapStore>,
    extract::Path(params): extract::Path<P>,
    stacktrace: String,
) -> Result<String, ResponseError>
where
    P: DeserializeOwned + Into<D> + Send + 'static,
    D: Descriptor,
{
    sentry::start_session();

    let descriptor: D = params.into();
    Ok(store.symbolicate(&descriptor, &stacktrace).await?)
}
