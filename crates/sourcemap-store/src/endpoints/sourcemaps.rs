use axum::extract;
use axum::http::StatusCode;
use serde::de::DeserializeOwned;
use sourcemap_store_service::service::SourceMapStore;
use sourcemap_store_service::types::Descriptor;

use super::ResponseError;
use super::multipart::field_reader;

/// Returns the source map stored for the descriptor in the path.
pub async fn fetch_sourcemap<P, D>(
    extract::State(store): extract::State<SourceMapStore>,
    extract::Path(params): extract::Path<P>,
) -> Result<Vec<u8>, ResponseError>
where
    P: DeserializeOwned + Into<D> + Send + 'static,
    D: Descriptor,
{
    let descriptor: D = params.into();
    Ok(store.fetch(&descriptor).await?)
}

/// Stores the source map sent in the `sourcemap` field of a multipart body.
///
/// All other fields are ignored.
pub async fn upload_sourcemap<P, D>(
    extract::State(store): extract::State<SourceMapStore>,
    extract::Path(params): extract::Path<P>,
    mut multipart: extract::Multipart,
) -> Result<StatusCode, ResponseError>
where
    P: DeserializeOwned + Into<D> + Send + 'static,
    D: Descriptor,
{
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("sourcemap") {
            let mut reader = field_reader(field);
            store.upload::<D, _>(params.into(), &mut reader).await?;
            return Ok(StatusCode::CREATED);
        }
    }

    Err((StatusCode::BAD_REQUEST, "missing sourcemap field").into())
}
