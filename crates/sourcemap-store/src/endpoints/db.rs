use axum::Json;
use axum::extract;
use sourcemap_store_service::service::SourceMapStore;
use sourcemap_store_service::types::Snapshot;

/// Returns all entries of the store.
pub async fn dump_database(
    extract::State(store): extract::State<SourceMapStore>,
) -> Json<Snapshot> {
    Json(store.snapshot())
}
