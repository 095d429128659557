use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use sourcemap_store_service::metric;
use sourcemap_store_service::service::SourceMapStore;
use sourcemap_store_service::types::{CodePushDescriptor, ContainerDescriptor};
use tower::ServiceBuilder;

mod copy;
mod db;
mod error;
mod metrics;
mod multipart;
mod params;
mod sourcemaps;
mod symbolicate;

pub use error::ResponseError;
use metrics::MetricsLayer;

use copy::copy_code_push_sourcemap as copy_code_push;
use db::dump_database as db;
use params::{CodePushParams, ContainerParams};
use sourcemaps::{fetch_sourcemap as fetch, upload_sourcemap as upload};
use symbolicate::handle_symbolication_request as symbolicate;

pub async fn status() -> &'static str {
    metric!(counter("status") += 1);
    "ok"
}

pub fn create_app(store: SourceMapStore) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(MetricsLayer)
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024));

    Router::new()
        .route("/db", get(db))
        .route(
            "/symbolicate/container/:app/:platform/:version/:containerVersion",
            post(symbolicate::<ContainerParams, ContainerDescriptor>),
        )
        .route(
            "/symbolicate/codepush/:app/:platform/:version/:deploymentName/:label",
            post(symbolicate::<CodePushParams, CodePushDescriptor>),
        )
        .route(
            "/sourcemaps/container/:app/:platform/:version/:containerVersion",
            get(fetch::<ContainerParams, ContainerDescriptor>)
                .post(upload::<ContainerParams, ContainerDescriptor>),
        )
        .route(
            "/sourcemaps/codepush/:app/:platform/:version/:deploymentName/:label",
            get(fetch::<CodePushParams, CodePushDescriptor>)
                .post(upload::<CodePushParams, CodePushDescriptor>),
        )
        .route(
            "/sourcemaps/codepush/copy/:app/:platform/:version/:deploymentName/:label/:toVersion/:toDeploymentName/:toLabel",
            post(copy_code_push),
        )
        .with_state(store)
        .layer(layer)
        // the status check is last, as it will bypass all the middlewares
        .route("/status", get(status))
}
