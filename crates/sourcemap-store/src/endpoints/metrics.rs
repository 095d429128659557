use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::MatchedPath;
use axum::http::{Method, Request, Response, StatusCode};
use sourcemap_store_service::metric;
use tower_layer::Layer;
use tower_service::Service as TowerService;

/// Records the count, duration and status code of every request, tagged with its route.
#[derive(Clone)]
pub struct MetricsLayer;

#[derive(Clone)]
pub struct MetricsService<S> {
    service: S,
}

pub struct MetricsFuture<F> {
    endpoint: String,
    method: Method,
    start: Instant,
    future: F,
}

/// Turns a route like `/sourcemaps/codepush/copy/:app/...` into `sourcemaps.codepush.copy`.
///
/// Path parameters are dropped so that the tag has a bounded number of values.
fn endpoint_tag(route: Option<&str>) -> String {
    let Some(route) = route else {
        return "unknown".into();
    };

    let tag = route
        .split('/')
        .filter(|segment| !segment.is_empty() && !segment.starts_with(':'))
        .collect::<Vec<_>>()
        .join(".");

    if tag.is_empty() { "root".into() } else { tag }
}

impl<F, B, E> Future for MetricsFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: only `future` is structurally pinned, it is never moved out of `this`.
        // https://doc.rust-lang.org/std/pin/index.html#pinning-is-structural-for-field
        let this = unsafe { self.get_unchecked_mut() };
        let future = unsafe { Pin::new_unchecked(&mut this.future) };

        let poll = future.poll(cx);
        if let Poll::Ready(ref res) = poll {
            let endpoint = this.endpoint.as_str();
            let method = this.method.as_str();
            metric!(
                timer("requests.duration") = this.start.elapsed(),
                "endpoint" => endpoint,
                "method" => method,
            );

            let status = res
                .as_ref()
                .map(|r| r.status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            metric!(
                counter("responses.status_code") += 1,
                "endpoint" => endpoint,
                "method" => method,
                "status" => status.as_str(),
            );
        }
        poll
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, service: S) -> Self::Service {
        Self::Service { service }
    }
}

impl<S, ReqBody, ResBody> TowerService<Request<ReqBody>> for MetricsService<S>
where
    S: TowerService<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = MetricsFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let endpoint = endpoint_tag(
            request
                .extensions()
                .get::<MatchedPath>()
                .map(MatchedPath::as_str),
        );
        let method = request.method().clone();
        metric!(
            counter("requests") += 1,
            "endpoint" => endpoint.as_str(),
            "method" => method.as_str(),
        );

        Self::Future {
            endpoint,
            method,
            start: Instant::now(),
            future: self.service.call(request),
        }
    }
}
