//! HTTP/JSON surface over the engine. Every route names its branch explicitly
//! or addresses an entity by id; there is no ambient branch context.

mod error;
mod extract;
mod handlers;
mod sse;

pub use error::{ApiError, ApiResult, status_for};
pub use extract::{ApiJson, ApiPath, ApiQuery};

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::observability;

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/branches/{branch_id}/availability", get(handlers::availability))
        .route(
            "/branches/{branch_id}/staff/{staff_id}/free",
            get(handlers::free_windows),
        )
        .route(
            "/branches/{branch_id}/appointments",
            post(handlers::create_appointment).get(handlers::list_appointments),
        )
        .route("/branches/{branch_id}/walk-ins", post(handlers::walk_in))
        .route("/branches/{branch_id}/events", get(sse::events))
        .route(
            "/appointments/{id}",
            get(handlers::get_appointment)
                .patch(handlers::reschedule)
                .delete(handlers::cancel_appointment),
        )
        .route("/appointments/{id}/status", put(handlers::set_status))
        .route("/staff/{id}", put(handlers::put_staff).delete(handlers::delete_staff))
        .route(
            "/services/{id}",
            put(handlers::put_service).delete(handlers::delete_service),
        )
        .layer(middleware::from_fn(count_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn count_requests(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let response = next.run(req).await;
    metrics::counter!(
        observability::HTTP_REQUESTS_TOTAL,
        "method" => method,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}
