use crate::handlers::{changes, connection, dataset, logs, workers};
use crate::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/entries", get(dataset::get_entries))
        .route("/sort", put(dataset::set_sort))
        .route("/sort/{column}", post(dataset::sort_by))
        .route("/refresh", post(dataset::refresh))
        .route("/export/{format}", get(dataset::export_entries))
        .route("/logs", get(logs::get_logs).delete(logs::clear_logs))
        .route("/status", get(connection::get_status))
        .route("/connection/connect", post(connection::connect))
        .route("/connection/teardown", post(connection::teardown))
        .route("/workers", get(workers::list_workers))
        .route("/workers/{worker}/{action}", post(workers::control_worker))
        .route("/changes", get(changes::ws_handler));

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
