use axum::routing::get;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_root() -> &'static str {
    "LineRelay is running!"
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health() -> &'static str {
    "OK"
}
