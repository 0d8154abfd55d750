//! HTTP status page: `GET /` renders the swarm snapshot as an HTML table.

use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::Router;

use crate::transport::Shared;

pub fn router(shared: Shared) -> Router {
    Router::new()
        .route("/", get(handle_status))
        .with_state(shared)
}

async fn handle_status(State(shared): State<Shared>) -> Html<String> {
    let snapshot = shared.core.lock().await.status();
    Html(snapshot.render_html())
}

pub async fn serve(shared: Shared, host: &str, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!(%host, port, "status page listening");
    axum::serve(listener, router(shared)).await?;
    Ok(())
}
