use axum::{routing::get, Json, Router};
use serde::Serialize;

/// The one ambient HTTP surface this core exposes: a liveness probe. Chat,
/// cowork, and other channel-specific routes are a concern of whatever
/// front-end process embeds this core, not of the core daemon itself.
#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

async fn healthz() -> Json<Health> {
    Json(Health { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

pub fn router() -> Router {
    Router::new().route("/healthz", get(healthz))
}

pub async fn serve(port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!("healthz listening on http://127.0.0.1:{port}/healthz");
    axum::serve(listener, router()).await?;
    Ok(())
}
