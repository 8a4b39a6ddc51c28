// src/http.rs
//! Stats and browse HTTP endpoint. Optional; bound only when
//! `processor.http_bind` is configured.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::Bytes;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::metrics::Metrics;
use crate::pipeline::LatestSnapshots;

#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<Metrics>,
    pub latest: LatestSnapshots,
}

pub fn build_api(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/symbols", get(symbols_handler))
        .route("/book", get(book_handler))
        .with_state(state)
}

pub async fn serve(bind: SocketAddr, state: AppState) -> anyhow::Result<()> {
    info!("http: listening on {bind}");
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, build_api(state)).await?;
    Ok(())
}

async fn metrics_handler(State(st): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, st.metrics.prometheus_text())
}

async fn symbols_handler(State(st): State<AppState>) -> impl IntoResponse {
    #[derive(Serialize)]
    struct Sym {
        symbol: String,
        messages: u64,
    }

    let mut out: Vec<Sym> = st
        .metrics
        .symbol_counts()
        .into_iter()
        .map(|(symbol, messages)| Sym { symbol, messages })
        .collect();
    out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    (StatusCode::OK, axum::Json(out))
}

#[derive(serde::Deserialize)]
struct BookQuery {
    symbol: String,
}

async fn book_handler(
    State(st): State<AppState>,
    Query(q): Query<BookQuery>,
) -> impl IntoResponse {
    match st.latest.get(&q.symbol) {
        Some(payload) => (StatusCode::OK, payload.clone()),
        None => (StatusCode::NOT_FOUND, Bytes::from_static(b"{}")),
    }
}
