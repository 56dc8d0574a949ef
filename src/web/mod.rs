// src/web/mod.rs
//! Read-only HTTP view of the engine snapshot.

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::info;

use crate::core::position::Position;
use crate::types::{BotStatus, EngineSnapshot, Signal};

type Snapshots = watch::Receiver<EngineSnapshot>;

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub symbol: String,
    pub timeframe: String,
    pub dry_run: bool,
    pub status: BotStatus,
    pub revision: u64,
    pub current_price: Option<Decimal>,
    pub has_position: bool,
    pub position: Position,
    /// Unrealised return of the open position in percent.
    pub pnl: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub realized_pnl: Decimal,
    pub closed_trades: u64,
    pub last_signal: Option<Signal>,
    pub iteration: u64,
    pub updated_at: DateTime<Utc>,
}

impl From<&EngineSnapshot> for StatusView {
    fn from(s: &EngineSnapshot) -> Self {
        Self {
            symbol: s.symbol.clone(),
            timeframe: s.timeframe.clone(),
            dry_run: s.dry_run,
            status: s.status.clone(),
            revision: s.revision,
            current_price: s.last_price,
            has_position: s.position.is_open(),
            position: s.position.clone(),
            pnl: s.unrealized_pnl_pct,
            unrealized_pnl: s.unrealized_pnl,
            realized_pnl: s.realized_pnl,
            closed_trades: s.closed_trades,
            last_signal: s.last_signal,
            iteration: s.iteration,
            updated_at: s.updated_at,
        }
    }
}

pub fn router(snapshots: Snapshots) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/events", get(events))
        .route("/health", get(health))
        .with_state(snapshots)
}

async fn status(State(snapshots): State<Snapshots>) -> Json<StatusView> {
    let view = StatusView::from(&*snapshots.borrow());
    Json(view)
}

async fn events(State(snapshots): State<Snapshots>) -> impl IntoResponse {
    let events = snapshots.borrow().recent_events.clone();
    Json(events)
}

async fn health(State(snapshots): State<Snapshots>) -> impl IntoResponse {
    let status = snapshots.borrow().status.clone();
    let (code, label) = if status == BotStatus::Halted {
        (StatusCode::SERVICE_UNAVAILABLE, "halted")
    } else {
        (StatusCode::OK, "ok")
    };
    (code, Json(json!({ "status": label, "engine": status })))
}

/// Serves until `shutdown` flips to true.
pub async fn serve(
    addr: &str,
    snapshots: Snapshots,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind dashboard to {}", addr))?;
    info!("Dashboard listening on http://{}", addr);

    axum::serve(listener, router(snapshots))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .context("dashboard server failed")
}
