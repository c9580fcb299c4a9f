//! Minimal API server wired through the control plane.
//!
//! ```text
//! cargo run --example api_server
//! curl -i localhost:4000/v1/healthcheck
//! curl -i -X POST localhost:4000/v1/users
//! curl -s localhost:4000/v1/metrics
//! ```
//!
//! Settings are read from the JSON file named by `GREENLIGHT_CONFIG` when set.

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use greenlight::{BackgroundTasks, ControlConfig, ControlPlane};
use serde_json::json;
use std::time::Duration;
use tracing::info;

fn load_config() -> Result<ControlConfig, Box<dyn std::error::Error>> {
    match std::env::var("GREENLIGHT_CONFIG") {
        Ok(path) => Ok(ControlConfig::from_json(&std::fs::read_to_string(path)?)?),
        Err(_) => Ok(ControlConfig::default()),
    }
}

async fn register_user(tasks: BackgroundTasks) -> (StatusCode, Json<serde_json::Value>) {
    let submitted = tasks.submit("welcome_email", async {
        // Stand-in for an SMTP round trip.
        tokio::time::sleep(Duration::from_secs(2)).await;
        info!("welcome email sent");
        Ok::<_, std::io::Error>(())
    });
    if let Err(err) = submitted {
        tracing::error!(error = %err, "could not schedule welcome email");
    }
    (StatusCode::ACCEPTED, Json(json!({ "user": { "activated": false } })))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(true).init();

    let plane = ControlPlane::new(load_config()?)?;
    let tasks = plane.tasks().clone();
    let app = Router::new()
        .route(
            "/v1/healthcheck",
            get(|| async {
                Json(json!({ "status": "available", "version": env!("CARGO_PKG_VERSION") }))
            }),
        )
        .route("/v1/users", post(move || register_user(tasks.clone())));

    let listener = tokio::net::TcpListener::bind("0.0.0.0:4000").await?;
    plane.serve(listener, app).await?;
    Ok(())
}
