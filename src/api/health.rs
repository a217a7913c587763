use std::sync::Arc;

use axum::response::Json;
use serde_json::{json, Value};

use crate::protocol::Dialect;
use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
#[must_use]
pub fn health_handler(state: &Arc<AppState>) -> Json<Value> {
    let config = &state.config;
    let dialects: Vec<&str> = Dialect::ALL.iter().map(|dialect| dialect.as_str()).collect();
    Json(json!({
        "status": "streamgate is running",
        "version": env!("CARGO_PKG_VERSION"),
        "dialects": dialects,
        "config": {
            "base_path": config.server.base_path,
            "http_use_env_proxy": config.server.http_use_env_proxy,
            "upstream_proxy": config.upstream.proxy.is_some(),
            "log_level": config.features.log_level,
        }
    }))
}
