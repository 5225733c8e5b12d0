// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Debug ping endpoint.
//!
//! While a relayed proxy is up, `GET /ping/<msg>` on a random local port
//! writes a timestamped ping record into the remote transport; the far
//! side echoes it back with its own timestamps. Strictly a diagnostics
//! aid, started best-effort in the background.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use heddle_ice::IceTransport;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEBUG_PORT_MIN: u16 = 8010;
pub const DEBUG_PORT_MAX: u16 = 8050;

pub const DEBUG_MARKER: &str = "[DEBUG]";
pub const REPLY_MARKER: &str = "[REPLY]";

/// Ping record with per-hop timestamps, JSON on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PingRecord {
	#[serde(skip_serializing_if = "String::is_empty")]
	pub message: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub initiated_time: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub dest_reached_time: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub relay_exit_time: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub reply_reached_time: String,
}

#[derive(Clone)]
struct PingState {
	remote: Arc<dyn IceTransport>,
}

async fn send_ping(
	State(state): State<PingState>,
	Path(message): Path<String>,
) -> (StatusCode, Json<HashMap<&'static str, String>>) {
	let record = PingRecord {
		message: format!("{DEBUG_MARKER} msg={}", message.trim_start_matches('/')),
		initiated_time: Utc::now().to_rfc3339(),
		..Default::default()
	};

	let bytes = match serde_json::to_vec(&record) {
		Ok(bytes) => bytes,
		Err(e) => {
			warn!(error = %e, "cannot encode ping record");
			return (
				StatusCode::BAD_REQUEST,
				Json(HashMap::from([("resp", "failed to send ping message".to_string())])),
			);
		}
	};

	match state.remote.send(&bytes).await {
		Ok(_) => (
			StatusCode::OK,
			Json(HashMap::from([("resp", "message sent successfully".to_string())])),
		),
		Err(e) => {
			warn!(error = %e, "failed to send ping message");
			(
				StatusCode::BAD_REQUEST,
				Json(HashMap::from([("resp", "failed to send ping message".to_string())])),
			)
		}
	}
}

/// Start the endpoint in the background; proxy start must not block on
/// it. Bind failures are logged and swallowed.
pub fn spawn(remote: Arc<dyn IceTransport>, mut shutdown: watch::Receiver<bool>) {
	tokio::spawn(async move {
		let port = fastrand::u16(DEBUG_PORT_MIN..DEBUG_PORT_MAX);
		let listener = match TcpListener::bind(("0.0.0.0", port)).await {
			Ok(listener) => listener,
			Err(e) => {
				debug!(port, error = %e, "debug ping endpoint unavailable");
				return;
			}
		};

		info!(port, "debug ping endpoint listening");

		let app = Router::new()
			.route("/ping/{*message}", get(send_ping))
			.with_state(PingState { remote });

		let graceful = async move {
			let _ = shutdown.changed().await;
		};

		if let Err(e) = axum::serve(listener, app)
			.with_graceful_shutdown(graceful)
			.await
		{
			debug!(error = %e, "debug ping endpoint stopped with error");
		}
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ping_record_roundtrip() {
		let record = PingRecord {
			message: "[DEBUG] msg=hello".to_string(),
			initiated_time: "2025-01-01T00:00:00Z".to_string(),
			..Default::default()
		};
		let json = serde_json::to_string(&record).unwrap();
		assert!(json.contains("[DEBUG] msg=hello"));
		assert!(!json.contains("dest_reached_time"));

		let parsed: PingRecord = serde_json::from_str(&json).unwrap();
		assert_eq!(parsed.message, record.message);
	}
}
