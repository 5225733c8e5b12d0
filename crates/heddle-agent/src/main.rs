// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use heddle_agent::config::{self, DEFAULT_CONFIG_PATH};
use heddle_agent::status::StatusRegistry;
use heddle_agent::supervisor;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let config_path =
		std::env::var("HEDDLE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

	let config = match config::get_config(&config_path, "") {
		Ok(config) => config,
		Err(e) => {
			error!(path = %config_path, error = %e, "cannot load configuration");
			std::process::exit(1);
		}
	};

	let status = Arc::new(StatusRegistry::new());
	let (shutdown_tx, shutdown_rx) = watch::channel(false);

	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!("shutdown signal received");
			let _ = shutdown_tx.send(true);
		}
	});

	match supervisor::run_client(config, status, shutdown_rx).await {
		Ok(()) => info!("client stopped"),
		Err(e) => {
			error!(error = %e, "client exited with unrecoverable error");
			std::process::exit(1);
		}
	}
}
