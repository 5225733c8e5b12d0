// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Top-level client loop.
//!
//! Dials the signaling service, runs the engine, and starts over with
//! exponential backoff when the engine cancels itself (usually because
//! signaling went away). Backoff resets on every attempt that got as
//! far as a started engine. Root shutdown exits without a new attempt.

use crate::backoff::ExponentialBackOff;
use crate::config::{Config, ConfigError};
use crate::engine::{Engine, EngineConfig, EngineError};
use crate::netmap::{HostConfig, NetworkMap, OverlayConfig, RelayConfig, SyncSnapshot};
use crate::routemanager::CommandRouteTable;
use crate::status::{LocalPeerState, StatusRegistry};
use heddle_ice::PunchFactory;
use heddle_signal::{SignalClient, SignalError, TcpSignalClient};
use heddle_wg::{CommandBackend, KeyError, PresharedKey, WgKeyPair};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum ClientError {
	#[error("config error: {0}")]
	Config(#[from] ConfigError),

	#[error("key error: {0}")]
	Key(#[from] KeyError),

	#[error("signaling error: {0}")]
	Signal(#[from] SignalError),

	#[error("engine error: {0}")]
	Engine(#[from] EngineError),

	#[error("giving up after retries were exhausted")]
	RetriesExhausted,
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Run the client until root shutdown or the backoff budget runs out.
#[instrument(skip_all)]
pub async fn run_client(
	config: Config,
	status: Arc<StatusRegistry>,
	mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
	let keypair = WgKeyPair::from_base64(&config.private_key)?;
	let mut backoff = ExponentialBackOff::new();

	loop {
		if *shutdown_rx.borrow() {
			return Ok(());
		}

		match run_engine_once(&config, &keypair, &status, &mut shutdown_rx).await {
			Ok(()) => {
				// this iteration reached a started engine
				backoff.reset();
			}
			Err(e) => {
				warn!(error = %e, "engine attempt failed");
			}
		}

		if *shutdown_rx.borrow() {
			return Ok(());
		}

		let Some(delay) = backoff.next_backoff() else {
			error!("retry budget exhausted, giving up");
			return Err(ClientError::RetriesExhausted);
		};
		debug!(?delay, "waiting before next engine attempt");
		tokio::select! {
			_ = tokio::time::sleep(delay) => {}
			_ = shutdown_rx.changed() => {}
		}
	}
}

/// One engine lifetime: connect signaling, start, apply the persisted
/// snapshot, block until the engine context ends, tear down.
async fn run_engine_once(
	config: &Config,
	keypair: &WgKeyPair,
	status: &Arc<StatusRegistry>,
	shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<()> {
	let local_key = keypair.public_key().to_base64();
	let overlay_address = config
		.peer_config
		.as_ref()
		.map(|p| p.address.clone())
		.filter(|a| !a.is_empty())
		.unwrap_or_else(|| config.wg_ip.clone());

	status.update_local_peer_state(LocalPeerState {
		ip: overlay_address.clone(),
		pub_key: local_key.clone(),
		kernel_interface: cfg!(target_os = "linux"),
		fqdn: config
			.peer_config
			.as_ref()
			.map(|p| p.fqdn.clone())
			.unwrap_or_default(),
	});

	let tls = config.signal_service.protocol == "https"
		|| config.signal_service.uri.starts_with("https://");
	let signal: Arc<dyn SignalClient> = Arc::new(
		TcpSignalClient::connect(&config.signal_service.uri, &local_key, tls).await?,
	);
	status.mark_signal_connected(true);

	let pre_shared_key = if config.pre_shared_key.is_empty() {
		None
	} else {
		Some(PresharedKey::from_base64(&config.pre_shared_key)?)
	};

	let engine_config = EngineConfig {
		wg_iface_name: config.wg_iface.clone(),
		wg_addr: overlay_address.clone(),
		wg_port: config.wg_port,
		wg_private_key: keypair.private_key().clone(),
		pre_shared_key,
		iface_black_list: Vec::new(),
		disable_ipv6_discovery: false,
		udp_mux_port: 0,
		udp_mux_srflx_port: 0,
		nat_external_ips: config.nat_external_ips.clone(),
	};

	let engine = Engine::new(
		Arc::clone(&signal),
		engine_config,
		Arc::clone(status),
		Arc::new(PunchFactory),
		Arc::new(CommandBackend::new()),
		Arc::new(CommandRouteTable::new()),
	);

	let teardown = |engine: Arc<Engine>, signal: Arc<dyn SignalClient>| async move {
		engine.stop().await;
		if let Err(e) = signal.close().await {
			warn!(error = %e, "failed closing signal client");
		}
	};

	if let Err(e) = engine.start().await {
		status.mark_signal_connected(false);
		let _ = signal.close().await;
		return Err(e.into());
	}

	info!(address = %overlay_address, "engine started");

	if let Err(e) = engine.init_conf(&initial_snapshot(config)).await {
		warn!(error = %e, "failed applying initial snapshot");
	} else {
		status.mark_management_connected(true);
	}

	tokio::select! {
		_ = engine.wait() => {
			debug!("engine context ended");
		}
		_ = shutdown_rx.changed() => {
			debug!("root shutdown requested");
		}
	}

	teardown(engine, signal).await;
	status.mark_management_connected(false);
	status.mark_signal_connected(false);
	status.clean_local_peer_state();

	Ok(())
}

/// The persisted config doubles as the first snapshot: peer list,
/// STUN/TURN servers and local overlay address, serial zero.
pub fn initial_snapshot(config: &Config) -> SyncSnapshot {
	SyncSnapshot {
		overlay: Some(OverlayConfig {
			stuns: config
				.stuns
				.iter()
				.map(|uri| HostConfig {
					uri: uri.clone(),
					protocol: "udp".to_string(),
				})
				.collect(),
			turns: config
				.turns
				.iter()
				.map(|turn| RelayConfig {
					host: HostConfig {
						uri: turn.uri.clone(),
						protocol: "udp".to_string(),
					},
					user: turn.user.clone(),
					password: turn.password.clone(),
				})
				.collect(),
			signal: None,
		}),
		network_map: Some(NetworkMap {
			serial: 0,
			peer_config: config.peer_config.clone(),
			remote_peers: config.peers.clone(),
			remote_peers_is_empty: false,
			routes: Vec::new(),
			dns_config: None,
		}),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::TurnConfig;

	#[test]
	fn initial_snapshot_carries_config() {
		let mut config = Config::default();
		config.stuns = vec!["stun:stun.example.com:3478".to_string()];
		config.turns = vec![TurnConfig {
			uri: "turn:relay.example.com:3478".to_string(),
			user: "u".to_string(),
			password: "p".to_string(),
		}];
		config.peers = vec![crate::netmap::RemotePeerConfig {
			wg_pub_key: "KEY".to_string(),
			allowed_ips: vec!["100.64.0.2/32".to_string()],
			fqdn: String::new(),
		}];

		let snapshot = initial_snapshot(&config);
		let overlay = snapshot.overlay.unwrap();
		assert_eq!(overlay.stuns.len(), 1);
		assert_eq!(overlay.turns[0].user, "u");

		let map = snapshot.network_map.unwrap();
		assert_eq!(map.serial, 0);
		assert_eq!(map.remote_peers.len(), 1);
		assert!(!map.remote_peers_is_empty);
	}

	#[test]
	fn bad_private_key_is_rejected() {
		let config = Config {
			private_key: "not-base64!!".to_string(),
			..Default::default()
		};
		let status = Arc::new(StatusRegistry::new());
		let (_tx, rx) = watch::channel(false);
		let result = futures::executor::block_on(run_client(config, status, rx));
		assert!(matches!(result, Err(ClientError::Key(_))));
	}
}
