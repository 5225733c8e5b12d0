// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::debug_http::{self, PingRecord, DEBUG_MARKER, REPLY_MARKER};
use crate::proxy::{Config, Proxy, ProxyType, Result};
use async_trait::async_trait;
use chrono::Utc;
use heddle_ice::IceTransport;
use heddle_wg::DEFAULT_KEEPALIVE;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, instrument, trace};

const COPY_BUFFER: usize = 1500;

/// Userspace relay between the ICE transport and the local WireGuard
/// socket. WireGuard's endpoint for the remote peer becomes the relay's
/// own loopback socket; two copy loops shovel datagrams in both
/// directions until close.
pub struct RelayedProxy {
	config: Config,
	local: std::sync::Mutex<Option<Arc<UdpSocket>>>,
	cancel_tx: watch::Sender<bool>,
	closed: AtomicBool,
}

impl RelayedProxy {
	pub fn new(config: Config) -> Self {
		let (cancel_tx, _) = watch::channel(false);
		Self {
			config,
			local: std::sync::Mutex::new(None),
			cancel_tx,
			closed: AtomicBool::new(false),
		}
	}

	fn spawn_to_remote(
		&self,
		local: Arc<UdpSocket>,
		remote: Arc<dyn IceTransport>,
		mut cancel: watch::Receiver<bool>,
	) {
		let peer = self.config.remote_key;
		tokio::spawn(async move {
			let mut buf = vec![0u8; COPY_BUFFER];
			loop {
				tokio::select! {
					_ = cancel.changed() => {
						if *cancel.borrow() {
							debug!(peer = %peer, "stopped proxying to remote peer");
							return;
						}
					}

					result = local.recv(&mut buf) => {
						let n = match result {
							Ok(n) => n,
							Err(e) => {
								trace!(error = %e, "local read failed, retrying");
								continue;
							}
						};
						if remote.send(&buf[..n]).await.is_err() {
							continue;
						}
					}
				}
			}
		});
	}

	fn spawn_to_local(
		&self,
		local: Arc<UdpSocket>,
		remote: Arc<dyn IceTransport>,
		mut cancel: watch::Receiver<bool>,
	) {
		let peer = self.config.remote_key;
		tokio::spawn(async move {
			let mut buf = vec![0u8; COPY_BUFFER];
			loop {
				tokio::select! {
					_ = cancel.changed() => {
						if *cancel.borrow() {
							debug!(peer = %peer, "stopped proxying from remote peer");
							return;
						}
					}

					result = remote.recv(&mut buf) => {
						let n = match result {
							Ok(n) => n,
							Err(e) => {
								trace!(error = %e, "remote read failed, retrying");
								continue;
							}
						};

						if let Ok(text) = std::str::from_utf8(&buf[..n]) {
							if text.contains(DEBUG_MARKER) {
								handle_ping(text, remote.as_ref()).await;
								continue;
							}
						}

						if local.send(&buf[..n]).await.is_err() {
							continue;
						}
					}
				}
			}
		});
	}
}

/// Answer inbound ping records and log completed round trips.
async fn handle_ping(text: &str, remote: &dyn IceTransport) {
	let Ok(mut record) = serde_json::from_str::<PingRecord>(text) else {
		return;
	};

	if !text.contains(REPLY_MARKER) {
		record.message = format!("{REPLY_MARKER} of message=[{}]", record.message);
		record.dest_reached_time = Utc::now().to_rfc3339();
		record.relay_exit_time = Utc::now().to_rfc3339();
		if let Ok(reply) = serde_json::to_vec(&record) {
			let _ = remote.send(&reply).await;
		}
	} else {
		record.reply_reached_time = Utc::now().to_rfc3339();
		debug!(record = ?record, "ping round trip completed");
	}
}

#[async_trait]
impl Proxy for RelayedProxy {
	#[instrument(skip(self, remote), fields(peer = %self.config.remote_key))]
	async fn start(&self, remote: Arc<dyn IceTransport>) -> Result<()> {
		let local = UdpSocket::bind("127.0.0.1:0").await?;
		local.connect(&self.config.wg_listen_addr).await?;
		let endpoint = local.local_addr()?;
		let local = Arc::new(local);

		// the relay socket becomes WireGuard's endpoint for this peer
		self.config
			.wg_iface
			.update_peer(
				&self.config.remote_key,
				&self.config.allowed_ips,
				Some(DEFAULT_KEEPALIVE),
				Some(endpoint),
				self.config.preshared_key.as_ref(),
			)
			.await?;

		*self.local.lock().unwrap() = Some(Arc::clone(&local));

		self.spawn_to_remote(Arc::clone(&local), Arc::clone(&remote), self.cancel_tx.subscribe());
		self.spawn_to_local(local, Arc::clone(&remote), self.cancel_tx.subscribe());

		debug_http::spawn(remote, self.cancel_tx.subscribe());

		debug!(%endpoint, "relayed proxy started");
		Ok(())
	}

	async fn close(&self) -> Result<()> {
		if self.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		let _ = self.cancel_tx.send(true);
		self.local.lock().unwrap().take();
		self.config
			.wg_iface
			.remove_peer(&self.config.remote_key)
			.await?;
		Ok(())
	}

	fn proxy_type(&self) -> ProxyType {
		ProxyType::Relayed
	}
}
