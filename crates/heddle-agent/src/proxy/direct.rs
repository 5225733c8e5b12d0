// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::proxy::{Config, Proxy, ProxyType, Result};
use async_trait::async_trait;
use heddle_ice::IceTransport;
use heddle_wg::DEFAULT_KEEPALIVE;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

/// No userspace copy loop: the remote's own WireGuard socket is
/// reachable, so it is registered directly as the peer endpoint.
pub struct DirectProxy {
	config: Config,
	remote_wg_port: u16,
	closed: AtomicBool,
}

impl DirectProxy {
	pub fn new(config: Config, remote_wg_port: u16) -> Self {
		Self {
			config,
			remote_wg_port,
			closed: AtomicBool::new(false),
		}
	}
}

#[async_trait]
impl Proxy for DirectProxy {
	#[instrument(skip(self, remote), fields(peer = %self.config.remote_key))]
	async fn start(&self, remote: Arc<dyn IceTransport>) -> Result<()> {
		let endpoint = SocketAddr::new(remote.remote_addr().ip(), self.remote_wg_port);

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

		debug!(%endpoint, "direct wireguard connection registered");
		Ok(())
	}

	async fn close(&self) -> Result<()> {
		if self.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		self.config
			.wg_iface
			.remove_peer(&self.config.remote_key)
			.await?;
		Ok(())
	}

	fn proxy_type(&self) -> ProxyType {
		ProxyType::Direct
	}
}
