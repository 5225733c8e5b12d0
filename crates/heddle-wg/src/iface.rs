// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{Result, WgError};
use crate::keys::{PresharedKey, WgPrivateKey, WgPublicKey};
use async_trait::async_trait;
use ipnet::IpNet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

pub const DEFAULT_WG_PORT: u16 = 51820;
pub const DEFAULT_MTU: u16 = 1280;
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(25);

/// Driver surface of the WireGuard data plane. The agent only configures
/// peers and allowed-IPs; packet processing stays below this trait.
///
/// `allowed_ips` on [`WgBackend::update_peer`] is the comma-joined CIDR
/// list exactly as it is carried in the peer's proxy configuration.
#[async_trait]
pub trait WgBackend: Send + Sync {
	async fn create(&self, name: &str, address: &IpNet, mtu: u16) -> Result<()>;

	async fn configure(&self, name: &str, private_key: &WgPrivateKey, listen_port: u16)
		-> Result<()>;

	async fn update_addr(&self, name: &str, address: &IpNet) -> Result<()>;

	#[allow(clippy::too_many_arguments)]
	async fn update_peer(
		&self,
		name: &str,
		peer: &WgPublicKey,
		allowed_ips: &str,
		keepalive: Option<Duration>,
		endpoint: Option<SocketAddr>,
		preshared_key: Option<&PresharedKey>,
	) -> Result<()>;

	async fn remove_peer(&self, name: &str, peer: &WgPublicKey) -> Result<()>;

	async fn add_allowed_ip(&self, name: &str, peer: &WgPublicKey, cidr: &IpNet) -> Result<()>;

	async fn remove_allowed_ip(&self, name: &str, peer: &WgPublicKey, cidr: &IpNet) -> Result<()>;

	async fn close(&self, name: &str) -> Result<()>;
}

/// Handle on one WireGuard interface. All mutations funnel through an
/// internal lock so a backend that is not thread-safe is still driven
/// sequentially.
pub struct WgIface {
	name: String,
	mtu: u16,
	address: Mutex<IpNet>,
	backend: Arc<dyn WgBackend>,
	op: Mutex<()>,
}

impl WgIface {
	pub fn new(name: &str, address: &str, mtu: u16, backend: Arc<dyn WgBackend>) -> Result<Self> {
		let address: IpNet = address.parse().map_err(|e| WgError::InvalidAddress {
			addr: address.to_string(),
			reason: format!("{e}"),
		})?;
		Ok(Self {
			name: name.to_string(),
			mtu,
			address: Mutex::new(address),
			backend,
			op: Mutex::new(()),
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn mtu(&self) -> u16 {
		self.mtu
	}

	pub async fn address(&self) -> IpNet {
		*self.address.lock().await
	}

	#[instrument(skip(self), fields(iface = %self.name))]
	pub async fn create(&self) -> Result<()> {
		let _guard = self.op.lock().await;
		let address = *self.address.lock().await;
		self.backend.create(&self.name, &address, self.mtu).await?;
		debug!("created interface");
		Ok(())
	}

	#[instrument(skip(self, private_key), fields(iface = %self.name, listen_port))]
	pub async fn configure(&self, private_key: &WgPrivateKey, listen_port: u16) -> Result<()> {
		let _guard = self.op.lock().await;
		self.backend
			.configure(&self.name, private_key, listen_port)
			.await
	}

	#[instrument(skip(self), fields(iface = %self.name, address))]
	pub async fn update_addr(&self, address: &str) -> Result<()> {
		let parsed: IpNet = address.parse().map_err(|e| WgError::InvalidAddress {
			addr: address.to_string(),
			reason: format!("{e}"),
		})?;
		let _guard = self.op.lock().await;
		self.backend.update_addr(&self.name, &parsed).await?;
		*self.address.lock().await = parsed;
		Ok(())
	}

	pub async fn update_peer(
		&self,
		peer: &WgPublicKey,
		allowed_ips: &str,
		keepalive: Option<Duration>,
		endpoint: Option<SocketAddr>,
		preshared_key: Option<&PresharedKey>,
	) -> Result<()> {
		let _guard = self.op.lock().await;
		self.backend
			.update_peer(&self.name, peer, allowed_ips, keepalive, endpoint, preshared_key)
			.await
	}

	pub async fn remove_peer(&self, peer: &WgPublicKey) -> Result<()> {
		let _guard = self.op.lock().await;
		self.backend.remove_peer(&self.name, peer).await
	}

	pub async fn add_allowed_ip(&self, peer: &WgPublicKey, cidr: &IpNet) -> Result<()> {
		let _guard = self.op.lock().await;
		self.backend.add_allowed_ip(&self.name, peer, cidr).await
	}

	pub async fn remove_allowed_ip(&self, peer: &WgPublicKey, cidr: &IpNet) -> Result<()> {
		let _guard = self.op.lock().await;
		self.backend.remove_allowed_ip(&self.name, peer, cidr).await
	}

	#[instrument(skip(self), fields(iface = %self.name))]
	pub async fn close(&self) -> Result<()> {
		let _guard = self.op.lock().await;
		self.backend.close(&self.name).await
	}
}

impl std::fmt::Debug for WgIface {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WgIface")
			.field("name", &self.name)
			.field("mtu", &self.mtu)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mem::MemoryBackend;

	#[tokio::test]
	async fn rejects_bad_address() {
		let backend = Arc::new(MemoryBackend::new());
		let result = WgIface::new("wt0", "not-an-address", DEFAULT_MTU, backend);
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn update_addr_tracks_current_address() {
		let backend = Arc::new(MemoryBackend::new());
		let iface = WgIface::new("wt0", "100.64.0.1/16", DEFAULT_MTU, backend).unwrap();
		iface.create().await.unwrap();

		iface.update_addr("100.64.0.9/16").await.unwrap();
		assert_eq!(iface.address().await.to_string(), "100.64.0.9/16");
	}
}
