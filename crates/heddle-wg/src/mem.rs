// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{Result, WgError};
use crate::iface::WgBackend;
use crate::keys::{PresharedKey, WgPrivateKey, WgPublicKey};
use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

/// In-memory [`WgBackend`] recording every call. Used by the test suites
/// and useful for dry runs on hosts without the kernel module.
#[derive(Default)]
pub struct MemoryBackend {
	state: Mutex<HashMap<String, MemIface>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemIface {
	pub address: Option<IpNet>,
	pub mtu: u16,
	pub listen_port: u16,
	pub configured: bool,
	pub peers: HashMap<String, MemPeer>,
}

#[derive(Debug, Clone, Default)]
pub struct MemPeer {
	pub allowed_ips: BTreeSet<String>,
	pub keepalive: Option<Duration>,
	pub endpoint: Option<SocketAddr>,
	pub has_preshared_key: bool,
}

impl MemoryBackend {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn iface(&self, name: &str) -> Option<MemIface> {
		self.state.lock().unwrap().get(name).cloned()
	}

	pub fn peer(&self, name: &str, peer: &WgPublicKey) -> Option<MemPeer> {
		self.state
			.lock()
			.unwrap()
			.get(name)
			.and_then(|i| i.peers.get(&peer.to_base64()).cloned())
	}

	pub fn peer_keys(&self, name: &str) -> Vec<String> {
		self.state
			.lock()
			.unwrap()
			.get(name)
			.map(|i| i.peers.keys().cloned().collect())
			.unwrap_or_default()
	}
}

#[async_trait]
impl WgBackend for MemoryBackend {
	async fn create(&self, name: &str, address: &IpNet, mtu: u16) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		let iface = state.entry(name.to_string()).or_default();
		iface.address = Some(*address);
		iface.mtu = mtu;
		Ok(())
	}

	async fn configure(
		&self,
		name: &str,
		_private_key: &WgPrivateKey,
		listen_port: u16,
	) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		let iface = state
			.get_mut(name)
			.ok_or_else(|| WgError::NoSuchInterface(name.to_string()))?;
		iface.configured = true;
		iface.listen_port = listen_port;
		Ok(())
	}

	async fn update_addr(&self, name: &str, address: &IpNet) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		let iface = state
			.get_mut(name)
			.ok_or_else(|| WgError::NoSuchInterface(name.to_string()))?;
		iface.address = Some(*address);
		Ok(())
	}

	async fn update_peer(
		&self,
		name: &str,
		peer: &WgPublicKey,
		allowed_ips: &str,
		keepalive: Option<Duration>,
		endpoint: Option<SocketAddr>,
		preshared_key: Option<&PresharedKey>,
	) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		let iface = state
			.get_mut(name)
			.ok_or_else(|| WgError::NoSuchInterface(name.to_string()))?;
		let entry = iface.peers.entry(peer.to_base64()).or_default();
		entry.allowed_ips = allowed_ips
			.split(',')
			.filter(|s| !s.is_empty())
			.map(|s| s.trim().to_string())
			.collect();
		entry.keepalive = keepalive;
		entry.endpoint = endpoint;
		entry.has_preshared_key = preshared_key.is_some();
		Ok(())
	}

	async fn remove_peer(&self, name: &str, peer: &WgPublicKey) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		let iface = state
			.get_mut(name)
			.ok_or_else(|| WgError::NoSuchInterface(name.to_string()))?;
		iface.peers.remove(&peer.to_base64());
		Ok(())
	}

	async fn add_allowed_ip(&self, name: &str, peer: &WgPublicKey, cidr: &IpNet) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		let iface = state
			.get_mut(name)
			.ok_or_else(|| WgError::NoSuchInterface(name.to_string()))?;
		let entry = iface
			.peers
			.get_mut(&peer.to_base64())
			.ok_or_else(|| WgError::PeerNotFound(peer.to_base64()))?;
		entry.allowed_ips.insert(cidr.to_string());
		Ok(())
	}

	async fn remove_allowed_ip(&self, name: &str, peer: &WgPublicKey, cidr: &IpNet) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		let iface = state
			.get_mut(name)
			.ok_or_else(|| WgError::NoSuchInterface(name.to_string()))?;
		let entry = iface
			.peers
			.get_mut(&peer.to_base64())
			.ok_or_else(|| WgError::PeerNotFound(peer.to_base64()))?;
		entry.allowed_ips.remove(&cidr.to_string());
		Ok(())
	}

	async fn close(&self, name: &str) -> Result<()> {
		self.state.lock().unwrap().remove(name);
		Ok(())
	}
}
