// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Thread-safe store of local and per-peer connection status.
//!
//! Watchers (the route manager in particular) subscribe to a per-peer
//! notifier and block until that peer's state changes. Notifications are
//! edge-triggered through a `watch` channel: a subscriber that is busy
//! misses an edge but observes the next one.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum StatusError {
	#[error("peer {0} already exists")]
	PeerAlreadyExists(String),

	#[error("peer {0} not found")]
	PeerNotFound(String),
}

pub type Result<T> = std::result::Result<T, StatusError>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalPeerState {
	pub ip: String,
	pub pub_key: String,
	pub kernel_interface: bool,
	pub fqdn: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerState {
	pub pub_key: String,
	pub ip: String,
	pub fqdn: String,
	pub conn_status: String,
	pub conn_status_update: Option<DateTime<Utc>>,
	pub direct: bool,
	pub relayed: bool,
	pub local_ice_candidate_type: String,
	pub remote_ice_candidate_type: String,
}

impl PeerState {
	pub fn new(pub_key: &str) -> Self {
		Self {
			pub_key: pub_key.to_string(),
			..Default::default()
		}
	}
}

#[derive(Default)]
struct Inner {
	local: LocalPeerState,
	peers: HashMap<String, PeerState>,
	notifiers: HashMap<String, watch::Sender<u64>>,
	signal_connected: bool,
	management_connected: bool,
}

#[derive(Default)]
pub struct StatusRegistry {
	inner: Mutex<Inner>,
}

impl StatusRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	fn notify(inner: &mut Inner, pub_key: &str) {
		if let Some(tx) = inner.notifiers.get(pub_key) {
			tx.send_modify(|v| *v = v.wrapping_add(1));
		}
	}

	pub fn add_peer(&self, pub_key: &str) -> Result<()> {
		let mut inner = self.inner.lock().unwrap();
		if inner.peers.contains_key(pub_key) {
			return Err(StatusError::PeerAlreadyExists(pub_key.to_string()));
		}
		inner
			.peers
			.insert(pub_key.to_string(), PeerState::new(pub_key));
		Self::notify(&mut inner, pub_key);
		Ok(())
	}

	pub fn remove_peer(&self, pub_key: &str) -> Result<()> {
		let mut inner = self.inner.lock().unwrap();
		if inner.peers.remove(pub_key).is_none() {
			return Err(StatusError::PeerNotFound(pub_key.to_string()));
		}
		Self::notify(&mut inner, pub_key);
		Ok(())
	}

	/// Replace a peer's state. IP and FQDN survive updates that leave
	/// them empty, so transient status publishes don't erase them.
	pub fn update_peer_state(&self, state: PeerState) -> Result<()> {
		let mut inner = self.inner.lock().unwrap();
		let existing = inner
			.peers
			.get_mut(&state.pub_key)
			.ok_or_else(|| StatusError::PeerNotFound(state.pub_key.clone()))?;

		let mut state = state;
		if state.ip.is_empty() {
			state.ip = existing.ip.clone();
		}
		if state.fqdn.is_empty() {
			state.fqdn = existing.fqdn.clone();
		}
		let pub_key = state.pub_key.clone();
		*existing = state;
		Self::notify(&mut inner, &pub_key);
		Ok(())
	}

	pub fn update_peer_fqdn(&self, pub_key: &str, fqdn: &str) -> Result<()> {
		let mut inner = self.inner.lock().unwrap();
		let existing = inner
			.peers
			.get_mut(pub_key)
			.ok_or_else(|| StatusError::PeerNotFound(pub_key.to_string()))?;
		existing.fqdn = fqdn.to_string();
		Self::notify(&mut inner, pub_key);
		Ok(())
	}

	pub fn get_peer(&self, pub_key: &str) -> Result<PeerState> {
		let inner = self.inner.lock().unwrap();
		inner
			.peers
			.get(pub_key)
			.cloned()
			.ok_or_else(|| StatusError::PeerNotFound(pub_key.to_string()))
	}

	/// Change-notification endpoint for one peer. The receiver resolves
	/// on every state transition published after subscription.
	pub fn peer_state_change_notifier(&self, pub_key: &str) -> watch::Receiver<u64> {
		let mut inner = self.inner.lock().unwrap();
		inner
			.notifiers
			.entry(pub_key.to_string())
			.or_insert_with(|| watch::channel(0).0)
			.subscribe()
	}

	pub fn update_local_peer_state(&self, state: LocalPeerState) {
		self.inner.lock().unwrap().local = state;
	}

	pub fn clean_local_peer_state(&self) {
		self.inner.lock().unwrap().local = LocalPeerState::default();
	}

	pub fn local_peer_state(&self) -> LocalPeerState {
		self.inner.lock().unwrap().local.clone()
	}

	pub fn mark_signal_connected(&self, connected: bool) {
		self.inner.lock().unwrap().signal_connected = connected;
	}

	pub fn signal_connected(&self) -> bool {
		self.inner.lock().unwrap().signal_connected
	}

	pub fn mark_management_connected(&self, connected: bool) {
		self.inner.lock().unwrap().management_connected = connected;
	}

	pub fn management_connected(&self) -> bool {
		self.inner.lock().unwrap().management_connected
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn add_remove_peer() {
		let registry = StatusRegistry::new();
		registry.add_peer("K1").unwrap();
		assert!(matches!(
			registry.add_peer("K1"),
			Err(StatusError::PeerAlreadyExists(_))
		));
		registry.remove_peer("K1").unwrap();
		assert!(matches!(
			registry.remove_peer("K1"),
			Err(StatusError::PeerNotFound(_))
		));
	}

	#[test]
	fn update_preserves_ip_and_fqdn() {
		let registry = StatusRegistry::new();
		registry.add_peer("K1").unwrap();

		let mut state = PeerState::new("K1");
		state.ip = "100.64.0.2".to_string();
		state.fqdn = "peer.example".to_string();
		state.conn_status = "Connected".to_string();
		registry.update_peer_state(state).unwrap();

		let mut bare = PeerState::new("K1");
		bare.conn_status = "Disconnected".to_string();
		registry.update_peer_state(bare).unwrap();

		let stored = registry.get_peer("K1").unwrap();
		assert_eq!(stored.ip, "100.64.0.2");
		assert_eq!(stored.fqdn, "peer.example");
		assert_eq!(stored.conn_status, "Disconnected");
	}

	#[tokio::test]
	async fn notifier_sees_updates() {
		let registry = StatusRegistry::new();
		registry.add_peer("K1").unwrap();

		let mut notifier = registry.peer_state_change_notifier("K1");
		let seen = *notifier.borrow();

		let mut state = PeerState::new("K1");
		state.conn_status = "Connecting".to_string();
		registry.update_peer_state(state).unwrap();

		notifier.changed().await.unwrap();
		assert_ne!(*notifier.borrow(), seen);
	}

	#[tokio::test]
	async fn late_subscriber_sees_next_edge() {
		let registry = StatusRegistry::new();
		registry.add_peer("K1").unwrap();

		let mut state = PeerState::new("K1");
		state.conn_status = "Connected".to_string();
		registry.update_peer_state(state).unwrap();

		// subscribed after the edge above; only the next edge is seen
		let mut notifier = registry.peer_state_change_notifier("K1");
		registry.update_peer_fqdn("K1", "gw.example").unwrap();
		notifier.changed().await.unwrap();
	}

	#[test]
	fn local_peer_state_roundtrip() {
		let registry = StatusRegistry::new();
		registry.update_local_peer_state(LocalPeerState {
			ip: "100.64.0.1/16".to_string(),
			pub_key: "LOCAL".to_string(),
			kernel_interface: true,
			fqdn: String::new(),
		});
		assert_eq!(registry.local_peer_state().pub_key, "LOCAL");

		registry.clean_local_peer_state();
		assert_eq!(registry.local_peer_state(), LocalPeerState::default());
	}
}
