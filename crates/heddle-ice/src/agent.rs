// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::candidate::{Candidate, CandidateType};
use crate::error::Result;
use crate::mux::UdpMux;
use crate::url::IceUrl;
use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_FAILED_TIMEOUT: Duration = Duration::from_secs(6);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCredentials {
	pub ufrag: String,
	pub pwd: String,
}

impl IceCredentials {
	pub fn random() -> Self {
		Self {
			ufrag: random_token(8),
			pwd: random_token(24),
		}
	}
}

fn random_token(len: usize) -> String {
	const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
	(0..len)
		.map(|_| ALPHABET[fastrand::usize(..ALPHABET.len())] as char)
		.collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	New,
	Checking,
	Connected,
	Failed,
	Disconnected,
	Closed,
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ConnectionState::New => "New",
			ConnectionState::Checking => "Checking",
			ConnectionState::Connected => "Connected",
			ConnectionState::Failed => "Failed",
			ConnectionState::Disconnected => "Disconnected",
			ConnectionState::Closed => "Closed",
		};
		f.write_str(s)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
	Udp4,
	Udp6,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePair {
	pub local: Candidate,
	pub remote: Candidate,
}

impl fmt::Display for CandidatePair {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[{} <-> {}]", self.local, self.remote)
	}
}

/// Returns false for interfaces that must not contribute candidates.
pub type InterfaceFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub type CandidateHandler = Box<dyn Fn(Candidate) + Send + Sync>;
pub type StateHandler = Box<dyn Fn(ConnectionState) + Send + Sync>;
pub type PairHandler = Box<dyn Fn(CandidatePair) + Send + Sync>;

/// Agent construction parameters, assembled by the engine per connection
/// attempt.
pub struct AgentConfig {
	pub urls: Vec<IceUrl>,
	pub network_types: Vec<NetworkType>,
	pub candidate_types: Vec<CandidateType>,
	pub failed_timeout: Duration,
	pub interface_filter: Option<InterfaceFilter>,
	pub udp_mux: Arc<UdpMux>,
	pub udp_mux_srflx: Arc<UdpMux>,
	pub nat_external_ips: Vec<String>,
	pub multicast_dns: bool,
}

impl AgentConfig {
	pub fn ipv6_enabled(&self) -> bool {
		self.network_types.contains(&NetworkType::Udp6)
	}
}

/// A connected datagram path produced by an [`IceAgent`]. For a relayed
/// pair this is the relay allocation; for everything else a thin wrapper
/// over the shared mux socket.
#[async_trait]
pub trait IceTransport: Send + Sync {
	async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize>;

	async fn send(&self, buf: &[u8]) -> std::io::Result<usize>;

	fn local_addr(&self) -> SocketAddr;

	fn remote_addr(&self) -> SocketAddr;

	async fn close(&self) -> std::io::Result<()>;
}

/// One ICE session against one remote peer. Handlers must be registered
/// before gathering starts; they are invoked from background tasks.
#[async_trait]
pub trait IceAgent: Send + Sync {
	fn on_candidate(&self, handler: CandidateHandler);

	fn on_connection_state_change(&self, handler: StateHandler);

	fn on_selected_pair(&self, handler: PairHandler);

	fn local_credentials(&self) -> IceCredentials;

	async fn gather_candidates(&self) -> Result<()>;

	async fn add_remote_candidate(&self, candidate: Candidate) -> Result<()>;

	/// Run connectivity checks as the controlling side.
	async fn dial(&self, remote: IceCredentials) -> Result<Arc<dyn IceTransport>>;

	/// Run connectivity checks as the controlled side.
	async fn accept(&self, remote: IceCredentials) -> Result<Arc<dyn IceTransport>>;

	async fn selected_pair(&self) -> Result<CandidatePair>;

	async fn close(&self) -> Result<()>;
}

pub trait IceAgentFactory: Send + Sync {
	fn create(&self, config: AgentConfig) -> Result<Arc<dyn IceAgent>>;
}
