// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-peer connection state machine.
//!
//! ```text
//! Disconnected --open()--> Connecting --pair selected--> Connected
//! Connecting --timeout/close--> Disconnected
//! Connected --disconnect/close--> Disconnected
//! ```
//!
//! [`Conn::open`] blocks for the whole lifetime of one attempt: it sends
//! an offer, waits for the remote's offer or answer, runs ICE, starts
//! the right proxy variant and then parks until the connection dies or
//! is closed from outside.

pub mod error;

pub use error::{ConnError, Result};

use crate::proxy::{self, DirectProxy, Proxy, RelayedProxy};
use crate::status::{PeerState, StatusRegistry};
use chrono::Utc;
use futures::future::BoxFuture;
use heddle_ice::{
	AgentConfig, Candidate, CandidatePair, CandidateType, ConnectionState, IceAgent,
	IceAgentFactory, IceCredentials, IceUrl, InterfaceFilter, NetworkType, UdpMux,
	DEFAULT_FAILED_TIMEOUT,
};
use heddle_signal::SignalError;
use heddle_wg::DEFAULT_WG_PORT;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
	Disconnected,
	Connecting,
	Connected,
}

impl fmt::Display for ConnStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ConnStatus::Disconnected => "Disconnected",
			ConnStatus::Connecting => "Connecting",
			ConnStatus::Connected => "Connected",
		};
		f.write_str(s)
	}
}

/// A session establishment offer or answer.
#[derive(Debug, Clone)]
pub struct OfferAnswer {
	pub credentials: IceCredentials,
	/// Remote WireGuard listen port; lets a direct connection target the
	/// remote's socket without any proxy in between.
	pub wg_listen_port: u16,
	pub version: String,
}

pub type SignalHandler =
	Arc<dyn Fn(OfferAnswer) -> BoxFuture<'static, std::result::Result<(), SignalError>> + Send + Sync>;
pub type CandidateSignaler =
	Arc<dyn Fn(Candidate) -> BoxFuture<'static, std::result::Result<(), SignalError>> + Send + Sync>;

#[derive(Clone)]
pub struct ConnConfig {
	/// Remote peer's public key (base64).
	pub key: String,
	/// Our public key (base64).
	pub local_key: String,
	pub stun_turn: Vec<IceUrl>,
	/// Interface name prefixes that must not contribute ICE candidates.
	pub interface_black_list: Vec<String>,
	/// Our own tunnel interface, always excluded from gathering.
	pub wg_iface_name: String,
	pub disable_ipv6_discovery: bool,
	pub timeout: Duration,
	pub proxy_config: proxy::Config,
	pub udp_mux: Arc<UdpMux>,
	pub udp_mux_srflx: Arc<UdpMux>,
	pub local_wg_port: u16,
	pub nat_external_ips: Vec<String>,
}

struct ConnChannels {
	remote_offers_rx: mpsc::Receiver<OfferAnswer>,
	remote_answer_rx: mpsc::Receiver<OfferAnswer>,
	close_rx: mpsc::Receiver<()>,
}

pub struct Conn {
	config: StdMutex<ConnConfig>,
	status: StdMutex<ConnStatus>,
	// at most one in-flight agent per connection; shared so candidate
	// deliveries can reach it from their own tasks
	agent: Arc<Mutex<Option<Arc<dyn IceAgent>>>>,
	proxy: Mutex<Option<Arc<dyn Proxy>>>,
	remote_offers_tx: mpsc::Sender<OfferAnswer>,
	remote_answer_tx: mpsc::Sender<OfferAnswer>,
	close_tx: mpsc::Sender<()>,
	channels: Mutex<ConnChannels>,
	disconnect_tx: StdMutex<Option<watch::Sender<bool>>>,
	signal_offer: StdMutex<Option<SignalHandler>>,
	signal_answer: StdMutex<Option<SignalHandler>>,
	signal_candidate: StdMutex<Option<CandidateSignaler>>,
	status_recorder: Arc<StatusRegistry>,
	ice_factory: Arc<dyn IceAgentFactory>,
}

impl Conn {
	pub fn new(
		config: ConnConfig,
		status_recorder: Arc<StatusRegistry>,
		ice_factory: Arc<dyn IceAgentFactory>,
	) -> Arc<Self> {
		let (remote_offers_tx, remote_offers_rx) = mpsc::channel(1);
		let (remote_answer_tx, remote_answer_rx) = mpsc::channel(1);
		let (close_tx, close_rx) = mpsc::channel(1);
		Arc::new(Self {
			config: StdMutex::new(config),
			status: StdMutex::new(ConnStatus::Disconnected),
			agent: Arc::new(Mutex::new(None)),
			proxy: Mutex::new(None),
			remote_offers_tx,
			remote_answer_tx,
			close_tx,
			channels: Mutex::new(ConnChannels {
				remote_offers_rx,
				remote_answer_rx,
				close_rx,
			}),
			disconnect_tx: StdMutex::new(None),
			signal_offer: StdMutex::new(None),
			signal_answer: StdMutex::new(None),
			signal_candidate: StdMutex::new(None),
			status_recorder,
			ice_factory,
		})
	}

	pub fn key(&self) -> String {
		self.config.lock().unwrap().key.clone()
	}

	pub fn get_conf(&self) -> ConnConfig {
		self.config.lock().unwrap().clone()
	}

	/// Refresh the STUN/TURN snapshot before the next attempt.
	pub fn set_stun_turn(&self, stun_turn: Vec<IceUrl>) {
		self.config.lock().unwrap().stun_turn = stun_turn;
	}

	pub fn status(&self) -> ConnStatus {
		*self.status.lock().unwrap()
	}

	pub fn set_signal_offer(&self, handler: SignalHandler) {
		*self.signal_offer.lock().unwrap() = Some(handler);
	}

	pub fn set_signal_answer(&self, handler: SignalHandler) {
		*self.signal_answer.lock().unwrap() = Some(handler);
	}

	pub fn set_signal_candidate(&self, handler: CandidateSignaler) {
		*self.signal_candidate.lock().unwrap() = Some(handler);
	}

	fn set_status(&self, status: ConnStatus) {
		*self.status.lock().unwrap() = status;
	}

	fn publish_status(&self, f: impl FnOnce(&mut PeerState)) {
		let key = self.key();
		let mut state = PeerState::new(&key);
		state.conn_status = self.status().to_string();
		state.conn_status_update = Some(Utc::now());
		f(&mut state);
		if let Err(e) = self.status_recorder.update_peer_state(state) {
			// common on teardown: the engine may have removed the peer already
			debug!(peer = %key, error = %e, "unable to publish peer state");
		}
	}

	/// Open the connection to the remote peer and block until it is
	/// closed, times out, or dies. Status moves through
	/// Connecting/Connected and always lands on Disconnected.
	#[instrument(skip(self), fields(peer = %self.key()))]
	pub async fn open(&self) -> Result<()> {
		debug!("trying to connect to peer");

		let overlay_ip = {
			let config = self.config.lock().unwrap();
			config
				.proxy_config
				.allowed_ips
				.split(',')
				.next()
				.unwrap_or_default()
				.split('/')
				.next()
				.unwrap_or_default()
				.to_string()
		};
		self.publish_status(|state| state.ip = overlay_ip);

		let mut channels = self.channels.lock().await;
		let result = self.open_inner(&mut channels).await;
		self.cleanup().await;
		result
	}

	async fn open_inner(&self, channels: &mut ConnChannels) -> Result<()> {
		let config = self.get_conf();
		let (agent, mut disconnect_rx) = self.recreate_agent(&config).await?;

		self.send_offer(&agent, &config).await?;
		debug!("connection offer sent, waiting for confirmation");

		// Wait for the remote to confirm. The attempt can time out first,
		// or be torn down externally before the remote ever shows up.
		let remote_offer_answer = tokio::select! {
			Some(offer) = channels.remote_offers_rx.recv() => {
				self.send_answer(&agent, &config).await?;
				offer
			}
			Some(answer) = channels.remote_answer_rx.recv() => answer,
			_ = tokio::time::sleep(config.timeout) => {
				return Err(ConnError::Timeout {
					peer: config.key.clone(),
					timeout: config.timeout,
				});
			}
			Some(()) = channels.close_rx.recv() => {
				return Err(ConnError::Closed(config.key.clone()));
			}
		};

		debug!(
			version = %remote_offer_answer.version,
			remote_wg_port = remote_offer_answer.wg_listen_port,
			"received connection confirmation"
		);

		self.set_status(ConnStatus::Connecting);
		self.publish_status(|_| {});

		agent.gather_candidates().await?;

		// Total order on public keys decides the controlling side.
		let is_controlling = config.local_key > config.key;
		let remote_creds = remote_offer_answer.credentials.clone();

		let transport = tokio::select! {
			result = async {
				if is_controlling {
					agent.dial(remote_creds).await
				} else {
					agent.accept(remote_creds).await
				}
			} => result?,
			_ = disconnect_rx.changed() => {
				return Err(ConnError::Disconnected(config.key.clone()));
			}
			Some(()) = channels.close_rx.recv() => {
				return Err(ConnError::Closed(config.key.clone()));
			}
		};

		let remote_wg_port = if remote_offer_answer.wg_listen_port != 0 {
			remote_offer_answer.wg_listen_port
		} else {
			DEFAULT_WG_PORT
		};

		let pair = agent.selected_pair().await?;
		self.start_proxy(&config, &pair, Arc::clone(&transport), remote_wg_port)
			.await?;

		info!(
			pair = %pair,
			local = %transport.local_addr(),
			remote = %transport.remote_addr(),
			"connected to peer"
		);

		tokio::select! {
			Some(()) = channels.close_rx.recv() => Err(ConnError::Closed(config.key.clone())),
			_ = disconnect_rx.changed() => Err(ConnError::Disconnected(config.key.clone())),
		}
	}

	async fn recreate_agent(
		&self,
		config: &ConnConfig,
	) -> Result<(Arc<dyn IceAgent>, watch::Receiver<bool>)> {
		let network_types = if config.disable_ipv6_discovery {
			vec![NetworkType::Udp4]
		} else {
			vec![NetworkType::Udp4, NetworkType::Udp6]
		};

		let agent_config = AgentConfig {
			urls: config.stun_turn.clone(),
			network_types,
			candidate_types: vec![
				CandidateType::Host,
				CandidateType::ServerReflexive,
				CandidateType::Relay,
			],
			failed_timeout: DEFAULT_FAILED_TIMEOUT,
			interface_filter: Some(interface_filter(
				config.interface_black_list.clone(),
				config.wg_iface_name.clone(),
			)),
			udp_mux: Arc::clone(&config.udp_mux),
			udp_mux_srflx: Arc::clone(&config.udp_mux_srflx),
			nat_external_ips: config.nat_external_ips.clone(),
			multicast_dns: false,
		};

		let agent = self.ice_factory.create(agent_config)?;

		let (disconnect_tx, disconnect_rx) = watch::channel(false);
		*self.disconnect_tx.lock().unwrap() = Some(disconnect_tx.clone());

		let signaler = self.signal_candidate.lock().unwrap().clone();
		let peer = config.key.clone();
		agent.on_candidate(Box::new(move |candidate| {
			debug!(peer = %peer, candidate = %candidate, "discovered local candidate");
			if let Some(signaler) = signaler.clone() {
				let peer = peer.clone();
				tokio::spawn(async move {
					if let Err(e) = signaler(candidate).await {
						warn!(peer = %peer, error = %e, "failed signaling candidate");
					}
				});
			}
		}));

		let peer = config.key.clone();
		agent.on_connection_state_change(Box::new(move |state| {
			debug!(peer = %peer, state = %state, "ICE connection state changed");
			if matches!(state, ConnectionState::Failed | ConnectionState::Disconnected) {
				let _ = disconnect_tx.send(true);
			}
		}));

		let peer = config.key.clone();
		agent.on_selected_pair(Box::new(move |pair| {
			debug!(peer = %peer, pair = %pair, "selected candidate pair");
		}));

		*self.agent.lock().await = Some(Arc::clone(&agent));

		Ok((agent, disconnect_rx))
	}

	async fn send_offer(&self, agent: &Arc<dyn IceAgent>, config: &ConnConfig) -> Result<()> {
		let handler = self.signal_offer.lock().unwrap().clone();
		let Some(handler) = handler else { return Ok(()) };
		handler(OfferAnswer {
			credentials: agent.local_credentials(),
			wg_listen_port: config.local_wg_port,
			version: crate::agent_version().to_string(),
		})
		.await?;
		Ok(())
	}

	async fn send_answer(&self, agent: &Arc<dyn IceAgent>, config: &ConnConfig) -> Result<()> {
		let handler = self.signal_answer.lock().unwrap().clone();
		let Some(handler) = handler else { return Ok(()) };
		debug!(peer = %config.key, "sending answer");
		handler(OfferAnswer {
			credentials: agent.local_credentials(),
			wg_listen_port: config.local_wg_port,
			version: crate::agent_version().to_string(),
		})
		.await?;
		Ok(())
	}

	async fn start_proxy(
		&self,
		config: &ConnConfig,
		pair: &CandidatePair,
		transport: Arc<dyn heddle_ice::IceTransport>,
		remote_wg_port: u16,
	) -> Result<()> {
		let relay = use_relay_proxy(pair);
		let proxy: Arc<dyn Proxy> = if relay {
			Arc::new(RelayedProxy::new(config.proxy_config.clone()))
		} else {
			Arc::new(DirectProxy::new(config.proxy_config.clone(), remote_wg_port))
		};

		proxy.start(transport).await?;
		*self.proxy.lock().await = Some(proxy);

		self.set_status(ConnStatus::Connected);

		let relayed_pair = pair.local.typ == CandidateType::Relay
			|| pair.remote.typ == CandidateType::Relay;
		let local_type = pair.local.typ.to_string();
		let remote_type = pair.remote.typ.to_string();
		self.publish_status(move |state| {
			state.direct = !relay;
			state.relayed = relayed_pair;
			state.local_ice_candidate_type = local_type;
			state.remote_ice_candidate_type = remote_type;
		});

		Ok(())
	}

	/// Close all open resources and land on Disconnected. Runs after
	/// every attempt regardless of outcome.
	async fn cleanup(&self) {
		let key = self.key();
		debug!(peer = %key, "cleaning up connection");

		if let Some(agent) = self.agent.lock().await.take() {
			if let Err(e) = agent.close().await {
				warn!(peer = %key, error = %e, "error closing ICE agent");
			}
		}

		if let Some(proxy) = self.proxy.lock().await.take() {
			if let Err(e) = proxy.close().await {
				warn!(peer = %key, error = %e, "error closing proxy");
			}
		}

		if let Some(disconnect_tx) = self.disconnect_tx.lock().unwrap().take() {
			let _ = disconnect_tx.send(true);
		}

		self.set_status(ConnStatus::Disconnected);
		self.publish_status(|_| {});
	}

	/// Signal the state machine to stop. Non-blocking; a second close
	/// before the first was consumed reports [`ConnError::AlreadyClosed`].
	pub fn close(&self) -> Result<()> {
		match self.close_tx.try_send(()) {
			Ok(()) => Ok(()),
			Err(_) => Err(ConnError::AlreadyClosed(self.key())),
		}
	}

	/// Deliver an offer from the remote peer. Non-blocking; dropped when
	/// the state machine is not waiting for one.
	pub fn on_remote_offer(&self, offer: OfferAnswer) -> bool {
		match self.remote_offers_tx.try_send(offer) {
			Ok(()) => true,
			Err(_) => {
				debug!(peer = %self.key(), status = %self.status(), "dropping remote offer, not ready");
				false
			}
		}
	}

	pub fn on_remote_answer(&self, answer: OfferAnswer) -> bool {
		match self.remote_answer_tx.try_send(answer) {
			Ok(()) => true,
			Err(_) => {
				debug!(peer = %self.key(), status = %self.status(), "dropping remote answer, not ready");
				false
			}
		}
	}

	/// Hand a remote candidate to the in-flight agent, if any.
	pub fn on_remote_candidate(&self, candidate: Candidate) {
		let agent_slot = Arc::clone(&self.agent);
		let peer = self.key();
		tokio::spawn(async move {
			let agent = agent_slot.lock().await.clone();
			let Some(agent) = agent else {
				debug!(peer = %peer, "no agent, dropping remote candidate");
				return;
			};
			if let Err(e) = agent.add_remote_candidate(candidate).await {
				warn!(peer = %peer, error = %e, "error handling remote candidate");
			}
		});
	}
}

fn interface_filter(black_list: Vec<String>, wg_iface_name: String) -> InterfaceFilter {
	Arc::new(move |name: &str| {
		if black_list.iter().any(|prefix| name.starts_with(prefix)) {
			debug!(iface = %name, "ignoring blacklisted interface");
			return false;
		}
		name != wg_iface_name
	})
}

/// Whether the selected pair needs the userspace relay. A relay pair
/// always does; host pairs with a public side, or private pairs on the
/// same LAN, can go direct.
pub fn use_relay_proxy(pair: &CandidatePair) -> bool {
	if pair.local.typ == CandidateType::Relay || pair.remote.typ == CandidateType::Relay {
		return true;
	}

	let local_ip: Option<IpAddr> = pair.local.address.parse().ok();
	let remote_ip: Option<IpAddr> = pair.remote.address.parse().ok();
	let local_public = local_ip.map(is_public_ip).unwrap_or(false);
	let remote_public = remote_ip.map(is_public_ip).unwrap_or(false);

	if remote_public && pair.remote.typ == CandidateType::Host {
		return false;
	}
	if local_public && pair.local.typ == CandidateType::Host {
		return false;
	}

	if pair.local.typ == CandidateType::Host
		&& pair.remote.typ == CandidateType::Host
		&& !local_public
		&& !remote_public
	{
		// both in the same private network
		return false;
	}

	true
}

/// Not loopback, not link-local, not in the private ranges.
pub fn is_public_ip(ip: IpAddr) -> bool {
	match ip {
		IpAddr::V4(v4) => !(v4.is_loopback() || v4.is_link_local() || v4.is_private()),
		IpAddr::V6(v6) => {
			let segments = v6.segments();
			let link_local = (segments[0] & 0xffc0) == 0xfe80;
			let unique_local = (segments[0] & 0xfe00) == 0xfc00;
			!(v6.is_loopback() || link_local || unique_local)
		}
	}
}
