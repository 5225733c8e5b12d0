// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Connection engine.
//!
//! Owns the peer-connection map, the WireGuard interface handle, the
//! STUN/TURN URL lists and the shared UDP muxes. Management snapshots
//! are reconciled against the live peer set; inbound signaling messages
//! are dispatched to the matching connection. Every mutation happens
//! under one engine-level lock, which makes config application, peer
//! add/remove and signal dispatch trivially linearizable.

use crate::netmap::{NetworkMap, PeerConfig, RemotePeerConfig, SyncSnapshot};
use crate::peer::{Conn, ConnConfig, ConnError, ConnStatus, OfferAnswer};
use crate::proxy;
use crate::routemanager::{Manager, Route, RouteTable};
use crate::status::{LocalPeerState, StatusRegistry};
use heddle_ice::{Candidate, IceAgentFactory, IceCredentials, IceError, IceUrl, UdpMux};
use heddle_signal::{Body, Credential, SignalClient, SignalMessage};
use heddle_wg::{
	KeyError, PresharedKey, WgBackend, WgError, WgIface, WgPrivateKey, WgPublicKey, DEFAULT_MTU,
};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// Bounds for the randomized per-peer ICE timeout. The jitter breaks
/// synchronization across peers after a bulk restart.
pub const PEER_CONNECTION_TIMEOUT_MIN_MS: u64 = 30_000;
pub const PEER_CONNECTION_TIMEOUT_MAX_MS: u64 = 45_000;

const WORKER_JITTER_MIN_MS: u64 = 500;
const WORKER_JITTER_MAX_MS: u64 = 2_000;

#[derive(Error, Debug)]
pub enum EngineError {
	#[error("engine already started")]
	AlreadyStarted,

	#[error("engine is not started")]
	NotStarted,

	#[error("wireguard error: {0}")]
	Wg(#[from] WgError),

	#[error("ICE error: {0}")]
	Ice(#[from] IceError),

	#[error("key error: {0}")]
	Key(#[from] KeyError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

pub struct EngineConfig {
	pub wg_iface_name: String,
	/// Local overlay address in CIDR form.
	pub wg_addr: String,
	pub wg_port: u16,
	pub wg_private_key: WgPrivateKey,
	pub pre_shared_key: Option<PresharedKey>,
	/// Interface name prefixes ignored during candidate discovery.
	pub iface_black_list: Vec<String>,
	pub disable_ipv6_discovery: bool,
	/// 0 lets the system pick.
	pub udp_mux_port: u16,
	pub udp_mux_srflx_port: u16,
	pub nat_external_ips: Vec<String>,
}

#[derive(Default)]
struct EngineState {
	peer_conns: HashMap<String, Arc<Conn>>,
	stuns: Vec<IceUrl>,
	turns: Vec<IceUrl>,
	wg_iface: Option<Arc<WgIface>>,
	udp_mux: Option<Arc<UdpMux>>,
	udp_mux_srflx: Option<Arc<UdpMux>>,
	route_manager: Option<Arc<Manager>>,
	network_serial: u64,
	started: bool,
}

pub struct Engine {
	signal: Arc<dyn SignalClient>,
	config: EngineConfig,
	status: Arc<StatusRegistry>,
	ice_factory: Arc<dyn IceAgentFactory>,
	wg_backend: Arc<dyn WgBackend>,
	route_table: Arc<dyn RouteTable>,
	local_key: String,
	state: Mutex<EngineState>,
	shutdown_tx: watch::Sender<bool>,
	weak_self: StdMutex<Weak<Engine>>,
}

impl Engine {
	pub fn new(
		signal: Arc<dyn SignalClient>,
		config: EngineConfig,
		status: Arc<StatusRegistry>,
		ice_factory: Arc<dyn IceAgentFactory>,
		wg_backend: Arc<dyn WgBackend>,
		route_table: Arc<dyn RouteTable>,
	) -> Arc<Self> {
		let (shutdown_tx, _) = watch::channel(false);
		let local_key = config.wg_private_key.public_key().to_base64();
		let engine = Arc::new(Self {
			signal,
			config,
			status,
			ice_factory,
			wg_backend,
			route_table,
			local_key,
			state: Mutex::new(EngineState::default()),
			shutdown_tx,
			weak_self: StdMutex::new(Weak::new()),
		});
		*engine.weak_self.lock().unwrap() = Arc::downgrade(&engine);
		engine
	}

	fn arc(&self) -> Arc<Self> {
		self.weak_self
			.lock()
			.unwrap()
			.upgrade()
			.expect("engine outlives its tasks")
	}

	pub fn local_key(&self) -> &str {
		&self.local_key
	}

	/// Create the tunnel interface and start listening for signaling
	/// events. Peer connections are only established once a network map
	/// arrives.
	#[instrument(skip(self), fields(iface = %self.config.wg_iface_name))]
	pub async fn start(&self) -> Result<()> {
		let mut state = self.state.lock().await;
		if state.started {
			return Err(EngineError::AlreadyStarted);
		}

		let wg_iface = Arc::new(WgIface::new(
			&self.config.wg_iface_name,
			&self.config.wg_addr,
			DEFAULT_MTU,
			Arc::clone(&self.wg_backend),
		)?);
		wg_iface.create().await?;
		wg_iface
			.configure(&self.config.wg_private_key, self.config.wg_port)
			.await?;

		let ipv6 = !self.config.disable_ipv6_discovery;
		let udp_mux = UdpMux::bind(self.config.udp_mux_port, ipv6).await?;
		let udp_mux_srflx = UdpMux::bind(self.config.udp_mux_srflx_port, ipv6).await?;

		let route_manager = Manager::new(
			Arc::clone(&wg_iface),
			Arc::clone(&self.status),
			Arc::clone(&self.route_table),
		);

		state.wg_iface = Some(wg_iface);
		state.udp_mux = Some(udp_mux);
		state.udp_mux_srflx = Some(udp_mux_srflx);
		state.route_manager = Some(route_manager);
		state.started = true;
		drop(state);

		self.spawn_signal_receiver();

		info!("engine started");
		Ok(())
	}

	/// Tear everything down. Best-effort: failures are logged and the
	/// teardown proceeds.
	#[instrument(skip(self))]
	pub async fn stop(&self) {
		let mut state = self.state.lock().await;

		if let Err(e) = self.remove_all_peers(&mut state).await {
			warn!(error = %e, "error removing peers on stop");
		}

		// peer closes unregister from WireGuard asynchronously; give
		// them a moment before the interface goes away
		tokio::time::sleep(Duration::from_millis(500)).await;

		if let Some(iface) = state.wg_iface.take() {
			if let Err(e) = iface.close().await {
				error!(error = %e, "failed closing tunnel interface");
			}
		}
		if let Some(mux) = state.udp_mux.take() {
			mux.close();
		}
		if let Some(mux) = state.udp_mux_srflx.take() {
			mux.close();
		}
		if let Some(route_manager) = state.route_manager.take() {
			route_manager.stop().await;
		}
		state.started = false;
		drop(state);

		let _ = self.shutdown_tx.send(true);
		info!("engine stopped");
	}

	/// Blocks until the engine cancels itself (signaling loss) or is
	/// stopped.
	pub async fn wait(&self) {
		let mut rx = self.shutdown_tx.subscribe();
		while !*rx.borrow() {
			if rx.changed().await.is_err() {
				break;
			}
		}
	}

	pub fn cancel(&self) {
		let _ = self.shutdown_tx.send(true);
	}

	pub async fn init_conf(&self, snapshot: &SyncSnapshot) -> Result<()> {
		let mut state = self.state.lock().await;
		self.apply_snapshot(&mut state, snapshot).await
	}

	pub async fn handle_sync(&self, snapshot: &SyncSnapshot) -> Result<()> {
		let mut state = self.state.lock().await;
		self.apply_snapshot(&mut state, snapshot).await
	}

	async fn apply_snapshot(&self, state: &mut EngineState, snapshot: &SyncSnapshot) -> Result<()> {
		if let Some(overlay) = &snapshot.overlay {
			self.update_turns(state, overlay)?;
			self.update_stuns(state, overlay)?;
			if overlay.signal.is_some() {
				// signaling-service changes are reconciled by re-dialing
				// at the supervisor layer
				debug!("signal service configuration update received");
			}
		}

		if let Some(map) = &snapshot.network_map {
			self.update_network_map(state, map).await?;
		}

		Ok(())
	}

	/// Empty updates keep the previous list.
	fn update_stuns(&self, state: &mut EngineState, overlay: &crate::netmap::OverlayConfig) -> Result<()> {
		if overlay.stuns.is_empty() {
			return Ok(());
		}
		let mut stuns = Vec::with_capacity(overlay.stuns.len());
		for host in &overlay.stuns {
			stuns.push(IceUrl::parse(&host.uri)?);
		}
		debug!(count = stuns.len(), "updated STUN servers");
		state.stuns = stuns;
		Ok(())
	}

	fn update_turns(&self, state: &mut EngineState, overlay: &crate::netmap::OverlayConfig) -> Result<()> {
		if overlay.turns.is_empty() {
			return Ok(());
		}
		let mut turns = Vec::with_capacity(overlay.turns.len());
		for relay in &overlay.turns {
			let url = IceUrl::parse(&relay.host.uri)?
				.with_credentials(&relay.user, &relay.password);
			turns.push(url);
		}
		debug!(count = turns.len(), "updated TURN servers");
		state.turns = turns;
		Ok(())
	}

	async fn update_network_map(&self, state: &mut EngineState, map: &NetworkMap) -> Result<()> {
		// the local address can change while the serial stays put, so
		// handle it before the serial gate
		if let Some(peer_config) = &map.peer_config {
			self.update_local_config(state, peer_config).await?;
		}

		if map.serial < state.network_serial {
			debug!(serial = map.serial, "received outdated network map, ignoring");
			return Ok(());
		}

		debug!(peers = map.remote_peers.len(), serial = map.serial, "peers update");

		if map.remote_peers_is_empty {
			// cleanup request, most likely this peer has been deleted
			self.remove_all_peers(state).await?;
		} else {
			self.remove_peers(state, &map.remote_peers).await?;
			self.modify_peers(state, &map.remote_peers).await?;
			self.add_new_peers(state, &map.remote_peers).await?;
		}

		let routes: Vec<Route> = map.routes.iter().filter_map(Route::from_config).collect();
		if let Some(route_manager) = &state.route_manager {
			route_manager.update_routes(map.serial, routes).await;
		}

		if map.dns_config.is_some() {
			debug!("dns configuration received, applied outside the engine");
		}

		state.network_serial = map.serial;
		Ok(())
	}

	async fn update_local_config(&self, state: &mut EngineState, conf: &PeerConfig) -> Result<()> {
		let iface = state.wg_iface.as_ref().ok_or(EngineError::NotStarted)?;

		if !conf.address.is_empty() && iface.address().await.to_string() != conf.address {
			let old = iface.address().await.to_string();
			iface.update_addr(&conf.address).await?;
			info!(%old, new = %conf.address, "updated local overlay address");
		}

		self.status.update_local_peer_state(LocalPeerState {
			ip: iface.address().await.to_string(),
			pub_key: self.local_key.clone(),
			kernel_interface: cfg!(target_os = "linux"),
			fqdn: conf.fqdn.clone(),
		});

		Ok(())
	}

	/// Remove peers that are gone from the network map.
	async fn remove_peers(
		&self,
		state: &mut EngineState,
		peers_update: &[RemotePeerConfig],
	) -> Result<()> {
		let new_keys: HashSet<&str> =
			peers_update.iter().map(|p| p.wg_pub_key.as_str()).collect();
		let to_remove: Vec<String> = state
			.peer_conns
			.keys()
			.filter(|key| !new_keys.contains(key.as_str()))
			.cloned()
			.collect();

		for key in to_remove {
			self.remove_peer(state, &key)?;
			info!(peer = %key, "removed peer");
		}
		Ok(())
	}

	async fn remove_all_peers(&self, state: &mut EngineState) -> Result<()> {
		debug!("removing all peer connections");
		let keys: Vec<String> = state.peer_conns.keys().cloned().collect();
		for key in keys {
			self.remove_peer(state, &key)?;
		}
		Ok(())
	}

	fn remove_peer(&self, state: &mut EngineState, peer_key: &str) -> Result<()> {
		debug!(peer = %peer_key, "removing peer from engine");

		if let Err(e) = self.status.remove_peer(peer_key) {
			warn!(peer = %peer_key, error = %e, "error removing peer from status registry");
		}

		if let Some(conn) = state.peer_conns.remove(peer_key) {
			match conn.close() {
				Ok(()) | Err(ConnError::AlreadyClosed(_)) => {}
				Err(e) => warn!(peer = %peer_key, error = %e, "error closing connection"),
			}
		}
		Ok(())
	}

	/// Peers whose allowed-IP set changed are recycled: the old
	/// connection is closed and a fresh one is created.
	async fn modify_peers(
		&self,
		state: &mut EngineState,
		peers_update: &[RemotePeerConfig],
	) -> Result<()> {
		let mut modified = Vec::new();
		for peer in peers_update {
			if let Some(conn) = state.peer_conns.get(&peer.wg_pub_key) {
				if conn.get_conf().proxy_config.allowed_ips != peer.joined_allowed_ips() {
					modified.push(peer.clone());
					continue;
				}
				if let Err(e) = self.status.update_peer_fqdn(&peer.wg_pub_key, &peer.fqdn) {
					warn!(peer = %peer.wg_pub_key, error = %e, "error updating peer fqdn");
				}
			}
		}

		for peer in &modified {
			self.remove_peer(state, &peer.wg_pub_key)?;
		}
		for peer in &modified {
			self.add_new_peer(state, peer).await?;
		}
		Ok(())
	}

	async fn add_new_peers(
		&self,
		state: &mut EngineState,
		peers_update: &[RemotePeerConfig],
	) -> Result<()> {
		for peer in peers_update {
			self.add_new_peer(state, peer).await?;
		}
		Ok(())
	}

	async fn add_new_peer(&self, state: &mut EngineState, peer: &RemotePeerConfig) -> Result<()> {
		let peer_key = &peer.wg_pub_key;
		if !state.peer_conns.contains_key(peer_key) {
			let conn = self.create_peer_conn(state, peer_key, peer.joined_allowed_ips())?;
			state.peer_conns.insert(peer_key.clone(), Arc::clone(&conn));

			if let Err(e) = self.status.add_peer(peer_key) {
				warn!(peer = %peer_key, error = %e, "error adding peer to status registry");
			}

			self.spawn_conn_worker(conn, peer_key.clone());
		}
		if let Err(e) = self.status.update_peer_fqdn(peer_key, &peer.fqdn) {
			warn!(peer = %peer_key, error = %e, "error updating peer fqdn");
		}
		Ok(())
	}

	fn create_peer_conn(
		&self,
		state: &EngineState,
		pub_key: &str,
		allowed_ips: String,
	) -> Result<Arc<Conn>> {
		debug!(peer = %pub_key, "creating peer connection");

		let wg_iface = state.wg_iface.clone().ok_or(EngineError::NotStarted)?;
		let udp_mux = state.udp_mux.clone().ok_or(EngineError::NotStarted)?;
		let udp_mux_srflx = state.udp_mux_srflx.clone().ok_or(EngineError::NotStarted)?;

		let mut stun_turn = state.stuns.clone();
		stun_turn.extend(state.turns.iter().cloned());

		let proxy_config = proxy::Config {
			remote_key: WgPublicKey::from_base64(pub_key)?,
			wg_listen_addr: format!("127.0.0.1:{}", self.config.wg_port),
			wg_iface,
			allowed_ips,
			preshared_key: self.config.pre_shared_key.clone(),
		};

		let timeout = Duration::from_millis(fastrand::u64(
			PEER_CONNECTION_TIMEOUT_MIN_MS..PEER_CONNECTION_TIMEOUT_MAX_MS,
		));

		let conn_config = ConnConfig {
			key: pub_key.to_string(),
			local_key: self.local_key.clone(),
			stun_turn,
			interface_black_list: self.config.iface_black_list.clone(),
			wg_iface_name: self.config.wg_iface_name.clone(),
			disable_ipv6_discovery: self.config.disable_ipv6_discovery,
			timeout,
			proxy_config,
			udp_mux,
			udp_mux_srflx,
			local_wg_port: self.config.wg_port,
			nat_external_ips: parse_nat_external_ip_mappings(
				&self.config.nat_external_ips,
				&self.config.iface_black_list,
			),
		};

		let conn = Conn::new(
			conn_config,
			Arc::clone(&self.status),
			Arc::clone(&self.ice_factory),
		);

		let local = self.local_key.clone();
		let remote = pub_key.to_string();

		let signal = Arc::clone(&self.signal);
		let (offer_local, offer_remote) = (local.clone(), remote.clone());
		conn.set_signal_offer(Arc::new(move |offer: OfferAnswer| {
			let signal = Arc::clone(&signal);
			let local = offer_local.clone();
			let remote = offer_remote.clone();
			Box::pin(async move {
				signal
					.send(SignalMessage::offer(&local, &remote, to_credential(offer)))
					.await
			})
		}));

		let signal = Arc::clone(&self.signal);
		let (answer_local, answer_remote) = (local.clone(), remote.clone());
		conn.set_signal_answer(Arc::new(move |answer: OfferAnswer| {
			let signal = Arc::clone(&signal);
			let local = answer_local.clone();
			let remote = answer_remote.clone();
			Box::pin(async move {
				signal
					.send(SignalMessage::answer(&local, &remote, to_credential(answer)))
					.await
			})
		}));

		let signal = Arc::clone(&self.signal);
		conn.set_signal_candidate(Arc::new(move |candidate: Candidate| {
			let signal = Arc::clone(&signal);
			let local = local.clone();
			let remote = remote.clone();
			Box::pin(async move {
				signal
					.send(SignalMessage::candidate(&local, &remote, &candidate.marshal()))
					.await
			})
		}));

		Ok(conn)
	}

	fn spawn_conn_worker(&self, conn: Arc<Conn>, peer_key: String) {
		let engine = self.arc();
		tokio::spawn(async move {
			loop {
				// randomize the start a bit
				let jitter = fastrand::u64(WORKER_JITTER_MIN_MS..WORKER_JITTER_MAX_MS);
				tokio::time::sleep(Duration::from_millis(jitter)).await;

				if !engine.peer_exists(&peer_key).await {
					debug!(peer = %peer_key, "peer is gone, stopping connection worker");
					return;
				}

				if !engine.signal.is_ready() {
					info!(peer = %peer_key, "signal client isn't ready, skipping connection attempt");
					continue;
				}

				// STUN and TURN servers may have changed meanwhile
				conn.set_stun_turn(engine.stun_turn_snapshot().await);

				match conn.open().await {
					Ok(()) => {}
					Err(ConnError::Closed(_)) => {
						// forced close, exit the loop
						return;
					}
					Err(e) => {
						debug!(peer = %peer_key, error = %e, "connection attempt failed");
					}
				}
			}
		});
	}

	async fn peer_exists(&self, peer_key: &str) -> bool {
		self.state.lock().await.peer_conns.contains_key(peer_key)
	}

	fn spawn_signal_receiver(&self) {
		let engine = self.arc();
		let mut shutdown_rx = self.shutdown_tx.subscribe();
		tokio::spawn(async move {
			loop {
				let msg = tokio::select! {
					msg = engine.signal.recv() => msg,
					_ = shutdown_rx.changed() => {
						if *shutdown_rx.borrow() {
							return;
						}
						continue;
					}
				};

				let msg = match msg {
					Ok(msg) => msg,
					Err(e) => {
						// signaling gone for good: cancel the whole engine,
						// the supervisor retries with backoff
						error!(error = %e, "signal stream unavailable, cancelling engine");
						engine.cancel();
						return;
					}
				};

				let state = engine.state.lock().await;
				let Some(conn) = state.peer_conns.get(&msg.key) else {
					error!(key = %msg.key, "wrongly addressed message");
					continue;
				};

				match msg.body {
					Body::Offer(credential) => {
						conn.on_remote_offer(to_offer_answer(credential));
					}
					Body::Answer(credential) => {
						conn.on_remote_answer(to_offer_answer(credential));
					}
					Body::Candidate { candidate } => match Candidate::unmarshal(&candidate) {
						Ok(parsed) => conn.on_remote_candidate(parsed),
						Err(e) => {
							error!(peer = %msg.key, error = %e, "failed parsing remote candidate")
						}
					},
				}
			}
		});
	}

	pub async fn get_peers(&self) -> Vec<String> {
		self.state.lock().await.peer_conns.keys().cloned().collect()
	}

	pub async fn get_connected_peers(&self) -> Vec<String> {
		let state = self.state.lock().await;
		state
			.peer_conns
			.iter()
			.filter(|(_, conn)| conn.status() == ConnStatus::Connected)
			.map(|(key, _)| key.clone())
			.collect()
	}

	pub async fn get_peer_connection_status(&self, peer_key: &str) -> Option<ConnStatus> {
		let state = self.state.lock().await;
		state.peer_conns.get(peer_key).map(|conn| conn.status())
	}

	pub async fn network_serial(&self) -> u64 {
		self.state.lock().await.network_serial
	}

	/// Current STUN followed by TURN URLs.
	pub async fn stun_turn_snapshot(&self) -> Vec<IceUrl> {
		let state = self.state.lock().await;
		state
			.stuns
			.iter()
			.chain(state.turns.iter())
			.cloned()
			.collect()
	}
}

fn to_credential(offer_answer: OfferAnswer) -> Credential {
	Credential {
		ufrag: offer_answer.credentials.ufrag,
		pwd: offer_answer.credentials.pwd,
		wg_listen_port: offer_answer.wg_listen_port,
		version: offer_answer.version,
	}
}

fn to_offer_answer(credential: Credential) -> OfferAnswer {
	OfferAnswer {
		credentials: IceCredentials {
			ufrag: credential.ufrag,
			pwd: credential.pwd,
		},
		wg_listen_port: credential.wg_listen_port,
		version: credential.version,
	}
}

/// Parse `external[/internal]` NAT 1:1 mappings. `external` is an IPv4
/// literal or the token `stun`; `internal` is an IPv4 literal or an
/// interface name resolved to its first IPv4. Any bad entry discards the
/// whole list.
pub(crate) fn parse_nat_external_ip_mappings(
	mappings: &[String],
	iface_black_list: &[String],
) -> Vec<String> {
	let blacklist: HashSet<&str> = iface_black_list.iter().map(String::as_str).collect();
	let mut mapped = Vec::with_capacity(mappings.len());

	for mapping in mappings {
		let parts: Vec<&str> = mapping.split('/').collect();
		if parts.len() > 2 {
			warn!(mapping = %mapping, "invalid external mapping, too many delimiters; ignoring all mappings");
			return Vec::new();
		}

		let external = parts[0];
		if external != "stun" && external.parse::<Ipv4Addr>().is_err() {
			warn!(mapping = %mapping, "invalid external IP; ignoring all mappings");
			return Vec::new();
		}

		let mut normalized = external.to_string();
		if parts.len() == 2 {
			let internal = parts[1];
			let internal_ip = match internal.parse::<Ipv4Addr>() {
				Ok(ip) => ip,
				Err(_) => {
					// maybe it's an interface name
					if blacklist.contains(internal) {
						warn!(iface = %internal, mapping = %mapping, "internal interface is blacklisted; ignoring all mappings");
						return Vec::new();
					}
					match find_iface_ipv4(internal) {
						Some(ip) => ip,
						None => {
							warn!(iface = %internal, mapping = %mapping, "no IPv4 for internal interface; ignoring all mappings");
							return Vec::new();
						}
					}
				}
			};
			normalized.push('/');
			normalized.push_str(&internal_ip.to_string());
		}

		info!(mapping = %mapping, normalized = %normalized, "parsed external IP mapping");
		mapped.push(normalized);
	}

	mapped
}

fn find_iface_ipv4(name: &str) -> Option<Ipv4Addr> {
	let interfaces = if_addrs::get_if_addrs().ok()?;
	interfaces.into_iter().find_map(|iface| {
		if iface.name != name {
			return None;
		}
		match iface.ip() {
			IpAddr::V4(v4) => Some(v4),
			IpAddr::V6(_) => None,
		}
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn nat_mapping_plain_external() {
		let parsed = parse_nat_external_ip_mappings(&["12.34.56.78".to_string()], &[]);
		assert_eq!(parsed, vec!["12.34.56.78".to_string()]);
	}

	#[test]
	fn nat_mapping_external_with_internal_ip() {
		let parsed = parse_nat_external_ip_mappings(&["12.34.56.78/10.1.2.3".to_string()], &[]);
		assert_eq!(parsed, vec!["12.34.56.78/10.1.2.3".to_string()]);
	}

	#[test]
	fn nat_mapping_stun_token() {
		let parsed = parse_nat_external_ip_mappings(&["stun".to_string()], &[]);
		assert_eq!(parsed, vec!["stun".to_string()]);
	}

	#[test]
	fn nat_mapping_too_many_delimiters_discards_all() {
		let parsed = parse_nat_external_ip_mappings(
			&["12.34.56.78".to_string(), "1.2.3.4/5.6.7.8/9.9.9.9".to_string()],
			&[],
		);
		assert!(parsed.is_empty());
	}

	#[test]
	fn nat_mapping_bad_external_discards_all() {
		let parsed = parse_nat_external_ip_mappings(
			&["not-an-ip".to_string(), "12.34.56.78".to_string()],
			&[],
		);
		assert!(parsed.is_empty());
	}

	#[test]
	fn nat_mapping_blacklisted_internal_discards_all() {
		let parsed = parse_nat_external_ip_mappings(
			&["12.34.56.78/eth0".to_string()],
			&["eth0".to_string()],
		);
		assert!(parsed.is_empty());
	}
}
