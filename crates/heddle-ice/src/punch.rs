// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Default [`IceAgent`] backend.
//!
//! Gathers host, NAT-mapped and server-reflexive candidates and runs
//! credential-tagged UDP probes against every remote candidate until a
//! round trip succeeds. The first validated address becomes the selected
//! pair; the transport stays on the shared mux socket. Relay allocation
//! is out of reach for this backend, a TURN-capable agent can be plugged
//! in through [`IceAgentFactory`].

use crate::agent::{
	AgentConfig, CandidateHandler, CandidatePair, ConnectionState, IceAgent, IceAgentFactory,
	IceCredentials, IceTransport, InterfaceFilter, NetworkType, PairHandler, StateHandler,
};
use crate::candidate::{Candidate, CandidateType};
use crate::error::{IceError, Result};
use crate::mux::UdpMux;
use crate::probe::{Probe, ProbeEvent, ProbeKind};
use crate::stun;
use crate::url::SchemeType;
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, instrument, trace, warn};

const CHECK_INTERVAL: Duration = Duration::from_millis(250);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);

pub struct PunchFactory;

impl IceAgentFactory for PunchFactory {
	fn create(&self, config: AgentConfig) -> Result<Arc<dyn IceAgent>> {
		Ok(PunchAgent::new(config))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
	Host,
	Srflx,
}

struct MuxProbe {
	slot: Slot,
	event: ProbeEvent,
}

#[derive(Default)]
struct Handlers {
	candidate: Mutex<Option<CandidateHandler>>,
	state: Mutex<Option<StateHandler>>,
	pair: Mutex<Option<PairHandler>>,
}

impl Handlers {
	fn fire_candidate(&self, candidate: Candidate) {
		if let Some(handler) = self.candidate.lock().unwrap().as_ref() {
			handler(candidate);
		}
	}

	fn fire_state(&self, state: ConnectionState) {
		if let Some(handler) = self.state.lock().unwrap().as_ref() {
			handler(state);
		}
	}

	fn fire_pair(&self, pair: CandidatePair) {
		if let Some(handler) = self.pair.lock().unwrap().as_ref() {
			handler(pair);
		}
	}
}

struct LocalCandidate {
	candidate: Candidate,
	slot: Slot,
}

pub struct PunchAgent {
	config_urls: Vec<crate::url::IceUrl>,
	network_types: Vec<NetworkType>,
	candidate_types: Vec<CandidateType>,
	failed_timeout: Duration,
	interface_filter: Option<InterfaceFilter>,
	nat_external_ips: Vec<String>,
	host_mux: Arc<UdpMux>,
	srflx_mux: Arc<UdpMux>,
	creds: IceCredentials,
	handlers: Arc<Handlers>,
	local: Mutex<Vec<LocalCandidate>>,
	remote: Arc<Mutex<Vec<Candidate>>>,
	probe_rx: tokio::sync::Mutex<Option<mpsc::Receiver<MuxProbe>>>,
	selected: Arc<Mutex<Option<(CandidatePair, SocketAddr)>>>,
	last_seen: Arc<Mutex<Instant>>,
	closed_tx: watch::Sender<bool>,
}

impl PunchAgent {
	pub fn new(config: AgentConfig) -> Arc<Self> {
		let creds = IceCredentials::random();
		let (closed_tx, closed_rx) = watch::channel(false);

		let host_probes = config.udp_mux.register_ufrag(&creds.ufrag);
		// both slots can point at the same socket in tests
		let srflx_probes = if Arc::ptr_eq(&config.udp_mux, &config.udp_mux_srflx) {
			None
		} else {
			Some(config.udp_mux_srflx.register_ufrag(&creds.ufrag))
		};

		let (merged_tx, merged_rx) = mpsc::channel(256);
		spawn_probe_merge(host_probes, srflx_probes, merged_tx, closed_rx);

		Arc::new(Self {
			config_urls: config.urls,
			network_types: config.network_types,
			candidate_types: config.candidate_types,
			failed_timeout: config.failed_timeout,
			interface_filter: config.interface_filter,
			nat_external_ips: config.nat_external_ips,
			host_mux: config.udp_mux,
			srflx_mux: config.udp_mux_srflx,
			creds,
			handlers: Arc::new(Handlers::default()),
			local: Mutex::new(Vec::new()),
			remote: Arc::new(Mutex::new(Vec::new())),
			probe_rx: tokio::sync::Mutex::new(Some(merged_rx)),
			selected: Arc::new(Mutex::new(None)),
			last_seen: Arc::new(Mutex::new(Instant::now())),
			closed_tx,
		})
	}

	fn mux_for(&self, slot: Slot) -> &Arc<UdpMux> {
		match slot {
			Slot::Host => &self.host_mux,
			Slot::Srflx => &self.srflx_mux,
		}
	}

	fn wants(&self, typ: CandidateType) -> bool {
		self.candidate_types.contains(&typ)
	}

	fn ip_allowed(&self, ip: &IpAddr) -> bool {
		match ip {
			IpAddr::V4(_) => self.network_types.contains(&NetworkType::Udp4),
			IpAddr::V6(_) => self.network_types.contains(&NetworkType::Udp6),
		}
	}

	fn add_local(&self, candidate: Candidate, slot: Slot) {
		{
			let mut local = self.local.lock().unwrap();
			let dup = local
				.iter()
				.any(|l| l.candidate.address == candidate.address && l.candidate.port == candidate.port);
			if dup {
				return;
			}
			local.push(LocalCandidate {
				candidate: candidate.clone(),
				slot,
			});
		}
		debug!(candidate = %candidate, "discovered local candidate");
		self.handlers.fire_candidate(candidate);
	}

	fn gather_host_candidates(&self) {
		let port = self.host_mux.local_port();
		let interfaces = match if_addrs::get_if_addrs() {
			Ok(interfaces) => interfaces,
			Err(e) => {
				warn!(error = %e, "interface enumeration failed");
				return;
			}
		};

		for iface in interfaces {
			if iface.is_loopback() {
				continue;
			}
			if let Some(filter) = &self.interface_filter {
				if !filter(&iface.name) {
					trace!(name = %iface.name, "interface filtered out");
					continue;
				}
			}
			let ip = iface.ip();
			if !self.ip_allowed(&ip) {
				continue;
			}
			self.add_local(Candidate::new(CandidateType::Host, ip, port), Slot::Host);
		}
	}

	fn gather_nat_mapped_candidates(&self) {
		let port = self.host_mux.local_port();
		for mapping in &self.nat_external_ips {
			let external = mapping.split('/').next().unwrap_or_default();
			if external == "stun" {
				// covered by server-reflexive discovery
				continue;
			}
			match external.parse::<IpAddr>() {
				Ok(ip) => {
					self.add_local(Candidate::new(CandidateType::Host, ip, port), Slot::Host)
				}
				Err(_) => warn!(mapping = %mapping, "ignoring unparseable NAT mapping"),
			}
		}
	}

	async fn gather_srflx_candidates(&self) {
		for url in &self.config_urls {
			if url.scheme != SchemeType::Stun {
				continue;
			}
			let server = match stun::resolve_server(&url.host, url.port).await {
				Ok(server) => server,
				Err(e) => {
					warn!(url = %url, error = %e, "cannot resolve STUN server");
					continue;
				}
			};
			match stun::query_mapped_address(&self.srflx_mux, server).await {
				Ok(mapped) => {
					let local = self.srflx_mux.local_addr();
					let candidate =
						Candidate::new(CandidateType::ServerReflexive, mapped.ip(), mapped.port())
							.with_related(local.ip(), local.port());
					self.add_local(candidate, Slot::Srflx);
				}
				Err(e) => {
					warn!(url = %url, error = %e, "server-reflexive discovery failed");
				}
			}
		}
	}

	async fn send_checks(&self, remote_ufrag: &str) {
		let targets: Vec<SocketAddr> = {
			let remote = self.remote.lock().unwrap();
			remote.iter().filter_map(|c| c.socket_addr().ok()).collect()
		};
		let probe = Probe::request(remote_ufrag, &self.creds.ufrag).encode();
		for target in targets {
			let _ = self.host_mux.send_to(&probe, target).await;
			if !Arc::ptr_eq(&self.host_mux, &self.srflx_mux) {
				let _ = self.srflx_mux.send_to(&probe, target).await;
			}
		}
	}

	async fn answer_request(&self, slot: Slot, event: &ProbeEvent) {
		let response = Probe::response(&event.probe.sender_ufrag, &self.creds.ufrag).encode();
		let _ = self.mux_for(slot).send_to(&response, event.from).await;
		*self.last_seen.lock().unwrap() = Instant::now();
	}

	fn pair_for(&self, slot: Slot, remote_addr: SocketAddr) -> CandidatePair {
		let local = {
			let local = self.local.lock().unwrap();
			local
				.iter()
				.find(|l| l.slot == slot)
				.map(|l| l.candidate.clone())
		};
		let local = local.unwrap_or_else(|| {
			let addr = self.mux_for(slot).local_addr();
			Candidate::new(CandidateType::PeerReflexive, addr.ip(), addr.port())
		});

		let remote = {
			let remote = self.remote.lock().unwrap();
			remote
				.iter()
				.find(|c| c.socket_addr().map(|a| a == remote_addr).unwrap_or(false))
				.cloned()
		};
		let remote = remote.unwrap_or_else(|| {
			Candidate::new(CandidateType::PeerReflexive, remote_addr.ip(), remote_addr.port())
		});

		CandidatePair { local, remote }
	}

	#[instrument(skip(self, remote), fields(ufrag = %self.creds.ufrag))]
	async fn connect(&self, remote: IceCredentials) -> Result<Arc<dyn IceTransport>> {
		let mut probe_rx = self
			.probe_rx
			.lock()
			.await
			.take()
			.ok_or(IceError::Closed)?;

		self.handlers.fire_state(ConnectionState::Checking);

		let mut closed_rx = self.closed_tx.subscribe();
		let deadline = Instant::now() + self.failed_timeout;
		let mut check_tick = tokio::time::interval(CHECK_INTERVAL);
		check_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

		let (slot, validated_addr) = loop {
			if Instant::now() >= deadline {
				self.handlers.fire_state(ConnectionState::Failed);
				return Err(IceError::ConnectivityTimeout(self.failed_timeout));
			}

			tokio::select! {
				event = probe_rx.recv() => {
					let Some(MuxProbe { slot, event }) = event else {
						return Err(IceError::Closed);
					};
					match event.probe.kind {
						ProbeKind::Request if event.probe.recipient_ufrag == self.creds.ufrag => {
							trace!(from = ?event.from, "answering connectivity check");
							self.answer_request(slot, &event).await;
						}
						ProbeKind::Response
							if event.probe.recipient_ufrag == self.creds.ufrag
								&& event.probe.sender_ufrag == remote.ufrag =>
						{
							break (slot, event.from);
						}
						_ => trace!(from = ?event.from, "ignoring mismatched probe"),
					}
				}

				_ = check_tick.tick() => {
					self.send_checks(&remote.ufrag).await;
				}

				_ = closed_rx.changed() => {
					if *closed_rx.borrow() {
						return Err(IceError::Closed);
					}
				}
			}
		};

		let pair = self.pair_for(slot, validated_addr);
		*self.selected.lock().unwrap() = Some((pair.clone(), validated_addr));
		*self.last_seen.lock().unwrap() = Instant::now();

		let mux = Arc::clone(self.mux_for(slot));
		let data_rx = mux.claim(validated_addr);

		debug!(pair = %pair, "connectivity established");
		self.handlers.fire_state(ConnectionState::Connected);
		self.handlers.fire_pair(pair);

		self.spawn_supervision(probe_rx, slot, validated_addr, remote.ufrag.clone());

		Ok(Arc::new(PunchTransport {
			mux,
			remote: validated_addr,
			data_rx: tokio::sync::Mutex::new(data_rx),
			last_seen: Arc::clone(&self.last_seen),
		}))
	}

	/// Keeps the pair warm after selection: answers incoming checks,
	/// sends keepalive probes and raises Disconnected when the remote
	/// goes quiet for longer than the failed timeout.
	fn spawn_supervision(
		&self,
		mut probe_rx: mpsc::Receiver<MuxProbe>,
		slot: Slot,
		remote_addr: SocketAddr,
		remote_ufrag: String,
	) {
		let handlers = Arc::clone(&self.handlers);
		let last_seen = Arc::clone(&self.last_seen);
		let mux = Arc::clone(self.mux_for(slot));
		let local_ufrag = self.creds.ufrag.clone();
		let failed_timeout = self.failed_timeout;
		let mut closed_rx = self.closed_tx.subscribe();

		tokio::spawn(async move {
			let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
			keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

			loop {
				tokio::select! {
					event = probe_rx.recv() => {
						let Some(MuxProbe { slot: event_slot, event }) = event else {
							break;
						};
						if event.probe.recipient_ufrag != local_ufrag {
							continue;
						}
						if event.probe.kind == ProbeKind::Request {
							let response =
								Probe::response(&event.probe.sender_ufrag, &local_ufrag).encode();
							let _ = mux.send_to(&response, event.from).await;
						}
						if event.probe.sender_ufrag == remote_ufrag && event_slot == slot {
							*last_seen.lock().unwrap() = Instant::now();
						}
					}

					_ = keepalive.tick() => {
						let probe = Probe::request(&remote_ufrag, &local_ufrag).encode();
						let _ = mux.send_to(&probe, remote_addr).await;

						let quiet = last_seen.lock().unwrap().elapsed();
						if quiet > failed_timeout {
							debug!(?remote_addr, ?quiet, "peer went quiet");
							handlers.fire_state(ConnectionState::Disconnected);
							break;
						}
					}

					_ = closed_rx.changed() => {
						if *closed_rx.borrow() {
							break;
						}
					}
				}
			}
		});
	}
}

fn spawn_probe_merge(
	mut host_rx: mpsc::Receiver<ProbeEvent>,
	mut srflx_rx: Option<mpsc::Receiver<ProbeEvent>>,
	merged_tx: mpsc::Sender<MuxProbe>,
	mut closed_rx: watch::Receiver<bool>,
) {
	tokio::spawn(async move {
		loop {
			tokio::select! {
				event = host_rx.recv() => {
					match event {
						Some(event) => {
							let _ = merged_tx
								.send(MuxProbe { slot: Slot::Host, event })
								.await;
						}
						None => break,
					}
				}

				event = recv_optional(&mut srflx_rx) => {
					match event {
						Some(event) => {
							let _ = merged_tx
								.send(MuxProbe { slot: Slot::Srflx, event })
								.await;
						}
						None => break,
					}
				}

				_ = closed_rx.changed() => {
					if *closed_rx.borrow() {
						break;
					}
				}
			}
		}
	});
}

async fn recv_optional(rx: &mut Option<mpsc::Receiver<ProbeEvent>>) -> Option<ProbeEvent> {
	match rx {
		Some(rx) => rx.recv().await,
		None => std::future::pending().await,
	}
}

#[async_trait]
impl IceAgent for PunchAgent {
	fn on_candidate(&self, handler: CandidateHandler) {
		*self.handlers.candidate.lock().unwrap() = Some(handler);
	}

	fn on_connection_state_change(&self, handler: StateHandler) {
		*self.handlers.state.lock().unwrap() = Some(handler);
	}

	fn on_selected_pair(&self, handler: PairHandler) {
		*self.handlers.pair.lock().unwrap() = Some(handler);
	}

	fn local_credentials(&self) -> IceCredentials {
		self.creds.clone()
	}

	async fn gather_candidates(&self) -> Result<()> {
		if self.wants(CandidateType::Host) {
			self.gather_host_candidates();
			self.gather_nat_mapped_candidates();
		}
		if self.wants(CandidateType::ServerReflexive) {
			self.gather_srflx_candidates().await;
		}
		if self.wants(CandidateType::Relay)
			&& self.config_urls.iter().any(|u| u.scheme.is_turn())
		{
			debug!("relay candidates require a TURN-capable agent backend, skipping");
		}
		Ok(())
	}

	async fn add_remote_candidate(&self, candidate: Candidate) -> Result<()> {
		let mut remote = self.remote.lock().unwrap();
		let dup = remote
			.iter()
			.any(|c| c.address == candidate.address && c.port == candidate.port);
		if !dup {
			debug!(candidate = %candidate, "added remote candidate");
			remote.push(candidate);
		}
		Ok(())
	}

	async fn dial(&self, remote: IceCredentials) -> Result<Arc<dyn IceTransport>> {
		self.connect(remote).await
	}

	async fn accept(&self, remote: IceCredentials) -> Result<Arc<dyn IceTransport>> {
		self.connect(remote).await
	}

	async fn selected_pair(&self) -> Result<CandidatePair> {
		self.selected
			.lock()
			.unwrap()
			.as_ref()
			.map(|(pair, _)| pair.clone())
			.ok_or(IceError::NotConnected)
	}

	async fn close(&self) -> Result<()> {
		let _ = self.closed_tx.send(true);
		self.host_mux.unregister_ufrag(&self.creds.ufrag);
		if !Arc::ptr_eq(&self.host_mux, &self.srflx_mux) {
			self.srflx_mux.unregister_ufrag(&self.creds.ufrag);
		}
		if let Some((_, addr)) = self.selected.lock().unwrap().take() {
			self.host_mux.release(&addr);
			self.srflx_mux.release(&addr);
		}
		self.handlers.fire_state(ConnectionState::Closed);
		Ok(())
	}
}

struct PunchTransport {
	mux: Arc<UdpMux>,
	remote: SocketAddr,
	data_rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
	last_seen: Arc<Mutex<Instant>>,
}

#[async_trait]
impl IceTransport for PunchTransport {
	async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
		let mut rx = self.data_rx.lock().await;
		match rx.recv().await {
			Some(packet) => {
				*self.last_seen.lock().unwrap() = Instant::now();
				let len = packet.len().min(buf.len());
				buf[..len].copy_from_slice(&packet[..len]);
				Ok(len)
			}
			None => Err(std::io::Error::new(
				std::io::ErrorKind::ConnectionAborted,
				"transport closed",
			)),
		}
	}

	async fn send(&self, buf: &[u8]) -> std::io::Result<usize> {
		self.mux
			.send_to(buf, self.remote)
			.await
			.map_err(|e| std::io::Error::other(e.to_string()))
	}

	fn local_addr(&self) -> SocketAddr {
		self.mux.local_addr()
	}

	fn remote_addr(&self) -> SocketAddr {
		self.remote
	}

	async fn close(&self) -> std::io::Result<()> {
		self.mux.release(&self.remote);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::net::UdpSocket;

	async fn agent_on_localhost(
		failed_timeout: Duration,
		nat_external_ips: Vec<String>,
	) -> (Arc<PunchAgent>, SocketAddr) {
		let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let mux = UdpMux::from_socket(socket);
		let addr = mux.local_addr();
		let agent = PunchAgent::new(AgentConfig {
			urls: vec![],
			network_types: vec![NetworkType::Udp4],
			candidate_types: vec![CandidateType::Host, CandidateType::ServerReflexive],
			failed_timeout,
			interface_filter: None,
			udp_mux: Arc::clone(&mux),
			udp_mux_srflx: mux,
			nat_external_ips,
			multicast_dns: false,
		});
		(agent, addr)
	}

	fn loopback_candidate(addr: SocketAddr) -> Candidate {
		Candidate::new(CandidateType::Host, addr.ip(), addr.port())
	}

	#[tokio::test]
	async fn two_agents_establish_a_transport() {
		let (a, addr_a) = agent_on_localhost(Duration::from_secs(5), vec![]).await;
		let (b, addr_b) = agent_on_localhost(Duration::from_secs(5), vec![]).await;

		a.add_remote_candidate(loopback_candidate(addr_b)).await.unwrap();
		b.add_remote_candidate(loopback_candidate(addr_a)).await.unwrap();

		let creds_a = a.local_credentials();
		let creds_b = b.local_credentials();

		let (ta, tb) = tokio::join!(a.dial(creds_b), b.accept(creds_a));
		let (ta, tb) = (ta.unwrap(), tb.unwrap());

		ta.send(b"ping").await.unwrap();
		let mut buf = [0u8; 64];
		let n = tb.recv(&mut buf).await.unwrap();
		assert_eq!(&buf[..n], b"ping");

		tb.send(b"pong").await.unwrap();
		let n = ta.recv(&mut buf).await.unwrap();
		assert_eq!(&buf[..n], b"pong");

		assert!(a.selected_pair().await.is_ok());
		assert!(b.selected_pair().await.is_ok());
	}

	#[tokio::test]
	async fn dial_times_out_without_candidates() {
		let (a, _) = agent_on_localhost(Duration::from_millis(400), vec![]).await;
		let err = a
			.dial(IceCredentials::random())
			.await
			.err()
			.expect("no remote candidates");
		assert!(matches!(err, IceError::ConnectivityTimeout(_)));
	}

	#[tokio::test]
	async fn nat_mapping_produces_host_candidate() {
		let (a, _) = agent_on_localhost(
			Duration::from_secs(1),
			vec!["203.0.113.9".to_string(), "stun".to_string()],
		)
		.await;

		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		a.on_candidate(Box::new(move |c| sink.lock().unwrap().push(c)));

		a.gather_candidates().await.unwrap();

		let seen = seen.lock().unwrap();
		assert!(seen
			.iter()
			.any(|c| c.typ == CandidateType::Host && c.address == "203.0.113.9"));
		assert!(!seen.iter().any(|c| c.address == "stun"));
	}

	#[tokio::test]
	async fn failed_state_is_reported() {
		let (a, _) = agent_on_localhost(Duration::from_millis(300), vec![]).await;

		let states = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&states);
		a.on_connection_state_change(Box::new(move |s| sink.lock().unwrap().push(s)));

		let _ = a.dial(IceCredentials::random()).await;

		let states = states.lock().unwrap();
		assert!(states.contains(&ConnectionState::Checking));
		assert!(states.contains(&ConnectionState::Failed));
	}
}
