// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{IceError, Result};
use crate::probe::{Probe, ProbeEvent};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

const MUX_BUFFER: usize = 1500;
const QUEUE_DEPTH: usize = 256;

/// One UDP socket shared by every ICE agent on this engine.
///
/// Incoming packets are demultiplexed two ways: connectivity probes are
/// routed to the agent whose local ufrag they name, everything else is
/// routed to whichever transport has claimed the source address. Packets
/// that match neither are dropped.
pub struct UdpMux {
	socket: Arc<UdpSocket>,
	local_addr: SocketAddr,
	state: Arc<Mutex<MuxState>>,
	shutdown_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct MuxState {
	by_addr: HashMap<SocketAddr, mpsc::Sender<Vec<u8>>>,
	by_ufrag: HashMap<String, mpsc::Sender<ProbeEvent>>,
}

impl UdpMux {
	pub async fn bind(port: u16, ipv6: bool) -> Result<Arc<Self>> {
		let bind_addr = if ipv6 {
			format!("[::]:{port}")
		} else {
			format!("0.0.0.0:{port}")
		};
		let socket = UdpSocket::bind(&bind_addr).await?;
		Ok(Self::from_socket(socket))
	}

	pub fn from_socket(socket: UdpSocket) -> Arc<Self> {
		let local_addr = socket.local_addr().expect("bound socket has a local addr");
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let mux = Arc::new(Self {
			socket: Arc::new(socket),
			local_addr,
			state: Arc::new(Mutex::new(MuxState::default())),
			shutdown_tx,
		});
		mux.spawn_demux(shutdown_rx);
		mux
	}

	fn spawn_demux(&self, mut shutdown_rx: watch::Receiver<bool>) {
		let socket = Arc::clone(&self.socket);
		let state = Arc::clone(&self.state);
		tokio::spawn(async move {
			let mut buf = vec![0u8; MUX_BUFFER];
			loop {
				tokio::select! {
					biased;

					_ = shutdown_rx.changed() => {
						if *shutdown_rx.borrow() {
							debug!("mux demux loop shutting down");
							break;
						}
					}

					result = socket.recv_from(&mut buf) => {
						let (len, from) = match result {
							Ok(r) => r,
							Err(e) => {
								warn!(error = %e, "mux recv failed");
								continue;
							}
						};
						let packet = &buf[..len];

						if Probe::is_probe(packet) {
							if let Some(probe) = Probe::decode(packet) {
								let target = {
									let state = state.lock().unwrap();
									state.by_ufrag.get(&probe.recipient_ufrag).cloned()
								};
								match target {
									Some(tx) => {
										let _ = tx.try_send(ProbeEvent { from, probe });
									}
									None => trace!(?from, "probe for unknown ufrag"),
								}
							}
							continue;
						}

						let target = {
							let state = state.lock().unwrap();
							state.by_addr.get(&from).cloned()
						};
						match target {
							Some(tx) => {
								if tx.try_send(packet.to_vec()).is_err() {
									trace!(?from, "transport queue full, dropping packet");
								}
							}
							None => trace!(?from, len, "packet from unclaimed address"),
						}
					}
				}
			}
		});
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	pub fn local_port(&self) -> u16 {
		self.local_addr.port()
	}

	pub async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
		if *self.shutdown_tx.borrow() {
			return Err(IceError::MuxClosed);
		}
		Ok(self.socket.send_to(buf, target).await?)
	}

	/// Route all future non-probe packets from `addr` to the returned
	/// queue. A second claim replaces the first.
	pub fn claim(&self, addr: SocketAddr) -> mpsc::Receiver<Vec<u8>> {
		let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
		self.state.lock().unwrap().by_addr.insert(addr, tx);
		rx
	}

	pub fn release(&self, addr: &SocketAddr) {
		self.state.lock().unwrap().by_addr.remove(addr);
	}

	pub fn register_ufrag(&self, ufrag: &str) -> mpsc::Receiver<ProbeEvent> {
		let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
		self.state
			.lock()
			.unwrap()
			.by_ufrag
			.insert(ufrag.to_string(), tx);
		rx
	}

	pub fn unregister_ufrag(&self, ufrag: &str) {
		self.state.lock().unwrap().by_ufrag.remove(ufrag);
	}

	pub fn close(&self) {
		let _ = self.shutdown_tx.send(true);
		let mut state = self.state.lock().unwrap();
		state.by_addr.clear();
		state.by_ufrag.clear();
	}
}

impl std::fmt::Debug for UdpMux {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("UdpMux")
			.field("local_addr", &self.local_addr)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	async fn localhost_mux() -> Arc<UdpMux> {
		let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		UdpMux::from_socket(socket)
	}

	#[tokio::test]
	async fn routes_probes_by_ufrag() {
		let mux = localhost_mux().await;
		let mut probes = mux.register_ufrag("aliceufr");

		let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let probe = Probe::request("aliceufr", "bobufrag");
		sender
			.send_to(&probe.encode(), mux.local_addr())
			.await
			.unwrap();

		let event = tokio::time::timeout(Duration::from_secs(1), probes.recv())
			.await
			.unwrap()
			.unwrap();
		assert_eq!(event.probe.sender_ufrag, "bobufrag");
		assert_eq!(event.from.port(), sender.local_addr().unwrap().port());
	}

	#[tokio::test]
	async fn routes_data_by_claimed_address() {
		let mux = localhost_mux().await;
		let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let mut data = mux.claim(sender.local_addr().unwrap());

		sender.send_to(b"payload", mux.local_addr()).await.unwrap();

		let packet = tokio::time::timeout(Duration::from_secs(1), data.recv())
			.await
			.unwrap()
			.unwrap();
		assert_eq!(packet, b"payload");
	}

	#[tokio::test]
	async fn drops_unclaimed_traffic() {
		let mux = localhost_mux().await;
		let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		sender.send_to(b"stray", mux.local_addr()).await.unwrap();
		tokio::time::sleep(Duration::from_millis(100)).await;

		// claimed afterwards: the earlier packet must not appear
		let mut data = mux.claim(sender.local_addr().unwrap());
		let result = tokio::time::timeout(Duration::from_millis(200), data.recv()).await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn send_after_close_fails() {
		let mux = localhost_mux().await;
		let target = mux.local_addr();
		mux.close();
		assert!(matches!(
			mux.send_to(b"x", target).await,
			Err(IceError::MuxClosed)
		));
	}
}
