// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::peer::ConnStatus;
use crate::routemanager::sysroute::RouteTable;
use crate::routemanager::{Route, RoutesUpdate, MAX_METRIC};
use crate::status::StatusRegistry;
use heddle_wg::{WgIface, WgPublicKey};
use ipnet::IpNet;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy)]
struct GatewayStatus {
	connected: bool,
	relayed: bool,
	direct: bool,
}

pub(crate) struct WatcherHandle {
	pub update_tx: mpsc::Sender<RoutesUpdate>,
	pub stop_tx: watch::Sender<bool>,
}

/// Event loop for one destination network: tracks the candidate routes,
/// watches their gateway peers, and keeps exactly the best viable route
/// applied to WireGuard and the OS table.
pub(crate) struct ClientNetwork {
	network: IpNet,
	wg_iface: Arc<WgIface>,
	status: Arc<StatusRegistry>,
	table: Arc<dyn RouteTable>,
	routes: HashMap<String, Route>,
	chosen: Option<Route>,
	update_serial: u64,
	peer_update_tx: mpsc::Sender<()>,
	subscriptions: HashMap<String, watch::Sender<bool>>,
}

impl ClientNetwork {
	pub(crate) fn spawn(
		network: IpNet,
		wg_iface: Arc<WgIface>,
		status: Arc<StatusRegistry>,
		table: Arc<dyn RouteTable>,
	) -> WatcherHandle {
		let (update_tx, update_rx) = mpsc::channel(16);
		let (stop_tx, stop_rx) = watch::channel(false);
		let (peer_update_tx, peer_update_rx) = mpsc::channel(16);

		let watcher = Self {
			network,
			wg_iface,
			status,
			table,
			routes: HashMap::new(),
			chosen: None,
			update_serial: 0,
			peer_update_tx,
			subscriptions: HashMap::new(),
		};
		tokio::spawn(watcher.run(update_rx, stop_rx, peer_update_rx));

		WatcherHandle { update_tx, stop_tx }
	}

	#[instrument(skip_all, fields(network = %self.network))]
	async fn run(
		mut self,
		mut update_rx: mpsc::Receiver<RoutesUpdate>,
		mut stop_rx: watch::Receiver<bool>,
		mut peer_update_rx: mpsc::Receiver<()>,
	) {
		loop {
			tokio::select! {
				_ = stop_rx.changed() => {
					if *stop_rx.borrow() {
						debug!("stopping watcher");
						if let Err(e) = self.remove_route_from_peer_and_system().await {
							error!(error = %e, "cleanup on stop failed");
						}
						for (_, closer) in self.subscriptions.drain() {
							let _ = closer.send(true);
						}
						return;
					}
				}

				Some(()) = peer_update_rx.recv() => {
					if let Err(e) = self.recalculate().await {
						error!(error = %e, "route recalculation failed");
					}
				}

				Some(update) = update_rx.recv() => {
					if update.serial < self.update_serial {
						warn!(serial = update.serial, "routes update with stale serial, ignoring");
						continue;
					}
					debug!(serial = update.serial, routes = update.routes.len(), "routes update");

					self.apply_routes(update.routes);
					self.update_serial = update.serial;

					if let Err(e) = self.recalculate().await {
						error!(error = %e, "route recalculation failed");
					}

					self.start_subscriptions();
				}
			}
		}
	}

	/// Replace the route set. Gateways no longer referenced lose their
	/// status subscription.
	fn apply_routes(&mut self, routes: Vec<Route>) {
		let mut update_map = HashMap::new();
		for route in routes {
			update_map.insert(route.id.clone(), route);
		}

		let referenced: HashSet<String> =
			update_map.values().map(|r| r.peer.clone()).collect();
		let gone: Vec<String> = self
			.subscriptions
			.keys()
			.filter(|peer| !referenced.contains(*peer))
			.cloned()
			.collect();
		for peer in gone {
			if let Some(closer) = self.subscriptions.remove(&peer) {
				let _ = closer.send(true);
			}
		}

		self.routes = update_map;
	}

	fn start_subscriptions(&mut self) {
		let gateways: HashSet<String> = self.routes.values().map(|r| r.peer.clone()).collect();
		for peer in gateways {
			if self.subscriptions.contains_key(&peer) {
				continue;
			}
			let (closer_tx, closer_rx) = watch::channel(false);
			self.subscriptions.insert(peer.clone(), closer_tx);
			tokio::spawn(watch_peer(
				peer,
				Arc::clone(&self.status),
				self.peer_update_tx.clone(),
				closer_rx,
			));
		}
	}

	fn gateway_statuses(&self) -> HashMap<String, GatewayStatus> {
		let mut statuses = HashMap::new();
		for route in self.routes.values() {
			match self.status.get_peer(&route.peer) {
				Ok(state) => {
					statuses.insert(
						route.id.clone(),
						GatewayStatus {
							connected: state.conn_status == ConnStatus::Connected.to_string(),
							relayed: state.relayed,
							direct: state.direct,
						},
					);
				}
				Err(e) => debug!(peer = %route.peer, error = %e, "cannot fetch gateway state"),
			}
		}
		statuses
	}

	/// Highest score wins; the incumbent wins ties so a healthy route is
	/// never churned for an equal one.
	fn best_route(&self, statuses: &HashMap<String, GatewayStatus>) -> Option<String> {
		let mut chosen: Option<String> = None;
		let mut chosen_score = 0;

		let current_id = self.chosen.as_ref().map(|r| r.id.clone()).unwrap_or_default();

		// stable iteration order keeps selection deterministic on ties
		let mut ids: Vec<&String> = self.routes.keys().collect();
		ids.sort();

		for id in ids {
			let route = &self.routes[id];
			let Some(status) = statuses.get(&route.id) else {
				continue;
			};
			if !status.connected {
				continue;
			}

			let mut score = 0;
			if route.metric < MAX_METRIC {
				score = (MAX_METRIC - route.metric) * 10;
			}
			if !status.relayed {
				score += 1;
			}
			if !status.direct {
				score += 1;
			}

			if score > chosen_score || (score == chosen_score && current_id == route.id) {
				chosen = Some(route.id.clone());
				chosen_score = score;
			}
		}

		match &chosen {
			None => {
				let gateways: Vec<&str> =
					self.routes.values().map(|r| r.peer.as_str()).collect();
				warn!(
					?gateways,
					"no route chosen, no gateway peer is connected"
				);
			}
			Some(id) if *id != current_id => {
				info!(route = %id, peer = %self.routes[id].peer, score = chosen_score, "new chosen route");
			}
			_ => {}
		}

		chosen
	}

	async fn recalculate(&mut self) -> crate::routemanager::sysroute::Result<()> {
		let statuses = self.gateway_statuses();
		let chosen_id = self.best_route(&statuses);

		let Some(chosen_id) = chosen_id else {
			if self.chosen.is_some() {
				self.remove_route_from_peer_and_system().await?;
			}
			self.chosen = None;
			return Ok(());
		};

		if let Some(current) = &self.chosen {
			if current.id == chosen_id && *current == self.routes[&chosen_id] {
				return Ok(());
			}
		}

		if let Some(current) = self.chosen.clone() {
			self.remove_route_from_wg_peer(&current.peer).await;
		} else {
			let gateway_addr = self.wg_iface.address().await.addr();
			self.table.add_route(&self.network, gateway_addr).await?;
		}

		let new_route = self.routes[&chosen_id].clone();
		match WgPublicKey::from_base64(&new_route.peer) {
			Ok(peer_key) => {
				if let Err(e) = self.wg_iface.add_allowed_ip(&peer_key, &self.network).await {
					error!(peer = %new_route.peer, error = %e, "cannot add allowed IP for chosen route");
				}
			}
			Err(e) => error!(peer = %new_route.peer, error = %e, "invalid gateway key"),
		}
		self.chosen = Some(new_route);

		Ok(())
	}

	/// Only touches WireGuard while the gateway is still connected; a
	/// disconnected peer's entry is already being torn down elsewhere.
	async fn remove_route_from_wg_peer(&self, peer: &str) {
		let connected = self
			.status
			.get_peer(peer)
			.map(|s| s.conn_status == ConnStatus::Connected.to_string())
			.unwrap_or(false);
		if !connected {
			return;
		}

		match WgPublicKey::from_base64(peer) {
			Ok(peer_key) => {
				if let Err(e) = self
					.wg_iface
					.remove_allowed_ip(&peer_key, &self.network)
					.await
				{
					warn!(peer = %peer, error = %e, "cannot remove allowed IP");
				}
			}
			Err(e) => warn!(peer = %peer, error = %e, "invalid gateway key"),
		}
	}

	async fn remove_route_from_peer_and_system(
		&mut self,
	) -> crate::routemanager::sysroute::Result<()> {
		if let Some(current) = self.chosen.clone() {
			self.remove_route_from_wg_peer(&current.peer).await;
			let gateway_addr = self.wg_iface.address().await.addr();
			self.table.remove_route(&self.network, gateway_addr).await?;
		}
		self.chosen = None;
		Ok(())
	}
}

/// Forwards a gateway peer's status edges into the watcher loop.
/// Connecting is skipped: it never changes a routing decision.
async fn watch_peer(
	peer: String,
	status: Arc<StatusRegistry>,
	peer_update_tx: mpsc::Sender<()>,
	mut closer_rx: watch::Receiver<bool>,
) {
	let mut notifier = status.peer_state_change_notifier(&peer);
	loop {
		tokio::select! {
			_ = closer_rx.changed() => {
				if *closer_rx.borrow() {
					return;
				}
			}

			changed = notifier.changed() => {
				if changed.is_err() {
					return;
				}
				match status.get_peer(&peer) {
					Ok(state) if state.conn_status == ConnStatus::Connecting.to_string() => continue,
					Err(_) => continue,
					Ok(state) => {
						if peer_update_tx.send(()).await.is_err() {
							return;
						}
						debug!(peer = %peer, state = %state.conn_status, "triggered route state update");
					}
				}
			}
		}
	}
}
