// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client-side route selection.
//!
//! The manager keeps one watcher per destination network. Each watcher
//! scores its candidate gateway peers from the status registry and moves
//! the WireGuard allowed-IP entry and the OS route to the winner.

pub mod client;
pub mod sysroute;

pub use sysroute::{CommandRouteTable, MemoryRouteTable, RouteError, RouteTable};

use crate::netmap::RouteConfig;
use crate::status::StatusRegistry;
use client::{ClientNetwork, WatcherHandle};
use heddle_wg::WgIface;
use ipnet::IpNet;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

pub const MAX_METRIC: i32 = 9999;

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
	pub id: String,
	pub net_id: String,
	pub network: IpNet,
	/// Gateway peer's public key (base64).
	pub peer: String,
	pub metric: i32,
	pub masquerade: bool,
	pub network_type: String,
}

impl Route {
	/// Identity of the client network a route belongs to.
	pub fn client_network_id(&self) -> String {
		format!("{}-{}", self.net_id, self.network)
	}

	pub fn from_config(config: &RouteConfig) -> Option<Self> {
		let network: IpNet = match config.network.parse() {
			Ok(network) => network,
			Err(e) => {
				warn!(network = %config.network, error = %e, "skipping route with bad network");
				return None;
			}
		};
		Some(Self {
			id: config.id.clone(),
			net_id: config.net_id.clone(),
			network,
			peer: config.peer.clone(),
			metric: config.metric,
			masquerade: config.masquerade,
			network_type: config.network_type.clone(),
		})
	}
}

#[derive(Debug, Clone)]
pub struct RoutesUpdate {
	pub serial: u64,
	pub routes: Vec<Route>,
}

pub struct Manager {
	wg_iface: Arc<WgIface>,
	status: Arc<StatusRegistry>,
	table: Arc<dyn RouteTable>,
	watchers: Mutex<HashMap<IpNet, WatcherHandle>>,
}

impl Manager {
	pub fn new(
		wg_iface: Arc<WgIface>,
		status: Arc<StatusRegistry>,
		table: Arc<dyn RouteTable>,
	) -> Arc<Self> {
		Arc::new(Self {
			wg_iface,
			status,
			table,
			watchers: Mutex::new(HashMap::new()),
		})
	}

	/// Deliver a new route set. Networks that disappeared get their
	/// watcher stopped; the rest receive the update asynchronously.
	#[instrument(skip(self, routes), fields(serial, count = routes.len()))]
	pub async fn update_routes(&self, serial: u64, routes: Vec<Route>) {
		let mut grouped: HashMap<IpNet, Vec<Route>> = HashMap::new();
		for route in routes {
			grouped.entry(route.network).or_default().push(route);
		}

		let mut watchers = self.watchers.lock().await;

		let removed: Vec<IpNet> = watchers
			.keys()
			.filter(|network| !grouped.contains_key(*network))
			.copied()
			.collect();
		for network in removed {
			debug!(%network, "destination network gone, stopping watcher");
			if let Some(handle) = watchers.remove(&network) {
				let _ = handle.stop_tx.send(true);
			}
		}

		for (network, group) in grouped {
			let handle = watchers.entry(network).or_insert_with(|| {
				debug!(%network, "starting watcher for new destination network");
				ClientNetwork::spawn(
					network,
					Arc::clone(&self.wg_iface),
					Arc::clone(&self.status),
					Arc::clone(&self.table),
				)
			});

			let update_tx = handle.update_tx.clone();
			let update = RoutesUpdate {
				serial,
				routes: group,
			};
			tokio::spawn(async move {
				let _ = update_tx.send(update).await;
			});
		}
	}

	pub async fn stop(&self) {
		let mut watchers = self.watchers.lock().await;
		for (network, handle) in watchers.drain() {
			debug!(%network, "stopping watcher");
			let _ = handle.stop_tx.send(true);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn client_network_id_format() {
		let route = Route {
			id: "r1".to_string(),
			net_id: "corp".to_string(),
			network: "10.2.0.0/24".parse().unwrap(),
			peer: "KEY".to_string(),
			metric: 100,
			masquerade: false,
			network_type: "IPv4".to_string(),
		};
		assert_eq!(route.client_network_id(), "corp-10.2.0.0/24");
	}

	#[test]
	fn from_config_rejects_bad_network() {
		let config = RouteConfig {
			id: "r1".to_string(),
			network: "not-a-cidr".to_string(),
			..Default::default()
		};
		assert!(Route::from_config(&config).is_none());
	}

	#[test]
	fn from_config_parses() {
		let config = RouteConfig {
			id: "r1".to_string(),
			net_id: "corp".to_string(),
			network: "10.2.0.0/24".to_string(),
			peer: "KEY".to_string(),
			metric: 50,
			masquerade: true,
			network_type: "IPv4".to_string(),
		};
		let route = Route::from_config(&config).unwrap();
		assert_eq!(route.network.to_string(), "10.2.0.0/24");
		assert_eq!(route.metric, 50);
		assert!(route.masquerade);
	}
}
