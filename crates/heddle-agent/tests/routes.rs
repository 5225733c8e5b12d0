// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Route selection: scoring, failover, stickiness, serial ordering and
//! watcher teardown, all against in-memory backends.

mod support;

use heddle_agent::routemanager::{Manager, MemoryRouteTable, Route};
use heddle_agent::status::{PeerState, StatusRegistry};
use heddle_wg::{MemoryBackend, WgBackend, WgIface, WgKeyPair, WgPublicKey, DEFAULT_MTU};
use ipnet::IpNet;
use std::sync::Arc;
use std::time::Duration;
use support::wait_for;

const IFACE: &str = "wt-routes0";
const NETWORK: &str = "10.2.0.0/24";

struct Harness {
	manager: Arc<Manager>,
	backend: Arc<MemoryBackend>,
	status: Arc<StatusRegistry>,
	table: Arc<MemoryRouteTable>,
	peer_b: String,
	peer_c: String,
}

async fn harness() -> Harness {
	let backend = Arc::new(MemoryBackend::new());
	let wg_backend: Arc<dyn heddle_wg::WgBackend> = backend.clone() as Arc<dyn heddle_wg::WgBackend>;
	let wg_iface =
		Arc::new(WgIface::new(IFACE, "100.64.0.1/16", DEFAULT_MTU, wg_backend).unwrap());
	wg_iface.create().await.unwrap();

	let status = Arc::new(StatusRegistry::new());
	let table = Arc::new(MemoryRouteTable::new());
	let route_table: Arc<dyn heddle_agent::routemanager::RouteTable> =
		table.clone() as Arc<dyn heddle_agent::routemanager::RouteTable>;
	let manager = Manager::new(wg_iface, Arc::clone(&status), route_table);

	let peer_b = WgKeyPair::generate().public_key().to_base64();
	let peer_c = WgKeyPair::generate().public_key().to_base64();

	for peer in [&peer_b, &peer_c] {
		status.add_peer(peer).unwrap();
		// gateway peers already have their tunnel registered
		backend
			.update_peer(
				IFACE,
				&WgPublicKey::from_base64(peer).unwrap(),
				"100.64.0.9/32",
				None,
				None,
				None,
			)
			.await
			.unwrap();
	}

	Harness {
		manager,
		backend,
		status,
		table,
		peer_b,
		peer_c,
	}
}

fn set_peer(status: &StatusRegistry, peer: &str, connected: bool, direct: bool, relayed: bool) {
	let mut state = PeerState::new(peer);
	state.conn_status = if connected {
		"Connected".to_string()
	} else {
		"Disconnected".to_string()
	};
	state.direct = direct;
	state.relayed = relayed;
	status.update_peer_state(state).unwrap();
}

fn route(id: &str, peer: &str, metric: i32) -> Route {
	Route {
		id: id.to_string(),
		net_id: "corp".to_string(),
		network: NETWORK.parse().unwrap(),
		peer: peer.to_string(),
		metric,
		masquerade: false,
		network_type: "IPv4".to_string(),
	}
}

fn allowed_ips(backend: &MemoryBackend, peer: &str) -> Vec<String> {
	backend
		.peer(IFACE, &WgPublicKey::from_base64(peer).unwrap())
		.map(|p| p.allowed_ips.into_iter().collect())
		.unwrap_or_default()
}

#[tokio::test(flavor = "multi_thread")]
async fn best_gateway_wins_and_failover_moves_the_route() {
	let h = harness().await;
	let network: IpNet = NETWORK.parse().unwrap();

	set_peer(&h.status, &h.peer_b, true, true, false);
	set_peer(&h.status, &h.peer_c, true, false, true);

	h.manager
		.update_routes(1, vec![route("r1", &h.peer_b, 100), route("r2", &h.peer_c, 100)])
		.await;

	// r1 (via B) wins; OS route appears and B carries the allowed-IP
	let backend = Arc::clone(&h.backend);
	let peer_b = h.peer_b.clone();
	assert!(
		wait_for(Duration::from_secs(5), move || {
			allowed_ips(&backend, &peer_b).contains(&NETWORK.to_string())
		})
		.await
	);
	assert!(h.table.has_route(&network));
	assert!(!allowed_ips(&h.backend, &h.peer_c).contains(&NETWORK.to_string()));

	// B drops: the route must move to C
	set_peer(&h.status, &h.peer_b, false, false, false);

	let backend = Arc::clone(&h.backend);
	let peer_c = h.peer_c.clone();
	assert!(
		wait_for(Duration::from_secs(5), move || {
			allowed_ips(&backend, &peer_c).contains(&NETWORK.to_string())
		})
		.await
	);
	assert!(h.table.has_route(&network));

	h.manager.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn equal_scores_stick_with_the_incumbent() {
	let h = harness().await;

	set_peer(&h.status, &h.peer_b, true, true, false);
	set_peer(&h.status, &h.peer_c, true, true, false);

	h.manager
		.update_routes(1, vec![route("r1", &h.peer_b, 100), route("r2", &h.peer_c, 100)])
		.await;

	let backend = Arc::clone(&h.backend);
	let peer_b = h.peer_b.clone();
	assert!(
		wait_for(Duration::from_secs(5), move || {
			allowed_ips(&backend, &peer_b).contains(&NETWORK.to_string())
		})
		.await
	);

	// push B below C, the route moves away while B is still connected
	set_peer(&h.status, &h.peer_b, true, true, true);

	let backend = Arc::clone(&h.backend);
	let peer_c = h.peer_c.clone();
	assert!(
		wait_for(Duration::from_secs(5), move || {
			allowed_ips(&backend, &peer_c).contains(&NETWORK.to_string())
		})
		.await
	);
	let backend = Arc::clone(&h.backend);
	let peer_b = h.peer_b.clone();
	assert!(
		wait_for(Duration::from_secs(5), move || {
			!allowed_ips(&backend, &peer_b).contains(&NETWORK.to_string())
		})
		.await
	);

	// B recovers to an equal score: the tie keeps C
	set_peer(&h.status, &h.peer_b, true, true, false);
	tokio::time::sleep(Duration::from_millis(500)).await;
	assert!(allowed_ips(&h.backend, &h.peer_c).contains(&NETWORK.to_string()));
	assert!(!allowed_ips(&h.backend, &h.peer_b).contains(&NETWORK.to_string()));

	h.manager.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn no_connected_gateway_means_no_route() {
	let h = harness().await;
	let network: IpNet = NETWORK.parse().unwrap();

	set_peer(&h.status, &h.peer_b, true, true, false);
	h.manager
		.update_routes(1, vec![route("r1", &h.peer_b, 100)])
		.await;

	let table = Arc::clone(&h.table);
	assert!(wait_for(Duration::from_secs(5), move || table.has_route(&network)).await);

	set_peer(&h.status, &h.peer_b, false, false, false);

	let table = Arc::clone(&h.table);
	assert!(wait_for(Duration::from_secs(5), move || !table.has_route(&network)).await);

	h.manager.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_route_serial_is_ignored() {
	let h = harness().await;

	set_peer(&h.status, &h.peer_b, true, true, false);
	set_peer(&h.status, &h.peer_c, true, true, false);

	h.manager
		.update_routes(5, vec![route("r1", &h.peer_b, 100)])
		.await;

	let backend = Arc::clone(&h.backend);
	let peer_b = h.peer_b.clone();
	assert!(
		wait_for(Duration::from_secs(5), move || {
			allowed_ips(&backend, &peer_b).contains(&NETWORK.to_string())
		})
		.await
	);

	// an older snapshot must not steal the route
	h.manager
		.update_routes(3, vec![route("r2", &h.peer_c, 1)])
		.await;
	tokio::time::sleep(Duration::from_millis(500)).await;

	assert!(allowed_ips(&h.backend, &h.peer_b).contains(&NETWORK.to_string()));
	assert!(!allowed_ips(&h.backend, &h.peer_c).contains(&NETWORK.to_string()));

	h.manager.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn removing_the_network_cleans_up() {
	let h = harness().await;
	let network: IpNet = NETWORK.parse().unwrap();

	set_peer(&h.status, &h.peer_b, true, true, false);
	h.manager
		.update_routes(1, vec![route("r1", &h.peer_b, 100)])
		.await;

	let table = Arc::clone(&h.table);
	assert!(wait_for(Duration::from_secs(5), move || table.has_route(&network)).await);

	// the destination network disappears from the update
	h.manager.update_routes(2, vec![]).await;

	let table = Arc::clone(&h.table);
	assert!(wait_for(Duration::from_secs(5), move || !table.has_route(&network)).await);

	let backend = Arc::clone(&h.backend);
	let peer_b = h.peer_b.clone();
	assert!(
		wait_for(Duration::from_secs(5), move || {
			!allowed_ips(&backend, &peer_b).contains(&NETWORK.to_string())
		})
		.await
	);
}
