// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Management snapshot model.
//!
//! Snapshots arrive from the management plane (or, on startup, from the
//! persisted config) and describe the desired state of this peer: who to
//! connect to, which STUN/TURN servers to use and which overlay routes
//! exist. Snapshots carry a monotonic serial; stale ones are ignored.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSnapshot {
	pub overlay: Option<OverlayConfig>,
	pub network_map: Option<NetworkMap>,
}

/// Infrastructure shared by the whole overlay: STUN/TURN servers and the
/// signaling service location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayConfig {
	pub stuns: Vec<HostConfig>,
	pub turns: Vec<RelayConfig>,
	pub signal: Option<HostConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostConfig {
	pub uri: String,
	pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
	pub host: HostConfig,
	pub user: String,
	pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkMap {
	pub serial: u64,
	pub peer_config: Option<PeerConfig>,
	pub remote_peers: Vec<RemotePeerConfig>,
	pub remote_peers_is_empty: bool,
	pub routes: Vec<RouteConfig>,
	pub dns_config: Option<DnsConfig>,
}

/// Local peer's own overlay assignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerConfig {
	pub address: String,
	pub fqdn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemotePeerConfig {
	pub wg_pub_key: String,
	pub allowed_ips: Vec<String>,
	pub fqdn: String,
}

impl RemotePeerConfig {
	pub fn joined_allowed_ips(&self) -> String {
		self.allowed_ips.join(",")
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteConfig {
	pub id: String,
	pub net_id: String,
	pub network: String,
	pub peer: String,
	pub metric: i32,
	pub masquerade: bool,
	pub network_type: String,
}

/// Accepted and logged; DNS application is outside the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DnsConfig {
	pub service_enable: bool,
	pub custom_zones: Vec<CustomZone>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomZone {
	pub domain: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn snapshot_roundtrip() {
		let snapshot = SyncSnapshot {
			overlay: Some(OverlayConfig {
				stuns: vec![HostConfig {
					uri: "stun:stun.example.com:3478".to_string(),
					protocol: "udp".to_string(),
				}],
				turns: vec![RelayConfig {
					host: HostConfig {
						uri: "turn:relay.example.com:3478".to_string(),
						protocol: "udp".to_string(),
					},
					user: "u".to_string(),
					password: "p".to_string(),
				}],
				signal: None,
			}),
			network_map: Some(NetworkMap {
				serial: 7,
				remote_peers: vec![RemotePeerConfig {
					wg_pub_key: "KEY".to_string(),
					allowed_ips: vec!["100.64.0.2/32".to_string()],
					fqdn: "peer.example".to_string(),
				}],
				..Default::default()
			}),
		};

		let json = serde_json::to_string(&snapshot).unwrap();
		let parsed: SyncSnapshot = serde_json::from_str(&json).unwrap();
		assert_eq!(snapshot, parsed);
	}

	#[test]
	fn joined_allowed_ips_order_preserved() {
		let peer = RemotePeerConfig {
			wg_pub_key: "K".to_string(),
			allowed_ips: vec!["10.0.0.0/24".to_string(), "10.1.0.0/24".to_string()],
			fqdn: String::new(),
		};
		assert_eq!(peer.joined_allowed_ips(), "10.0.0.0/24,10.1.0.0/24");
	}

	#[test]
	fn missing_fields_default() {
		let parsed: NetworkMap = serde_json::from_str(r#"{"serial": 3}"#).unwrap();
		assert_eq!(parsed.serial, 3);
		assert!(parsed.remote_peers.is_empty());
		assert!(!parsed.remote_peers_is_empty);
	}
}
