// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted agent configuration.
//!
//! JSON at `/etc/heddle/config.json` (override with `HEDDLE_CONFIG`).
//! Created with a fresh identity on first start; the private key is
//! immutable thereafter. A pre-shared key value of `"**********"` in an
//! update means "keep the current one".

use crate::netmap::{PeerConfig, RemotePeerConfig};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::SigningKey;
use heddle_wg::{KeyError, WgKeyPair, DEFAULT_WG_PORT};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/heddle/config.json";
pub const DEFAULT_WG_IFACE: &str = "wt0";

/// UI sentinel for "do not change the pre-shared key".
pub const HIDDEN_KEY: &str = "**********";

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("config parse error: {0}")]
	Parse(#[from] serde_json::Error),

	#[error("key error: {0}")]
	Key(#[from] KeyError),

	#[error("config file {0} doesn't exist")]
	NotFound(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
	/// WireGuard private key of this peer (base64). It must never leave
	/// the machine.
	pub private_key: String,
	pub pre_shared_key: String,
	pub wg_iface: String,
	pub wg_port: u16,
	/// Local overlay address in CIDR form.
	pub wg_ip: String,
	/// Private SSH key in PEM format.
	pub ssh_key: String,
	pub peers: Vec<RemotePeerConfig>,
	pub peer_config: Option<PeerConfig>,
	pub stuns: Vec<String>,
	pub turns: Vec<TurnConfig>,
	pub signal_service: SignalService,
	/// NAT 1:1 mappings, `external[/internal]` where external is an
	/// IPv4 literal or `stun` and internal an IPv4 literal or interface
	/// name.
	pub nat_external_ips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TurnConfig {
	pub uri: String,
	pub user: String,
	pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignalService {
	pub uri: String,
	pub protocol: String,
}

impl Default for SignalService {
	fn default() -> Self {
		Self {
			uri: String::new(),
			protocol: "http".to_string(),
		}
	}
}

impl Default for Config {
	fn default() -> Self {
		Self {
			private_key: String::new(),
			pre_shared_key: String::new(),
			wg_iface: DEFAULT_WG_IFACE.to_string(),
			wg_port: DEFAULT_WG_PORT,
			wg_ip: String::new(),
			ssh_key: String::new(),
			peers: Vec::new(),
			peer_config: None,
			stuns: Vec::new(),
			turns: Vec::new(),
			signal_service: SignalService::default(),
			nat_external_ips: Vec::new(),
		}
	}
}

/// Read the existing config or generate a fresh one.
pub fn get_config(config_path: &str, pre_shared_key: &str) -> Result<Config> {
	if !Path::new(config_path).exists() {
		info!(path = %config_path, "generating new config");
		return create_new_config(config_path);
	}
	// don't overwrite the pre-shared key when the UI sends asterisks
	let psk = if pre_shared_key == HIDDEN_KEY {
		None
	} else {
		Some(pre_shared_key)
	};
	read_config(config_path, psk)
}

fn create_new_config(config_path: &str) -> Result<Config> {
	let config = Config {
		private_key: generate_wg_key(),
		ssh_key: generate_ssh_key_pem(),
		..Default::default()
	};
	write_json(config_path, &config)?;
	Ok(config)
}

/// Read and normalize: regenerate a missing SSH key, default a zero
/// WireGuard port, apply a pre-shared key override. Normalizations are
/// written back.
pub fn read_config(config_path: &str, pre_shared_key: Option<&str>) -> Result<Config> {
	if !Path::new(config_path).exists() {
		return Err(ConfigError::NotFound(config_path.to_string()));
	}
	let mut config: Config = serde_json::from_str(&std::fs::read_to_string(config_path)?)?;

	let mut refresh = false;

	if let Some(psk) = pre_shared_key {
		if config.pre_shared_key != psk {
			info!("new pre-shared key provided, updating");
			config.pre_shared_key = psk.to_string();
			refresh = true;
		}
	}
	if config.ssh_key.is_empty() {
		config.ssh_key = generate_ssh_key_pem();
		refresh = true;
	}
	if config.wg_port == 0 {
		config.wg_port = DEFAULT_WG_PORT;
		refresh = true;
	}

	if refresh {
		write_json(config_path, &config)?;
	}

	Ok(config)
}

pub fn write_json(path: &str, config: &Config) -> Result<()> {
	if let Some(parent) = Path::new(path).parent() {
		std::fs::create_dir_all(parent)?;
	}
	let json = serde_json::to_string_pretty(config)?;
	std::fs::write(path, json)?;
	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
	}
	Ok(())
}

fn generate_wg_key() -> String {
	// a fresh identity failing to generate is a programmer error
	let keypair = WgKeyPair::generate();
	keypair.private_key().to_base64().expose().clone()
}

fn generate_ssh_key_pem() -> String {
	let signing_key = SigningKey::generate(&mut OsRng);
	pem_encode("ED25519 PRIVATE KEY", &signing_key.to_keypair_bytes())
}

fn pem_encode(label: &str, bytes: &[u8]) -> String {
	let encoded = STANDARD.encode(bytes);
	let mut out = format!("-----BEGIN {label}-----\n");
	for chunk in encoded.as_bytes().chunks(64) {
		out.push_str(std::str::from_utf8(chunk).expect("base64 is ascii"));
		out.push('\n');
	}
	out.push_str(&format!("-----END {label}-----\n"));
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn temp_config_path(dir: &TempDir) -> String {
		dir.path().join("config.json").to_string_lossy().into_owned()
	}

	#[test]
	fn fresh_config_has_identity() {
		let dir = TempDir::new().unwrap();
		let path = temp_config_path(&dir);

		let config = get_config(&path, "").unwrap();
		assert!(!config.private_key.is_empty());
		assert!(config.ssh_key.contains("BEGIN ED25519 PRIVATE KEY"));
		assert_eq!(config.wg_port, DEFAULT_WG_PORT);
		assert!(Path::new(&path).exists());

		// the identity is stable across reads
		let reread = get_config(&path, "").unwrap();
		assert_eq!(config.private_key, reread.private_key);
	}

	#[test]
	fn write_then_read_is_identity() {
		let dir = TempDir::new().unwrap();
		let path = temp_config_path(&dir);

		let mut config = get_config(&path, "").unwrap();
		config.wg_ip = "100.64.0.5/16".to_string();
		config.stuns = vec!["stun:stun.example.com:3478".to_string()];
		config.nat_external_ips = vec!["12.34.56.78/eth0".to_string()];
		write_json(&path, &config).unwrap();

		let reread = read_config(&path, None).unwrap();
		assert_eq!(config, reread);
	}

	#[test]
	fn hidden_psk_keeps_existing_value() {
		let dir = TempDir::new().unwrap();
		let path = temp_config_path(&dir);

		let mut config = get_config(&path, "").unwrap();
		config.pre_shared_key = "original".to_string();
		write_json(&path, &config).unwrap();

		let reread = get_config(&path, HIDDEN_KEY).unwrap();
		assert_eq!(reread.pre_shared_key, "original");
	}

	#[test]
	fn explicit_psk_overrides() {
		let dir = TempDir::new().unwrap();
		let path = temp_config_path(&dir);

		get_config(&path, "").unwrap();
		let updated = get_config(&path, "fresh-psk").unwrap();
		assert_eq!(updated.pre_shared_key, "fresh-psk");
	}

	#[test]
	fn zero_port_defaults() {
		let dir = TempDir::new().unwrap();
		let path = temp_config_path(&dir);

		let mut config = get_config(&path, "").unwrap();
		config.wg_port = 0;
		write_json(&path, &config).unwrap();

		let reread = read_config(&path, None).unwrap();
		assert_eq!(reread.wg_port, DEFAULT_WG_PORT);
	}

	#[test]
	fn missing_ssh_key_is_regenerated() {
		let dir = TempDir::new().unwrap();
		let path = temp_config_path(&dir);

		let mut config = get_config(&path, "").unwrap();
		config.ssh_key = String::new();
		write_json(&path, &config).unwrap();

		let reread = read_config(&path, None).unwrap();
		assert!(reread.ssh_key.contains("BEGIN ED25519 PRIVATE KEY"));
	}

	#[test]
	fn missing_file_errors() {
		let dir = TempDir::new().unwrap();
		let path = temp_config_path(&dir);
		assert!(matches!(
			read_config(&path, None),
			Err(ConfigError::NotFound(_))
		));
	}
}
