// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{Result, WgError};
use crate::iface::WgBackend;
use crate::keys::{PresharedKey, WgPrivateKey, WgPublicKey};
use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument};

/// [`WgBackend`] that drives the kernel WireGuard module through the
/// `wg` and `ip` command line tools.
///
/// `wg` has no single-CIDR add/remove operation, so the backend keeps the
/// last written allowed-IP set per peer and re-issues the full list.
#[derive(Default)]
pub struct CommandBackend {
	allowed: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl CommandBackend {
	pub fn new() -> Self {
		Self::default()
	}

	async fn run(program: &str, args: &[&str]) -> Result<()> {
		debug!(command = %format!("{} {}", program, args.join(" ")), "running");
		let output = Command::new(program).args(args).output().await?;
		if !output.status.success() {
			return Err(WgError::CommandFailed {
				command: format!("{} {}", program, args.join(" ")),
				status: output.status.to_string(),
				stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
			});
		}
		Ok(())
	}

	async fn write_allowed_ips(&self, name: &str, peer: &WgPublicKey) -> Result<()> {
		let joined = {
			let allowed = self.allowed.lock().unwrap();
			allowed
				.get(&peer.to_base64())
				.map(|set| set.iter().cloned().collect::<Vec<_>>().join(","))
				.unwrap_or_default()
		};
		Self::run(
			"wg",
			&["set", name, "peer", &peer.to_base64(), "allowed-ips", &joined],
		)
		.await
	}
}

fn secret_file(contents: &str) -> Result<tempfile::NamedTempFile> {
	let mut file = tempfile::Builder::new().prefix("heddle-wg").tempfile()?;
	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		let perms = std::fs::Permissions::from_mode(0o600);
		file.as_file().set_permissions(perms)?;
	}
	file.write_all(contents.as_bytes())?;
	file.flush()?;
	Ok(file)
}

#[async_trait]
impl WgBackend for CommandBackend {
	#[instrument(skip(self), fields(iface = name, %address, mtu))]
	async fn create(&self, name: &str, address: &IpNet, mtu: u16) -> Result<()> {
		Self::run("ip", &["link", "add", name, "type", "wireguard"]).await?;
		Self::run("ip", &["address", "add", &address.to_string(), "dev", name]).await?;
		Self::run("ip", &["link", "set", "mtu", &mtu.to_string(), "dev", name]).await?;
		Self::run("ip", &["link", "set", "up", "dev", name]).await
	}

	async fn configure(&self, name: &str, private_key: &WgPrivateKey, listen_port: u16) -> Result<()> {
		let key_file = secret_file(private_key.to_base64().expose())?;
		let key_path = key_file.path().to_string_lossy().into_owned();
		Self::run(
			"wg",
			&[
				"set",
				name,
				"private-key",
				&key_path,
				"listen-port",
				&listen_port.to_string(),
			],
		)
		.await
	}

	async fn update_addr(&self, name: &str, address: &IpNet) -> Result<()> {
		Self::run("ip", &["address", "flush", "dev", name]).await?;
		Self::run("ip", &["address", "add", &address.to_string(), "dev", name]).await
	}

	async fn update_peer(
		&self,
		name: &str,
		peer: &WgPublicKey,
		allowed_ips: &str,
		keepalive: Option<Duration>,
		endpoint: Option<SocketAddr>,
		preshared_key: Option<&PresharedKey>,
	) -> Result<()> {
		{
			let mut allowed = self.allowed.lock().unwrap();
			allowed.insert(
				peer.to_base64(),
				allowed_ips
					.split(',')
					.filter(|s| !s.is_empty())
					.map(|s| s.trim().to_string())
					.collect(),
			);
		}

		let key = peer.to_base64();
		let mut args: Vec<String> = vec![
			"set".into(),
			name.into(),
			"peer".into(),
			key,
			"allowed-ips".into(),
			allowed_ips.into(),
		];
		if let Some(keepalive) = keepalive {
			args.push("persistent-keepalive".into());
			args.push(keepalive.as_secs().to_string());
		}
		if let Some(endpoint) = endpoint {
			args.push("endpoint".into());
			args.push(endpoint.to_string());
		}
		let _psk_file = match preshared_key {
			Some(psk) => {
				let file = secret_file(psk.to_base64().expose())?;
				args.push("preshared-key".into());
				args.push(file.path().to_string_lossy().into_owned());
				Some(file)
			}
			None => None,
		};

		let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
		Self::run("wg", &arg_refs).await
	}

	async fn remove_peer(&self, name: &str, peer: &WgPublicKey) -> Result<()> {
		self.allowed.lock().unwrap().remove(&peer.to_base64());
		Self::run("wg", &["set", name, "peer", &peer.to_base64(), "remove"]).await
	}

	async fn add_allowed_ip(&self, name: &str, peer: &WgPublicKey, cidr: &IpNet) -> Result<()> {
		{
			let mut allowed = self.allowed.lock().unwrap();
			allowed
				.entry(peer.to_base64())
				.or_default()
				.insert(cidr.to_string());
		}
		self.write_allowed_ips(name, peer).await
	}

	async fn remove_allowed_ip(&self, name: &str, peer: &WgPublicKey, cidr: &IpNet) -> Result<()> {
		{
			let mut allowed = self.allowed.lock().unwrap();
			if let Some(set) = allowed.get_mut(&peer.to_base64()) {
				set.remove(&cidr.to_string());
			}
		}
		self.write_allowed_ips(name, peer).await
	}

	async fn close(&self, name: &str) -> Result<()> {
		self.allowed.lock().unwrap().clear();
		Self::run("ip", &["link", "del", "dev", name]).await
	}
}
