// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RouteError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("{command} exited with {status}: {stderr}")]
	CommandFailed {
		command: String,
		status: String,
		stderr: String,
	},
}

pub type Result<T> = std::result::Result<T, RouteError>;

/// OS route table operations the watcher needs. Kept narrow so tests can
/// observe route changes without touching the host.
#[async_trait]
pub trait RouteTable: Send + Sync {
	/// Idempotent: adding a route that is already present is a no-op.
	async fn add_route(&self, network: &IpNet, gateway_addr: IpAddr) -> Result<()>;

	async fn remove_route(&self, network: &IpNet, gateway_addr: IpAddr) -> Result<()>;
}

/// Drives the kernel table through `ip route`.
#[derive(Default)]
pub struct CommandRouteTable;

impl CommandRouteTable {
	pub fn new() -> Self {
		Self
	}

	async fn run(args: &[&str]) -> Result<()> {
		debug!(command = %format!("ip {}", args.join(" ")), "running");
		let output = Command::new("ip").args(args).output().await?;
		if !output.status.success() {
			return Err(RouteError::CommandFailed {
				command: format!("ip {}", args.join(" ")),
				status: output.status.to_string(),
				stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
			});
		}
		Ok(())
	}
}

#[async_trait]
impl RouteTable for CommandRouteTable {
	async fn add_route(&self, network: &IpNet, gateway_addr: IpAddr) -> Result<()> {
		// replace keeps this idempotent
		Self::run(&[
			"route",
			"replace",
			&network.to_string(),
			"via",
			&gateway_addr.to_string(),
		])
		.await
	}

	async fn remove_route(&self, network: &IpNet, gateway_addr: IpAddr) -> Result<()> {
		Self::run(&[
			"route",
			"del",
			&network.to_string(),
			"via",
			&gateway_addr.to_string(),
		])
		.await
	}
}

/// In-memory table for the test suites.
#[derive(Default)]
pub struct MemoryRouteTable {
	routes: Mutex<HashMap<IpNet, IpAddr>>,
}

impl MemoryRouteTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn routes(&self) -> HashMap<IpNet, IpAddr> {
		self.routes.lock().unwrap().clone()
	}

	pub fn has_route(&self, network: &IpNet) -> bool {
		self.routes.lock().unwrap().contains_key(network)
	}
}

#[async_trait]
impl RouteTable for MemoryRouteTable {
	async fn add_route(&self, network: &IpNet, gateway_addr: IpAddr) -> Result<()> {
		self.routes
			.lock()
			.unwrap()
			.entry(*network)
			.or_insert(gateway_addr);
		Ok(())
	}

	async fn remove_route(&self, network: &IpNet, _gateway_addr: IpAddr) -> Result<()> {
		self.routes.lock().unwrap().remove(network);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn memory_table_add_is_idempotent() {
		let table = MemoryRouteTable::new();
		let network: IpNet = "10.2.0.0/24".parse().unwrap();
		let first: IpAddr = "100.64.0.1".parse().unwrap();
		let second: IpAddr = "100.64.0.9".parse().unwrap();

		table.add_route(&network, first).await.unwrap();
		table.add_route(&network, second).await.unwrap();

		assert_eq!(table.routes()[&network], first);

		table.remove_route(&network, first).await.unwrap();
		assert!(!table.has_route(&network));
	}
}
