// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bridges the ICE-provided transport to the local WireGuard interface.
//!
//! Two variants: [`RelayedProxy`] runs a userspace UDP copy loop between
//! the remote transport and the local WireGuard socket; [`DirectProxy`]
//! points WireGuard straight at the remote's own listen port when the
//! selected pair allows it. Selection is pure data, see
//! [`crate::peer::use_relay_proxy`].

pub mod direct;
pub mod wireguard;

pub use direct::DirectProxy;
pub use wireguard::RelayedProxy;

use async_trait::async_trait;
use heddle_ice::IceTransport;
use heddle_wg::{PresharedKey, WgError, WgIface, WgPublicKey};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("wireguard error: {0}")]
	Wg(#[from] WgError),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
	Relayed,
	Direct,
}

impl fmt::Display for ProxyType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProxyType::Relayed => f.write_str("relayed"),
			ProxyType::Direct => f.write_str("direct"),
		}
	}
}

/// Per-peer proxy parameters, assembled by the engine.
#[derive(Clone)]
pub struct Config {
	pub remote_key: WgPublicKey,
	/// `127.0.0.1:<wg-port>`, the local WireGuard socket.
	pub wg_listen_addr: String,
	pub wg_iface: Arc<WgIface>,
	/// Comma-joined CIDR list for the remote peer.
	pub allowed_ips: String,
	pub preshared_key: Option<PresharedKey>,
}

#[async_trait]
pub trait Proxy: Send + Sync {
	async fn start(&self, remote: Arc<dyn IceTransport>) -> Result<()>;

	/// Idempotent. A failed WireGuard peer removal is surfaced.
	async fn close(&self) -> Result<()>;

	fn proxy_type(&self) -> ProxyType;
}
