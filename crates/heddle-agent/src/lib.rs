// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Peer endpoint agent for a zero-trust mesh overlay.
//!
//! Each agent keeps authenticated WireGuard tunnels to a changing set of
//! remote peers. The [`engine::Engine`] reconciles the peer set against
//! management snapshots, every peer runs its own negotiation state
//! machine ([`peer::Conn`]) over a signaling channel, and the
//! [`routemanager`] steers overlay routes to whichever gateway peer is
//! in the best shape. The [`supervisor`] wraps the whole thing in a
//! retry loop with exponential backoff.

pub mod backoff;
pub mod config;
pub mod debug_http;
pub mod engine;
pub mod netmap;
pub mod peer;
pub mod proxy;
pub mod routemanager;
pub mod status;
pub mod supervisor;

/// Version string advertised in offers and answers.
pub fn agent_version() -> &'static str {
	env!("CARGO_PKG_VERSION")
}
