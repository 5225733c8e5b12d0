// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! WireGuard device surface for the heddle agent.
//!
//! The agent never speaks the WireGuard protocol itself. Everything it
//! needs from the data plane goes through the [`WgBackend`] trait: peer
//! registration, allowed-IP bookkeeping and interface lifecycle. Two
//! backends ship with the crate: [`CommandBackend`] drives the kernel
//! module through the `wg`/`ip` tools, [`MemoryBackend`] records calls
//! for tests and dry runs.

pub mod command;
pub mod error;
pub mod iface;
pub mod keys;
pub mod mem;
pub mod secret;

pub use command::CommandBackend;
pub use error::{Result, WgError};
pub use iface::{WgBackend, WgIface, DEFAULT_KEEPALIVE, DEFAULT_MTU, DEFAULT_WG_PORT};
pub use keys::{KeyError, PresharedKey, WgKeyPair, WgPrivateKey, WgPublicKey};
pub use mem::MemoryBackend;
pub use secret::Secret;
