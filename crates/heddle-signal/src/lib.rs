// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Out-of-band signaling for the heddle agent.
//!
//! Peers negotiate their tunnels over a rendezvous service that routes
//! small typed messages (offer, answer, ICE candidate) between public
//! keys. The engine only sees the [`SignalClient`] trait; the shipped
//! transport is newline-delimited JSON over TCP with optional TLS, and
//! [`hub::MemorySignalHub`] wires clients together in-process for tests.

pub mod client;
pub mod hub;
pub mod message;
pub mod tcp;

pub use client::{SignalClient, SignalError};
pub use hub::MemorySignalHub;
pub use message::{Body, Credential, SignalMessage};
pub use tcp::TcpSignalClient;
