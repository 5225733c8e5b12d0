// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! ICE collaborator surface for the heddle agent.
//!
//! The connection engine only depends on the traits in [`agent`]:
//! an [`IceAgent`] gathers candidates, runs connectivity checks against a
//! remote peer and hands back a connected [`IceTransport`]. The default
//! [`punch::PunchFactory`] backend covers host, NAT-mapped and
//! server-reflexive candidates with credential-tagged UDP probes over the
//! engine-owned muxes; a TURN-capable backend can be slotted in behind
//! the same [`IceAgentFactory`] trait.

pub mod agent;
pub mod candidate;
pub mod error;
pub mod mux;
pub mod probe;
pub mod punch;
pub mod stun;
pub mod url;

pub use agent::{
	AgentConfig, CandidatePair, ConnectionState, IceAgent, IceAgentFactory, IceCredentials,
	IceTransport, InterfaceFilter, NetworkType, DEFAULT_FAILED_TIMEOUT,
};
pub use candidate::{Candidate, CandidateType};
pub use error::{IceError, Result};
pub use mux::UdpMux;
pub use punch::{PunchAgent, PunchFactory};
pub use url::{IceUrl, ProtoType, SchemeType};
