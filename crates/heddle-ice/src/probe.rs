// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Connectivity probe wire format.
//!
//! Probes are the only packets the mux has to understand: everything
//! else on the socket is opaque peer traffic. A probe names the ufrag of
//! the agent it is addressed to, which is what the mux demultiplexes on.

use std::net::SocketAddr;

pub const PROBE_MAGIC: &[u8] = b"HDLP1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
	Request,
	Response,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
	pub kind: ProbeKind,
	/// Local ufrag of the agent this probe is addressed to.
	pub recipient_ufrag: String,
	/// Local ufrag of the agent that sent it.
	pub sender_ufrag: String,
}

#[derive(Debug, Clone)]
pub struct ProbeEvent {
	pub from: SocketAddr,
	pub probe: Probe,
}

impl Probe {
	pub fn request(recipient_ufrag: &str, sender_ufrag: &str) -> Self {
		Self {
			kind: ProbeKind::Request,
			recipient_ufrag: recipient_ufrag.to_string(),
			sender_ufrag: sender_ufrag.to_string(),
		}
	}

	pub fn response(recipient_ufrag: &str, sender_ufrag: &str) -> Self {
		Self {
			kind: ProbeKind::Response,
			recipient_ufrag: recipient_ufrag.to_string(),
			sender_ufrag: sender_ufrag.to_string(),
		}
	}

	pub fn encode(&self) -> Vec<u8> {
		let kind = match self.kind {
			ProbeKind::Request => "Q",
			ProbeKind::Response => "R",
		};
		format!(
			"{} {} {} {}",
			std::str::from_utf8(PROBE_MAGIC).expect("static magic"),
			kind,
			self.recipient_ufrag,
			self.sender_ufrag,
		)
		.into_bytes()
	}

	pub fn is_probe(packet: &[u8]) -> bool {
		packet.starts_with(PROBE_MAGIC)
	}

	pub fn decode(packet: &[u8]) -> Option<Self> {
		let text = std::str::from_utf8(packet).ok()?;
		let mut tokens = text.split(' ');
		if tokens.next()? != std::str::from_utf8(PROBE_MAGIC).ok()? {
			return None;
		}
		let kind = match tokens.next()? {
			"Q" => ProbeKind::Request,
			"R" => ProbeKind::Response,
			_ => return None,
		};
		let recipient = tokens.next()?;
		let sender = tokens.next()?;
		if recipient.is_empty() || sender.is_empty() || tokens.next().is_some() {
			return None;
		}
		Some(Self {
			kind,
			recipient_ufrag: recipient.to_string(),
			sender_ufrag: sender.to_string(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn roundtrip_request() {
		let probe = Probe::request("alice123", "bob45678");
		let decoded = Probe::decode(&probe.encode()).unwrap();
		assert_eq!(probe, decoded);
	}

	#[test]
	fn roundtrip_response() {
		let probe = Probe::response("alice123", "bob45678");
		let decoded = Probe::decode(&probe.encode()).unwrap();
		assert_eq!(decoded.kind, ProbeKind::Response);
	}

	#[test]
	fn rejects_non_probe_traffic() {
		assert!(!Probe::is_probe(b"not a probe"));
		assert!(Probe::decode(b"HDLP1 Q onlyone").is_none());
		assert!(Probe::decode(b"HDLP1 X a b").is_none());
		assert!(Probe::decode(b"HDLP1 Q a b extra").is_none());
	}

	#[test]
	fn wireguard_traffic_is_not_a_probe() {
		// first byte of a WireGuard handshake initiation
		let packet = [0x01, 0x00, 0x00, 0x00, 0xaa, 0xbb];
		assert!(!Probe::is_probe(&packet));
	}
}
