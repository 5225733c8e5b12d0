// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{IceError, Result};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateType {
	Host,
	ServerReflexive,
	PeerReflexive,
	Relay,
}

impl CandidateType {
	fn type_preference(&self) -> u32 {
		match self {
			CandidateType::Host => 126,
			CandidateType::PeerReflexive => 110,
			CandidateType::ServerReflexive => 100,
			CandidateType::Relay => 0,
		}
	}
}

impl fmt::Display for CandidateType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			CandidateType::Host => "host",
			CandidateType::ServerReflexive => "srflx",
			CandidateType::PeerReflexive => "prflx",
			CandidateType::Relay => "relay",
		};
		f.write_str(s)
	}
}

impl std::str::FromStr for CandidateType {
	type Err = IceError;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"host" => Ok(CandidateType::Host),
			"srflx" => Ok(CandidateType::ServerReflexive),
			"prflx" => Ok(CandidateType::PeerReflexive),
			"relay" => Ok(CandidateType::Relay),
			_ => Err(IceError::InvalidCandidate(format!(
				"unknown candidate type {s}"
			))),
		}
	}
}

/// One potential transport endpoint, exchanged over signaling in the
/// usual one-line text form:
/// `candidate:<foundation> <component> udp <priority> <address> <port> typ <type> [raddr <ip> rport <port>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
	pub foundation: String,
	pub component: u16,
	pub protocol: String,
	pub priority: u32,
	pub address: String,
	pub port: u16,
	pub typ: CandidateType,
	pub related_address: Option<String>,
	pub related_port: Option<u16>,
}

fn priority(typ: CandidateType, component: u16) -> u32 {
	(1 << 24) * typ.type_preference() + (1 << 8) * 65535 + (256 - u32::from(component))
}

impl Candidate {
	pub fn new(typ: CandidateType, address: IpAddr, port: u16) -> Self {
		Self {
			foundation: format!("{:08x}", fastrand::u32(..)),
			component: 1,
			protocol: "udp".to_string(),
			priority: priority(typ, 1),
			address: address.to_string(),
			port,
			typ,
			related_address: None,
			related_port: None,
		}
	}

	pub fn with_related(mut self, address: IpAddr, port: u16) -> Self {
		self.related_address = Some(address.to_string());
		self.related_port = Some(port);
		self
	}

	pub fn socket_addr(&self) -> Result<SocketAddr> {
		let ip: IpAddr = self
			.address
			.parse()
			.map_err(|_| IceError::InvalidCandidate(format!("bad address {}", self.address)))?;
		Ok(SocketAddr::new(ip, self.port))
	}

	pub fn marshal(&self) -> String {
		let mut out = format!(
			"candidate:{} {} {} {} {} {} typ {}",
			self.foundation, self.component, self.protocol, self.priority, self.address, self.port,
			self.typ,
		);
		if let (Some(raddr), Some(rport)) = (&self.related_address, self.related_port) {
			out.push_str(&format!(" raddr {raddr} rport {rport}"));
		}
		out
	}

	pub fn unmarshal(raw: &str) -> Result<Self> {
		let raw = raw.trim();
		let body = raw.strip_prefix("candidate:").unwrap_or(raw);
		let tokens: Vec<&str> = body.split_whitespace().collect();
		if tokens.len() < 8 || tokens[6] != "typ" {
			return Err(IceError::InvalidCandidate(format!("malformed: {raw}")));
		}

		let component: u16 = tokens[1]
			.parse()
			.map_err(|_| IceError::InvalidCandidate(format!("bad component: {raw}")))?;
		let priority: u32 = tokens[3]
			.parse()
			.map_err(|_| IceError::InvalidCandidate(format!("bad priority: {raw}")))?;
		let port: u16 = tokens[5]
			.parse()
			.map_err(|_| IceError::InvalidCandidate(format!("bad port: {raw}")))?;
		let typ: CandidateType = tokens[7].parse()?;

		let mut candidate = Self {
			foundation: tokens[0].to_string(),
			component,
			protocol: tokens[2].to_string(),
			priority,
			address: tokens[4].to_string(),
			port,
			typ,
			related_address: None,
			related_port: None,
		};

		let mut rest = tokens[8..].iter();
		while let Some(key) = rest.next() {
			let value = rest
				.next()
				.ok_or_else(|| IceError::InvalidCandidate(format!("dangling attribute: {raw}")))?;
			match *key {
				"raddr" => candidate.related_address = Some(value.to_string()),
				"rport" => {
					candidate.related_port = Some(value.parse().map_err(|_| {
						IceError::InvalidCandidate(format!("bad rport: {raw}"))
					})?)
				}
				_ => {}
			}
		}

		Ok(candidate)
	}
}

impl fmt::Display for Candidate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{} {}:{} ({})",
			self.typ, self.address, self.port, self.priority
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::Ipv4Addr;

	#[test]
	fn marshal_unmarshal_host() {
		let candidate = Candidate::new(
			CandidateType::Host,
			IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
			51820,
		);
		let text = candidate.marshal();
		let parsed = Candidate::unmarshal(&text).unwrap();
		assert_eq!(candidate, parsed);
	}

	#[test]
	fn marshal_unmarshal_srflx_with_related() {
		let candidate = Candidate::new(
			CandidateType::ServerReflexive,
			IpAddr::V4(Ipv4Addr::new(203, 0, 113, 4)),
			4242,
		)
		.with_related(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 51820);
		let text = candidate.marshal();
		assert!(text.contains("raddr 10.0.0.5 rport 51820"));
		let parsed = Candidate::unmarshal(&text).unwrap();
		assert_eq!(candidate, parsed);
	}

	#[test]
	fn unmarshal_without_prefix() {
		let parsed =
			Candidate::unmarshal("abcd1234 1 udp 2130706431 10.0.0.1 9000 typ host").unwrap();
		assert_eq!(parsed.typ, CandidateType::Host);
		assert_eq!(parsed.port, 9000);
	}

	#[test]
	fn rejects_malformed() {
		assert!(Candidate::unmarshal("candidate:x 1 udp").is_err());
		assert!(Candidate::unmarshal("a 1 udp 1 10.0.0.1 9000 notyp host").is_err());
		assert!(Candidate::unmarshal("a 1 udp 1 10.0.0.1 9000 typ bogus").is_err());
	}

	#[test]
	fn host_outranks_srflx_and_relay() {
		let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
		let host = Candidate::new(CandidateType::Host, ip, 1);
		let srflx = Candidate::new(CandidateType::ServerReflexive, ip, 1);
		let relay = Candidate::new(CandidateType::Relay, ip, 1);
		assert!(host.priority > srflx.priority);
		assert!(srflx.priority > relay.priority);
	}
}
