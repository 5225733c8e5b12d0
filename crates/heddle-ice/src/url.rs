// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{IceError, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeType {
	Stun,
	Stuns,
	Turn,
	Turns,
}

impl SchemeType {
	fn default_port(&self) -> u16 {
		match self {
			SchemeType::Stun | SchemeType::Turn => 3478,
			SchemeType::Stuns | SchemeType::Turns => 5349,
		}
	}

	pub fn is_turn(&self) -> bool {
		matches!(self, SchemeType::Turn | SchemeType::Turns)
	}
}

impl fmt::Display for SchemeType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			SchemeType::Stun => "stun",
			SchemeType::Stuns => "stuns",
			SchemeType::Turn => "turn",
			SchemeType::Turns => "turns",
		};
		f.write_str(s)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoType {
	Udp,
	Tcp,
}

impl fmt::Display for ProtoType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProtoType::Udp => f.write_str("udp"),
			ProtoType::Tcp => f.write_str("tcp"),
		}
	}
}

/// A STUN or TURN server URL, optionally annotated with credentials
/// (TURN). Accepted form: `scheme:host[:port][?transport=udp|tcp]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceUrl {
	pub scheme: SchemeType,
	pub host: String,
	pub port: u16,
	pub proto: ProtoType,
	pub username: String,
	pub password: String,
}

impl IceUrl {
	pub fn parse(raw: &str) -> Result<Self> {
		let invalid = |reason: &str| IceError::InvalidUrl {
			url: raw.to_string(),
			reason: reason.to_string(),
		};

		let (scheme_str, rest) = raw.split_once(':').ok_or_else(|| invalid("missing scheme"))?;
		let scheme = match scheme_str {
			"stun" => SchemeType::Stun,
			"stuns" => SchemeType::Stuns,
			"turn" => SchemeType::Turn,
			"turns" => SchemeType::Turns,
			_ => return Err(invalid("unknown scheme")),
		};

		let (authority, query) = match rest.split_once('?') {
			Some((a, q)) => (a, Some(q)),
			None => (rest, None),
		};
		if authority.is_empty() {
			return Err(invalid("missing host"));
		}

		let (host, port) = match authority.rsplit_once(':') {
			Some((h, p)) => {
				let port: u16 = p.parse().map_err(|_| invalid("invalid port"))?;
				(h.to_string(), port)
			}
			None => (authority.to_string(), scheme.default_port()),
		};
		if host.is_empty() {
			return Err(invalid("missing host"));
		}

		let mut proto = match scheme {
			SchemeType::Turns => ProtoType::Tcp,
			_ => ProtoType::Udp,
		};
		if let Some(query) = query {
			for pair in query.split('&') {
				if let Some(("transport", value)) = pair.split_once('=') {
					proto = match value {
						"udp" => ProtoType::Udp,
						"tcp" => ProtoType::Tcp,
						_ => return Err(invalid("unknown transport")),
					};
				}
			}
		}

		Ok(Self {
			scheme,
			host,
			port,
			proto,
			username: String::new(),
			password: String::new(),
		})
	}

	pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
		self.username = username.to_string();
		self.password = password.to_string();
		self
	}

	pub fn addr(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}

impl fmt::Display for IceUrl {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}:{}", self.scheme, self.host, self.port)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_stun_with_default_port() {
		let url = IceUrl::parse("stun:stun.example.com").unwrap();
		assert_eq!(url.scheme, SchemeType::Stun);
		assert_eq!(url.host, "stun.example.com");
		assert_eq!(url.port, 3478);
		assert_eq!(url.proto, ProtoType::Udp);
	}

	#[test]
	fn parses_explicit_port_and_transport() {
		let url = IceUrl::parse("turn:relay.example.com:5000?transport=tcp").unwrap();
		assert_eq!(url.scheme, SchemeType::Turn);
		assert_eq!(url.port, 5000);
		assert_eq!(url.proto, ProtoType::Tcp);
	}

	#[test]
	fn turns_defaults_to_tcp_5349() {
		let url = IceUrl::parse("turns:relay.example.com").unwrap();
		assert_eq!(url.port, 5349);
		assert_eq!(url.proto, ProtoType::Tcp);
	}

	#[test]
	fn rejects_unknown_scheme() {
		assert!(IceUrl::parse("http://example.com").is_err());
	}

	#[test]
	fn rejects_missing_host() {
		assert!(IceUrl::parse("stun:").is_err());
		assert!(IceUrl::parse("stun::3478").is_err());
	}

	#[test]
	fn credentials_attach() {
		let url = IceUrl::parse("turn:relay.example.com")
			.unwrap()
			.with_credentials("user", "pass");
		assert_eq!(url.username, "user");
		assert_eq!(url.password, "pass");
		assert!(url.scheme.is_turn());
	}
}
