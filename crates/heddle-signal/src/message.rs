// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

/// ICE credentials plus the sender's WireGuard listen port and agent
/// version, carried by offers and answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	pub ufrag: String,
	pub pwd: String,
	#[serde(default)]
	pub wg_listen_port: u16,
	#[serde(default)]
	pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Body {
	Offer(Credential),
	Answer(Credential),
	Candidate { candidate: String },
}

/// One routed signaling message. `key` is the sender's public key,
/// `remote_key` the recipient's; the service forwards on `remote_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
	pub key: String,
	pub remote_key: String,
	pub body: Body,
}

impl SignalMessage {
	pub fn offer(key: &str, remote_key: &str, credential: Credential) -> Self {
		Self {
			key: key.to_string(),
			remote_key: remote_key.to_string(),
			body: Body::Offer(credential),
		}
	}

	pub fn answer(key: &str, remote_key: &str, credential: Credential) -> Self {
		Self {
			key: key.to_string(),
			remote_key: remote_key.to_string(),
			body: Body::Answer(credential),
		}
	}

	pub fn candidate(key: &str, remote_key: &str, candidate: &str) -> Self {
		Self {
			key: key.to_string(),
			remote_key: remote_key.to_string(),
			body: Body::Candidate {
				candidate: candidate.to_string(),
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn offer_roundtrip() {
		let msg = SignalMessage::offer(
			"AA==",
			"BB==",
			Credential {
				ufrag: "ufrag123".to_string(),
				pwd: "pwd".to_string(),
				wg_listen_port: 51820,
				version: "0.1.0".to_string(),
			},
		);
		let json = serde_json::to_string(&msg).unwrap();
		assert!(json.contains("\"OFFER\""));
		let parsed: SignalMessage = serde_json::from_str(&json).unwrap();
		assert_eq!(msg, parsed);
	}

	#[test]
	fn candidate_roundtrip() {
		let msg = SignalMessage::candidate("AA==", "BB==", "candidate:x 1 udp 1 1.2.3.4 9 typ host");
		let json = serde_json::to_string(&msg).unwrap();
		let parsed: SignalMessage = serde_json::from_str(&json).unwrap();
		assert_eq!(msg, parsed);
	}

	#[test]
	fn missing_optional_credential_fields_default() {
		let json = r#"{"key":"A","remote_key":"B","body":{"type":"ANSWER","ufrag":"u","pwd":"p"}}"#;
		let parsed: SignalMessage = serde_json::from_str(json).unwrap();
		match parsed.body {
			Body::Answer(c) => {
				assert_eq!(c.wg_listen_port, 0);
				assert!(c.version.is_empty());
			}
			_ => panic!("expected answer"),
		}
	}
}
