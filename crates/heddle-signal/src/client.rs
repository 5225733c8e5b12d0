// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::message::SignalMessage;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("encode/decode error: {0}")]
	Codec(#[from] serde_json::Error),

	#[error("invalid signal URI {uri}: {reason}")]
	InvalidUri { uri: String, reason: String },

	#[error("TLS error: {0}")]
	Tls(String),

	#[error("signal stream ended")]
	StreamEnded,

	#[error("client is not connected")]
	NotConnected,
}

pub type Result<T> = std::result::Result<T, SignalError>;

/// Bidirectional typed message stream to the signaling service.
///
/// `recv` yields inbound messages addressed to this client and returns
/// `Err(StreamEnded)` once the stream is gone for good; the engine
/// treats that as signaling unavailable and cancels itself.
#[async_trait]
pub trait SignalClient: Send + Sync {
	async fn send(&self, msg: SignalMessage) -> Result<()>;

	async fn recv(&self) -> Result<SignalMessage>;

	/// Whether the stream is currently usable. Connection workers skip
	/// their attempt while this is false.
	fn is_ready(&self) -> bool;

	async fn wait_stream_connected(&self);

	async fn close(&self) -> Result<()>;
}
