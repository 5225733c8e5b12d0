// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::proxy::ProxyError;
use heddle_ice::IceError;
use heddle_signal::SignalError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnError {
	/// The ICE phase exceeded the configured timeout. The worker loop
	/// re-attempts with a fresh agent.
	#[error("connection to peer {peer} timed out after {timeout:?}")]
	Timeout { peer: String, timeout: Duration },

	/// Closed externally (engine stop or peer removal); the worker must
	/// not re-attempt.
	#[error("connection to peer {0} has been closed")]
	Closed(String),

	/// The ICE agent reported Failed/Disconnected after being up.
	#[error("connection to peer {0} disconnected")]
	Disconnected(String),

	/// Redundant close call; logged and otherwise ignored.
	#[error("connection to peer {0} has already been closed")]
	AlreadyClosed(String),

	#[error("ICE error: {0}")]
	Ice(#[from] IceError),

	#[error("signaling error: {0}")]
	Signal(#[from] SignalError),

	#[error("proxy error: {0}")]
	Proxy(#[from] ProxyError),
}

pub type Result<T> = std::result::Result<T, ConnError>;
