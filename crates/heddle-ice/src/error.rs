// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IceError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("invalid ICE URL {url}: {reason}")]
	InvalidUrl { url: String, reason: String },

	#[error("invalid candidate: {0}")]
	InvalidCandidate(String),

	#[error("STUN error: {0}")]
	Stun(String),

	#[error("connectivity checks did not produce a pair within {0:?}")]
	ConnectivityTimeout(std::time::Duration),

	#[error("agent is closed")]
	Closed,

	#[error("no candidate pair has been selected")]
	NotConnected,

	#[error("mux is closed")]
	MuxClosed,
}

pub type Result<T> = std::result::Result<T, IceError>;
