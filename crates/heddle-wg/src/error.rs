// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WgError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("key error: {0}")]
	Key(#[from] crate::keys::KeyError),

	#[error("invalid interface address {addr}: {reason}")]
	InvalidAddress { addr: String, reason: String },

	#[error("interface {0} does not exist")]
	NoSuchInterface(String),

	#[error("peer {0} is not registered on the interface")]
	PeerNotFound(String),

	#[error("{command} exited with {status}: {stderr}")]
	CommandFailed {
		command: String,
		status: String,
		stderr: String,
	},
}

pub type Result<T> = std::result::Result<T, WgError>;
