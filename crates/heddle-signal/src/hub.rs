// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::client::{Result, SignalClient, SignalError};
use crate::message::SignalMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

type Routes = Arc<StdMutex<HashMap<String, mpsc::Sender<SignalMessage>>>>;

fn route(routes: &Routes, msg: SignalMessage) {
	let target = {
		let routes = routes.lock().unwrap();
		routes.get(&msg.remote_key).cloned()
	};
	match target {
		Some(tx) => {
			if tx.try_send(msg).is_err() {
				trace!("hub queue full or receiver gone, dropping message");
			}
		}
		None => trace!(remote = %msg.remote_key, "no such client, dropping message"),
	}
}

/// In-process signaling service: routes messages between clients by
/// public key. Used by the test suites to stand in for the real service.
#[derive(Default)]
pub struct MemorySignalHub {
	routes: Routes,
}

impl MemorySignalHub {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Create (or replace) the client registered under `key`.
	pub fn client(&self, key: &str) -> Arc<MemorySignalClient> {
		let (tx, rx) = mpsc::channel(64);
		self.routes.lock().unwrap().insert(key.to_string(), tx);
		Arc::new(MemorySignalClient {
			key: key.to_string(),
			routes: Arc::clone(&self.routes),
			inbound_rx: Mutex::new(rx),
			ready: AtomicBool::new(true),
		})
	}

	pub fn disconnect(&self, key: &str) {
		self.routes.lock().unwrap().remove(key);
	}
}

pub struct MemorySignalClient {
	key: String,
	routes: Routes,
	inbound_rx: Mutex<mpsc::Receiver<SignalMessage>>,
	ready: AtomicBool,
}

impl MemorySignalClient {
	pub fn key(&self) -> &str {
		&self.key
	}

	pub fn set_ready(&self, ready: bool) {
		self.ready.store(ready, Ordering::SeqCst);
	}
}

#[async_trait]
impl SignalClient for MemorySignalClient {
	async fn send(&self, msg: SignalMessage) -> Result<()> {
		if !self.is_ready() {
			return Err(SignalError::NotConnected);
		}
		route(&self.routes, msg);
		Ok(())
	}

	async fn recv(&self) -> Result<SignalMessage> {
		let mut rx = self.inbound_rx.lock().await;
		rx.recv().await.ok_or(SignalError::StreamEnded)
	}

	fn is_ready(&self) -> bool {
		self.ready.load(Ordering::SeqCst)
	}

	async fn wait_stream_connected(&self) {}

	async fn close(&self) -> Result<()> {
		self.ready.store(false, Ordering::SeqCst);
		self.routes.lock().unwrap().remove(&self.key);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::message::Credential;

	fn credential() -> Credential {
		Credential {
			ufrag: "u".to_string(),
			pwd: "p".to_string(),
			wg_listen_port: 51820,
			version: "test".to_string(),
		}
	}

	#[tokio::test]
	async fn routes_between_clients() {
		let hub = MemorySignalHub::new();
		let alice = hub.client("A");
		let bob = hub.client("B");

		alice
			.send(SignalMessage::offer("A", "B", credential()))
			.await
			.unwrap();

		let received = bob.recv().await.unwrap();
		assert_eq!(received.key, "A");
		assert_eq!(received.remote_key, "B");
	}

	#[tokio::test]
	async fn unknown_recipient_is_dropped() {
		let hub = MemorySignalHub::new();
		let alice = hub.client("A");
		alice
			.send(SignalMessage::offer("A", "NOBODY", credential()))
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn closed_client_rejects_sends() {
		let hub = MemorySignalHub::new();
		let alice = hub.client("A");

		alice.close().await.unwrap();
		assert!(!alice.is_ready());

		let err = alice
			.send(SignalMessage::candidate("A", "B", "x"))
			.await
			.unwrap_err();
		assert!(matches!(err, SignalError::NotConnected));
	}
}
