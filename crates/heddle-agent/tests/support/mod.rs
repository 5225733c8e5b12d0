// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared fakes for the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use heddle_ice::{
	AgentConfig, Candidate, CandidatePair, ConnectionState, IceAgent, IceAgentFactory,
	IceCredentials, IceTransport, Result as IceResult,
};
use heddle_ice::agent::{CandidateHandler, PairHandler, StateHandler};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Agent that never completes connectivity checks. Engine-level suites
/// use it so workers stay parked in the offer/answer wait.
pub struct InertFactory;

impl IceAgentFactory for InertFactory {
	fn create(&self, _config: AgentConfig) -> IceResult<Arc<dyn IceAgent>> {
		Ok(Arc::new(InertAgent {
			creds: IceCredentials::random(),
		}))
	}
}

struct InertAgent {
	creds: IceCredentials,
}

#[async_trait]
impl IceAgent for InertAgent {
	fn on_candidate(&self, _handler: CandidateHandler) {}
	fn on_connection_state_change(&self, _handler: StateHandler) {}
	fn on_selected_pair(&self, _handler: PairHandler) {}

	fn local_credentials(&self) -> IceCredentials {
		self.creds.clone()
	}

	async fn gather_candidates(&self) -> IceResult<()> {
		Ok(())
	}

	async fn add_remote_candidate(&self, _candidate: Candidate) -> IceResult<()> {
		Ok(())
	}

	async fn dial(&self, _remote: IceCredentials) -> IceResult<Arc<dyn IceTransport>> {
		std::future::pending().await
	}

	async fn accept(&self, _remote: IceCredentials) -> IceResult<Arc<dyn IceTransport>> {
		std::future::pending().await
	}

	async fn selected_pair(&self) -> IceResult<CandidatePair> {
		Err(heddle_ice::IceError::NotConnected)
	}

	async fn close(&self) -> IceResult<()> {
		Ok(())
	}
}

/// Far end of a [`StaticAgent`] transport, handed to the test so it can
/// exchange datagrams with the proxy.
pub struct FarEnd {
	pub socket: Arc<UdpSocket>,
}

/// Factory producing agents that immediately "select" a preconfigured
/// candidate pair and back the transport with a real localhost socket
/// pair.
pub struct StaticFactory {
	local_candidate: Candidate,
	remote_candidate: Candidate,
	far_ends: Arc<Mutex<Vec<Arc<FarEnd>>>>,
	states: Arc<Mutex<Vec<ConnectionState>>>,
}

impl StaticFactory {
	pub fn new(local_candidate: Candidate, remote_candidate: Candidate) -> Arc<Self> {
		Arc::new(Self {
			local_candidate,
			remote_candidate,
			far_ends: Arc::new(Mutex::new(Vec::new())),
			states: Arc::new(Mutex::new(Vec::new())),
		})
	}

	pub fn last_far_end(&self) -> Option<Arc<FarEnd>> {
		self.far_ends.lock().unwrap().last().cloned()
	}
}

impl IceAgentFactory for StaticFactory {
	fn create(&self, _config: AgentConfig) -> IceResult<Arc<dyn IceAgent>> {
		Ok(Arc::new(StaticAgent {
			creds: IceCredentials::random(),
			pair: CandidatePair {
				local: self.local_candidate.clone(),
				remote: self.remote_candidate.clone(),
			},
			candidate_handler: Mutex::new(None),
			far_ends: Arc::clone(&self.far_ends),
			states: Arc::clone(&self.states),
		}))
	}
}

struct StaticAgent {
	creds: IceCredentials,
	pair: CandidatePair,
	candidate_handler: Mutex<Option<CandidateHandler>>,
	far_ends: Arc<Mutex<Vec<Arc<FarEnd>>>>,
	states: Arc<Mutex<Vec<ConnectionState>>>,
}

impl StaticAgent {
	async fn connect(&self) -> IceResult<Arc<dyn IceTransport>> {
		let near = UdpSocket::bind("127.0.0.1:0").await?;
		let far = UdpSocket::bind("127.0.0.1:0").await?;
		near.connect(far.local_addr()?).await?;
		far.connect(near.local_addr()?).await?;

		let fake_local = self.pair.local.socket_addr().unwrap_or(near.local_addr()?);
		let fake_remote = self.pair.remote.socket_addr().unwrap_or(far.local_addr()?);

		self.far_ends.lock().unwrap().push(Arc::new(FarEnd {
			socket: Arc::new(far),
		}));
		self.states.lock().unwrap().push(ConnectionState::Connected);

		Ok(Arc::new(StaticTransport {
			socket: Arc::new(near),
			fake_local,
			fake_remote,
		}))
	}
}

#[async_trait]
impl IceAgent for StaticAgent {
	fn on_candidate(&self, handler: CandidateHandler) {
		*self.candidate_handler.lock().unwrap() = Some(handler);
	}

	fn on_connection_state_change(&self, _handler: StateHandler) {}
	fn on_selected_pair(&self, _handler: PairHandler) {}

	fn local_credentials(&self) -> IceCredentials {
		self.creds.clone()
	}

	async fn gather_candidates(&self) -> IceResult<()> {
		if let Some(handler) = self.candidate_handler.lock().unwrap().as_ref() {
			handler(self.pair.local.clone());
		}
		Ok(())
	}

	async fn add_remote_candidate(&self, _candidate: Candidate) -> IceResult<()> {
		Ok(())
	}

	async fn dial(&self, _remote: IceCredentials) -> IceResult<Arc<dyn IceTransport>> {
		self.connect().await
	}

	async fn accept(&self, _remote: IceCredentials) -> IceResult<Arc<dyn IceTransport>> {
		self.connect().await
	}

	async fn selected_pair(&self) -> IceResult<CandidatePair> {
		Ok(self.pair.clone())
	}

	async fn close(&self) -> IceResult<()> {
		Ok(())
	}
}

struct StaticTransport {
	socket: Arc<UdpSocket>,
	fake_local: SocketAddr,
	fake_remote: SocketAddr,
}

#[async_trait]
impl IceTransport for StaticTransport {
	async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
		self.socket.recv(buf).await
	}

	async fn send(&self, buf: &[u8]) -> std::io::Result<usize> {
		self.socket.send(buf).await
	}

	fn local_addr(&self) -> SocketAddr {
		self.fake_local
	}

	fn remote_addr(&self) -> SocketAddr {
		self.fake_remote
	}

	async fn close(&self) -> std::io::Result<()> {
		Ok(())
	}
}

/// Poll until `predicate` holds or the timeout elapses.
pub async fn wait_for<F>(timeout: Duration, mut predicate: F) -> bool
where
	F: FnMut() -> bool,
{
	let deadline = tokio::time::Instant::now() + timeout;
	loop {
		if predicate() {
			return true;
		}
		if tokio::time::Instant::now() >= deadline {
			return false;
		}
		tokio::time::sleep(Duration::from_millis(25)).await;
	}
}
