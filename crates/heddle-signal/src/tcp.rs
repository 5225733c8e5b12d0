// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::client::{Result, SignalClient, SignalError};
use crate::message::SignalMessage;
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument, warn};
use url::Url;

pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

/// First line on the wire; tells the service which public key this
/// stream belongs to.
#[derive(serde::Serialize, serde::Deserialize)]
struct Register {
	register: String,
}

type Writer = tokio::io::WriteHalf<Box<dyn AsyncReadWrite>>;

/// [`SignalClient`] speaking newline-delimited JSON over TCP, with TLS
/// when the service URI uses the `https` scheme.
pub struct TcpSignalClient {
	writer: Mutex<Writer>,
	inbound_rx: Mutex<mpsc::Receiver<SignalMessage>>,
	ready: Arc<AtomicBool>,
}

impl TcpSignalClient {
	#[instrument(skip(local_key), fields(uri = %uri))]
	pub async fn connect(uri: &str, local_key: &str, tls: bool) -> Result<Self> {
		let parsed = Url::parse(uri).map_err(|e| SignalError::InvalidUri {
			uri: uri.to_string(),
			reason: e.to_string(),
		})?;
		let host = parsed
			.host_str()
			.ok_or_else(|| SignalError::InvalidUri {
				uri: uri.to_string(),
				reason: "missing host".to_string(),
			})?
			.to_string();
		let port = parsed.port().unwrap_or(if tls { 443 } else { 80 });

		let tcp = TcpStream::connect((host.as_str(), port)).await?;
		debug!(host = %host, port, tls, "connected to signal service");

		let stream: Box<dyn AsyncReadWrite> = if tls {
			let tls_config = rustls::ClientConfig::builder()
				.with_root_certificates(rustls::RootCertStore {
					roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
				})
				.with_no_client_auth();
			let connector = TlsConnector::from(Arc::new(tls_config));
			let server_name: ServerName<'_> = host
				.clone()
				.try_into()
				.map_err(|e| SignalError::Tls(format!("invalid server name: {e}")))?;
			Box::new(
				connector
					.connect(server_name, tcp)
					.await
					.map_err(|e| SignalError::Tls(format!("TLS handshake failed: {e}")))?,
			)
		} else {
			Box::new(tcp)
		};

		let (read_half, mut writer) = tokio::io::split(stream);

		let register = serde_json::to_string(&Register {
			register: local_key.to_string(),
		})?;
		writer.write_all(register.as_bytes()).await?;
		writer.write_all(b"\n").await?;
		writer.flush().await?;

		let ready = Arc::new(AtomicBool::new(true));
		let (inbound_tx, inbound_rx) = mpsc::channel(64);
		spawn_read_loop(read_half, inbound_tx, Arc::clone(&ready));

		Ok(Self {
			writer: Mutex::new(writer),
			inbound_rx: Mutex::new(inbound_rx),
			ready,
		})
	}
}

fn spawn_read_loop(
	read_half: tokio::io::ReadHalf<Box<dyn AsyncReadWrite>>,
	inbound_tx: mpsc::Sender<SignalMessage>,
	ready: Arc<AtomicBool>,
) {
	tokio::spawn(async move {
		let mut reader = BufReader::new(read_half);
		let mut line = String::new();
		loop {
			line.clear();
			match reader.read_line(&mut line).await {
				Ok(0) => {
					debug!("signal stream closed by server");
					break;
				}
				Ok(_) => {
					let trimmed = line.trim();
					if trimmed.is_empty() {
						continue;
					}
					match serde_json::from_str::<SignalMessage>(trimmed) {
						Ok(msg) => {
							if inbound_tx.send(msg).await.is_err() {
								break;
							}
						}
						Err(e) => warn!(error = %e, "dropping undecodable signal message"),
					}
				}
				Err(e) => {
					warn!(error = %e, "signal stream read failed");
					break;
				}
			}
		}
		ready.store(false, Ordering::SeqCst);
	});
}

#[async_trait]
impl SignalClient for TcpSignalClient {
	async fn send(&self, msg: SignalMessage) -> Result<()> {
		if !self.is_ready() {
			return Err(SignalError::NotConnected);
		}
		let line = serde_json::to_string(&msg)?;
		let mut writer = self.writer.lock().await;
		writer.write_all(line.as_bytes()).await?;
		writer.write_all(b"\n").await?;
		writer.flush().await?;
		Ok(())
	}

	async fn recv(&self) -> Result<SignalMessage> {
		let mut rx = self.inbound_rx.lock().await;
		rx.recv().await.ok_or(SignalError::StreamEnded)
	}

	fn is_ready(&self) -> bool {
		self.ready.load(Ordering::SeqCst)
	}

	async fn wait_stream_connected(&self) {
		// the constructor only returns once the stream is up
	}

	async fn close(&self) -> Result<()> {
		self.ready.store(false, Ordering::SeqCst);
		let mut writer = self.writer.lock().await;
		writer.shutdown().await?;
		Ok(())
	}
}
