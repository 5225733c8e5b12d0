// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Minimal STUN binding client used for server-reflexive candidate
//! discovery. Only binding requests and (XOR-)mapped-address responses
//! are understood.

use crate::error::{IceError, Result};
use crate::mux::UdpMux;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

const STUN_TIMEOUT: Duration = Duration::from_secs(3);
const STUN_MAGIC_COOKIE: u32 = 0x2112A442;

const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS: u16 = 0x0101;

const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

const ADDR_FAMILY_IPV4: u8 = 0x01;
const ADDR_FAMILY_IPV6: u8 = 0x02;

pub fn build_binding_request(transaction_id: &[u8; 12]) -> Vec<u8> {
	let mut request = Vec::with_capacity(20);
	request.extend_from_slice(&BINDING_REQUEST.to_be_bytes());
	request.extend_from_slice(&0u16.to_be_bytes());
	request.extend_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
	request.extend_from_slice(transaction_id);
	request
}

pub fn parse_binding_response(
	data: &[u8],
	expected_transaction_id: &[u8; 12],
) -> Result<SocketAddr> {
	let malformed = || IceError::Stun("malformed binding response".to_string());

	if data.len() < 20 {
		return Err(malformed());
	}

	let message_type = u16::from_be_bytes([data[0], data[1]]);
	if message_type != BINDING_SUCCESS {
		return Err(IceError::Stun(format!(
			"unexpected message type {message_type:#06x}"
		)));
	}

	let message_length = u16::from_be_bytes([data[2], data[3]]) as usize;

	let magic = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
	if magic != STUN_MAGIC_COOKIE {
		return Err(malformed());
	}

	if &data[8..20] != expected_transaction_id {
		return Err(IceError::Stun("transaction id mismatch".to_string()));
	}

	if data.len() < 20 + message_length {
		return Err(malformed());
	}

	let mut offset = 20;
	let end = 20 + message_length;

	while offset + 4 <= end {
		let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
		let attr_length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
		offset += 4;

		if offset + attr_length > end {
			return Err(malformed());
		}

		if attr_type == ATTR_XOR_MAPPED_ADDRESS || attr_type == ATTR_MAPPED_ADDRESS {
			let xor = attr_type == ATTR_XOR_MAPPED_ADDRESS;
			if let Some(addr) = parse_mapped_address(&data[offset..offset + attr_length], xor) {
				return Ok(addr);
			}
		}

		offset += (attr_length + 3) & !3;
	}

	Err(IceError::Stun("no mapped address attribute".to_string()))
}

fn parse_mapped_address(data: &[u8], xor: bool) -> Option<SocketAddr> {
	if data.len() < 4 {
		return None;
	}

	let family = data[1];
	let mut port = u16::from_be_bytes([data[2], data[3]]);
	if xor {
		port ^= (STUN_MAGIC_COOKIE >> 16) as u16;
	}

	match family {
		ADDR_FAMILY_IPV4 if data.len() >= 8 => {
			let mut ip_bytes = [data[4], data[5], data[6], data[7]];
			if xor {
				let magic_bytes = STUN_MAGIC_COOKIE.to_be_bytes();
				for (i, b) in ip_bytes.iter_mut().enumerate() {
					*b ^= magic_bytes[i];
				}
			}
			Some(SocketAddr::V4(SocketAddrV4::new(
				Ipv4Addr::from(ip_bytes),
				port,
			)))
		}
		ADDR_FAMILY_IPV6 if data.len() >= 20 => {
			let mut ip_bytes: [u8; 16] = data[4..20].try_into().ok()?;
			if xor {
				let magic_bytes = STUN_MAGIC_COOKIE.to_be_bytes();
				for (i, b) in ip_bytes.iter_mut().enumerate().take(4) {
					*b ^= magic_bytes[i];
				}
			}
			Some(SocketAddr::V6(SocketAddrV6::new(
				Ipv6Addr::from(ip_bytes),
				port,
				0,
				0,
			)))
		}
		_ => None,
	}
}

/// Ask one STUN server for this mux socket's public mapping.
pub async fn query_mapped_address(mux: &UdpMux, server: SocketAddr) -> Result<SocketAddr> {
	let transaction_id: [u8; 12] = fastrand::u128(..).to_le_bytes()[..12]
		.try_into()
		.expect("12 bytes from 16");

	let mut responses = mux.claim(server);
	let request = build_binding_request(&transaction_id);

	let result = async {
		mux.send_to(&request, server).await?;
		debug!(?server, "sent STUN binding request");

		match timeout(STUN_TIMEOUT, responses.recv()).await {
			Ok(Some(packet)) => parse_binding_response(&packet, &transaction_id),
			Ok(None) => Err(IceError::MuxClosed),
			Err(_) => {
				warn!(?server, "STUN binding request timed out");
				Err(IceError::Stun("binding request timed out".to_string()))
			}
		}
	}
	.await;

	mux.release(&server);
	result
}

pub async fn resolve_server(host: &str, port: u16) -> Result<SocketAddr> {
	let mut resolved = tokio::net::lookup_host((host, port)).await?;
	resolved
		.next()
		.ok_or_else(|| IceError::Stun(format!("cannot resolve {host}:{port}")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn binding_request_layout() {
		let transaction_id = [7u8; 12];
		let request = build_binding_request(&transaction_id);

		assert_eq!(request.len(), 20);
		assert_eq!(&request[0..2], &[0x00, 0x01]);
		assert_eq!(&request[2..4], &[0x00, 0x00]);
		assert_eq!(&request[4..8], &STUN_MAGIC_COOKIE.to_be_bytes());
		assert_eq!(&request[8..20], &transaction_id);
	}

	fn xor_mapped_response(transaction_id: &[u8; 12], ip: Ipv4Addr, port: u16) -> Vec<u8> {
		let mut response = Vec::new();
		response.extend_from_slice(&BINDING_SUCCESS.to_be_bytes());
		response.extend_from_slice(&12u16.to_be_bytes());
		response.extend_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
		response.extend_from_slice(transaction_id);

		response.extend_from_slice(&ATTR_XOR_MAPPED_ADDRESS.to_be_bytes());
		response.extend_from_slice(&8u16.to_be_bytes());
		response.push(0x00);
		response.push(ADDR_FAMILY_IPV4);

		let xor_port = port ^ ((STUN_MAGIC_COOKIE >> 16) as u16);
		response.extend_from_slice(&xor_port.to_be_bytes());

		let magic_bytes = STUN_MAGIC_COOKIE.to_be_bytes();
		let ip_bytes = ip.octets();
		for (i, b) in ip_bytes.iter().enumerate() {
			response.push(b ^ magic_bytes[i]);
		}
		response
	}

	#[test]
	fn parses_xor_mapped_ipv4() {
		let transaction_id = [0u8; 12];
		let ip = Ipv4Addr::new(203, 0, 113, 1);
		let response = xor_mapped_response(&transaction_id, ip, 12345);

		let result = parse_binding_response(&response, &transaction_id).unwrap();
		assert_eq!(result, SocketAddr::V4(SocketAddrV4::new(ip, 12345)));
	}

	#[test]
	fn rejects_wrong_transaction_id() {
		let transaction_id = [1u8; 12];
		let response = xor_mapped_response(&transaction_id, Ipv4Addr::new(1, 2, 3, 4), 80);
		assert!(parse_binding_response(&response, &[2u8; 12]).is_err());
	}

	#[test]
	fn rejects_truncated_response() {
		assert!(parse_binding_response(&[0u8; 10], &[0u8; 12]).is_err());
	}
}
