//! Client address resolution for requests that may have crossed proxies.

use std::net::{IpAddr, SocketAddr};

use rocket::request::Request;

/// Derives a client identifier from a request.
pub trait ClientResolver: Send + Sync + 'static {
	/// Returns `None` when no usable address can be found.
	fn resolve(&self, req: &Request<'_>) -> Option<String>;
}

/// Honours `X-Forwarded-For` and `X-Real-IP` before the peer address.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardedResolver;

impl ClientResolver for ForwardedResolver {
	fn resolve(&self, req: &Request<'_>) -> Option<String> {
		let headers = req.headers();
		real_ip(headers.get_one("X-Forwarded-For"), headers.get_one("X-Real-IP"), req.remote())
			.map(|ip| ip.to_string())
	}
}

/// Picks the address that most likely belongs to the client.
///
/// The first public address in `X-Forwarded-For` wins, then `X-Real-IP`,
/// then the first parseable forwarded address, and finally the peer.
pub fn real_ip(forwarded_for: Option<&str>, real_ip: Option<&str>, remote: Option<SocketAddr>) -> Option<IpAddr> {
	let forwarded: Vec<IpAddr> = forwarded_for
		.unwrap_or_default()
		.split(',')
		.filter_map(parse_ip)
		.collect();

	if let Some(ip) = forwarded.iter().find(|ip| !is_private(ip)) {
		return Some(*ip);
	}
	if let Some(ip) = real_ip.and_then(parse_ip) {
		return Some(ip);
	}
	forwarded.first().copied().or_else(|| remote.map(|addr| addr.ip()))
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
	let raw = raw.trim();
	if raw.is_empty() {
		return None;
	}
	raw.parse::<IpAddr>()
		.ok()
		.or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

fn is_private(ip: &IpAddr) -> bool {
	match ip {
		IpAddr::V4(v4) => {
			v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified() || v4.is_broadcast()
		}
		IpAddr::V6(v6) => {
			let first = v6.segments()[0];
			v6.is_loopback()
				|| v6.is_unspecified()
				|| (first & 0xfe00) == 0xfc00 // unique local
				|| (first & 0xffc0) == 0xfe80 // link local
		}
	}
}
