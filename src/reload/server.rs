//! WebSocket server for live reload.
//!
//! Accepts browser connections on a dedicated localhost port and hands the
//! handshaken sockets to the [`ReloadHub`](super::hub::ReloadHub). The
//! handshake enforces the fixed endpoint path and a localhost-only origin -
//! this transport is dev-only and must never be reachable cross-site.

use std::net::{TcpListener, TcpStream};

use anyhow::Result;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};

use super::hub::HubHandle;

/// Fixed WebSocket endpoint path.
pub const RELOAD_ENDPOINT: &str = "/__smelt_reload";

/// Maximum port retry attempts
const MAX_PORT_RETRIES: u16 = 10;

/// Start the reload WebSocket server.
///
/// Binds `base_port` (retrying upward when in use), then accepts
/// connections on a background thread, registering each handshaken client
/// with the hub. Returns the actually bound port.
pub fn start_reload_server(base_port: u16, hub: HubHandle) -> Result<u16> {
    let (listener, actual_port) = try_bind_port(base_port, MAX_PORT_RETRIES)?;

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    if !accept_client(stream, &hub) {
                        break; // Hub shut down
                    }
                }
                Err(e) => {
                    crate::log!("reload"; "accept error: {}", e);
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }
            }
        }
    });

    Ok(actual_port)
}

/// Handshake one connection and register it. Returns false when the hub is
/// gone and the accept loop should stop.
fn accept_client(stream: TcpStream, hub: &HubHandle) -> bool {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());

    match tungstenite::accept_hdr(stream, check_handshake) {
        Ok(ws) => {
            crate::debug!("reload"; "client connected: {}", peer);
            hub.register(ws)
        }
        Err(e) => {
            crate::debug!("reload"; "handshake rejected ({}): {}", peer, e);
            true
        }
    }
}

/// Validate the handshake: fixed path, localhost-only origin.
fn check_handshake(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() != RELOAD_ENDPOINT {
        return Err(reject(404, "unknown endpoint"));
    }

    if let Some(origin) = request.headers().get("origin") {
        let origin = origin.to_str().unwrap_or("");
        if !origin_allowed(origin) {
            return Err(reject(403, "non-local origin"));
        }
    }

    Ok(response)
}

fn reject(status: u16, reason: &str) -> ErrorResponse {
    use tungstenite::http::StatusCode;

    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() =
        StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
    response
}

/// Only localhost variants may connect.
fn origin_allowed(origin: &str) -> bool {
    let rest = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"));
    let Some(rest) = rest else {
        return false;
    };

    let host = if let Some(v6) = rest.strip_prefix('[') {
        // Bracketed IPv6 literal
        match v6.split(']').next() {
            Some(h) => h,
            None => return false,
        }
    } else {
        rest.split([':', '/']).next().unwrap_or("")
    };

    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

// =============================================================================
// Helpers
// =============================================================================

/// Try binding to port, retry with incremented port if in use
fn try_bind_port(base_port: u16, max_retries: u16) -> Result<(TcpListener, u16)> {
    let mut last_error = None;

    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        match TcpListener::bind(format!("127.0.0.1:{}", port)) {
            Ok(listener) => {
                let actual_port = listener.local_addr()?.port();
                return Ok((listener, actual_port));
            }
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        }
    }

    Err(anyhow::anyhow!(
        "Failed to bind reload server after {} attempts: {}",
        max_retries,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_origins_allowed() {
        assert!(origin_allowed("http://localhost"));
        assert!(origin_allowed("http://localhost:8100"));
        assert!(origin_allowed("http://127.0.0.1:8100/"));
        assert!(origin_allowed("https://localhost:8100"));
        assert!(origin_allowed("http://[::1]:8100"));
    }

    #[test]
    fn remote_origins_rejected() {
        assert!(!origin_allowed("http://evil.example.com"));
        assert!(!origin_allowed("http://localhost.evil.example.com"));
        assert!(!origin_allowed("http://192.168.1.10:8100"));
        assert!(!origin_allowed("file://localhost"));
        assert!(!origin_allowed(""));
    }

    #[test]
    fn port_retry_walks_upward() {
        // Occupy a port, then ask the server to bind starting at it
        let (first, base) = try_bind_port(0, 1).unwrap();
        let (_second, actual) = try_bind_port(base, MAX_PORT_RETRIES).unwrap();
        assert_ne!(base, actual);
        drop(first);
    }
}
