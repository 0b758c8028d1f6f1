//! Dev-port HTTP server: reverse proxy plus reload-client injection.
//!
//! Non-reload paths are forwarded to the application's port with header
//! passthrough; `text/html` responses get the reload script injected before
//! `</body>` (best effort). While the app is down or still building, a
//! self-refreshing waiting page is served instead.

use anyhow::{Context, Result};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tiny_http::{Header, Request, Response, Server, StatusCode};

use crate::config::DevConfig;
use crate::embed::serve::{RELOAD_JS, RELOAD_JS_PATH, ReloadVars, WAITING_HTML, reload_script_tag};
use crate::{debug, log};

/// Upstream request timeout.
const PROXY_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of port binding attempts.
const MAX_PORT_RETRIES: u16 = 10;

/// Request headers that must not be forwarded hop to hop.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const HTML: &str = "text/html; charset=utf-8";
const JAVASCRIPT: &str = "application/javascript; charset=utf-8";

/// Bound server ready to accept requests.
pub struct BoundServer {
    pub server: Arc<Server>,
    pub addr: SocketAddr,
}

/// Bind the dev server with automatic port retry.
pub fn bind_server(config: &DevConfig) -> Result<BoundServer> {
    for offset in 0..MAX_PORT_RETRIES {
        let port = config.serve.port.saturating_add(offset);
        let addr = SocketAddr::new(config.serve.interface, port);

        match Server::http(addr) {
            Ok(server) => {
                if offset > 0 {
                    log!("serve"; "port {} in use, using {} instead", config.serve.port, port);
                }
                return Ok(BoundServer {
                    server: Arc::new(server),
                    addr,
                });
            }
            Err(_) if offset + 1 < MAX_PORT_RETRIES => continue,
            Err(e) => {
                anyhow::bail!(
                    "failed to bind dev server after {} attempts (ports {}-{}): {}",
                    MAX_PORT_RETRIES,
                    config.serve.port,
                    port,
                    e
                );
            }
        }
    }
    unreachable!()
}

/// Run the request loop (blocking) until the server is unblocked.
pub fn run_request_loop(server: &Server, config: Arc<DevConfig>, ws_port: u16) {
    let client = Arc::new(
        reqwest::blocking::Client::builder()
            .timeout(PROXY_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build proxy client"),
    );

    // Thread pool so one slow upstream request cannot stall the rest
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .expect("failed to create thread pool");

    for request in server.incoming_requests() {
        let config = Arc::clone(&config);
        let client = Arc::clone(&client);
        pool.spawn(move || {
            if let Err(e) = handle_request(request, &config, ws_port, &client) {
                log!("proxy"; "request error: {e:#}");
            }
        });
    }
}

/// Handle a single HTTP request.
fn handle_request(
    request: Request,
    config: &DevConfig,
    ws_port: u16,
    client: &reqwest::blocking::Client,
) -> Result<()> {
    if crate::core::is_shutdown() {
        return respond_text(request, 503, "503 Service Unavailable");
    }

    // The reload client is served from memory at a fixed path
    if request.url() == RELOAD_JS_PATH {
        let body = RELOAD_JS.render(&ReloadVars { ws_port });
        return respond(request, 200, JAVASCRIPT, body.into_bytes());
    }

    // Initial build still running: self-refreshing placeholder
    if !crate::core::is_serving() {
        return respond(request, 200, HTML, WAITING_HTML.as_bytes().to_vec());
    }

    forward(request, config, client)
}

/// Forward one request to the application port.
fn forward(
    mut request: Request,
    config: &DevConfig,
    client: &reqwest::blocking::Client,
) -> Result<()> {
    let url = format!(
        "http://127.0.0.1:{}{}",
        config.serve.app_port,
        request.url()
    );
    let method = reqwest::Method::from_bytes(request.method().to_string().as_bytes())
        .context("unsupported method")?;

    let mut body = Vec::new();
    request
        .as_reader()
        .read_to_end(&mut body)
        .context("failed to read request body")?;

    let mut upstream = client.request(method, &url);
    for header in request.headers() {
        let name = header.field.as_str().as_str();
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("host") {
            continue;
        }
        upstream = upstream.header(name, header.value.as_str());
    }

    let response = match upstream.body(body).send() {
        Ok(r) => r,
        Err(e) => {
            // App down or restarting: serve the retry page instead of an
            // opaque browser error
            debug!("proxy"; "upstream unreachable: {}", e);
            return respond(request, 502, HTML, WAITING_HTML.as_bytes().to_vec());
        }
    };

    let status = response.status().as_u16();
    let mut headers: Vec<Header> = Vec::new();
    let mut is_html = false;
    for (name, value) in response.headers() {
        let name_str = name.as_str();
        if is_hop_by_hop(name_str) || name_str.eq_ignore_ascii_case("content-length") {
            continue;
        }
        if name_str.eq_ignore_ascii_case("content-type") {
            is_html = value
                .to_str()
                .map(|v| v.starts_with("text/html"))
                .unwrap_or(false);
        }
        if let Ok(h) = Header::from_bytes(name_str.as_bytes(), value.as_bytes()) {
            headers.push(h);
        }
    }

    let mut bytes = response
        .bytes()
        .context("failed to read upstream body")?
        .to_vec();
    if is_html {
        bytes = inject_reload_script(&bytes, &reload_script_tag());
    }

    let mut out = Response::from_data(bytes).with_status_code(StatusCode(status));
    for h in headers {
        out.add_header(h);
    }
    request.respond(out)?;
    Ok(())
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Inject the reload script before `</body>` (case-insensitive); append
/// when no closing tag exists - browsers handle that gracefully.
fn inject_reload_script(content: &[u8], tag: &str) -> Vec<u8> {
    const PATTERN: &[u8] = b"</body>";
    let tag_bytes = tag.as_bytes();

    let mut result = Vec::with_capacity(content.len() + tag_bytes.len());
    if let Some(pos) = content
        .windows(PATTERN.len())
        .rposition(|w| w.eq_ignore_ascii_case(PATTERN))
    {
        result.extend_from_slice(&content[..pos]);
        result.extend_from_slice(tag_bytes);
        result.extend_from_slice(&content[pos..]);
    } else {
        result.extend_from_slice(content);
        result.extend_from_slice(tag_bytes);
    }
    result
}

fn respond(
    request: Request,
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
) -> Result<()> {
    let response = Response::from_data(body)
        .with_status_code(StatusCode(status))
        .with_header(Header::from_bytes("Content-Type", content_type).unwrap());
    request.respond(response)?;
    Ok(())
}

fn respond_text(request: Request, status: u16, body: &str) -> Result<()> {
    respond(
        request,
        status,
        "text/plain; charset=utf-8",
        body.as_bytes().to_vec(),
    )
}

// =============================================================================
// Tests
// =============================================================================
