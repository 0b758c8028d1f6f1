//! `[serve]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [serve]
//! interface = "127.0.0.1"     # Network interface (127.0.0.1 = localhost only)
//! port = 8100                 # Dev server (proxy) port
//! app_port = 8080             # Port the application listens on
//! reload_port = 35901         # WebSocket reload port
//! watch = true                # Auto-rebuild on file changes
//! ```

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// Development server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Network interface to bind.
    /// - `127.0.0.1` (default): localhost only
    /// - `0.0.0.0`: all interfaces (LAN accessible)
    pub interface: IpAddr,

    /// Dev server (reverse proxy) port.
    pub port: u16,

    /// Port the application process listens on.
    pub app_port: u16,

    /// WebSocket reload port.
    pub reload_port: u16,

    /// Enable file watcher for live reload.
    pub watch: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            interface: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 8100,
            app_port: 8080,
            reload_port: 35901,
            watch: true,
        }
    }
}
