//! Embedded static resources for the dev server.
//!
//! - `template` - typed variable injection into embedded text
//! - `serve` - the browser reload client and error pages
//!
//! # Usage
//!
//! ```ignore
//! use embed::serve::{RELOAD_JS, ReloadVars};
//!
//! let js = RELOAD_JS.render(&ReloadVars { ws_port: 35901 });
//! ```

mod template;

pub use template::{Template, TemplateVars};

pub mod serve {
    use super::{Template, TemplateVars};
    use crate::reload::RELOAD_ENDPOINT;

    /// URL path the proxy serves the reload client from.
    pub const RELOAD_JS_PATH: &str = "/__smelt/reload.js";

    /// Variables for reload.js.
    pub struct ReloadVars {
        pub ws_port: u16,
    }

    impl TemplateVars for ReloadVars {
        fn apply(&self, content: &str) -> String {
            content
                .replace("__SMELT_WS_PORT__", &self.ws_port.to_string())
                .replace("__SMELT_WS_PATH__", RELOAD_ENDPOINT)
        }
    }

    /// Browser reload client with WebSocket port injection.
    pub const RELOAD_JS: Template<ReloadVars> = Template::new(include_str!("serve/reload.js"));

    /// Script tag referencing the served reload client.
    pub fn reload_script_tag() -> String {
        format!(r#"<script src="{RELOAD_JS_PATH}" defer></script>"#)
    }

    /// Placeholder page shown while the app process is unreachable.
    pub const WAITING_HTML: &str = include_str!("serve/waiting.html");
}

#[cfg(test)]
mod tests {
    use super::serve::*;

    #[test]
    fn reload_js_renders_port_and_path() {
        let js = RELOAD_JS.render(&ReloadVars { ws_port: 41234 });
        assert!(js.contains("41234"));
        assert!(js.contains("/__smelt_reload"));
        assert!(!js.contains("__SMELT_WS_PORT__"));
    }

    #[test]
    fn script_tag_points_at_served_path() {
        assert!(reload_script_tag().contains(RELOAD_JS_PATH));
    }
}
