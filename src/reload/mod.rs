//! Browser live-reload transport.
//!
//! ```text
//! DevServer --Broadcast--> ReloadHub --fan-out--> WebSocket clients
//!                              ^
//!           accept loop --Register/Unregister--+
//! ```

pub mod hub;
pub mod message;
pub mod server;

pub use hub::{HubHandle, ReloadHub};
pub use message::{ErrorPayload, ReloadMessage};
pub use server::{RELOAD_ENDPOINT, start_reload_server};
