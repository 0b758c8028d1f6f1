//! Configuration section definitions.

mod build;
mod migrate;
mod serve;
mod watch;

pub use build::BuildConfig;
pub use migrate::MigrateConfig;
pub use serve::ServeConfig;
pub use watch::WatchConfig;
