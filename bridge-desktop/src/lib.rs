//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux):
//! - `HttpClient` using `reqwest` (rustls, single attempt)
//! - `SettingsStore` using an SQLite-backed key-value table
//! - `TaskScheduler` using Tokio intervals and cancellation tokens
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteSettingsStore, TokioScheduler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let http = ReqwestHttpClient::new()?;
//!     let settings = SqliteSettingsStore::new(data_dir.join("settings.db")).await?;
//!     let scheduler = TokioScheduler::new();
//!     // Inject into CoreConfig
//!     Ok(())
//! }
//! ```

mod background;
mod http;
mod settings;

pub use background::TokioScheduler;
pub use http::ReqwestHttpClient;
pub use settings::SqliteSettingsStore;

/// Default per-user data directory (`<platform data dir>/kc-workspace`).
pub fn default_data_dir() -> Option<std::path::PathBuf> {
    dirs::data_dir().map(|dir| dir.join("kc-workspace"))
}
