//! tgState Relay Library
//!
//! Media upload relay that forwards image and video files to a tgState file
//! host, turns the location it answers with into a public URL, and keeps a
//! durable history of completed uploads.
//!
//! # Features
//!
//! - **Media Only**: Files are accepted by extension or declared type
//! - **Strict Replies**: Every backend reply maps to one explicit outcome
//! - **Portable History**: Locations are stored root-relative, so a change
//!   of public host never invalidates old records
//!
//! # Example
//!
//! ```no_run
//! use tgstate_relay::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = Server::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod history;
pub mod location;
pub mod metrics;
pub mod relay;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use relay::{Relay, RelayError, RelayOutcome};
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
