//! A small WebDAV server that exposes one local directory tree.
//!
//! # How It Works
//!
//! Every request flows through the same pipeline:
//! 1. [`Dispatcher`] checks credentials and answers `OPTIONS`
//! 2. [`StorageRoot`] decodes and confines the request path to the storage root
//! 3. the verb is routed to the [`ops`] executor or the [`resource`] describer
//! 4. [`render`] turns descriptors into multistatus XML or an HTML index
//!
//! The filesystem is the only state. Resources are described afresh on every
//! request and nothing is cached between requests, except the credentials.
//!
//! # Example
//!
//! ```no_run
//! use davlite::{DavServer, ServerConfig};
//!
//! # async fn run() -> std::io::Result<()> {
//! let config = ServerConfig {
//!     storage_root: "/srv/dav".into(),
//!     require_auth: false,
//!     ..ServerConfig::default()
//! };
//! let server = DavServer::start(&config, None).await?;
//! println!("Serving on {}", server.url());
//! # server.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! Paths that climb above the root with `..`, or reach outside it through
//! symlinks, are refused with `403` before any filesystem access on the
//! target. By default the server binds to localhost and requires Basic
//! credentials from a [`CredentialStore`]. There is no TLS; put a reverse
//! proxy in front when exposing it beyond the local machine.

mod body;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod ops;
pub mod render;
pub mod resource;
pub mod sandbox;
mod server;

pub use body::DavBody;
pub use credentials::{Authenticator, CredentialError, CredentialStore};
pub use dispatch::Dispatcher;
pub use error::{DavError, DavResult};
pub use resource::{Resource, ResourceKind};
pub use sandbox::{ResolvedPath, StorageRoot};
pub use server::{DavServer, ServerConfig};
