//! Apollo Extension Directory
//!
//! Configuration and live state for the extension lines of a Coventry phone
//! exchange.
//!
//! ## Layers
//!
//! | Layer | File | Required | Written |
//! |-------|------|----------|---------|
//! | defaults | `/usr/share/apollo/defaults.conf` | no | never |
//! | site | `<etc>/coventry.conf` | yes | seeded defaults only |
//! | dynamic | `<working>/dynamic.conf` | no | every mutation |
//! | custom | `<working>/custom.conf` | no | never |
//!
//! Live agent, presence and call counts come from the exchange daemon's
//! shared registry, described by `<working>/ipc.json`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use apollo_directory::{spawn_reload_listener, Directory, DirectoryPaths, LineRecord};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), apollo_directory::Error> {
//!     let directory = Arc::new(Directory::open(DirectoryPaths::from_env())?);
//!     let (_trigger, _listener) = spawn_reload_listener(directory.clone());
//!
//!     if let Some((id, _template)) = directory.allocate() {
//!         let record = LineRecord {
//!             display: Some("Reception".to_string()),
//!             ..Default::default()
//!         };
//!         directory.provision(id, &record)?;
//!     }
//!     for (id, line) in directory.list() {
//!         println!("{id}: {} ({})", line.display, line.presence);
//!     }
//!     Ok(())
//! }
//! ```

pub mod digest;
pub mod directory;
pub mod error;
pub mod groups;
pub mod ini;
pub mod line;
pub mod registry;
pub mod reload;
pub mod settings;
pub mod store;

pub use digest::{admin_digest, md5_secret, sha256_secret, Credentials, DigestAlgorithms};
pub use directory::Directory;
pub use error::{Error, Result};
pub use groups::Group;
pub use line::{is_extension, Line, LineField, LineRecord, FIRST_EXTENSION, LAST_EXTENSION};
pub use registry::{IpcDescriptor, LiveFields, RegistryBridge};
pub use reload::{spawn_reload_listener, ReloadTrigger};
pub use settings::DirectoryPaths;
pub use store::{Layer, LayeredConfig, ServerIdentity};
