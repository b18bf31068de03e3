//! # capstan
//!
//! Capability acquisition engine for MCP servers.
//!
//! Given a declarative [`descriptor::ServerDescriptor`] for a server (local
//! subprocess or remote HTTP endpoint), the engine connects, performs the
//! MCP initialize handshake, enumerates the capabilities the server
//! advertised (tools, resources, prompts), and returns a
//! [`snapshot::CapabilitySnapshot`]. Failures come back as
//! [`error::ClassifiedError`] values labeled with the phase they occurred
//! in, captured server diagnostics are surfaced through structured log
//! records, and every acquisition tears its resources down exactly once on
//! success and failure alike.
//!
//! ## Layers
//!
//! - [`protocol`]: JSON-RPC 2.0 / MCP message types
//! - [`transport`] and [`http`]: byte streams to local and remote servers
//! - [`session`]: handshake sequencing and paginated listing calls
//! - [`provider`]: full acquisition drives with classification and cleanup
//! - [`engine`]: facade tying providers, cache and health together
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use capstan::auth::StaticTokenSource;
//! use capstan::descriptor::{LocalDescriptor, ServerDescriptor};
//! use capstan::engine::Engine;
//! use capstan::events::TracingSink;
//! use capstan::provider::AcquireConfig;
//!
//! # async fn run() {
//! let engine = Engine::new(
//!     AcquireConfig::default(),
//!     Arc::new(TracingSink),
//!     Arc::new(StaticTokenSource::unauthorized()),
//! );
//!
//! let descriptor = ServerDescriptor::LocalProcess(LocalDescriptor {
//!     name: "files".to_string(),
//!     executable: "mcp-server-filesystem".to_string(),
//!     arguments: vec!["/tmp".to_string()],
//!     working_directory: None,
//!     project_env: Default::default(),
//!     server_env: Default::default(),
//! });
//!
//! let report = engine.refresh(&descriptor).await;
//! if let Ok(snapshot) = &report.outcome {
//!     println!("{} capabilities", snapshot.item_count());
//! }
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod descriptor;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod http;
pub mod protocol;
pub mod provider;
pub mod session;
pub mod snapshot;
pub mod transport;

pub use descriptor::ServerDescriptor;
pub use engine::{AcquisitionReport, Engine};
pub use error::{ClassifiedError, ErrorKind, Phase};
pub use snapshot::CapabilitySnapshot;
