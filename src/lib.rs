//! # Pulumi Plugin Host
//!
//! A Rust SDK for hosting Pulumi resource-provider plugins: starting and
//! stopping plugin processes, and driving the full resource lifecycle
//! (check, diff, create, read, update, delete, invoke) against them.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pulumi_plugin_host::{Context, init_logging};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let ctx = Context::new(engine, installer);
//!     ctx.scoped(|ctx| async move {
//!         let provider = ctx.provider("aws");
//!         provider
//!             .scoped(|p| async move {
//!                 let schema = p.get_schema(0).await?;
//!                 tracing::info!(name = %schema["name"], "Loaded provider schema");
//!                 Ok(())
//!             })
//!             .await
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! - **[`Context`]**: a named registry of provider sessions. Two contexts
//!   with the same name share one registry, so sessions configured through
//!   one are visible (and torn down) through the other.
//! - **[`Provider`]**: one session with a plugin process, moving through
//!   unconfigured, configured, and torn-down states. Every resource RPC
//!   requires a configured session.
//! - **[`Urn`]**: the structured resource identity
//!   (`urn:pulumi:{stack}::{project}::{type}::{name}`) every resource
//!   operation is addressed by.
//! - **[`PluginEngine`] / [`PluginInstaller`]**: the traits a transport
//!   implements to actually run and fetch plugins. The
//!   [`testing::TestEngine`] implementation simulates both in memory.
//!
//! ## Property Bags
//!
//! Resource state travels as JSON objects ([`PropertyMap`]). Values not yet
//! known at preview time are encoded as single-key objects under
//! [`value::UNKNOWN_KEY`]; see [`UnknownValue`] for the sentinel scheme and
//! [`value::bag_unknown_keys`] for scanning a bag.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod engine;
pub mod error;
pub mod logging;
pub mod provider;
pub mod testing;
pub mod urn;
pub mod value;

pub use context::{Context, ContextOptions};
pub use engine::{PluginEngine, PluginInfo, PluginInstaller, SessionHandle};
pub use error::{Error, Result, SessionErrorKind};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::{Provider, DEFAULT_OPERATION_TIMEOUT};
pub use urn::{Urn, BLANK};
pub use value::{
    CheckFailure, CreateResult, DiffKind, DiffResult, PropertyDiff, PropertyMap, ReadResult,
    UnknownValue, UpdateResult,
};

// Re-export commonly used dependencies for convenience.
pub use async_trait::async_trait;
pub use semver;
pub use serde_json;
pub use tracing;
