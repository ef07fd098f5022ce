//! # Fabric: evaluation engine for declarative document templates
//!
//! A template declares documents made of data blocks (calls to data sources), content
//! blocks (calls to content providers), sections and publishers. Fabric turns the
//! parsed template graph into a concurrent, dependency-ordered computation whose
//! result is an ordered tree of content nodes.
//!
//! ## Building blocks
//!
//! - Values and deferred computations ([`value`], [`deferred`], [`query`]): plugin
//!   arguments may embed jq-style queries that run lazily against the data context and
//!   memoize their result.
//! - Template graph and lowering ([`template`], [`eval::load`], [`circular`]): `ref`
//!   inheritance is resolved with cycle detection, and blocks become actions bound to
//!   their plugins.
//! - Evaluation ([`eval`]): data is fetched concurrently, sections and dynamic blocks
//!   are expanded, and content units run in phases while keeping declaration order in
//!   the [`content`] tree.
//! - Plugins ([`plugin`]): the capability traits the engine calls, a registry, and a
//!   handful of built-ins.
//!
//! ## Errors
//!
//! User-facing problems are reported as [`diagnostics::Diagnostics`] carrying source
//! ranges; [`Error`] covers everything else.
//!
//! ```text
//! Template → Loader → Document → fetch data → expand → schedule content → publish
//! ```

pub mod circular;
pub mod config;
pub mod content;
pub mod deferred;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod eval;
pub mod plugin;
pub mod query;
pub mod template;
pub mod value;

// Re-exports
pub use config::EngineConfig;
pub use diagnostics::{DiagResult, Diagnostic, Diagnostics};
pub use engine::Engine;
pub use error::*;
pub use value::Value;
