//! Fabric Evaluation System
//!
//! Turns a loaded template into a rendered content tree.
//!
//! # Core Components
//!
//! ## Loader
//! Lowers template blocks into actions: resolves `ref` inheritance, configuration and
//! plugin lookups, and reports every problem at once.
//!
//! ## Data Evaluator
//! Runs the data blocks of a document concurrently and merges their results under
//! `data.<plugin>.<block>`.
//!
//! ## Expansion
//! Includes or drops sections, expands dynamic blocks and filters by tags.
//!
//! ## Content Evaluator
//! Schedules content units in three phases, honouring `depends_on`, and writes each
//! result into the placeholder reserved for it so the tree keeps declaration order.
//!
//! ## Document
//! Composes the above per document and runs the publishers.
//!
//! # Evaluation Pipeline
//!
//! 1. fetch data
//! 2. bind document meta and vars
//! 3. expand sections and dynamic blocks
//! 4. filter by tags
//! 5. assign and execute content units
//! 6. publish

pub mod action;
pub mod content;
pub mod context;
pub mod data;
pub mod document;
pub mod load;
pub mod unwrap;

pub use action::{ContentAction, ContentItem, DataAction, PublishAction};
pub use content::ContentEvaluator;
pub use document::{Document, RenderOptions, RenderedContent};
pub use load::Loader;
