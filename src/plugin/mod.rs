//! Plugin capabilities the engine invokes, and the registry they are looked up in.

pub mod builtin;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use mockall::automock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::content::{ContentTree, NodeId};
use crate::diagnostics::{DiagResult, Diagnostics};
use crate::value::Value;

/// Coarse execution phase of a content provider. Phases run in declaration order.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvocationOrder {
    Begin,
    #[default]
    Unspecified,
    End,
}

#[derive(Debug, Clone, Default)]
pub struct DataParams {
    pub config: Value,
    pub args: Value,
}

#[derive(Debug, Clone)]
pub struct ContentParams {
    pub config: Value,
    pub args: Value,
    pub data_context: Value,
    pub content_id: NodeId,
}

#[derive(Debug, Clone)]
pub struct PublishParams {
    pub config: Value,
    pub args: Value,
    pub data_context: Value,
    pub document_name: String,
    pub content: Arc<ContentTree>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LocationEffect {
    /// Fill the empty placeholder at `index`.
    At,
    Before,
    After,
}

/// Where produced content goes relative to the children of the target parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub index: usize,
    pub effect: LocationEffect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Element { markdown: String, meta: Option<Value> },
    Section { children: Vec<Content> },
}

impl Content {
    pub fn markdown(text: impl Into<String>) -> Self {
        Content::Element {
            markdown: text.into(),
            meta: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentResult {
    pub content: Content,
    pub location: Option<Location>,
}

impl From<Content> for ContentResult {
    fn from(content: Content) -> Self {
        Self {
            content,
            location: None,
        }
    }
}

#[automock]
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn execute(&self, params: DataParams, cancel: CancellationToken) -> DiagResult<Value>;
}

#[automock]
#[async_trait]
pub trait ContentProvider: Send + Sync {
    fn invocation_order(&self) -> InvocationOrder {
        InvocationOrder::Unspecified
    }

    async fn execute(
        &self,
        params: ContentParams,
        cancel: CancellationToken,
    ) -> DiagResult<ContentResult>;
}

#[automock]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn execute(&self, params: PublishParams, cancel: CancellationToken) -> DiagResult<()>;
}

/// Capabilities by plugin name.
#[derive(Default)]
pub struct PluginRegistry {
    data_sources: DashMap<String, Arc<dyn DataSource>>,
    content_providers: DashMap<String, Arc<dyn ContentProvider>>,
    publishers: DashMap<String, Arc<dyn Publisher>>,
}

fn missing(what: &str, name: &str) -> Diagnostics {
    Diagnostics::error(
        format!("Missing {}", what),
        format!("no {} named {:?} is registered", what, name),
    )
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in plugins.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        builtin::register(&registry);
        registry
    }

    pub fn register_data_source(&self, name: impl Into<String>, source: Arc<dyn DataSource>) {
        let name = name.into();
        debug!(plugin = %name, "registering data source");
        self.data_sources.insert(name, source);
    }

    pub fn register_content_provider(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn ContentProvider>,
    ) {
        let name = name.into();
        debug!(plugin = %name, "registering content provider");
        self.content_providers.insert(name, provider);
    }

    pub fn register_publisher(&self, name: impl Into<String>, publisher: Arc<dyn Publisher>) {
        let name = name.into();
        debug!(plugin = %name, "registering publisher");
        self.publishers.insert(name, publisher);
    }

    pub fn data_source(&self, name: &str) -> DiagResult<Arc<dyn DataSource>> {
        self.data_sources
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| missing("data source", name))
    }

    pub fn content_provider(&self, name: &str) -> DiagResult<Arc<dyn ContentProvider>> {
        self.content_providers
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| missing("content provider", name))
    }

    pub fn publisher(&self, name: &str) -> DiagResult<Arc<dyn Publisher>> {
        self.publishers
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| missing("publisher", name))
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn names<V>(map: &DashMap<String, V>) -> Vec<String> {
            let mut names: Vec<_> = map.iter().map(|e| e.key().clone()).collect();
            names.sort();
            names
        }
        f.debug_struct("PluginRegistry")
            .field("data_sources", &names(&self.data_sources))
            .field("content_providers", &names(&self.content_providers))
            .field("publishers", &names(&self.publishers))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_plugin_is_named() {
        let registry = PluginRegistry::new();
        let err = registry.content_provider("chart").err().unwrap();
        assert_eq!(
            err.to_string(),
            "error: Missing content provider: no content provider named \"chart\" is registered"
        );
    }

    #[test]
    fn test_builtins_are_registered() {
        let registry = PluginRegistry::with_builtins();
        assert!(registry.data_source("inline").is_ok());
        for name in ["text", "title", "toc"] {
            assert!(registry.content_provider(name).is_ok(), "{}", name);
        }
        assert!(registry.publisher("local_file").is_ok());
    }

    #[test]
    fn test_invocation_order_is_total() {
        assert!(InvocationOrder::Begin < InvocationOrder::Unspecified);
        assert!(InvocationOrder::Unspecified < InvocationOrder::End);
    }
}
