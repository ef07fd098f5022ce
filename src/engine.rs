use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::EngineConfig;
use crate::deferred::EvalContext;
use crate::eval::{Document, Loader, RenderedContent};
use crate::plugin::PluginRegistry;
use crate::template::Template;
use crate::value::Value;
use crate::{Error, InternalResult};

/// Entry point for hosts: holds the plugin registry and configuration, loads templates
/// and renders documents by name.
pub struct Engine {
    registry: Arc<PluginRegistry>,
    config: EngineConfig,
    documents: DashMap<String, Arc<Document>>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(registry: Arc<PluginRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            documents: DashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// An engine with only the built-in plugins registered.
    pub fn with_builtins(config: EngineConfig) -> Self {
        Self::new(Arc::new(PluginRegistry::with_builtins()), config)
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cancels every render in progress and any started later.
    pub fn shutdown(&self) {
        info!("engine shutting down");
        self.cancel.cancel();
    }

    /// Lowers every document of `template`, replacing documents of the same name.
    /// Nothing is registered when any document fails to load.
    #[instrument(level = "debug", skip_all)]
    pub fn load(&self, template: &Template) -> InternalResult<Vec<String>> {
        let documents = Loader::new(template, &self.registry, &self.config).load_all()?;
        let names: Vec<String> = documents.iter().map(|doc| doc.name.clone()).collect();
        for doc in documents {
            self.documents.insert(doc.name.clone(), Arc::new(doc));
        }
        info!(documents = ?names, "template loaded");
        Ok(names)
    }

    pub fn document(&self, name: &str) -> InternalResult<Arc<Document>> {
        self.documents
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::DocumentNotFound(name.to_string()))
    }

    pub fn document_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.documents.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn eval_context(&self) -> EvalContext {
        EvalContext::new(self.registry.clone()).with_cancel(self.cancel.child_token())
    }

    pub async fn fetch_data(&self, name: &str) -> InternalResult<Value> {
        let doc = self.document(name)?;
        Ok(doc.fetch_data(&self.eval_context()).await?)
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn render(&self, name: &str, required_tags: &[String]) -> InternalResult<RenderedContent> {
        let doc = self.document(name)?;
        let rendered = doc
            .render_content(&self.eval_context(), Value::empty_map(), required_tags)
            .await?;
        Ok(rendered)
    }

    /// Renders the document and hands the result to each of its publishers.
    #[instrument(level = "debug", skip(self))]
    pub async fn publish(&self, name: &str) -> InternalResult<RenderedContent> {
        let doc = self.document(name)?;
        let cx = self.eval_context();
        let rendered = doc.render_content(&cx, Value::empty_map(), &[]).await?;
        doc.publish(&cx, rendered.tree.clone(), &rendered.data, name)
            .await?;
        Ok(rendered)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("documents", &self.document_names())
            .finish()
    }
}
