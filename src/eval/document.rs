//! Per-document orchestration: fetch data, prepare the context, expand, schedule and
//! publish.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use super::action::{ContentItem, DataAction, PublishAction};
use super::content::ContentEvaluator;
use super::context::{self, DATA, DOCUMENT};
use super::data;
use super::unwrap::{filter_by_tags, unwrap_items};
use crate::config::EngineConfig;
use crate::content::ContentTree;
use crate::deferred::EvalContext;
use crate::diagnostics::{DiagResult, Diagnostic, Diagnostics, SourceRange};
use crate::template::{MetaBlock, VarSet};
use crate::value::Value;

/// Engine settings a document needs while rendering.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub data_channel_capacity: usize,
    pub strict_dependency_order: bool,
    pub default_required_tags: Vec<String>,
}

impl From<&EngineConfig> for RenderOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            data_channel_capacity: config.data_channel_capacity,
            strict_dependency_order: config.strict_dependency_order,
            default_required_tags: config.default_required_tags.clone(),
        }
    }
}

#[derive(Debug)]
pub struct Document {
    pub name: String,
    pub meta: Option<MetaBlock>,
    pub vars: VarSet,
    pub required_vars: Vec<String>,
    pub data: Vec<Arc<DataAction>>,
    pub content: Vec<ContentItem>,
    pub publish: Vec<Arc<PublishAction>>,
    pub options: RenderOptions,
    pub range: SourceRange,
}

/// Output of [`Document::render_content`].
#[derive(Debug)]
pub struct RenderedContent {
    pub tree: Arc<ContentTree>,
    /// The data context after rendering, with `document.content` set to the final tree.
    pub data: Value,
    pub warnings: Diagnostics,
}

impl Document {
    fn base_context(&self) -> Value {
        let mut ctx = Value::empty_map();
        context::set_meta(&mut ctx, DOCUMENT, self.meta.as_ref());
        ctx
    }

    /// Runs every data block and returns `{plugin: {block: result}}`.
    #[instrument(level = "debug", skip_all, fields(document = %self.name))]
    pub async fn fetch_data(&self, cx: &EvalContext) -> DiagResult<Value> {
        data::fetch(
            cx,
            &self.data,
            &self.base_context(),
            self.options.data_channel_capacity,
        )
        .await
    }

    /// Renders the document body into a new content tree.
    ///
    /// `ambient` is merged into the data context; when it carries no `data` key the
    /// document's data blocks are fetched first. Empty `required_tags` falls back to the
    /// configured default tags.
    #[instrument(level = "debug", skip_all, fields(document = %self.name))]
    pub async fn render_content(
        &self,
        cx: &EvalContext,
        ambient: Value,
        required_tags: &[String],
    ) -> DiagResult<RenderedContent> {
        let mut ctx = match ambient.as_map() {
            Some(_) => ambient,
            None => Value::empty_map(),
        };
        if ctx.get(DATA).is_none() {
            let data = self.fetch_data(cx).await?;
            ctx.insert(DATA, data);
        }
        let prepared = async {
            context::set_meta(&mut ctx, DOCUMENT, self.meta.as_ref());
            context::apply_vars(cx, &mut ctx, &self.vars).await?;
            context::check_required_vars(&ctx, &self.required_vars)
        };
        prepared
            .await
            .map_err(|diags| diags.refine_range(&self.range))?;

        let (items, mut warnings) = unwrap_items(cx, &self.content, &ctx).await;
        if warnings.has_errors() {
            return Err(warnings);
        }

        let required = if required_tags.is_empty() {
            self.options.default_required_tags.as_slice()
        } else {
            required_tags
        };
        let expanded = items.len();
        let items = filter_by_tags(items, required);
        if expanded > 0 && items.is_empty() {
            warnings.push(
                Diagnostic::warning("No content matches the required tags")
                    .with_detail(format!("required tags: {}", required.join(", ")))
                    .with_range(self.range.clone()),
            );
        }

        let tree = Arc::new(ContentTree::new());
        let mut evaluator = ContentEvaluator::new(self.options.strict_dependency_order);
        evaluator.assign(&tree, tree.root(), items)?;
        debug!(units = evaluator.len(), "content units assigned");
        evaluator.execute(cx, tree.clone()).await?;

        context::set_content_snapshot(&mut ctx, &tree);
        for warning in warnings.iter() {
            warn!(%warning, "render warning");
        }
        info!(document = %self.name, "document rendered");
        Ok(RenderedContent {
            tree,
            data: ctx,
            warnings,
        })
    }

    /// Runs every publisher of the document concurrently and collects their diagnostics.
    #[instrument(level = "debug", skip_all, fields(document = %document_name))]
    pub async fn publish(
        &self,
        cx: &EvalContext,
        content: Arc<ContentTree>,
        data: &Value,
        document_name: &str,
    ) -> DiagResult<()> {
        let results = join_all(
            self.publish
                .iter()
                .map(|action| action.publish(cx, data, document_name, content.clone())),
        )
        .await;
        let mut diags = Diagnostics::new();
        for result in results {
            if let Err(err) = result {
                diags.extend(err);
            }
        }
        diags.into_result(())
    }
}
