//! Actions: template blocks bound to their resolved configuration and plugin.
//!
//! Actions are built once by the loader and never mutated afterwards, so they are
//! shared between concurrent units through `Arc`.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::context::{self, CONTENT, QUERY_RESULT};
use crate::content::{ContentMeta, ContentTree, NodeId};
use crate::deferred::{evaluate, EvalContext};
use crate::diagnostics::{DiagResult, Diagnostics, SourceRange};
use crate::plugin::{
    ContentParams, ContentProvider, DataParams, DataSource, InvocationOrder, PublishParams,
    Publisher,
};
use crate::template::{BlockId, MetaBlock, VarSet};
use crate::value::Value;

pub struct DataAction {
    pub plugin: String,
    pub name: String,
    pub meta: Option<MetaBlock>,
    pub config: Value,
    pub args: Value,
    pub source: Arc<dyn DataSource>,
    pub range: SourceRange,
}

impl DataAction {
    /// Runs the data source. Deferred arguments are resolved against `ctx` first.
    pub async fn fetch(&self, cx: &EvalContext, ctx: &Value) -> DiagResult<Value> {
        let run = async {
            let config = evaluate(cx, ctx, &self.config.instantiate()).await?;
            let args = evaluate(cx, ctx, &self.args.instantiate()).await?;
            cx.check_cancelled()?;
            self.source
                .execute(DataParams { config, args }, cx.cancel.clone())
                .await
        };
        run.await.map_err(|diags| diags.refine_range(&self.range))
    }
}

impl fmt::Debug for DataAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataAction(data.{}.{})", self.plugin, self.name)
    }
}

pub struct ContentAction {
    pub id: BlockId,
    pub plugin: String,
    pub name: Option<String>,
    pub meta: Option<MetaBlock>,
    pub config: Value,
    pub args: Value,
    pub provider: Arc<dyn ContentProvider>,
    pub order: InvocationOrder,
    pub depends_on: Vec<String>,
    pub is_included: Option<Value>,
    pub vars: VarSet,
    pub local_var: Option<Value>,
    pub required_vars: Vec<String>,
    pub query: Option<Value>,
    pub range: SourceRange,
}

impl ContentAction {
    /// The name other blocks use in `depends_on`, if this block has one.
    pub fn key(&self) -> Option<String> {
        self.name
            .as_ref()
            .map(|name| format!("content.{}.{}", self.plugin, name))
    }

    pub fn tags(&self) -> &[String] {
        self.meta
            .as_ref()
            .map(|m| m.tags.as_slice())
            .unwrap_or_default()
    }

    fn content_meta(&self) -> ContentMeta {
        ContentMeta {
            provider: Some(self.plugin.clone()),
            block: self.name.clone(),
            extra: None,
        }
    }

    /// Renders into the placeholder `slot` of `tree`.
    ///
    /// `ctx` is this unit's own copy of the data context. An excluded block leaves the
    /// slot empty; it is pruned when the tree is compacted.
    #[instrument(level = "debug", skip_all, fields(block = %self))]
    pub async fn render(
        &self,
        cx: &EvalContext,
        mut ctx: Value,
        tree: &ContentTree,
        slot: NodeId,
    ) -> DiagResult<()> {
        let run = async {
            context::set_meta(&mut ctx, CONTENT, self.meta.as_ref());
            context::apply_vars(cx, &mut ctx, &self.vars).await?;
            context::apply_local_var(cx, &mut ctx, self.local_var.as_ref()).await?;
            context::check_required_vars(&ctx, &self.required_vars)?;
            context::set_content_snapshot(&mut ctx, tree);
            if !context::is_included(cx, &ctx, self.is_included.as_ref()).await? {
                debug!("content excluded");
                return Ok(());
            }
            if let Some(query) = &self.query {
                let result = evaluate(cx, &ctx, &query.instantiate()).await?;
                ctx.insert(QUERY_RESULT, result);
            }
            let config = evaluate(cx, &ctx, &self.config.instantiate()).await?;
            let args = evaluate(cx, &ctx, &self.args.instantiate()).await?;
            cx.check_cancelled()?;
            let result = self
                .provider
                .execute(
                    ContentParams {
                        config,
                        args,
                        data_context: ctx.clone(),
                        content_id: slot,
                    },
                    cx.cancel.clone(),
                )
                .await?;
            tree.place(slot, result.content, self.content_meta(), result.location)?;
            Ok::<(), Diagnostics>(())
        };
        run.await.map_err(|diags| diags.refine_range(&self.range))
    }
}

impl fmt::Display for ContentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "content.{}.{}", self.plugin, name),
            None => write!(f, "content.{}", self.plugin),
        }
    }
}

impl fmt::Debug for ContentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentAction({}, {})", self, self.order)
    }
}

#[derive(Debug)]
pub struct SectionAction {
    pub id: BlockId,
    pub name: Option<String>,
    pub meta: Option<MetaBlock>,
    pub is_included: Option<Value>,
    pub vars: VarSet,
    pub local_var: Option<Value>,
    pub required_vars: Vec<String>,
    /// Children in declaration order; a title, if any, comes first.
    pub children: Vec<ContentItem>,
    pub range: SourceRange,
}

impl SectionAction {
    pub fn tags(&self) -> &[String] {
        self.meta
            .as_ref()
            .map(|m| m.tags.as_slice())
            .unwrap_or_default()
    }

    pub fn content_meta(&self) -> ContentMeta {
        ContentMeta {
            provider: None,
            block: self.name.clone(),
            extra: self.meta.as_ref().map(MetaBlock::to_value),
        }
    }
}

#[derive(Debug)]
pub struct DynamicAction {
    pub id: BlockId,
    pub condition: Option<Value>,
    pub items: Option<Value>,
    pub children: Vec<ContentItem>,
    pub range: SourceRange,
}

/// A node of a lowered document or section body.
#[derive(Debug, Clone)]
pub enum ContentItem {
    Content(Arc<ContentAction>),
    /// The heading synthesized from a section title. Rendered like content, but kept
    /// whenever its section is kept.
    Title(Arc<ContentAction>),
    Section(Arc<SectionAction>),
    Dynamic(Arc<DynamicAction>),
}

pub struct PublishAction {
    pub plugin: String,
    pub name: Option<String>,
    pub config: Value,
    pub args: Value,
    pub publisher: Arc<dyn Publisher>,
    pub range: SourceRange,
}

impl PublishAction {
    pub async fn publish(
        &self,
        cx: &EvalContext,
        ctx: &Value,
        document_name: &str,
        tree: Arc<ContentTree>,
    ) -> DiagResult<()> {
        let run = async {
            let config = evaluate(cx, ctx, &self.config.instantiate()).await?;
            let args = evaluate(cx, ctx, &self.args.instantiate()).await?;
            cx.check_cancelled()?;
            self.publisher
                .execute(
                    PublishParams {
                        config,
                        args,
                        data_context: ctx.clone(),
                        document_name: document_name.to_string(),
                        content: tree,
                    },
                    cx.cancel.clone(),
                )
                .await
        };
        run.await.map_err(|diags| diags.refine_range(&self.range))
    }
}

impl fmt::Debug for PublishAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "PublishAction(publish.{}.{})", self.plugin, name),
            None => write!(f, "PublishAction(publish.{})", self.plugin),
        }
    }
}
