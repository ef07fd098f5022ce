//! Lowering of the template graph into actions.
//!
//! The loader resolves `ref` inheritance (with cycle detection), configuration and
//! plugin lookups. Every problem is collected so one load reports all of them.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::action::{
    ContentAction, ContentItem, DataAction, DynamicAction, PublishAction, SectionAction,
};
use super::document::{Document, RenderOptions};
use crate::circular::{circular_error, RefTracker};
use crate::config::EngineConfig;
use crate::diagnostics::{DiagResult, Diagnostic, Diagnostics, SourceRange};
use crate::plugin::PluginRegistry;
use crate::template::{
    BlockPath, ConfigRef, ContentBlock, DocumentBlock, DynamicBlock, PluginBlock, SectionBlock,
    Template,
};
use crate::value::Value;

/// The plugin rendering section titles.
pub const TITLE_PLUGIN: &str = "title";

pub struct Loader<'a> {
    template: &'a Template,
    registry: &'a PluginRegistry,
    config: &'a EngineConfig,
    tracker: RefTracker,
}

fn located(summary: &str, detail: String, range: &SourceRange) -> Diagnostics {
    Diagnostic::error(summary)
        .with_detail(detail)
        .with_range(range.clone())
        .into()
}

/// Fields set on `own` win over `base`; vars and metadata are merged.
fn inherit(own: &PluginBlock, base: PluginBlock) -> PluginBlock {
    let args = match (own.args.as_map(), base.args.as_map()) {
        (Some(own_args), Some(base_args)) => {
            let mut merged = base_args.clone();
            merged.extend(own_args.iter().map(|(k, v)| (k.clone(), v.clone())));
            Value::from(merged)
        }
        _ if own.args.is_null() => base.args.clone(),
        _ => own.args.clone(),
    };
    let meta = match (&own.meta, &base.meta) {
        (Some(own_meta), Some(base_meta)) => Some(own_meta.merge_with_base(base_meta)),
        (own_meta, base_meta) => own_meta.clone().or_else(|| base_meta.clone()),
    };
    let mut required_vars = base.required_vars.clone();
    required_vars.extend(
        own.required_vars
            .iter()
            .filter(|name| !base.required_vars.contains(name))
            .cloned(),
    );
    PluginBlock {
        id: own.id,
        kind: own.kind,
        name: own.name.clone().or(base.name),
        meta,
        config: own.config.clone().or(base.config),
        args,
        depends_on: if own.depends_on.is_empty() {
            base.depends_on
        } else {
            own.depends_on.clone()
        },
        is_included: own.is_included.clone().or(base.is_included),
        vars: own.vars.merge_with_base(&base.vars),
        local_var: own.local_var.clone().or(base.local_var),
        required_vars,
        query: own.query.clone().or(base.query),
        base: None,
        range: own.range.clone(),
        plugin: base.plugin,
    }
}

fn inherit_section(own: &SectionBlock, base: SectionBlock) -> SectionBlock {
    let meta = match (&own.meta, &base.meta) {
        (Some(own_meta), Some(base_meta)) => Some(own_meta.merge_with_base(base_meta)),
        (own_meta, base_meta) => own_meta.clone().or_else(|| base_meta.clone()),
    };
    let mut required_vars = base.required_vars.clone();
    required_vars.extend(
        own.required_vars
            .iter()
            .filter(|name| !base.required_vars.contains(name))
            .cloned(),
    );
    SectionBlock {
        id: own.id,
        name: own.name.clone().or(base.name),
        title: own.title.clone().or(base.title),
        meta,
        is_included: own.is_included.clone().or(base.is_included),
        vars: own.vars.merge_with_base(&base.vars),
        local_var: own.local_var.clone().or(base.local_var),
        required_vars,
        content: if own.content.is_empty() {
            base.content
        } else {
            own.content.clone()
        },
        base: None,
        range: own.range.clone(),
    }
}

impl<'a> Loader<'a> {
    pub fn new(
        template: &'a Template,
        registry: &'a PluginRegistry,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            template,
            registry,
            config,
            tracker: RefTracker::new(),
        }
    }

    /// Follows the `ref` chain of `block` and returns the fully inherited block.
    pub fn resolve_block(&self, block: &PluginBlock) -> DiagResult<PluginBlock> {
        let Some(path) = &block.base else {
            return Ok(block.clone());
        };
        if self.tracker.check(block.id) {
            return Err(circular_error(block.id, &block.range).into());
        }
        self.tracker.add(block.id, block.range.clone());
        let resolved = self.resolve_base(block, path);
        let mut diags = match resolved {
            Ok(resolved) => {
                self.tracker.remove(block.id, &mut Diagnostics::new());
                return Ok(resolved);
            }
            Err(diags) => diags,
        };
        self.tracker.remove(block.id, &mut diags);
        Err(diags)
    }

    fn resolve_base(&self, block: &PluginBlock, path: &BlockPath) -> DiagResult<PluginBlock> {
        if path.kind != block.kind {
            return Err(located(
                "Invalid ref base",
                format!("a {} block cannot inherit from {}", block.kind, path),
                &block.range,
            ));
        }
        let base = self.template.find_global(path).ok_or_else(|| {
            located(
                "Missing ref base",
                format!("no block {} is defined", path),
                &block.range,
            )
        })?;
        let base = self.resolve_block(base)?;
        debug!(block = %block.path(), base = %path, "resolved ref block");
        Ok(inherit(block, base))
    }

    pub fn resolve_section(&self, section: &SectionBlock) -> DiagResult<SectionBlock> {
        if section.base.is_none() {
            return Ok(section.clone());
        }
        if self.tracker.check(section.id) {
            return Err(circular_error(section.id, &section.range).into());
        }
        self.tracker.add(section.id, section.range.clone());
        let mut diags = match self.resolve_section_base(section) {
            Ok(resolved) => {
                self.tracker.remove(section.id, &mut Diagnostics::new());
                return Ok(resolved);
            }
            Err(diags) => diags,
        };
        self.tracker.remove(section.id, &mut diags);
        Err(diags)
    }

    /// Inherits from the `ref` base of `section` without tracking `section` itself.
    fn resolve_section_base(&self, section: &SectionBlock) -> DiagResult<SectionBlock> {
        let Some(path) = &section.base else {
            return Ok(section.clone());
        };
        match self.template.find_global_section(&path.name) {
            Some(base) => self
                .resolve_section(base)
                .map(|base| inherit_section(section, base)),
            None => Err(located(
                "Missing ref base",
                format!("no section {} is defined", path),
                &section.range,
            )),
        }
    }

    /// inline > named config block > default config block > engine default > null
    fn resolve_config(&self, block: &PluginBlock) -> DiagResult<Value> {
        match &block.config {
            Some(ConfigRef::Inline(value)) => Ok(value.clone()),
            Some(ConfigRef::Named(name)) => self
                .template
                .find_config(block.kind, &block.plugin, Some(name.as_str()))
                .map(|c| c.value.clone())
                .ok_or_else(|| {
                    located(
                        "Missing config block",
                        format!("no config {}.{}.{} is defined", block.kind, block.plugin, name),
                        &block.range,
                    )
                }),
            None => Ok(self
                .template
                .find_config(block.kind, &block.plugin, None)
                .map(|c| c.value.clone())
                .or_else(|| self.config.plugin_default(block.kind, &block.plugin).cloned())
                .unwrap_or_default()),
        }
    }

    fn lower_data(&self, block: &PluginBlock) -> DiagResult<Arc<DataAction>> {
        let block = self.resolve_block(block)?;
        let name = block.name.clone().ok_or_else(|| {
            located(
                "Missing block name",
                format!("data block {} needs a name", block.plugin),
                &block.range,
            )
        })?;
        let source = self
            .registry
            .data_source(&block.plugin)
            .map_err(|d| d.refine_range(&block.range))?;
        Ok(Arc::new(DataAction {
            config: self.resolve_config(&block)?,
            plugin: block.plugin,
            name,
            meta: block.meta,
            args: block.args,
            source,
            range: block.range,
        }))
    }

    fn lower_publish(&self, block: &PluginBlock) -> DiagResult<Arc<PublishAction>> {
        let block = self.resolve_block(block)?;
        let publisher = self
            .registry
            .publisher(&block.plugin)
            .map_err(|d| d.refine_range(&block.range))?;
        Ok(Arc::new(PublishAction {
            config: self.resolve_config(&block)?,
            plugin: block.plugin,
            name: block.name,
            args: block.args,
            publisher,
            range: block.range,
        }))
    }

    fn lower_content_block(
        &self,
        block: &PluginBlock,
        names: &mut HashSet<String>,
    ) -> DiagResult<Arc<ContentAction>> {
        let block = self.resolve_block(block)?;
        let provider = self
            .registry
            .content_provider(&block.plugin)
            .map_err(|d| d.refine_range(&block.range))?;
        if block.name.is_some() && !names.insert(block.path()) {
            return Err(located(
                "Duplicate block name",
                format!("{} is defined more than once", block.path()),
                &block.range,
            ));
        }
        Ok(Arc::new(ContentAction {
            id: block.id,
            config: self.resolve_config(&block)?,
            order: provider.invocation_order(),
            provider,
            plugin: block.plugin,
            name: block.name,
            meta: block.meta,
            args: block.args,
            depends_on: block.depends_on,
            is_included: block.is_included,
            vars: block.vars,
            local_var: block.local_var,
            required_vars: block.required_vars,
            query: block.query,
            range: block.range,
        }))
    }

    fn title_action(&self, section: &SectionBlock, title: &Value, depth: usize) -> DiagResult<Arc<ContentAction>> {
        let block = PluginBlock::content(TITLE_PLUGIN, None)
            .with_args(Value::map([
                ("value", title.clone()),
                ("level", Value::from(depth + 1)),
            ]))
            .at(section.range.clone());
        self.lower_content_block(&block, &mut HashSet::new())
    }

    /// The section stays in progress while its subtree is lowered, so a body that
    /// includes its own section is reported as a cycle.
    fn lower_section(
        &self,
        section: &SectionBlock,
        depth: usize,
        names: &mut HashSet<String>,
    ) -> DiagResult<Arc<SectionAction>> {
        if self.tracker.check(section.id) {
            return Err(circular_error(section.id, &section.range).into());
        }
        self.tracker.add(section.id, section.range.clone());
        let mut diags = Diagnostics::new();
        let lowered = match self.resolve_section_base(section) {
            Ok(section) => Some(self.lower_section_body(section, depth, names, &mut diags)),
            Err(err) => {
                diags.extend(err);
                None
            }
        };
        self.tracker.remove(section.id, &mut diags);
        match lowered {
            Some(action) => diags.into_result(action),
            None => Err(diags),
        }
    }

    fn lower_section_body(
        &self,
        section: SectionBlock,
        depth: usize,
        names: &mut HashSet<String>,
        diags: &mut Diagnostics,
    ) -> Arc<SectionAction> {
        let mut children = Vec::new();
        if let Some(title) = &section.title {
            match self.title_action(&section, title, depth) {
                Ok(action) => children.push(ContentItem::Title(action)),
                Err(err) => diags.extend(err),
            }
        }
        children.extend(self.lower_content(&section.content, depth + 1, names, diags));
        Arc::new(SectionAction {
            id: section.id,
            name: section.name,
            meta: section.meta,
            is_included: section.is_included,
            vars: section.vars,
            local_var: section.local_var,
            required_vars: section.required_vars,
            children,
            range: section.range,
        })
    }

    fn lower_dynamic(
        &self,
        dynamic: &DynamicBlock,
        depth: usize,
        names: &mut HashSet<String>,
    ) -> DiagResult<Arc<DynamicAction>> {
        let mut diags = Diagnostics::new();
        let children = self.lower_content(&dynamic.content, depth, names, &mut diags);
        diags.into_result(Arc::new(DynamicAction {
            id: dynamic.id,
            condition: dynamic.condition.clone(),
            items: dynamic.items.clone(),
            children,
            range: dynamic.range.clone(),
        }))
    }

    fn lower_content(
        &self,
        blocks: &[ContentBlock],
        depth: usize,
        names: &mut HashSet<String>,
        diags: &mut Diagnostics,
    ) -> Vec<ContentItem> {
        let mut items = Vec::with_capacity(blocks.len());
        for block in blocks {
            let item = match block {
                ContentBlock::Plugin(block) => self
                    .lower_content_block(block, names)
                    .map(ContentItem::Content),
                ContentBlock::Section(section) => self
                    .lower_section(section, depth, names)
                    .map(ContentItem::Section),
                ContentBlock::Dynamic(dynamic) => self
                    .lower_dynamic(dynamic, depth, names)
                    .map(ContentItem::Dynamic),
            };
            match item {
                Ok(item) => items.push(item),
                Err(err) => diags.extend(err),
            }
        }
        items
    }

    #[instrument(level = "debug", skip_all, fields(document = %doc.name))]
    pub fn load_document(&self, doc: &DocumentBlock) -> DiagResult<Document> {
        let mut diags = Diagnostics::new();
        let mut data = Vec::new();
        for block in &doc.data {
            match self.lower_data(block) {
                Ok(action) => data.push(action),
                Err(err) => diags.extend(err),
            }
        }
        let content = self.lower_content(&doc.content, 0, &mut HashSet::new(), &mut diags);
        let mut publish = Vec::new();
        for block in &doc.publish {
            match self.lower_publish(block) {
                Ok(action) => publish.push(action),
                Err(err) => diags.extend(err),
            }
        }
        debug!(
            data = data.len(),
            content = content.len(),
            publish = publish.len(),
            errors = diags.errors().count(),
            "lowered document"
        );
        diags.into_result(Document {
            name: doc.name.clone(),
            meta: doc.meta.clone(),
            vars: doc.vars.clone(),
            required_vars: doc.required_vars.clone(),
            data,
            content,
            publish,
            options: RenderOptions::from(self.config),
            range: doc.range.clone(),
        })
    }

    /// Lowers every document of the template.
    pub fn load_all(&self) -> DiagResult<Vec<Document>> {
        let mut diags = Diagnostics::new();
        let mut docs = Vec::new();
        let mut seen = HashSet::new();
        for doc in &self.template.documents {
            if !seen.insert(doc.name.as_str()) {
                diags.push(
                    Diagnostic::error("Duplicate block name")
                        .with_detail(format!("document {:?} is defined more than once", doc.name))
                        .with_range(doc.range.clone()),
                );
                continue;
            }
            match self.load_document(doc) {
                Ok(doc) => docs.push(doc),
                Err(err) => diags.extend(err),
            }
        }
        diags.into_result(docs)
    }
}
