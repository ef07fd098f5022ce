//! The parsed template graph.
//!
//! Templates arrive here already parsed; this module only defines the block types
//! the engine lowers into actions, plus builder helpers used by front ends and tests.
//! Attribute values are [`Value`]s and may embed deferred queries built with
//! [`query_expr`].

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deferred::Deferred;
use crate::diagnostics::SourceRange;
use crate::query::Query;
use crate::value::{Value, ValueType};

/// Stable identity of a block in the template graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(Uuid);

impl BlockId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Data,
    Content,
    Publish,
    Section,
}

/// A deferred query attribute, as the parser would produce for `{{ }}`-free
/// expressions such as `query_jq(".data.x")`.
pub fn query_expr(source: impl Into<String>) -> Value {
    Value::deferred(Deferred::query(Query::new(source)))
}

/// Like [`query_expr`], converting the result to `expected`.
pub fn typed_query_expr(source: impl Into<String>, expected: ValueType) -> Value {
    Value::deferred(Deferred::query(Query::new(source)).with_type(expected))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaBlock {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub version: Option<String>,
    pub url: Option<String>,
}

impl MetaBlock {
    pub fn tagged<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self)
            .map(Value::from)
            .unwrap_or_default()
    }

    /// Fills fields missing here from `base`.
    pub fn merge_with_base(&self, base: &MetaBlock) -> MetaBlock {
        MetaBlock {
            name: self.name.clone().or_else(|| base.name.clone()),
            description: self.description.clone().or_else(|| base.description.clone()),
            tags: if self.tags.is_empty() { base.tags.clone() } else { self.tags.clone() },
            authors: if self.authors.is_empty() {
                base.authors.clone()
            } else {
                self.authors.clone()
            },
            version: self.version.clone().or_else(|| base.version.clone()),
            url: self.url.clone().or_else(|| base.url.clone()),
        }
    }
}

/// Ordered variable definitions. Redefining a name replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarSet {
    entries: Vec<(String, Value)>,
}

impl VarSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Base entries keep their order with own values winning; own-only entries follow.
    pub fn merge_with_base(&self, base: &VarSet) -> VarSet {
        let mut merged = base.clone();
        for (name, value) in &self.entries {
            merged.set(name.clone(), value.clone());
        }
        merged
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for VarSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut vars = VarSet::new();
        for (name, value) in iter {
            vars.set(name, value);
        }
        vars
    }
}

/// Where a block takes its configuration from.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigRef {
    Inline(Value),
    /// The name of a `config` block for the same kind and plugin.
    Named(String),
}

/// Address of a block, as written in `base = content.text.intro`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockPath {
    pub kind: BlockKind,
    pub plugin: Option<String>,
    pub name: String,
}

impl BlockPath {
    pub fn new(kind: BlockKind, plugin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            plugin: Some(plugin.into()),
            name: name.into(),
        }
    }

    pub fn section(name: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Section,
            plugin: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for BlockPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.plugin {
            Some(plugin) => write!(f, "{}.{}.{}", self.kind, plugin, self.name),
            None => write!(f, "{}.{}", self.kind, self.name),
        }
    }
}

/// The plugin name marking a block that inherits from `base`.
pub const REF_PLUGIN: &str = "ref";

/// A `data`, `content` or `publish` block.
#[derive(Debug, Clone)]
pub struct PluginBlock {
    pub id: BlockId,
    pub kind: BlockKind,
    pub plugin: String,
    pub name: Option<String>,
    pub meta: Option<MetaBlock>,
    pub config: Option<ConfigRef>,
    pub args: Value,
    /// Dependencies as `content.<plugin>.<name>` paths.
    pub depends_on: Vec<String>,
    pub is_included: Option<Value>,
    pub vars: VarSet,
    pub local_var: Option<Value>,
    pub required_vars: Vec<String>,
    pub query: Option<Value>,
    pub base: Option<BlockPath>,
    pub range: SourceRange,
}

impl PluginBlock {
    pub fn new(kind: BlockKind, plugin: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            id: BlockId::new(),
            kind,
            plugin: plugin.into(),
            name: name.map(str::to_string),
            meta: None,
            config: None,
            args: Value::Null,
            depends_on: Vec::new(),
            is_included: None,
            vars: VarSet::new(),
            local_var: None,
            required_vars: Vec::new(),
            query: None,
            base: None,
            range: SourceRange::default(),
        }
    }

    pub fn data(plugin: impl Into<String>, name: &str) -> Self {
        Self::new(BlockKind::Data, plugin, Some(name))
    }

    pub fn content(plugin: impl Into<String>, name: Option<&str>) -> Self {
        Self::new(BlockKind::Content, plugin, name)
    }

    pub fn publish(plugin: impl Into<String>, name: Option<&str>) -> Self {
        Self::new(BlockKind::Publish, plugin, name)
    }

    /// A `ref` block inheriting from `base`.
    pub fn reference(kind: BlockKind, base: BlockPath, name: Option<&str>) -> Self {
        Self {
            base: Some(base),
            ..Self::new(kind, REF_PLUGIN, name)
        }
    }

    pub fn with_args(mut self, args: impl Into<Value>) -> Self {
        self.args = args.into();
        self
    }

    pub fn with_config(mut self, config: impl Into<Value>) -> Self {
        self.config = Some(ConfigRef::Inline(config.into()));
        self
    }

    pub fn with_named_config(mut self, name: impl Into<String>) -> Self {
        self.config = Some(ConfigRef::Named(name.into()));
        self
    }

    pub fn with_meta(mut self, meta: MetaBlock) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_tags<I, S>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_meta(MetaBlock::tagged(tags))
    }

    pub fn depends_on(mut self, path: impl Into<String>) -> Self {
        self.depends_on.push(path.into());
        self
    }

    pub fn with_is_included(mut self, cond: impl Into<Value>) -> Self {
        self.is_included = Some(cond.into());
        self
    }

    pub fn with_vars(mut self, vars: VarSet) -> Self {
        self.vars = vars;
        self
    }

    pub fn with_local_var(mut self, value: impl Into<Value>) -> Self {
        self.local_var = Some(value.into());
        self
    }

    pub fn with_required_vars<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_vars = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query_expr(query));
        self
    }

    pub fn at(mut self, range: SourceRange) -> Self {
        self.range = range;
        self
    }

    pub fn is_ref(&self) -> bool {
        self.base.is_some()
    }

    pub fn tags(&self) -> &[String] {
        self.meta.as_ref().map(|m| m.tags.as_slice()).unwrap_or_default()
    }

    /// `kind.plugin.name`, or `kind.plugin` for anonymous blocks.
    pub fn path(&self) -> String {
        match &self.name {
            Some(name) => format!("{}.{}.{}", self.kind, self.plugin, name),
            None => format!("{}.{}", self.kind, self.plugin),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SectionBlock {
    pub id: BlockId,
    pub name: Option<String>,
    pub title: Option<Value>,
    pub meta: Option<MetaBlock>,
    pub is_included: Option<Value>,
    pub vars: VarSet,
    pub local_var: Option<Value>,
    pub required_vars: Vec<String>,
    pub content: Vec<ContentBlock>,
    pub base: Option<BlockPath>,
    pub range: SourceRange,
}

impl SectionBlock {
    pub fn new(name: Option<&str>) -> Self {
        Self {
            id: BlockId::new(),
            name: name.map(str::to_string),
            title: None,
            meta: None,
            is_included: None,
            vars: VarSet::new(),
            local_var: None,
            required_vars: Vec::new(),
            content: Vec::new(),
            base: None,
            range: SourceRange::default(),
        }
    }

    pub fn reference(base: &str, name: Option<&str>) -> Self {
        Self {
            base: Some(BlockPath::section(base)),
            ..Self::new(name)
        }
    }

    pub fn with_title(mut self, title: impl Into<Value>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_meta(mut self, meta: MetaBlock) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_tags<I, S>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_meta(MetaBlock::tagged(tags))
    }

    pub fn with_is_included(mut self, cond: impl Into<Value>) -> Self {
        self.is_included = Some(cond.into());
        self
    }

    pub fn with_vars(mut self, vars: VarSet) -> Self {
        self.vars = vars;
        self
    }

    pub fn with_local_var(mut self, value: impl Into<Value>) -> Self {
        self.local_var = Some(value.into());
        self
    }

    pub fn with_required_vars<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_vars = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_content(mut self, block: impl Into<ContentBlock>) -> Self {
        self.content.push(block.into());
        self
    }

    pub fn at(mut self, range: SourceRange) -> Self {
        self.range = range;
        self
    }
}

/// Expands its content once, or once per element of `items`.
#[derive(Debug, Clone)]
pub struct DynamicBlock {
    pub id: BlockId,
    pub condition: Option<Value>,
    pub items: Option<Value>,
    pub content: Vec<ContentBlock>,
    pub range: SourceRange,
}

impl DynamicBlock {
    pub fn new() -> Self {
        Self {
            id: BlockId::new(),
            condition: None,
            items: None,
            content: Vec::new(),
            range: SourceRange::default(),
        }
    }

    pub fn with_condition(mut self, cond: impl Into<Value>) -> Self {
        self.condition = Some(cond.into());
        self
    }

    pub fn with_items(mut self, items: impl Into<Value>) -> Self {
        self.items = Some(items.into());
        self
    }

    pub fn with_content(mut self, block: impl Into<ContentBlock>) -> Self {
        self.content.push(block.into());
        self
    }
}

impl Default for DynamicBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// A child of a document or section body.
#[derive(Debug, Clone)]
pub enum ContentBlock {
    Plugin(PluginBlock),
    Section(SectionBlock),
    Dynamic(DynamicBlock),
}

impl From<PluginBlock> for ContentBlock {
    fn from(block: PluginBlock) -> Self {
        ContentBlock::Plugin(block)
    }
}

impl From<SectionBlock> for ContentBlock {
    fn from(block: SectionBlock) -> Self {
        ContentBlock::Section(block)
    }
}

impl From<DynamicBlock> for ContentBlock {
    fn from(block: DynamicBlock) -> Self {
        ContentBlock::Dynamic(block)
    }
}

/// A `config <kind> <plugin> [name]` block. Unnamed blocks are the template default.
#[derive(Debug, Clone)]
pub struct ConfigBlock {
    pub id: BlockId,
    pub kind: BlockKind,
    pub plugin: String,
    pub name: Option<String>,
    pub value: Value,
    pub range: SourceRange,
}

impl ConfigBlock {
    pub fn new(
        kind: BlockKind,
        plugin: impl Into<String>,
        name: Option<&str>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            id: BlockId::new(),
            kind,
            plugin: plugin.into(),
            name: name.map(str::to_string),
            value: value.into(),
            range: SourceRange::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentBlock {
    pub id: BlockId,
    pub name: String,
    pub meta: Option<MetaBlock>,
    pub vars: VarSet,
    pub required_vars: Vec<String>,
    pub data: Vec<PluginBlock>,
    pub content: Vec<ContentBlock>,
    pub publish: Vec<PluginBlock>,
    pub range: SourceRange,
}

impl DocumentBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: BlockId::new(),
            name: name.into(),
            meta: None,
            vars: VarSet::new(),
            required_vars: Vec::new(),
            data: Vec::new(),
            content: Vec::new(),
            publish: Vec::new(),
            range: SourceRange::default(),
        }
    }

    pub fn with_meta(mut self, meta: MetaBlock) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_vars(mut self, vars: VarSet) -> Self {
        self.vars = vars;
        self
    }

    pub fn with_required_vars<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_vars = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_data(mut self, block: PluginBlock) -> Self {
        self.data.push(block);
        self
    }

    pub fn with_content(mut self, block: impl Into<ContentBlock>) -> Self {
        self.content.push(block.into());
        self
    }

    pub fn with_publish(mut self, block: PluginBlock) -> Self {
        self.publish.push(block);
        self
    }
}

/// A whole template: documents plus top-level blocks they may reference.
#[derive(Debug, Clone, Default)]
pub struct Template {
    pub documents: Vec<DocumentBlock>,
    pub global_blocks: Vec<PluginBlock>,
    pub global_sections: Vec<SectionBlock>,
    pub configs: Vec<ConfigBlock>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, doc: DocumentBlock) -> Self {
        self.documents.push(doc);
        self
    }

    pub fn with_global(mut self, block: PluginBlock) -> Self {
        self.global_blocks.push(block);
        self
    }

    pub fn with_global_section(mut self, section: SectionBlock) -> Self {
        self.global_sections.push(section);
        self
    }

    pub fn with_config(mut self, config: ConfigBlock) -> Self {
        self.configs.push(config);
        self
    }

    pub fn document(&self, name: &str) -> Option<&DocumentBlock> {
        self.documents.iter().find(|d| d.name == name)
    }

    pub fn find_global(&self, path: &BlockPath) -> Option<&PluginBlock> {
        self.global_blocks.iter().find(|b| {
            b.kind == path.kind
                && path.plugin.as_deref() == Some(b.plugin.as_str())
                && b.name.as_deref() == Some(path.name.as_str())
        })
    }

    pub fn find_global_section(&self, name: &str) -> Option<&SectionBlock> {
        self.global_sections
            .iter()
            .find(|s| s.name.as_deref() == Some(name))
    }

    /// The config block for `kind.plugin`: the named one, or the unnamed default.
    pub fn find_config(&self, kind: BlockKind, plugin: &str, name: Option<&str>) -> Option<&ConfigBlock> {
        self.configs
            .iter()
            .find(|c| c.kind == kind && c.plugin == plugin && c.name.as_deref() == name)
    }
}
