//! The rendered content tree.
//!
//! Nodes live in an arena keyed by [`NodeId`]. A section holds an ordered list of
//! child ids; concurrent producers reserve empty placeholder slots up front so the
//! final order follows declaration order rather than completion order. Compaction
//! drops placeholders that were never filled.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::diagnostics::{DiagResult, Diagnostics};
use crate::plugin::{Content, Location, LocationEffect};
use crate::value::Value;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique, monotonically increasing node identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which block produced a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentMeta {
    pub provider: Option<String>,
    pub block: Option<String>,
    pub extra: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentNode {
    /// A reserved slot not yet filled.
    Empty,
    Element { markdown: String, meta: ContentMeta },
    Section { children: Vec<NodeId>, meta: ContentMeta },
}

#[derive(Debug)]
struct Arena {
    root: NodeId,
    nodes: HashMap<NodeId, ContentNode>,
    parents: HashMap<NodeId, NodeId>,
}

impl Arena {
    fn children_mut(&mut self, id: NodeId) -> DiagResult<&mut Vec<NodeId>> {
        match self.nodes.get_mut(&id) {
            Some(ContentNode::Section { children, .. }) => Ok(children),
            Some(_) => Err(Diagnostics::error(
                "Invalid content target",
                format!("content node {} is not a section", id),
            )),
            None => Err(unknown(id)),
        }
    }

    fn alloc(&mut self, parent: NodeId, node: ContentNode) -> NodeId {
        let id = NodeId::next();
        self.nodes.insert(id, node);
        self.parents.insert(id, parent);
        id
    }

    fn build(&mut self, parent: NodeId, content: Content, meta: &ContentMeta) -> NodeId {
        match content {
            Content::Element { markdown, meta: extra } => self.alloc(
                parent,
                ContentNode::Element {
                    markdown,
                    meta: ContentMeta {
                        extra,
                        ..meta.clone()
                    },
                },
            ),
            Content::Section { children } => {
                let id = self.alloc(
                    parent,
                    ContentNode::Section {
                        children: Vec::new(),
                        meta: meta.clone(),
                    },
                );
                let built: Vec<_> = children
                    .into_iter()
                    .map(|child| self.build(id, child, meta))
                    .collect();
                if let Some(ContentNode::Section { children, .. }) = self.nodes.get_mut(&id) {
                    *children = built;
                }
                id
            }
        }
    }

    fn compact(&mut self, id: NodeId) {
        let children = match self.nodes.get(&id) {
            Some(ContentNode::Section { children, .. }) => children.clone(),
            _ => return,
        };
        let kept: Vec<NodeId> = children
            .into_iter()
            .filter(|child| !matches!(self.nodes.get(child), Some(ContentNode::Empty) | None))
            .collect();
        for child in &kept {
            self.compact(*child);
        }
        if let Some(ContentNode::Section { children, .. }) = self.nodes.get_mut(&id) {
            *children = kept;
        }
    }

    /// Drops every unfilled placeholder once no section refers to it.
    fn prune(&mut self) {
        let root = self.root;
        self.nodes
            .retain(|node, value| !matches!(value, ContentNode::Empty) || *node == root);
        let nodes = &self.nodes;
        self.parents.retain(|node, _| nodes.contains_key(node));
    }

    fn to_value(&self, id: NodeId) -> Value {
        match self.nodes.get(&id) {
            Some(ContentNode::Element { markdown, meta }) => Value::map([
                ("type", Value::from("element")),
                ("id", Value::Integer(id.0 as i64)),
                ("markdown", Value::from(markdown.as_str())),
                ("meta", meta_value(meta)),
            ]),
            Some(ContentNode::Section { children, meta }) => Value::map([
                ("type", Value::from("section")),
                ("id", Value::Integer(id.0 as i64)),
                (
                    "children",
                    Value::list(
                        children
                            .iter()
                            .filter(|c| !matches!(self.nodes.get(c), Some(ContentNode::Empty)))
                            .map(|c| self.to_value(*c)),
                    ),
                ),
                ("meta", meta_value(meta)),
            ]),
            Some(ContentNode::Empty) | None => Value::Null,
        }
    }

    fn markdown(&self, id: NodeId, out: &mut Vec<String>) {
        match self.nodes.get(&id) {
            Some(ContentNode::Element { markdown, .. }) => out.push(markdown.clone()),
            Some(ContentNode::Section { children, .. }) => {
                for child in children {
                    self.markdown(*child, out);
                }
            }
            _ => {}
        }
    }
}

fn meta_value(meta: &ContentMeta) -> Value {
    serde_json::to_value(meta).map(Value::from).unwrap_or_default()
}

fn unknown(id: NodeId) -> Diagnostics {
    Diagnostics::error("Unknown content node", format!("no content node with id {}", id))
}

/// An ordered tree of rendered content, safe to extend from concurrent tasks.
#[derive(Debug)]
pub struct ContentTree {
    arena: Mutex<Arena>,
}

impl Default for ContentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentTree {
    pub fn new() -> Self {
        let root = NodeId::next();
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            ContentNode::Section {
                children: Vec::new(),
                meta: ContentMeta::default(),
            },
        );
        Self {
            arena: Mutex::new(Arena {
                root,
                nodes,
                parents: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Arena> {
        self.arena
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn root(&self) -> NodeId {
        self.lock().root
    }

    /// Appends an empty placeholder to `parent` and returns its id.
    pub fn reserve(&self, parent: NodeId) -> DiagResult<NodeId> {
        let mut arena = self.lock();
        arena.children_mut(parent)?;
        let id = arena.alloc(parent, ContentNode::Empty);
        arena.children_mut(parent)?.push(id);
        trace!(parent = %parent, slot = %id, "reserved content slot");
        Ok(id)
    }

    /// Appends an empty section to `parent` and returns its id.
    pub fn reserve_section(&self, parent: NodeId, meta: ContentMeta) -> DiagResult<NodeId> {
        let mut arena = self.lock();
        arena.children_mut(parent)?;
        let id = arena.alloc(
            parent,
            ContentNode::Section {
                children: Vec::new(),
                meta,
            },
        );
        arena.children_mut(parent)?.push(id);
        Ok(id)
    }

    /// Replaces the placeholder `slot` with `content`.
    pub fn fill(&self, slot: NodeId, content: Content, meta: ContentMeta) -> DiagResult<()> {
        let mut arena = self.lock();
        match arena.nodes.get(&slot) {
            Some(ContentNode::Empty) => {}
            Some(_) => {
                return Err(Diagnostics::error(
                    "Content slot already filled",
                    format!("content node {} was filled twice", slot),
                ))
            }
            None => return Err(unknown(slot)),
        }
        let parent = arena.parents.get(&slot).copied().unwrap_or(arena.root);
        let built = arena.build(parent, content, &meta);
        let node = arena.nodes.remove(&built).unwrap_or(ContentNode::Empty);
        if let ContentNode::Section { children, .. } = &node {
            for child in children {
                arena.parents.insert(*child, slot);
            }
        }
        arena.parents.remove(&built);
        arena.nodes.insert(slot, node);
        Ok(())
    }

    /// Inserts `content` among the children of `parent` according to `location`.
    ///
    /// `Before` and `After` are relative to the child at `index`; `At` fills the empty
    /// placeholder at `index`.
    pub fn insert(
        &self,
        parent: NodeId,
        content: Content,
        meta: ContentMeta,
        location: Location,
    ) -> DiagResult<NodeId> {
        let mut arena = self.lock();
        let len = arena.children_mut(parent)?.len();
        let invalid = || {
            Diagnostics::error(
                "Invalid content location",
                format!(
                    "{} index {} is out of range for a section with {} children",
                    location.effect, location.index, len
                ),
            )
        };
        match location.effect {
            LocationEffect::At => {
                let target = *arena.children_mut(parent)?.get(location.index).ok_or_else(invalid)?;
                if !matches!(arena.nodes.get(&target), Some(ContentNode::Empty)) {
                    return Err(Diagnostics::error(
                        "Invalid content location",
                        format!("child {} of node {} is not an empty slot", location.index, parent),
                    ));
                }
                drop(arena);
                self.fill(target, content, meta)?;
                Ok(target)
            }
            LocationEffect::Before | LocationEffect::After => {
                if location.index >= len {
                    return Err(invalid());
                }
                let at = match location.effect {
                    LocationEffect::Before => location.index,
                    _ => location.index + 1,
                };
                let id = arena.build(parent, content, &meta);
                arena.children_mut(parent)?.insert(at, id);
                Ok(id)
            }
        }
    }

    /// Fills `slot` or, with a location, inserts next to it and releases the slot.
    pub fn place(
        &self,
        slot: NodeId,
        content: Content,
        meta: ContentMeta,
        location: Option<Location>,
    ) -> DiagResult<NodeId> {
        match location {
            None => self.fill(slot, content, meta).map(|_| slot),
            Some(location) => {
                let parent = self
                    .lock()
                    .parents
                    .get(&slot)
                    .copied()
                    .ok_or_else(|| unknown(slot))?;
                self.insert(parent, content, meta, location)
            }
        }
    }

    /// Removes placeholders that were never filled.
    pub fn compact(&self) {
        let mut arena = self.lock();
        let root = arena.root;
        arena.compact(root);
        arena.prune();
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        match self.lock().nodes.get(&id) {
            Some(ContentNode::Section { children, .. }) => children.clone(),
            _ => Vec::new(),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<ContentNode> {
        self.lock().nodes.get(&id).cloned()
    }

    /// A snapshot of the tree as a data value, placeholders omitted.
    pub fn to_value(&self) -> Value {
        let arena = self.lock();
        arena.to_value(arena.root)
    }

    /// The markdown of every element in document order, separated by blank lines.
    pub fn markdown(&self) -> String {
        let arena = self.lock();
        let mut parts = Vec::new();
        arena.markdown(arena.root, &mut parts);
        parts.join("\n\n")
    }

    /// The markdown of each leaf under `id`, in order.
    pub fn leaves(&self, id: NodeId) -> Vec<String> {
        let arena = self.lock();
        let mut parts = Vec::new();
        arena.markdown(id, &mut parts);
        parts
    }
}
