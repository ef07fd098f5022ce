//! Expansion of a lowered body into the concrete items to render.
//!
//! Sections are included or dropped and get their own data context. Dynamic blocks
//! are replaced by their children, once or once per element of `items`. Tag filtering
//! runs on the expanded result.

use std::sync::Arc;

use async_recursion::async_recursion;
use tracing::{debug, trace};

use super::action::{ContentAction, ContentItem, DynamicAction, SectionAction};
use super::context::{self, DYNAMIC_ITEM, DYNAMIC_ITEM_INDEX, SECTION};
use crate::deferred::{evaluate, EvalContext};
use crate::diagnostics::{DiagResult, Diagnostic, Diagnostics};
use crate::value::Value;

/// A content item bound to the data context it renders with.
#[derive(Debug, Clone)]
pub enum Expanded {
    Content {
        action: Arc<ContentAction>,
        ctx: Value,
    },
    Title {
        action: Arc<ContentAction>,
        ctx: Value,
    },
    Section {
        action: Arc<SectionAction>,
        children: Vec<Expanded>,
    },
}

/// Expands `items` against `ctx`. Failing branches are dropped and reported; their
/// siblings are still expanded.
#[async_recursion]
pub async fn unwrap_items(
    cx: &EvalContext,
    items: &[ContentItem],
    ctx: &Value,
) -> (Vec<Expanded>, Diagnostics) {
    let mut out = Vec::new();
    let mut diags = Diagnostics::new();
    for item in items {
        match item {
            ContentItem::Content(action) => out.push(Expanded::Content {
                action: action.clone(),
                ctx: ctx.clone(),
            }),
            ContentItem::Title(action) => out.push(Expanded::Title {
                action: action.clone(),
                ctx: ctx.clone(),
            }),
            ContentItem::Section(section) => match unwrap_section(cx, section, ctx).await {
                Ok(Some(expanded)) => out.push(expanded),
                Ok(None) => {}
                Err(err) => diags.extend(err),
            },
            ContentItem::Dynamic(dynamic) => {
                let (expanded, errors) = unwrap_dynamic(cx, dynamic, ctx).await;
                out.extend(expanded);
                diags.extend(errors);
            }
        }
    }
    (out, diags)
}

/// `None` when the section is excluded.
pub async fn unwrap_section(
    cx: &EvalContext,
    section: &Arc<SectionAction>,
    ctx: &Value,
) -> DiagResult<Option<Expanded>> {
    let mut ctx = ctx.clone();
    let prepared = async {
        if !context::is_included(cx, &ctx, section.is_included.as_ref()).await? {
            return Ok(false);
        }
        context::set_meta(&mut ctx, SECTION, section.meta.as_ref());
        context::apply_vars(cx, &mut ctx, &section.vars).await?;
        context::apply_local_var(cx, &mut ctx, section.local_var.as_ref()).await?;
        context::check_required_vars(&ctx, &section.required_vars)?;
        Ok::<_, Diagnostics>(true)
    };
    match prepared.await {
        Ok(true) => {}
        Ok(false) => {
            debug!(section = ?section.name, "section excluded");
            return Ok(None);
        }
        Err(diags) => return Err(diags.refine_range(&section.range)),
    }
    let (children, diags) = unwrap_items(cx, &section.children, &ctx).await;
    diags.into_result(Some(Expanded::Section {
        action: section.clone(),
        children,
    }))
}

async fn unwrap_dynamic(
    cx: &EvalContext,
    dynamic: &DynamicAction,
    ctx: &Value,
) -> (Vec<Expanded>, Diagnostics) {
    let Some(items) = &dynamic.items else {
        return match context::is_included(cx, ctx, dynamic.condition.as_ref()).await {
            Ok(true) => unwrap_items(cx, &dynamic.children, ctx).await,
            Ok(false) => (Vec::new(), Diagnostics::new()),
            Err(err) => (Vec::new(), err.refine_range(&dynamic.range)),
        };
    };
    let elements = match evaluate(cx, ctx, &items.instantiate()).await {
        Ok(value) => match dynamic_elements(&value) {
            Ok(elements) => elements,
            Err(err) => return (Vec::new(), err.refine_range(&dynamic.range)),
        },
        Err(err) => return (Vec::new(), err.refine_range(&dynamic.range)),
    };
    let mut out = Vec::new();
    for (index, item) in elements {
        trace!(index = %index, "expanding dynamic element");
        let mut element_ctx = ctx.clone();
        context::set_var(&mut element_ctx, DYNAMIC_ITEM, item);
        context::set_var(&mut element_ctx, DYNAMIC_ITEM_INDEX, index);
        match context::is_included(cx, &element_ctx, dynamic.condition.as_ref()).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => return (out, err.refine_range(&dynamic.range)),
        }
        let (expanded, diags) = unwrap_items(cx, &dynamic.children, &element_ctx).await;
        out.extend(expanded);
        if diags.has_errors() {
            // the same error would repeat for every remaining element
            return (out, diags);
        }
    }
    (out, Diagnostics::new())
}

fn dynamic_elements(items: &Value) -> DiagResult<Vec<(Value, Value)>> {
    match items.unmarked() {
        Value::Null => Ok(Vec::new()),
        Value::List(list) => Ok(list
            .iter()
            .enumerate()
            .map(|(i, item)| (Value::from(i), item.clone()))
            .collect()),
        Value::Map(map) => Ok(map
            .iter()
            .map(|(key, item)| (Value::from(key.as_str()), item.clone()))
            .collect()),
        other => Err(Diagnostic::error("Invalid dynamic items")
            .with_detail(format!("expected a list or map, got {}", other.type_name()))
            .into()),
    }
}

fn matches_tags(tags: &[String], required: &[String]) -> bool {
    required.iter().all(|tag| tags.contains(tag))
}

/// Keeps the items whose tags include every required tag. A section that does not
/// match is kept with its title and matching descendants, if it has any.
pub fn filter_by_tags(items: Vec<Expanded>, required: &[String]) -> Vec<Expanded> {
    if required.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter_map(|item| match item {
            Expanded::Content { action, ctx } => {
                matches_tags(action.tags(), required).then_some(Expanded::Content { action, ctx })
            }
            title @ Expanded::Title { .. } => Some(title),
            Expanded::Section { action, children } => {
                if matches_tags(action.tags(), required) {
                    return Some(Expanded::Section { action, children });
                }
                let children = filter_by_tags(children, required);
                children
                    .iter()
                    .any(|child| !matches!(child, Expanded::Title { .. }))
                    .then_some(Expanded::Section { action, children })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::SourceRange;
    use crate::plugin::{InvocationOrder, MockContentProvider, PluginRegistry};
    use crate::template::{query_expr, BlockId, MetaBlock, VarSet};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn content(name: &str, tags: &[&str]) -> Arc<ContentAction> {
        Arc::new(ContentAction {
            id: BlockId::new(),
            plugin: "text".to_string(),
            name: Some(name.to_string()),
            meta: Some(MetaBlock::tagged(tags.iter().copied())),
            config: Value::Null,
            args: Value::Null,
            provider: Arc::new(MockContentProvider::new()),
            order: InvocationOrder::Unspecified,
            depends_on: Vec::new(),
            is_included: None,
            vars: VarSet::new(),
            local_var: None,
            required_vars: Vec::new(),
            query: None,
            range: SourceRange::default(),
        })
    }

    fn section(tags: &[&str], children: Vec<ContentItem>) -> Arc<SectionAction> {
        Arc::new(SectionAction {
            id: BlockId::new(),
            name: None,
            meta: Some(MetaBlock::tagged(tags.iter().copied())),
            is_included: None,
            vars: VarSet::new(),
            local_var: None,
            required_vars: Vec::new(),
            children,
            range: SourceRange::default(),
        })
    }

    fn dynamic(items: Option<Value>, condition: Option<Value>, children: Vec<ContentItem>) -> ContentItem {
        ContentItem::Dynamic(Arc::new(DynamicAction {
            id: BlockId::new(),
            condition,
            items,
            children,
            range: SourceRange::default(),
        }))
    }

    fn cx() -> EvalContext {
        EvalContext::new(Arc::new(PluginRegistry::new()))
    }

    fn bindings(expanded: &[Expanded]) -> Vec<(Value, Value)> {
        expanded
            .iter()
            .filter_map(|e| match e {
                Expanded::Content { ctx, .. } => Some((
                    ctx.get_path(&["vars", DYNAMIC_ITEM_INDEX]).cloned().unwrap_or_default(),
                    ctx.get_path(&["vars", DYNAMIC_ITEM]).cloned().unwrap_or_default(),
                )),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_dynamic_expands_once_per_item() {
        let items = vec![dynamic(
            Some(Value::from(json!(["x", "y", "z"]))),
            None,
            vec![ContentItem::Content(content("a", &[]))],
        )];
        let (expanded, diags) = unwrap_items(&cx(), &items, &Value::empty_map()).await;
        assert!(diags.is_empty());
        assert_eq!(
            bindings(&expanded),
            vec![
                (Value::from(0), Value::from("x")),
                (Value::from(1), Value::from("y")),
                (Value::from(2), Value::from("z")),
            ]
        );
    }

    #[tokio::test]
    async fn test_dynamic_condition_filters_elements() {
        let items = vec![dynamic(
            Some(Value::from(json!({"a": 1, "b": 2}))),
            Some(query_expr(".vars.dynamic_item > 1")),
            vec![ContentItem::Content(content("a", &[]))],
        )];
        let (expanded, _) = unwrap_items(&cx(), &items, &Value::empty_map()).await;
        assert_eq!(bindings(&expanded), vec![(Value::from("b"), Value::from(2))]);
    }

    #[tokio::test]
    async fn test_dynamic_error_stops_its_block_only() {
        let failing = dynamic(
            Some(Value::from(json!([1, 2, 3]))),
            Some(query_expr(".vars.dynamic_item.missing")),
            vec![ContentItem::Content(content("a", &[]))],
        );
        let healthy = dynamic(None, None, vec![ContentItem::Content(content("b", &[]))]);
        let (expanded, diags) = unwrap_items(&cx(), &[failing, healthy], &Value::empty_map()).await;
        assert_eq!(diags.len(), 1);
        assert_eq!(expanded.len(), 1);
    }

    #[tokio::test]
    async fn test_nested_dynamic_sees_outer_binding() {
        let inner = dynamic(
            Some(query_expr(".vars.dynamic_item")),
            None,
            vec![ContentItem::Content(content("leaf", &[]))],
        );
        let outer = dynamic(Some(Value::from(json!([["a", "b"], ["c"]]))), None, vec![inner]);
        let (expanded, diags) = unwrap_items(&cx(), &[outer], &Value::empty_map()).await;
        assert!(diags.is_empty());
        let items: Vec<_> = bindings(&expanded).into_iter().map(|(_, item)| item).collect();
        assert_eq!(items, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
    }

    #[tokio::test]
    async fn test_excluded_section_contributes_nothing() {
        let mut excluded = section(&[], vec![ContentItem::Content(content("a", &[]))]);
        Arc::get_mut(&mut excluded).unwrap().is_included = Some(Value::Bool(false));
        let (expanded, diags) =
            unwrap_items(&cx(), &[ContentItem::Section(excluded)], &Value::empty_map()).await;
        assert!(expanded.is_empty() && diags.is_empty());
    }

    #[tokio::test]
    async fn test_tag_filter_keeps_matching_descendants() {
        let items = vec![ContentItem::Section(section(
            &["other"],
            vec![
                ContentItem::Content(content("keep", &["wanted"])),
                ContentItem::Content(content("drop", &[])),
            ],
        ))];
        let (expanded, _) = unwrap_items(&cx(), &items, &Value::empty_map()).await;
        let filtered = filter_by_tags(expanded, &["wanted".to_string()]);
        assert_eq!(filtered.len(), 1);
        match &filtered[0] {
            Expanded::Section { children, .. } => {
                assert_eq!(children.len(), 1);
                assert!(matches!(&children[0], Expanded::Content { action, .. }
                    if action.name.as_deref() == Some("keep")));
            }
            other => panic!("expected section, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tag_filter_keeps_title_of_surviving_section() {
        let items = vec![
            ContentItem::Section(section(
                &["other"],
                vec![
                    ContentItem::Title(content("heading", &[])),
                    ContentItem::Content(content("keep", &["wanted"])),
                ],
            )),
            ContentItem::Section(section(
                &["other"],
                vec![
                    ContentItem::Title(content("lonely heading", &[])),
                    ContentItem::Content(content("drop", &[])),
                ],
            )),
        ];
        let (expanded, _) = unwrap_items(&cx(), &items, &Value::empty_map()).await;
        let filtered = filter_by_tags(expanded, &["wanted".to_string()]);
        assert_eq!(filtered.len(), 1);
        match &filtered[0] {
            Expanded::Section { children, .. } => {
                assert_eq!(children.len(), 2);
                assert!(matches!(&children[0], Expanded::Title { action, .. }
                    if action.name.as_deref() == Some("heading")));
            }
            other => panic!("expected section, got {:?}", other),
        }
    }
}
