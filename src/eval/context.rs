//! Well-known keys of the data context and helpers to extend copies of it.
//!
//! The data context is a plain map [`Value`]. Every concurrent branch works on its own
//! clone; containers are copy-on-write, so extending a clone never affects siblings.

use crate::content::ContentTree;
use crate::diagnostics::{DiagResult, Diagnostic, Diagnostics};
use crate::deferred::{evaluate, EvalContext};
use crate::template::{MetaBlock, VarSet};
use crate::value::Value;

pub const DATA: &str = "data";
pub const DOCUMENT: &str = "document";
pub const SECTION: &str = "section";
pub const CONTENT: &str = "content";
pub const VARS: &str = "vars";
pub const META: &str = "meta";
pub const QUERY_RESULT: &str = "query_result";
pub const LOCAL: &str = "local";
pub const DYNAMIC_ITEM: &str = "dynamic_item";
pub const DYNAMIC_ITEM_INDEX: &str = "dynamic_item_index";

/// A fresh context holding fetched `data`.
pub fn with_data(data: Value) -> Value {
    Value::map([(DATA, data)])
}

pub fn set_meta(ctx: &mut Value, scope: &str, meta: Option<&MetaBlock>) {
    if let Some(meta) = meta {
        ctx.set_path(&[scope, META], meta.to_value());
    }
}

pub fn set_var(ctx: &mut Value, name: &str, value: Value) {
    ctx.set_path(&[VARS, name], value);
}

/// Exposes the current state of `tree` as `document.content`.
pub fn set_content_snapshot(ctx: &mut Value, tree: &ContentTree) {
    ctx.set_path(&[DOCUMENT, CONTENT], tree.to_value());
}

/// Evaluates `vars` in definition order, binding each result under `vars.<name>`
/// before the next one is evaluated.
pub async fn apply_vars(cx: &EvalContext, ctx: &mut Value, vars: &VarSet) -> DiagResult<()> {
    for (name, value) in vars.iter() {
        let resolved = evaluate(cx, ctx, &value.instantiate()).await?;
        set_var(ctx, name, resolved);
    }
    Ok(())
}

/// Binds `vars.local` when a local variable is declared.
pub async fn apply_local_var(
    cx: &EvalContext,
    ctx: &mut Value,
    local: Option<&Value>,
) -> DiagResult<()> {
    if let Some(local) = local {
        let resolved = evaluate(cx, ctx, &local.instantiate()).await?;
        set_var(ctx, LOCAL, resolved);
    }
    Ok(())
}

/// Reports every name in `required` that has no binding under `vars`.
pub fn check_required_vars(ctx: &Value, required: &[String]) -> DiagResult<()> {
    let diags: Diagnostics = required
        .iter()
        .filter(|name| ctx.get_path(&[VARS, name.as_str()]).is_none())
        .map(|name| {
            Diagnostic::error("Missing required variable")
                .with_detail(format!("variable {:?} must be defined", name))
        })
        .collect();
    diags.into_result(())
}

/// Evaluates an inclusion condition. A missing condition includes.
pub async fn is_included(cx: &EvalContext, ctx: &Value, cond: Option<&Value>) -> DiagResult<bool> {
    match cond {
        None => Ok(true),
        Some(cond) => Ok(evaluate(cx, ctx, &cond.instantiate()).await?.truthy()),
    }
}
