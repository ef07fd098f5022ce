//! Concurrent fetching of a document's data blocks.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use super::action::DataAction;
use crate::deferred::EvalContext;
use crate::diagnostics::{DiagResult, Diagnostic, Diagnostics};
use crate::value::{Map, Value};

/// One finished data block.
#[derive(Debug)]
struct Fetched {
    plugin: String,
    name: String,
    result: DiagResult<Value>,
}

/// Runs every data action in parallel and merges the results into
/// `{plugin: {block: result}}`.
///
/// Returns as soon as any block reports an error; blocks still running are cancelled
/// and their results are not waited for.
#[instrument(level = "debug", skip_all, fields(blocks = actions.len()))]
pub async fn fetch(
    cx: &EvalContext,
    actions: &[Arc<DataAction>],
    ctx: &Value,
    capacity: usize,
) -> DiagResult<Value> {
    let capacity = if capacity == 0 { actions.len().max(1) } else { capacity };
    let (tx, mut rx) = mpsc::channel::<Fetched>(capacity);
    let cancel = cx.cancel.child_token();
    let child_cx = cx.with_cancel(cancel.clone());

    for action in actions {
        let tx = tx.clone();
        let action = action.clone();
        let cx = child_cx.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let result = action.fetch(&cx, &ctx).await;
            let fetched = Fetched {
                plugin: action.plugin.clone(),
                name: action.name.clone(),
                result,
            };
            if tx.send(fetched).await.is_err() {
                debug!(plugin = %action.plugin, name = %action.name, "data result dropped");
            }
        });
    }
    drop(tx);

    let mut results = Vec::with_capacity(actions.len());
    while let Some(fetched) = rx.recv().await {
        match fetched.result {
            Ok(value) => results.push((fetched.plugin, fetched.name, value)),
            Err(diags) => {
                warn!(plugin = %fetched.plugin, name = %fetched.name, "data block failed");
                cancel.cancel();
                return Err(diags);
            }
        }
    }
    if results.len() < actions.len() {
        return Err(Diagnostics::error(
            "Data fetch interrupted",
            format!("{} of {} data blocks completed", results.len(), actions.len()),
        ));
    }
    merge(results)
}

/// Deep-merges two results for the same block. Identical values are kept; maps merge
/// key by key; anything else conflicts.
fn merge_values(existing: &Value, incoming: &Value) -> Option<Value> {
    if existing == incoming {
        return Some(existing.clone());
    }
    let (a, b) = (existing.as_map()?, incoming.as_map()?);
    let mut merged = a.clone();
    for (key, value) in b {
        let combined = match merged.get(key) {
            Some(current) => merge_values(current, value)?,
            None => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    Some(Value::from(merged))
}

fn conflict(plugin: &str, name: &str) -> Diagnostics {
    Diagnostic::error("Conflicting data")
        .with_detail(format!(
            "data blocks named data.{}.{} produced incompatible results",
            plugin, name
        ))
        .into()
}

/// Groups results by plugin then block name. Nothing is merged when a conflict is found.
pub fn merge(results: Vec<(String, String, Value)>) -> DiagResult<Value> {
    let mut data = Map::new();
    for (plugin, name, value) in results {
        let entry = data.entry(plugin.clone()).or_insert_with(Value::empty_map);
        let Some(blocks) = entry.as_map_mut() else {
            return Err(conflict(&plugin, &name));
        };
        let merged = match blocks.get(&name) {
            Some(existing) => merge_values(existing, &value).ok_or_else(|| conflict(&plugin, &name))?,
            None => value,
        };
        blocks.insert(name, merged);
    }
    Ok(Value::from(data))
}
