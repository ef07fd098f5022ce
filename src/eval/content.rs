//! Scheduling of content units.
//!
//! [`ContentEvaluator::assign`] reserves a placeholder per content block in declaration
//! order and records its dependencies; [`ContentEvaluator::execute`] runs the units phase
//! by phase (`begin`, `unspecified`, `end`), each unit waiting on the completion signal
//! of the units it depends on.

use std::collections::HashMap;
use std::sync::Arc;

use strum::IntoEnumIterator;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use super::action::ContentAction;
use super::unwrap::Expanded;
use crate::content::{ContentTree, NodeId};
use crate::deferred::EvalContext;
use crate::diagnostics::{DiagResult, Diagnostic, Diagnostics};
use crate::plugin::InvocationOrder;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitState {
    Pending,
    Done,
    Failed,
}

/// Signals the unit's completion when dropped, whatever happened to it.
struct CompletionGuard {
    tx: watch::Sender<UnitState>,
    succeeded: bool,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let state = if self.succeeded {
            UnitState::Done
        } else {
            UnitState::Failed
        };
        self.tx.send_replace(state);
    }
}

#[derive(Debug)]
struct Unit {
    action: Arc<ContentAction>,
    ctx: Value,
    slot: NodeId,
    phase: InvocationOrder,
    deps: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct ContentEvaluator {
    units: Vec<Unit>,
    keys: HashMap<String, Vec<usize>>,
    strict: bool,
}

fn dependency_not_found(action: &ContentAction, name: &str) -> Diagnostic {
    Diagnostic::error("Dependency not found")
        .with_detail(format!("{} depends on {}, which is not defined", action, name))
        .with_range(action.range.clone())
}

impl ContentEvaluator {
    /// With `strict`, a dependency must be declared before the block that uses it.
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn assign_into(
        &mut self,
        tree: &ContentTree,
        parent: NodeId,
        items: Vec<Expanded>,
        diags: &mut Diagnostics,
    ) {
        for item in items {
            match item {
                Expanded::Content { action, ctx } | Expanded::Title { action, ctx } => {
                    let slot = match tree.reserve(parent) {
                        Ok(slot) => slot,
                        Err(err) => {
                            diags.extend(err);
                            continue;
                        }
                    };
                    let index = self.units.len();
                    let mut deps = Vec::new();
                    if self.strict {
                        for name in &action.depends_on {
                            match self.keys.get(name) {
                                Some(found) => deps.extend(found.iter().copied()),
                                None => diags.push(dependency_not_found(&action, name)),
                            }
                        }
                    }
                    if let Some(key) = action.key() {
                        self.keys.entry(key).or_default().push(index);
                    }
                    self.units.push(Unit {
                        phase: action.order,
                        action,
                        ctx,
                        slot,
                        deps,
                    });
                }
                Expanded::Section { action, children } => {
                    match tree.reserve_section(parent, action.content_meta()) {
                        Ok(node) => self.assign_into(tree, node, children, diags),
                        Err(err) => diags.extend(err),
                    }
                }
            }
        }
    }

    /// Builds the units for `items`, reserving their slots under `parent`.
    pub fn assign(
        &mut self,
        tree: &ContentTree,
        parent: NodeId,
        items: Vec<Expanded>,
    ) -> DiagResult<()> {
        let mut diags = Diagnostics::new();
        self.assign_into(tree, parent, items, &mut diags);
        if !self.strict {
            self.link_dependencies(&mut diags);
        }
        if !diags.has_errors() {
            self.check_cycles(&mut diags);
        }
        if !diags.has_errors() {
            self.promote_phases();
        }
        diags.into_result(())
    }

    fn link_dependencies(&mut self, diags: &mut Diagnostics) {
        for unit in &mut self.units {
            for name in &unit.action.depends_on {
                match self.keys.get(name) {
                    Some(found) => unit.deps.extend(found.iter().copied()),
                    None => diags.push(dependency_not_found(&unit.action, name)),
                }
            }
        }
    }

    fn check_cycles(&self, diags: &mut Diagnostics) {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Finished,
        }
        let mut marks = vec![Mark::New; self.units.len()];
        for start in 0..self.units.len() {
            if marks[start] != Mark::New {
                continue;
            }
            // iterative DFS; the stack holds (unit, next dependency to visit)
            let mut stack = vec![(start, 0usize)];
            marks[start] = Mark::Active;
            while let Some((node, next)) = stack.last_mut() {
                let node = *node;
                match self.units[node].deps.get(*next) {
                    Some(&dep) => {
                        *next += 1;
                        match marks[dep] {
                            Mark::New => {
                                marks[dep] = Mark::Active;
                                stack.push((dep, 0));
                            }
                            Mark::Active => {
                                let cycle: Vec<String> = stack
                                    .iter()
                                    .skip_while(|(n, _)| *n != dep)
                                    .map(|(n, _)| self.units[*n].action.to_string())
                                    .collect();
                                diags.push(
                                    Diagnostic::error("Circular dependency")
                                        .with_detail(format!(
                                            "{} -> {}",
                                            cycle.join(" -> "),
                                            self.units[dep].action
                                        ))
                                        .with_range(self.units[dep].action.range.clone()),
                                );
                            }
                            Mark::Finished => {}
                        }
                    }
                    None => {
                        marks[node] = Mark::Finished;
                        stack.pop();
                    }
                }
            }
        }
    }

    /// A unit runs no earlier than the phase of any unit it depends on.
    fn promote_phases(&mut self) {
        fn effective(units: &[Unit], memo: &mut [Option<InvocationOrder>], i: usize) -> InvocationOrder {
            if let Some(phase) = memo[i] {
                return phase;
            }
            let mut phase = units[i].phase;
            for &dep in &units[i].deps {
                phase = phase.max(effective(units, memo, dep));
            }
            memo[i] = Some(phase);
            phase
        }
        let mut memo = vec![None; self.units.len()];
        let phases: Vec<_> = (0..self.units.len())
            .map(|i| effective(&self.units, &mut memo, i))
            .collect();
        for (unit, phase) in self.units.iter_mut().zip(phases) {
            if unit.phase != phase {
                debug!(block = %unit.action, from = %unit.phase, to = %phase, "promoted unit");
                unit.phase = phase;
            }
        }
    }

    /// Runs every unit, phase by phase. Stops after the first phase with an error.
    #[instrument(level = "debug", skip_all, fields(units = self.units.len()))]
    pub async fn execute(self, cx: &EvalContext, tree: Arc<ContentTree>) -> DiagResult<()> {
        let mut senders = Vec::with_capacity(self.units.len());
        let mut receivers = Vec::with_capacity(self.units.len());
        for _ in &self.units {
            let (tx, rx) = watch::channel(UnitState::Pending);
            senders.push(Some(tx));
            receivers.push(rx);
        }
        let mut units: Vec<Option<Unit>> = self.units.into_iter().map(Some).collect();

        for phase in InvocationOrder::iter() {
            let mut tasks = JoinSet::new();
            for index in 0..units.len() {
                if units[index].as_ref().map(|u| u.phase) != Some(phase) {
                    continue;
                }
                let (Some(unit), Some(tx)) = (units[index].take(), senders[index].take()) else {
                    continue;
                };
                let waits: Vec<_> = unit.deps.iter().map(|&d| receivers[d].clone()).collect();
                let cx = cx.clone();
                let tree = tree.clone();
                tasks.spawn(async move {
                    let mut guard = CompletionGuard {
                        tx,
                        succeeded: false,
                    };
                    for mut rx in waits {
                        let ready = rx
                            .wait_for(|state| *state != UnitState::Pending)
                            .await
                            .map(|state| *state == UnitState::Done)
                            .unwrap_or(false);
                        if !ready {
                            debug!(block = %unit.action, "dependency failed, skipping");
                            return Ok(());
                        }
                    }
                    let result = unit.action.render(&cx, unit.ctx, &tree, unit.slot).await;
                    guard.succeeded = result.is_ok();
                    result
                });
            }
            let mut diags = Diagnostics::new();
            let mut finished = 0;
            while let Some(joined) = tasks.join_next().await {
                finished += 1;
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => diags.extend(err),
                    Err(err) => diags.push(
                        Diagnostic::error("Content unit failed").with_detail(err.to_string()),
                    ),
                }
            }
            debug!(phase = %phase, units = finished, "phase finished");
            if diags.has_errors() {
                warn!(phase = %phase, errors = diags.errors().count(), "phase failed");
                return Err(diags);
            }
        }
        tree.compact();
        Ok(())
    }
}
