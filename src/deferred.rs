//! Deferred values: computations embedded in plugin arguments that run once a data
//! context exists.
//!
//! A [`Deferred`] pairs a descriptor ([`DeferredKind`]) with a memo cell. The cell moves
//! from `Unevaluated` to either `Success` or `Failure` exactly once; later reads return
//! the cached value or the repeated-error sentinel without running anything again.
//! [`evaluate`] walks a value and resolves every nested deferred it finds.

use std::fmt;
use std::sync::Arc;

use async_recursion::async_recursion;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::diagnostics::{DiagResult, Diagnostic, Diagnostics, SourceRange};
use crate::plugin::{DataParams, PluginRegistry};
use crate::query::Query;
use crate::value::{Value, ValueType};

/// Ambient state threaded through every evaluation of a render run.
#[derive(Clone)]
pub struct EvalContext {
    pub cancel: CancellationToken,
    pub registry: Arc<PluginRegistry>,
}

impl EvalContext {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            registry,
        }
    }

    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            registry: self.registry.clone(),
        }
    }

    pub(crate) fn check_cancelled(&self) -> DiagResult<()> {
        if self.cancel.is_cancelled() {
            return Err(Diagnostics::error(
                "Evaluation cancelled",
                "the render was cancelled before this value was computed",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// A nested data-source invocation whose result becomes the value.
#[derive(Debug, Clone)]
pub struct PluginDataCall {
    pub plugin: String,
    pub config: Value,
    pub args: Value,
    pub range: Option<SourceRange>,
}

#[derive(Debug, Clone)]
pub enum DeferredKind {
    Query(Arc<Query>),
    PluginData(PluginDataCall),
}

#[derive(Debug, Clone, Default)]
enum MemoState {
    #[default]
    Unevaluated,
    Success(Value),
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum MemoStatus {
    Unevaluated,
    Success,
    Failure,
}

#[derive(Debug)]
pub struct Deferred {
    kind: DeferredKind,
    expected: ValueType,
    state: Mutex<MemoState>,
}

impl Deferred {
    pub fn query(query: Query) -> Self {
        Self::new(DeferredKind::Query(Arc::new(query)))
    }

    pub fn plugin_data(plugin: impl Into<String>, config: Value, args: Value) -> Self {
        Self::new(DeferredKind::PluginData(PluginDataCall {
            plugin: plugin.into(),
            config,
            args,
            range: None,
        }))
    }

    pub fn new(kind: DeferredKind) -> Self {
        Self {
            kind,
            expected: ValueType::Any,
            state: Mutex::new(MemoState::Unevaluated),
        }
    }

    /// Declares the type the consumer expects; results are converted to it.
    pub fn with_type(mut self, expected: ValueType) -> Self {
        self.expected = expected;
        self
    }

    pub fn kind(&self) -> &DeferredKind {
        &self.kind
    }

    /// A copy with an unevaluated memo cell. A compiled query program is shared.
    pub fn fresh(&self) -> Deferred {
        Self {
            kind: self.kind.clone(),
            expected: self.expected.clone(),
            state: Mutex::new(MemoState::Unevaluated),
        }
    }

    /// The current memo state. A cell that is being computed reads as unevaluated.
    pub fn status(&self) -> MemoStatus {
        match self.state.try_lock().as_deref() {
            Ok(MemoState::Success(_)) => MemoStatus::Success,
            Ok(MemoState::Failure) => MemoStatus::Failure,
            _ => MemoStatus::Unevaluated,
        }
    }

    fn range(&self) -> Option<&SourceRange> {
        match &self.kind {
            DeferredKind::Query(query) => query.range(),
            DeferredKind::PluginData(call) => call.range.as_ref(),
        }
    }

    /// Resolves the value against `data`. Runs the computation at most once.
    pub async fn resolve(&self, cx: &EvalContext, data: &Value) -> DiagResult<Value> {
        let mut state = self.state.lock().await;
        match &*state {
            MemoState::Success(value) => return Ok(value.clone()),
            MemoState::Failure => return Err(Diagnostic::repeated().into()),
            MemoState::Unevaluated => {}
        }
        let outcome = self.compute(cx, data).await.and_then(|value| {
            self.expected.convert(value).map_err(|err| {
                let diag = Diagnostic::error("Failed to convert value").with_detail(err);
                let diag = match self.range() {
                    Some(range) => diag.with_range(range.clone()),
                    None => diag,
                };
                Diagnostics::from(diag)
            })
        });
        match outcome {
            Ok(value) => {
                *state = MemoState::Success(value.clone());
                Ok(value)
            }
            Err(diags) => {
                *state = MemoState::Failure;
                Err(diags)
            }
        }
    }

    async fn compute(&self, cx: &EvalContext, data: &Value) -> DiagResult<Value> {
        cx.check_cancelled()?;
        match &self.kind {
            DeferredKind::Query(query) => {
                trace!(query = query.source(), "resolving deferred query");
                query.run(data)
            }
            DeferredKind::PluginData(call) => {
                debug!(plugin = %call.plugin, "resolving deferred plugin data");
                let located = |diags: Diagnostics| match &call.range {
                    Some(range) => diags.refine_range(range),
                    None => diags,
                };
                let source = cx.registry.data_source(&call.plugin).map_err(located)?;
                let config = evaluate(cx, data, &call.config).await.map_err(located)?;
                let args = evaluate(cx, data, &call.args).await.map_err(located)?;
                source
                    .execute(DataParams { config, args }, cx.cancel.clone())
                    .await
                    .map_err(located)
            }
        }
    }
}

/// Deep-walks `value`, resolving every nested deferred against `data`.
///
/// Shapes and marks are preserved. Diagnostics from all children are collected; the
/// walk only fails once every sibling has been visited.
#[async_recursion]
pub async fn evaluate(cx: &EvalContext, data: &Value, value: &Value) -> DiagResult<Value> {
    if !value.has_deferred() {
        return Ok(value.clone());
    }
    match value {
        Value::Deferred(deferred) => deferred.resolve(cx, data).await,
        Value::Marked(inner, marks) => Ok(evaluate(cx, data, inner).await?.marked(*marks)),
        Value::List(items) => {
            let mut diags = Diagnostics::new();
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                match evaluate(cx, data, item).await {
                    Ok(v) => out.push(v),
                    Err(err) => diags.extend(err),
                }
            }
            diags.into_result(Value::list(out))
        }
        Value::Map(map) => {
            let mut diags = Diagnostics::new();
            let mut out = crate::value::Map::new();
            for (key, item) in map.iter() {
                match evaluate(cx, data, item).await {
                    Ok(v) => {
                        out.insert(key.clone(), v);
                    }
                    Err(err) => diags.extend(err),
                }
            }
            diags.into_result(Value::from(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::MockDataSource;
    use crate::value::Marks;
    use mockall::predicate::always;
    use serde_json::json;

    fn context(registry: PluginRegistry) -> EvalContext {
        EvalContext::new(Arc::new(registry))
    }

    fn query(source: &str) -> Value {
        Value::deferred(Deferred::query(Query::new(source)))
    }

    #[tokio::test]
    async fn test_evaluate_preserves_shape_and_marks() {
        let cx = context(PluginRegistry::new());
        let data = Value::from(json!({"vars": {"n": 2}}));
        let value = Value::map([
            ("plain", Value::from("x")),
            ("list", Value::list([query(".vars.n"), Value::from(5)])),
            ("secret", query(".vars.n + 1").marked(Marks::sensitive())),
        ]);

        let resolved = evaluate(&cx, &data, &value).await.unwrap();
        assert_eq!(resolved.get("plain"), Some(&Value::from("x")));
        assert_eq!(resolved.get("list").and_then(Value::as_list).map(<[_]>::len), Some(2));
        assert_eq!(resolved.get_path(&["list"]).unwrap().as_list().unwrap()[0], Value::Integer(2));
        let secret = resolved.get("secret").unwrap();
        assert!(secret.is_sensitive());
        assert_eq!(secret.unmarked(), &Value::Integer(3));
    }

    #[tokio::test]
    async fn test_failure_is_memoized_as_repeated() {
        let cx = context(PluginRegistry::new());
        let value = query(".a.b");
        let data = Value::from(json!({"a": 1}));

        let first = evaluate(&cx, &data, &value).await.unwrap_err();
        assert_eq!(first.len(), 1);
        assert!(!first.iter().any(Diagnostic::is_repeated));

        let second = evaluate(&cx, &data, &value).await.unwrap_err();
        assert!(second.iter().all(Diagnostic::is_repeated));
        assert_eq!(second.to_string(), "");
    }

    #[tokio::test]
    async fn test_plugin_data_call_runs_once() {
        let mut source = MockDataSource::new();
        source
            .expect_execute()
            .with(always(), always())
            .times(1)
            .returning(|params, _| Ok(Value::map([("echo", params.args)])));
        let registry = PluginRegistry::new();
        registry.register_data_source("echo", Arc::new(source));
        let cx = context(registry);

        let value = Value::deferred(Deferred::plugin_data(
            "echo",
            Value::Null,
            Value::map([("v", query(".vars.v"))]),
        ));
        let data = Value::from(json!({"vars": {"v": "hello"}}));
        let first = evaluate(&cx, &data, &value).await.unwrap();
        let second = evaluate(&cx, &data, &value).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.get_path(&["echo", "v"]), Some(&Value::from("hello")));
    }

    #[tokio::test]
    async fn test_fresh_copy_evaluates_again() {
        let cx = context(PluginRegistry::new());
        let template = query(".n");
        let first = evaluate(&cx, &Value::from(json!({"n": 1})), &template).await.unwrap();
        let copy = template.instantiate();
        let second = evaluate(&cx, &Value::from(json!({"n": 2})), &copy).await.unwrap();
        assert_eq!((first, second), (Value::Integer(1), Value::Integer(2)));
    }

    #[tokio::test]
    async fn test_type_conversion_failure_is_diagnostic() {
        let cx = context(PluginRegistry::new());
        let value = Value::deferred(Deferred::query(Query::new(".name")).with_type(ValueType::Number));
        let err = evaluate(&cx, &Value::from(json!({"name": "abc"})), &value)
            .await
            .unwrap_err();
        assert_eq!(err.iter().next().unwrap().summary, "Failed to convert value");
    }
}
