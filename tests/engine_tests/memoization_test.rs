use std::sync::Arc;

use fabric::deferred::{evaluate, Deferred, EvalContext, MemoStatus};
use fabric::plugin::{MockDataSource, PluginRegistry};
use fabric::query::Query;
use fabric::template::{DocumentBlock, PluginBlock, Template};
use fabric::{Diagnostics, Engine, EngineConfig, Value};
use pretty_assertions::assert_eq;
use serde_json::json;

fn failing_source(calls: usize) -> MockDataSource {
    let mut source = MockDataSource::new();
    source
        .expect_execute()
        .times(calls)
        .returning(|_, _| Err(Diagnostics::error("Failed to fetch", "backend unavailable")));
    source
}

#[tokio::test]
async fn test_failed_deferred_is_reported_once() {
    let registry = PluginRegistry::new();
    registry.register_data_source("flaky", Arc::new(failing_source(1)));
    let cx = EvalContext::new(Arc::new(registry));
    let value = Value::list([
        Value::deferred(Deferred::plugin_data("flaky", Value::Null, Value::Null)),
        Value::from(1),
    ]);

    let first = evaluate(&cx, &Value::Null, &value).await.unwrap_err();
    assert_eq!(first.to_string(), "error: Failed to fetch: backend unavailable");

    let second = evaluate(&cx, &Value::Null, &value).await.unwrap_err();
    assert!(second.has_errors());
    assert_eq!(second.to_string(), "");
    assert_eq!(second.without_repeated().len(), 0);
}

#[tokio::test]
async fn test_query_memo_status() {
    let cx = EvalContext::new(Arc::new(PluginRegistry::new()));
    let deferred = Arc::new(Deferred::query(Query::new(".n + 1")));
    let value = Value::Deferred(deferred.clone());
    assert_eq!(deferred.status(), MemoStatus::Unevaluated);

    let data = Value::from(json!({"n": 1}));
    assert_eq!(evaluate(&cx, &data, &value).await.unwrap(), Value::from(2));
    assert_eq!(deferred.status(), MemoStatus::Success);

    // a later read ignores the new context
    let other = Value::from(json!({"n": 10}));
    assert_eq!(evaluate(&cx, &other, &value).await.unwrap(), Value::from(2));
}

#[tokio::test]
async fn test_each_render_evaluates_arguments_afresh() {
    let mut source = MockDataSource::new();
    source
        .expect_execute()
        .times(2)
        .returning(|_, _| Ok(Value::from("fresh")));
    let registry = PluginRegistry::with_builtins();
    registry.register_data_source("clock", Arc::new(source));
    let engine = Engine::new(Arc::new(registry), EngineConfig::default());
    let args = Value::map([(
        "value",
        Value::deferred(Deferred::plugin_data("clock", Value::Null, Value::Null)),
    )]);
    let template = Template::new()
        .with_document(DocumentBlock::new("doc").with_content(PluginBlock::content("text", None).with_args(args)));
    engine.load(&template).unwrap();

    for _ in 0..2 {
        let rendered = engine.render("doc", &[]).await.unwrap();
        assert_eq!(rendered.tree.markdown(), "fresh");
    }
}
