use std::sync::Arc;

use fabric::plugin::{MockDataSource, PluginRegistry};
use fabric::template::{DocumentBlock, PluginBlock, Template};
use fabric::{Engine, EngineConfig, Value};
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn test_incompatible_results_conflict_once() {
    let engine = Engine::with_builtins(EngineConfig::default());
    let template = Template::new().with_document(
        DocumentBlock::new("doc")
            .with_data(PluginBlock::data("inline", "x").with_args(json!({"v": 1})))
            .with_data(PluginBlock::data("inline", "x").with_args(json!([1, 2]))),
    );
    engine.load(&template).unwrap();

    let err = engine.fetch_data("doc").await.unwrap_err();
    let diags = err.diagnostics().unwrap();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags.iter().next().unwrap().summary, "Conflicting data");
}

#[tokio::test]
async fn test_results_nest_under_plugin_and_block() {
    let engine = Engine::with_builtins(EngineConfig::default());
    let template = Template::new().with_document(
        DocumentBlock::new("doc")
            .with_data(PluginBlock::data("inline", "a").with_args(json!({"v": 1})))
            .with_data(PluginBlock::data("inline", "b").with_args(json!("text"))),
    );
    engine.load(&template).unwrap();

    let data = engine.fetch_data("doc").await.unwrap();
    assert_eq!(
        data,
        Value::from(json!({"inline": {"a": {"v": 1}, "b": "text"}}))
    );
}

#[tokio::test]
async fn test_data_source_receives_resolved_config() {
    let mut source = MockDataSource::new();
    source
        .expect_execute()
        .times(1)
        .withf(|params, _| params.config == Value::from(json!({"dsn": "db://reports"})))
        .returning(|_, _| Ok(Value::from(json!([1, 2, 3]))));
    let registry = PluginRegistry::with_builtins();
    registry.register_data_source("sql", Arc::new(source));
    let engine = Engine::new(Arc::new(registry), EngineConfig::default());
    let template = Template::new().with_document(
        DocumentBlock::new("doc").with_data(
            PluginBlock::data("sql", "rows").with_config(json!({"dsn": "db://reports"})),
        ),
    );
    engine.load(&template).unwrap();

    let data = engine.fetch_data("doc").await.unwrap();
    assert_eq!(data.get_path(&["sql", "rows"]), Some(&Value::from(json!([1, 2, 3]))));
}
