use std::sync::Arc;

use fabric::plugin::{MockPublisher, PluginRegistry};
use fabric::template::{DocumentBlock, PluginBlock, Template};
use fabric::{Diagnostics, Engine, EngineConfig};
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn test_local_file_writes_markdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("{{ .data.inline.meta.slug }}.md");
    let template = Template::new().with_document(
        DocumentBlock::new("doc")
            .with_data(PluginBlock::data("inline", "meta").with_args(json!({"slug": "weekly"})))
            .with_content(PluginBlock::content("text", None).with_args(json!({"value": "hello"})))
            .with_content(PluginBlock::content("text", None).with_args(json!({"value": "world"})))
            .with_publish(
                PluginBlock::publish("local_file", None)
                    .with_args(json!({"path": path.to_string_lossy()})),
            ),
    );
    let engine = Engine::with_builtins(EngineConfig::default());
    engine.load(&template).unwrap();

    engine.publish("doc").await.unwrap();
    let written = std::fs::read_to_string(dir.path().join("out").join("weekly.md")).unwrap();
    assert_eq!(written, "hello\n\nworld\n");
}

#[tokio::test]
async fn test_publisher_errors_are_collected() {
    let mut first = MockPublisher::new();
    first
        .expect_execute()
        .times(1)
        .returning(|_, _| Err(Diagnostics::error("Failed to upload", "denied")));
    let mut second = MockPublisher::new();
    second
        .expect_execute()
        .times(1)
        .withf(|params, _| params.document_name == "doc" && params.content.markdown() == "body")
        .returning(|_, _| Err(Diagnostics::error("Failed to notify", "offline")));
    let registry = PluginRegistry::with_builtins();
    registry.register_publisher("upload", Arc::new(first));
    registry.register_publisher("notify", Arc::new(second));
    let engine = Engine::new(Arc::new(registry), EngineConfig::default());
    let template = Template::new().with_document(
        DocumentBlock::new("doc")
            .with_content(PluginBlock::content("text", None).with_args(json!({"value": "body"})))
            .with_publish(PluginBlock::publish("upload", None))
            .with_publish(PluginBlock::publish("notify", None)),
    );
    engine.load(&template).unwrap();

    let err = engine.publish("doc").await.unwrap_err();
    let summaries: Vec<_> = err
        .diagnostics()
        .unwrap()
        .iter()
        .map(|d| d.summary.clone())
        .collect();
    assert_eq!(summaries, vec!["Failed to upload", "Failed to notify"]);
}
