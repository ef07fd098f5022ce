use std::sync::{Arc, Mutex};

use fabric::plugin::{InvocationOrder, MockContentProvider};
use fabric::template::{DocumentBlock, PluginBlock, Template};
use fabric::EngineConfig;
use pretty_assertions::assert_eq;

use super::{engine_with, recording};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tree_keeps_declaration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine = engine_with(vec![
        ("a", recording("A", InvocationOrder::Unspecified, 50, log.clone())),
        ("b", recording("B", InvocationOrder::Unspecified, 0, log.clone())),
        ("c", recording("C", InvocationOrder::Unspecified, 20, log.clone())),
    ]);
    let template = Template::new().with_document(
        DocumentBlock::new("doc")
            .with_content(PluginBlock::content("a", Some("a")))
            .with_content(PluginBlock::content("b", Some("b")).depends_on("content.c.c"))
            .with_content(PluginBlock::content("c", Some("c"))),
    );
    engine.load(&template).unwrap();

    let rendered = engine.render("doc", &[]).await.unwrap();
    assert_eq!(rendered.tree.markdown(), "A\n\nB\n\nC");

    let log = log.lock().unwrap();
    let position = |label| log.iter().position(|l| *l == label).unwrap();
    assert!(position("C") < position("B"));
}

#[tokio::test]
async fn test_begin_failure_stops_later_phases() {
    let mut failing = MockContentProvider::new();
    failing
        .expect_invocation_order()
        .return_const(InvocationOrder::Begin);
    failing
        .expect_execute()
        .times(1)
        .returning(|_, _| Err(fabric::Diagnostics::error("Failed to render", "boom")));
    let mut unspecified = MockContentProvider::new();
    unspecified
        .expect_invocation_order()
        .return_const(InvocationOrder::Unspecified);
    unspecified.expect_execute().times(0);
    let mut end = MockContentProvider::new();
    end.expect_invocation_order().return_const(InvocationOrder::End);
    end.expect_execute().times(0);

    let engine = engine_with(vec![("early", failing), ("middle", unspecified), ("late", end)]);
    let template = Template::new().with_document(
        DocumentBlock::new("doc")
            .with_content(PluginBlock::content("late", None))
            .with_content(PluginBlock::content("middle", None))
            .with_content(PluginBlock::content("early", None)),
    );
    engine.load(&template).unwrap();

    let err = engine.render("doc", &[]).await.unwrap_err();
    let diags = err.diagnostics().unwrap();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags.iter().next().unwrap().summary, "Failed to render");
}

#[tokio::test]
async fn test_unknown_dependency_is_reported() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine = engine_with(vec![("a", recording("A", InvocationOrder::Unspecified, 0, log))]);
    let template = Template::new().with_document(
        DocumentBlock::new("doc")
            .with_content(PluginBlock::content("a", Some("a")).depends_on("content.a.nope")),
    );
    engine.load(&template).unwrap();

    let err = engine.render("doc", &[]).await.unwrap_err();
    assert_eq!(
        err.diagnostics().unwrap().iter().next().unwrap().summary,
        "Dependency not found"
    );
}

#[tokio::test]
async fn test_strict_order_requires_earlier_declaration() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = fabric::plugin::PluginRegistry::with_builtins();
    registry.register_content_provider(
        "a",
        Arc::new(recording("A", InvocationOrder::Unspecified, 0, log.clone())),
    );
    let config = EngineConfig {
        strict_dependency_order: true,
        ..EngineConfig::default()
    };
    let engine = fabric::Engine::new(Arc::new(registry), config);
    let template = Template::new().with_document(
        DocumentBlock::new("doc")
            .with_content(PluginBlock::content("a", Some("first")).depends_on("content.a.second"))
            .with_content(PluginBlock::content("a", Some("second"))),
    );
    engine.load(&template).unwrap();

    let err = engine.render("doc", &[]).await.unwrap_err();
    assert_eq!(
        err.diagnostics().unwrap().iter().next().unwrap().summary,
        "Dependency not found"
    );
    assert!(log.lock().unwrap().is_empty());
}
